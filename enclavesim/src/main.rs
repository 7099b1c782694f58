use std::fs::File;
use std::io::BufReader;
use std::time::Instant;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use enclavelib::config::SimConfig;
use enclavelib::io::load_trace;
use enclavelib::simulator::Simulator;
use enclavelib::stats::Event;

#[derive(Parser, Debug)]
#[command(about = String::from("Trace driven cache hierarchy simulator for enclave partitioning"))]
struct Args {
    /// JSON hierarchy configuration
    config: String,
    /// Merged trace, one `<timestamp> <owner> <enclave> <address> <op>` record per line
    trace: String,

    #[arg(short, long)]
    performance: bool,

    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), String> {
    let start = Instant::now();
    let args = Args::parse();
    init_logging(args.debug);

    let config_file = File::open(&args.config).map_err(|e| format!("Couldn't open the config file at path {}: {e}", args.config))?;
    let config = SimConfig::from_reader(BufReader::new(config_file)).map_err(|e| format!("Couldn't load the config file: {e}"))?;
    info!(config = %args.config, caches = config.caches.len(), "Loaded configuration");
    let mut simulator = Simulator::new(&config).map_err(|e| format!("Invalid configuration: {e}"))?;
    let trace_file = File::open(&args.trace).map_err(|e| format!("Couldn't open the trace file at path {}: {e}", args.trace))?;
    let trace = load_trace(trace_file)?;
    let result = simulator.simulate(&trace).map_err(|e| format!("Couldn't simulate {}: {e}", args.trace))?;
    info!(trace = %args.trace, accesses = result.accesses, seconds = simulator.get_execution_time().as_secs_f64(), "Finished simulation");
    println!("{}", serde_json::to_string_pretty(&result).map_err(|e| format!("Couldn't serialise the output {e}"))?);

    if args.performance {
        let end = Instant::now();
        let simulation_time = simulator.get_execution_time();
        let total_time = end - start;
        println!("Simulation time: {}s", simulation_time.as_nanos() as f64 / 1e9);
        println!("Total execution time (includes initial parsing, configuration, and output): {}s", total_time.as_nanos() as f64 / 1e9)
    }
    if args.debug {
        println!("Parsed input configuration: {config:?}");
        let valid_lines = simulator.get_valid_line_counts();
        let formatted = valid_lines
            .iter()
            .map(|(name, core, count)| match core {
                Some(core) => format!("{name} (core {core}): {count}"),
                None => format!("{name}: {count}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!("Valid cache lines by instance: ({formatted})");
        println!("Total valid cache lines: {}", valid_lines.iter().map(|(_, _, count)| count).sum::<usize>());
        println!("Recorded events:");
        for event in Event::ALL.iter().filter(|event| result.global.contains_key(event.name())) {
            println!("  {}: {}", event.name(), event.description());
        }
    }
    Ok(())
}
