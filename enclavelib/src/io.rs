use std::fs::File;
use std::ops::Deref;

/// The bytes of a trace file, memory mapped where the platform allows it
pub enum TraceBytes {
    #[cfg(unix)]
    Mapped(memmap2::Mmap),
    Buffered(Vec<u8>),
}

impl Deref for TraceBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            #[cfg(unix)]
            TraceBytes::Mapped(map) => map,
            TraceBytes::Buffered(buf) => buf,
        }
    }
}

pub fn load_trace(file: File) -> Result<TraceBytes, String> {
    // Compatibility on other systems
    #[cfg(not(unix))]
    {
        use std::io::{BufReader, Read};
        const BUFFER_SIZE: usize = 64 * 4096;
        let mut buf = Vec::new();
        BufReader::with_capacity(BUFFER_SIZE, file)
            .read_to_end(&mut buf)
            .map_err(|e| format!("Couldn't read the trace file: {e}"))?;
        Ok(TraceBytes::Buffered(buf))
    }
    // Memory map the file on unix systems, the trace is read front to back exactly once
    #[cfg(unix)]
    {
        use memmap2::{Advice, Mmap};
        let len = file.metadata().map_err(|e| format!("Couldn't read the trace file metadata: {e}"))?.len();
        // Mapping an empty file fails on some systems
        if len == 0 {
            return Ok(TraceBytes::Buffered(Vec::new()));
        }
        unsafe {
            let m = Mmap::map(&file).map_err(|e| format!("Couldn't memory map the file: {e}"))?;
            m.advise(Advice::Sequential).map_err(|e| format!("Failed to provide access advice to the OS, {e}"))?;
            Ok(TraceBytes::Mapped(m))
        }
    }
}
