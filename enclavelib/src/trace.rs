use lazy_static::lazy_static;
use regex::Regex;
use crate::error::TraceError;
use crate::hierarchy::{Access, Operation};

lazy_static! {
    static ref RECORD: Regex = Regex::new(
        r"^\s*(?P<time>[0-9]+(?:\.[0-9]*)?)\s+(?P<owner>[0-9]+)\s+(?P<mode>[01])\s+(?:0[xX])?(?P<addr>[0-9a-fA-F]+)\s+(?P<op>[0-2])\s*$"
    ).expect("the trace record pattern is valid");
}

/// Parses one trace line of the form `<timestamp> <owner> <enclave 0|1> <hex address> <op 0|1|2>`
///
/// Blank lines and lines starting with `#` yield `Ok(None)`. `line` is the 1-based line number,
/// used for errors only
///
/// # Examples
///
/// ```
/// use enclavelib::hierarchy::Operation;
/// use enclavelib::trace::parse_record;
/// let access = parse_record("12 3 1 0x7ffd10 1", 1).unwrap().unwrap();
/// assert_eq!(access.owner, 3);
/// assert!(access.enclave);
/// assert_eq!(access.address, 0x7ffd10);
/// assert_eq!(access.op, Operation::Store);
/// ```
pub fn parse_record(text: &str, line: usize) -> Result<Option<Access>, TraceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let malformed = || TraceError::Malformed {
        line,
        text: trimmed.to_string(),
    };
    let captures = RECORD.captures(trimmed).ok_or_else(malformed)?;
    let timestamp = captures["time"].parse::<f64>().map_err(|_| malformed())?;
    let owner = captures["owner"].parse::<usize>().map_err(|_| malformed())?;
    let address = u64::from_str_radix(&captures["addr"], 16).map_err(|_| malformed())?;
    let op = match &captures["op"] {
        "0" => Operation::Load,
        "1" => Operation::Store,
        _ => Operation::Fetch,
    };
    Ok(Some(Access {
        owner,
        enclave: &captures["mode"] == "1",
        address,
        op,
        timestamp,
    }))
}

/// Iterates over the records of a whole trace, skipping blank and comment lines
pub fn records(bytes: &[u8]) -> impl Iterator<Item = Result<(usize, Access), TraceError>> + '_ {
    bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .filter_map(|(i, raw)| {
            let line = i + 1;
            let text = match std::str::from_utf8(raw) {
                Ok(text) => text,
                Err(_) => return Some(Err(TraceError::Encoding { line })),
            };
            parse_record(text, line).map(|access| access.map(|a| (line, a))).transpose()
        })
}
