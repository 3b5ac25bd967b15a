//! Reading and parsing keys for the command-line tool.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Reads the whole key file into a single buffer; `-` denotes the standard input.
pub fn slurp(path: &Path) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    if path.as_os_str() == "-" {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(path)?.read_to_end(&mut data)?;
    }
    Ok(data)
}

/// Returns the non-empty lines of `data` with the separators (and a trailing `\r`) stripped.
///
/// Each returned key borrows from `data`; the slab outlives the built function only
/// for as long as the caller keeps it.
pub fn slab_keys(data: &[u8]) -> Vec<&[u8]> {
    data.split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Parses an unsigned integer the way `strtoull` with base 0 does:
/// a `0x`/`0X` prefix selects hexadecimal, a leading `0` octal, anything else decimal.
pub fn parse_int(src: &str) -> Option<u64> {
    let src = src.trim();
    if let Some(hex) = src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if src.len() > 1 && src.starts_with('0') {
        u64::from_str_radix(&src[1..], 8).ok()
    } else {
        src.parse().ok()
    }
}

/// Parses the seed argument of the command line.
pub fn parse_seed(src: &str) -> Result<u32, String> {
    parse_int(src)
        .map(|seed| seed as u32)
        .ok_or_else(|| format!("invalid seed: {}", src))
}
