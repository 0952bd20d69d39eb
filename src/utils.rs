//! Small helpers: size parsing, memory probing, scratch directory selection
//! and formatting for diagnostics.

use std::fmt;
use std::path::PathBuf;

use num_enum::TryFromPrimitive;
use sysinfo::{System, SystemExt};

/// Parse a size argument with optional g/m/k suffix (case-insensitive).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num, mult) = match s.as_bytes()[s.len() - 1].to_ascii_lowercase() {
        b'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        b'm' => (&s[..s.len() - 1], 1024 * 1024),
        b'k' => (&s[..s.len() - 1], 1024),
        _ => (s, 1),
    };
    num.parse::<u64>().ok()?.checked_mul(mult)
}

/// Total physical memory in bytes.
pub fn total_ram() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// 80% of the given amount; chunk sizes must stay below this fraction of RAM.
pub fn eighty_pct(x: u64) -> u64 {
    x - x / 5
}

/// Scratch directory for spill state: TMPDIR, then HOME, then the current
/// working directory, then /tmp; first existing directory wins.
pub fn scratch_dir() -> PathBuf {
    for var in ["TMPDIR", "HOME"] {
        if let Some(dir) = std::env::var_os(var) {
            let p = PathBuf::from(dir);
            if p.is_dir() {
                return p;
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.is_dir() {
            return cwd;
        }
    }
    PathBuf::from("/tmp")
}

/// Human-readable byte count for the stats display.
pub fn bytes_to_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut v = bytes as f64;
    let mut u = 0;
    while v >= 1024.0 && u < UNITS.len() - 1 {
        v /= 1024.0;
        u += 1;
    }
    if u == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", v, UNITS[u])
    }
}

pub fn enum_name_or_hex<T>(raw: T::Primitive) -> String
where
    T: TryFromPrimitive + fmt::Debug,
    T::Primitive: fmt::LowerHex,
{
    match T::try_from_primitive(raw) {
        Ok(variant) => format!("{:?}", variant),
        Err(_) => format!("0x{:x}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("5m"), Some(5 * 1024 * 1024));
        assert_eq!(parse_size("2G"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("16k"), Some(16 * 1024));
        assert_eq!(parse_size("bogus"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn eighty_pct_of_ten() {
        assert_eq!(eighty_pct(10), 8);
    }

    #[test]
    fn scratch_dir_exists() {
        assert!(scratch_dir().is_dir() || scratch_dir() == PathBuf::from("/tmp"));
    }
}
