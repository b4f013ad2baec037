//! Formatting and parsing of human-readable sizes.

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= GIB => format!("{:.1} GB", b as f64 / GIB as f64),
        b if b >= MIB => format!("{:.1} MB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.1} KB", b as f64 / KIB as f64),
        b => format!("{} B", b),
    }
}

/// Parse a guest memory size into MiB.
///
/// Accepts a bare number of megabytes or a number suffixed with `m`, `mb`,
/// `g` or `gb`, case-insensitively.
pub fn parse_memory(s: &str) -> Result<u32, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty memory value".to_string());
    }

    let (digits, multiplier) = [("gb", 1024u32), ("g", 1024), ("mb", 1), ("m", 1)]
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((s.as_str(), 1));

    let value: u32 = digits
        .parse()
        .map_err(|_| format!("invalid memory value: {s}"))?;
    if value == 0 {
        return Err("memory must be non-zero".to_string());
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory value too large: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1048576), "100.0 MB");
        assert_eq!(format_bytes(2 * 1073741824), "2.0 GB");
    }

    #[test]
    fn test_parse_memory_suffixes() {
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("512m").unwrap(), 512);
        assert_eq!(parse_memory("256MB").unwrap(), 256);
        assert_eq!(parse_memory("2g").unwrap(), 2048);
        assert_eq!(parse_memory("4GB").unwrap(), 4096);
        assert_eq!(parse_memory("  1g ").unwrap(), 1024);
    }

    #[test]
    fn test_parse_memory_invalid() {
        assert!(parse_memory("").is_err());
        assert!(parse_memory("abc").is_err());
        assert!(parse_memory("1.5g").is_err());
        assert!(parse_memory("0").is_err());
        assert!(parse_memory("-1").is_err());
        assert!(parse_memory("4194304g").is_err());
    }
}
