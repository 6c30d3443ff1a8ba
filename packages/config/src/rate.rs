//! Byte size and bandwidth parsing (`"100M"`, `"1.5G"`, `"512KiB"`, `"off"`).
//!
//! Suffixes are binary: `K` = 1024, `M` = 1024², and so on.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use crate::error::ConfigError;

/// Parse a byte size such as `"4M"` or `"65536"`.
///
/// # Errors
///
/// * If the value is not a non-negative number with an optional unit suffix
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_size(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let unit_start = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(unit_start);

    let number: f64 = number
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{value}' is not a size")))?;

    let unit = unit.trim().trim_end_matches("/s").to_ascii_uppercase();
    let unit = unit
        .strip_suffix("IB")
        .or_else(|| unit.strip_suffix('B'))
        .unwrap_or(&unit);
    let multiplier: u64 = match unit {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        other => {
            return Err(ConfigError::invalid(
                field,
                format!("unknown unit '{other}' in '{value}'"),
            ));
        }
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(ConfigError::invalid(field, format!("'{value}' is too large")));
    }
    Ok(bytes.round() as u64)
}

/// Parse a bandwidth limit in bytes per second.
///
/// `"off"`, an empty string, or zero mean unlimited and yield `None`.
///
/// # Errors
///
/// * If the value cannot be parsed as a size
pub fn parse_rate(field: &'static str, value: &str) -> Result<Option<u64>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let bytes = parse_size(field, trimmed)?;
    Ok((bytes > 0).then_some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("chunkSize", "65536").unwrap(), 65_536);
        assert_eq!(parse_size("chunkSize", "10B").unwrap(), 10);
        assert_eq!(parse_size("chunkSize", "4K").unwrap(), 4096);
        assert_eq!(parse_size("chunkSize", "100M").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("chunkSize", "1.5G").unwrap(), 1_610_612_736);
        assert_eq!(parse_size("chunkSize", "2MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("chunkSize", "8m").unwrap(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("chunkSize", "fast").is_err());
        assert!(parse_size("chunkSize", "10X").is_err());
        assert!(parse_size("chunkSize", "").is_err());
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("bwlimit", "off").unwrap(), None);
        assert_eq!(parse_rate("bwlimit", "0").unwrap(), None);
        assert_eq!(parse_rate("bwlimit", "").unwrap(), None);
        assert_eq!(parse_rate("bwlimit", "1M/s").unwrap(), Some(1024 * 1024));
        assert_eq!(parse_rate("bwlimit", "100M").unwrap(), Some(100 * 1024 * 1024));
    }
}
