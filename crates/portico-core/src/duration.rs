//! Parsing of duration strings such as `300ms`, `5s` or `1m30s`.

use crate::{PorticoError, PorticoResult};
use std::time::Duration;

/// Parses a duration made of one or more `<number><unit>` segments.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Fractional numbers are
/// accepted (`1.5s`). The result must be strictly positive.
pub fn parse_duration(input: &str) -> PorticoResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(PorticoError::Validation("empty duration".into()));
    }
    if s.starts_with('-') {
        return Err(PorticoError::Validation(format!(
            "duration must be positive: {s}"
        )));
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s.strip_prefix('+').unwrap_or(s);

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid(s));
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid(s))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            "" => {
                return Err(PorticoError::Validation(format!(
                    "missing unit in duration {s}"
                )))
            }
            other => {
                return Err(PorticoError::Validation(format!(
                    "unknown unit {other} in duration {s}"
                )))
            }
        };
        total_nanos += value * scale;
    }

    if total_nanos < 1.0 || !total_nanos.is_finite() {
        return Err(PorticoError::Validation(format!(
            "duration must be positive: {s}"
        )));
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

fn invalid(s: &str) -> PorticoError {
    PorticoError::Validation(format!("invalid duration {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn test_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("0s").is_err());
    }
}
