/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use humanize_rs::ParseError;

/// Parse a humanized duration such as `100ms`, `15s` or `1h2m`. A bare number
/// is in seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    match humanize_rs::duration::parse(s) {
        Ok(d) => Ok(d),
        Err(ParseError::MissingUnit) => {
            if let Ok(u) = u64::from_str(s) {
                Ok(Duration::from_secs(u))
            } else if let Ok(f) = f64::from_str(s) {
                Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
            } else {
                Err(anyhow!("unsupported duration string {s}"))
            }
        }
        Err(e) => Err(anyhow!("invalid humanize duration string {s}: {e}")),
    }
}

/// Parse `min:max`, both sides durations.
pub fn parse_duration_range(s: &str) -> anyhow::Result<(Duration, Duration)> {
    let (min, max) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("duration range should be min:max"))?;
    let min = parse_duration(min)?;
    let max = parse_duration(max)?;
    if min > max {
        return Err(anyhow!("duration range {s} has min above max"));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1h2m").unwrap(), Duration::from_secs(3720));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("-10s").is_err());
        assert!(parse_duration("10Ah").is_err());
    }

    #[test]
    fn range() {
        let (min, max) = parse_duration_range("100ms:1s").unwrap();
        assert_eq!(min, Duration::from_millis(100));
        assert_eq!(max, Duration::from_secs(1));
        assert!(parse_duration_range("2s:1s").is_err());
        assert!(parse_duration_range("2s").is_err());
    }
}
