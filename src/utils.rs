use anyhow::{anyhow, Result};
use chrono::{LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use std::time::Duration;

/// Pattern used in notification bodies, e.g. "17/10/2026 09:05:00"
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Formats an epoch-millisecond timestamp as `DD/MM/YYYY HH:MM:SS` in the given zone
pub fn format_timestamp(epoch_ms: i64, tz: &Tz) -> String {
    match tz.timestamp_millis_opt(epoch_ms).single() {
        Some(date) => date.format(TIMESTAMP_FORMAT).to_string(),
        None => format!("@{}", epoch_ms),
    }
}

/// Inverse of [`format_timestamp`], precision is one second
pub fn parse_timestamp(text: &str, tz: &Tz) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| anyhow!("Invalid timestamp '{}': {}", text, e))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(date) => Ok(date.timestamp_millis()),
        LocalResult::Ambiguous(first, second) => Err(anyhow!(
            "Timestamp '{}' is ambiguous in {}: it occurs at offset {} and again at {}",
            text,
            tz,
            first.offset(),
            second.offset()
        )),
        LocalResult::None => Err(anyhow!("Timestamp '{}' does not exist in {}", text, tz)),
    }
}

/// Converts a Duration to a human-readable string with at most 2 units
/// e.g., "1 h, 30 m", "5 m, 20 s", "1 s, 133 ms", "10 ms"
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();

    // Unit definitions in milliseconds
    const MS_PER_SEC: u128 = 1_000;
    const MS_PER_MIN: u128 = MS_PER_SEC * 60;
    const MS_PER_HOUR: u128 = MS_PER_MIN * 60;
    const MS_PER_DAY: u128 = MS_PER_HOUR * 24;

    // Early return for zero duration
    if total_ms == 0 {
        return "0 ms".to_string();
    }

    // Calculate components
    let days = total_ms / MS_PER_DAY;
    let hours = (total_ms % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (total_ms % MS_PER_HOUR) / MS_PER_MIN;
    let seconds = (total_ms % MS_PER_MIN) / MS_PER_SEC;
    let milliseconds = total_ms % MS_PER_SEC;

    // Find the first two non-zero components
    let mut result = String::new();
    let mut units_added = 0;

    if days > 0 && units_added < 2 {
        result.push_str(&format!("{} d", days));
        units_added += 1;
    }

    if hours > 0 && units_added < 2 {
        if !result.is_empty() {
            result.push_str(", ");
        }
        result.push_str(&format!("{} h", hours));
        units_added += 1;
    }

    if minutes > 0 && units_added < 2 {
        if !result.is_empty() {
            result.push_str(", ");
        }
        result.push_str(&format!("{} m", minutes));
        units_added += 1;
    }

    if seconds > 0 && units_added < 2 {
        if !result.is_empty() {
            result.push_str(", ");
        }
        result.push_str(&format!("{} s", seconds));
        units_added += 1;
    }

    if milliseconds > 0 && units_added < 2 {
        if !result.is_empty() {
            result.push_str(", ");
        }
        result.push_str(&format!("{} ms", milliseconds));
        units_added += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        // Test various durations
        assert_eq!(format_duration(Duration::from_secs(0)), "0 ms");
        assert_eq!(format_duration(Duration::from_millis(10)), "10 ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1 s, 500 ms");
        assert_eq!(format_duration(Duration::from_secs(65)), "1 m, 5 s");
        assert_eq!(format_duration(Duration::from_secs(3600 + 120)), "1 h, 2 m");
        assert_eq!(format_duration(Duration::from_secs(86400 + 3600)), "1 d, 1 h");

        // Check more complex durations
        let duration = Duration::from_secs(90061); // 1 d, 1 h, 1 m, 1 s
        assert_eq!(format_duration(duration), "1 d, 1 h"); // Should only show first 2 units

        let duration = Duration::from_millis(59999); // 59 s, 999 ms
        assert_eq!(format_duration(duration), "59 s, 999 ms");
    }

    #[test]
    fn test_format_timestamp() {
        // 2024-03-05 14:07:09.250 UTC
        let ms = 1_709_647_629_250;
        assert_eq!(format_timestamp(ms, &chrono_tz::UTC), "05/03/2024 14:07:09");
        assert_eq!(format_timestamp(ms, &chrono_tz::Europe::Madrid), "05/03/2024 15:07:09");
    }

    #[test]
    fn test_timestamp_round_trip() {
        for tz in [chrono_tz::UTC, chrono_tz::Europe::Madrid, chrono_tz::America::New_York] {
            for ms in [0i64, 1_709_647_629_250, 1_760_700_000_999] {
                let text = format_timestamp(ms, &tz);
                let parsed = parse_timestamp(&text, &tz).unwrap();
                assert!((parsed - ms).abs() < 1000, "{} -> {} -> {}", ms, text, parsed);
            }
        }
    }

    #[test]
    fn test_timestamp_round_trip_across_fall_back() {
        // 2024-10-27 01:30 UTC, inside the hour Madrid repeats when leaving summer time
        let ms = 1_729_992_600_000;
        let text = format_timestamp(ms, &chrono_tz::UTC);
        assert_eq!(text, "27/10/2024 01:30:00");
        assert_eq!(parse_timestamp(&text, &chrono_tz::UTC).unwrap(), ms);

        let madrid = chrono_tz::Europe::Madrid;
        let text = format_timestamp(ms, &madrid);
        assert_eq!(text, "27/10/2024 02:30:00");
        let err = parse_timestamp(&text, &madrid).unwrap_err();
        assert!(err.to_string().contains("ambiguous"), "{}", err);

        // Spring-forward gap
        assert!(parse_timestamp("31/03/2024 02:30:00", &madrid).is_err());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("2024-03-05 14:07:09", &chrono_tz::UTC).is_err());
        assert!(parse_timestamp("32/01/2024 00:00:00", &chrono_tz::UTC).is_err());
    }
}