pub mod file;
pub mod logging;
pub mod timeunit;
pub mod validation;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::{Tz, UTC};
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space0};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::{delimited, separated_pair, terminated};
use nom::IResult;

use std::path::PathBuf;
use std::time::Duration;

use self::file::{ConfigFile, NotificationDefinition};
use self::logging::LoggingConfig;
use self::timeunit::TimeUnit;
use crate::fetch::FetchSettings;
use crate::scheduler::SchedulerSettings;

pub const DEFAULT_STORE_PATH: &str = "keyword-watch.db";

/// Zone name selecting the host's own time zone
pub const LOCAL_TIMEZONE: &str = "local";

pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(1);
pub const MIN_SCHEDULER_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct Config {
    pub store: PathBuf,
    pub timezone: Tz,
    pub fetch: FetchSettings,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingConfig,
    pub notifications: Vec<NotificationDefinition>,
}

pub fn parse_config_file(file: &ConfigFile) -> Result<Config> {
    let timezone = resolve_timezone(file.timezone.as_deref())?;

    let mut fetch = FetchSettings::default();
    if let Some(def) = &file.fetch {
        if let Some(timeout) = &def.timeout {
            fetch.timeout = parse_bounded("fetch.timeout", timeout, MIN_FETCH_TIMEOUT)?;
        }
        if let Some(max_bytes) = def.max_bytes {
            if max_bytes == 0 {
                bail!("Malformed field: fetch.max_bytes must be positive");
            }
            fetch.max_bytes = max_bytes;
        }
        fetch.user_agent = def.user_agent.clone();
    }

    let mut scheduler = SchedulerSettings::default();
    if let Some(def) = &file.scheduler {
        if let Some(min_interval) = &def.min_interval {
            scheduler.min_interval =
                parse_bounded("scheduler.min_interval", min_interval, MIN_SCHEDULER_INTERVAL)?;
        }
        if let Some(poll) = &def.poll {
            scheduler.poll = parse_bounded("scheduler.poll", poll, MIN_POLL)?;
        }
    }

    let notifications = if file.notifications.is_empty() {
        vec![NotificationDefinition::Log]
    } else {
        file.notifications.clone()
    };

    Ok(Config {
        store: PathBuf::from(file.store.as_deref().unwrap_or(DEFAULT_STORE_PATH)),
        timezone,
        fetch,
        scheduler,
        logging: file.logging.clone().unwrap_or_default(),
        notifications,
    })
}

/// Timestamps are shown in UTC unless a zone is configured.
/// "local" picks the host zone, whose repeated DST hour cannot be parsed back.
pub fn resolve_timezone(name: Option<&str>) -> Result<Tz> {
    match name {
        None => Ok(UTC),
        Some(LOCAL_TIMEZONE) => Ok(system_timezone()),
        Some(name) => name
            .parse()
            .map_err(|e| anyhow!("Unable to parse timezone '{}': {}", name, e)),
    }
}

/// Falls back to UTC when the host zone cannot be determined
pub fn system_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse().ok())
        .unwrap_or(UTC)
}

/// Parses durations like "30s", "15 m", "1hour" or "2 minutes"
pub fn parse_duration(input: &str) -> Result<Duration> {
    let amount_unit = separated_pair(number, space0, terminated(TimeUnit::parse, opt(tag("s"))));
    let line = delimited(space0, amount_unit, space0);

    let result = all_consuming(line)(input);

    let (amount, unit) = result
        .map_err(|e| anyhow!("Failed to parse duration '{}': {}", input, e))?
        .1;

    Ok(unit.to_duration(amount))
}

fn parse_bounded(field: &str, value: &str, min: Duration) -> Result<Duration> {
    let duration = parse_duration(value).with_context(|| format!("Malformed field: {}", field))?;
    if duration < min {
        bail!(
            "Malformed field: {} must be at least {}",
            field,
            crate::utils::format_duration(min)
        );
    }
    Ok(duration)
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

#[cfg(test)]
mod tests {
    use super::file::parse_config_str;
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 15 m ").unwrap(), Duration::from_secs(15 * 60));
        assert_eq!(parse_duration("2 minutes").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1hour").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(7 * 24 * 3600));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let file = parse_config_str("timezone: UTC").unwrap();
        let config = parse_config_file(&file).unwrap();

        assert_eq!(config.store, PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(config.timezone, UTC);
        assert_eq!(config.fetch.timeout, Duration::from_secs(30));
        assert_eq!(config.scheduler.min_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.notifications, vec![NotificationDefinition::Log]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overrides_applied() {
        let file = parse_config_str(
            "timezone: Europe/Madrid\nfetch:\n  timeout: 5s\n  max_bytes: 1024\nscheduler:\n  min_interval: 1m\n  poll: 500ms\n",
        )
        .unwrap();
        let config = parse_config_file(&file).unwrap();

        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(config.fetch.timeout, Duration::from_secs(5));
        assert_eq!(config.fetch.max_bytes, 1024);
        assert_eq!(config.scheduler.min_interval, Duration::from_secs(60));
        assert_eq!(config.scheduler.poll, Duration::from_millis(500));
    }

    #[test]
    fn test_bad_fields_rejected() {
        let file = parse_config_str("timezone: Mars/Olympus").unwrap();
        assert!(parse_config_file(&file).is_err());

        let file = parse_config_str("fetch:\n  timeout: soon\n").unwrap();
        let err = parse_config_file(&file).unwrap_err();
        assert!(format!("{:#}", err).contains("fetch.timeout"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        for (yaml, field) in [
            ("scheduler:\n  poll: 0s\n", "scheduler.poll"),
            ("scheduler:\n  poll: 5ms\n", "scheduler.poll"),
            ("scheduler:\n  min_interval: 0m\n", "scheduler.min_interval"),
            ("fetch:\n  timeout: 0s\n", "fetch.timeout"),
            ("fetch:\n  max_bytes: 0\n", "fetch.max_bytes"),
        ] {
            let file = parse_config_str(&format!("timezone: UTC\n{}", yaml)).unwrap();
            let err = parse_config_file(&file).unwrap_err();
            assert!(format!("{:#}", err).contains(field), "{}: {:#}", yaml, err);
        }
    }

    #[test]
    fn test_timezone_resolution() {
        assert_eq!(resolve_timezone(None).unwrap(), UTC);
        assert_eq!(resolve_timezone(Some("Europe/Madrid")).unwrap(), chrono_tz::Europe::Madrid);
        assert_eq!(resolve_timezone(Some(LOCAL_TIMEZONE)).unwrap(), system_timezone());
        assert!(resolve_timezone(Some("Mars/Olympus")).is_err());
    }
}
