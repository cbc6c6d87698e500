use std::fmt;
use std::time::Duration;

/// Fixed keys of the settings store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Url,
    Keyword,
    IntervalMinutes,
    RunFlag,
    MatchCount,
    LastMatchAt,
}

impl Key {
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::Url => "url",
            Key::Keyword => "keyword",
            Key::IntervalMinutes => "interval_minutes",
            Key::RunFlag => "run_flag",
            Key::MatchCount => "match_count",
            Key::LastMatchAt => "last_match_at",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFlag {
    Active,
    Stopped,
}

impl RunFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunFlag::Active => "active",
            RunFlag::Stopped => "stopped",
        }
    }

    /// Anything other than the active marker keeps the gate closed
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("active") => RunFlag::Active,
            _ => RunFlag::Stopped,
        }
    }
}

impl fmt::Display for RunFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often the page is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    TenMinutes,
    #[default]
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
}

impl Frequency {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            10 => Some(Frequency::TenMinutes),
            15 => Some(Frequency::FifteenMinutes),
            30 => Some(Frequency::ThirtyMinutes),
            60 => Some(Frequency::OneHour),
            _ => None,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            Frequency::TenMinutes => 10,
            Frequency::FifteenMinutes => 15,
            Frequency::ThirtyMinutes => 30,
            Frequency::OneHour => 60,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.minutes() as u64 * 60)
    }

    /// Stored values are lenient: anything unreadable means the default frequency
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            None => Frequency::default(),
            Some(raw) => {
                let parsed = raw.trim().parse::<u32>().ok().and_then(Frequency::from_minutes);
                parsed.unwrap_or_else(|| {
                    log::warn!(
                        "Unsupported stored interval '{}', using {} minutes",
                        raw,
                        Frequency::default().minutes()
                    );
                    Frequency::default()
                })
            }
        }
    }
}

/// Running count of positive checks and the time of the latest one (epoch ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchState {
    pub count: u64,
    pub last_match_at: Option<i64>,
}

impl MatchState {
    pub fn next(&self, now_ms: i64) -> MatchState {
        MatchState {
            count: self.count.saturating_add(1),
            last_match_at: Some(now_ms),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("keyword must not be empty")]
    EmptyKeyword,
    #[error("unsupported interval {0} minutes, expected one of 10, 15, 30, 60")]
    UnsupportedInterval(u32),
}

pub fn validate_url(url: &str) -> Result<(), SettingsError> {
    let invalid = |reason: String| SettingsError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = reqwest::Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

pub fn validate_keyword(keyword: &str) -> Result<(), SettingsError> {
    if keyword.trim().is_empty() {
        return Err(SettingsError::EmptyKeyword);
    }
    Ok(())
}

pub fn validate_interval(minutes: u32) -> Result<Frequency, SettingsError> {
    Frequency::from_minutes(minutes).ok_or(SettingsError::UnsupportedInterval(minutes))
}
