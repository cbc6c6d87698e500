use std::time::Duration;
use nom::{branch::alt, bytes::complete::tag, combinator::value};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    // Longer tags first, "ms" must win over "m"
    pub fn parse<'a>(input: &'a str) -> nom::IResult<&'a str, Self> {
        alt((
            value(Self::Millisecond, tag("millisecond")),
            value(Self::Millisecond, tag("ms")),
            value(Self::Second, tag("second")),
            value(Self::Second, tag("s")),
            value(Self::Minute, tag("minute")),
            value(Self::Minute, tag("m")),
            value(Self::Hour, tag("hour")),
            value(Self::Hour, tag("h")),
            value(Self::Day, tag("day")),
            value(Self::Day, tag("d")),
            value(Self::Week, tag("week")),
            value(Self::Week, tag("w")),
        ))(input)
    }

    pub fn to_duration(&self, amount: u32) -> Duration {
        match self {
            Self::Millisecond => Duration::from_millis(amount as u64),
            Self::Second => Duration::from_secs(amount as u64),
            Self::Minute => Duration::from_secs(amount as u64 * 60),
            Self::Hour => Duration::from_secs(amount as u64 * 60 * 60),
            Self::Day => Duration::from_secs(amount as u64 * 60 * 60 * 24),
            Self::Week => Duration::from_secs(amount as u64 * 60 * 60 * 24 * 7),
        }
    }
}
