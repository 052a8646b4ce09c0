use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use fixed::types::I51F13;

/// An amount of System Billing Units, measured in core hours
///
/// Fixed-point arithmetic keeps sums exact, so totals do not depend on the
/// order in which users or projects are added up. The resolution is 1/8192
/// hour, durations are rounded to the nearest step when parsed.
pub type Sbu = I51F13;

/// Possible errors while parsing a month
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MonthError {
    #[error("'{0}' is not a month of the form YYYY-MM")]
    Format(String),
    #[error("{0} is not a valid month number")]
    OutOfRange(u32),
}

/// A calendar month
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Creates a month, `month` counts from 1
    pub fn new(year: i32, month: u32) -> Result<Self, MonthError> {
        match month {
            1..=12 => Ok(Self { year, month }),
            _ => Err(MonthError::OutOfRange(month)),
        }
    }

    /// The month a date falls in
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month directly following this one
    pub fn succ(self) -> Self {
        match self.month {
            12 => Self { year: self.year + 1, month: 1 },
            m => Self { year: self.year, month: m + 1 },
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = || MonthError::Format(s.to_owned());
        let (year, month) = s.split_once('-').ok_or_else(format)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(format());
        }
        let year = year.parse().map_err(|_| format())?;
        let month = month.parse().map_err(|_| format())?;

        Self::new(year, month)
    }
}

impl<'de> serde::Deserialize<'de> for Month {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: serde::Deserializer<'de>
    {
        let month = <String as serde::Deserialize>::deserialize(deserializer)?;
        month.parse().map_err(serde::de::Error::custom)
    }
}

/// The metrics stored per user and month
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// SBUs charged minus SBUs restituted
    Sbu,
    /// SBUs refunded, e.g. after a failed job
    Restituted,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Sbu, Metric::Restituted];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Sbu => "SBU",
            Metric::Restituted => "Restituted",
        }
    }
}

/// The usage of one user in one month, one value per [`Metric`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    sbu: Sbu,
    restituted: Sbu,
}

impl Usage {
    pub fn new(sbu: Sbu, restituted: Sbu) -> Self {
        Self { sbu, restituted }
    }

    pub fn get(&self, metric: Metric) -> Sbu {
        match metric {
            Metric::Sbu => self.sbu,
            Metric::Restituted => self.restituted,
        }
    }

    /// Adds the usage of another record for the same user and month
    pub fn add(&mut self, other: Usage) {
        self.sbu += other.sbu;
        self.restituted += other.restituted;
    }
}

/// A single line of accounting output
///
/// Records carry no identity beyond their contents, two records for the same
/// user and month are simply added up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageRecord {
    username: String,
    month: Month,
    account: String,
    usage: Usage,
}

impl UsageRecord {
    pub fn new(
        username: impl Into<String>,
        month: Month,
        account: impl Into<String>,
        usage: Usage,
    ) -> Self {
        Self {
            username: username.into(),
            month,
            account: account.into(),
            usage,
        }
    }

    /// The user who consumed the SBUs
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn month(&self) -> Month {
        self.month
    }

    /// The accounting project the SBUs were charged to
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Net SBUs consumed
    pub fn sbu(&self) -> Sbu {
        self.usage.sbu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_parse_and_display() {
        let month: Month = "2019-03".parse().unwrap();
        assert_eq!(month, Month::new(2019, 3).unwrap());
        assert_eq!(month.to_string(), "2019-03");
    }

    #[test]
    fn month_rejects_garbage() {
        assert_eq!("2019-13".parse::<Month>(), Err(MonthError::OutOfRange(13)));
        assert!("Total".parse::<Month>().is_err());
        assert!("2019-1".parse::<Month>().is_err());
        assert!("19-01".parse::<Month>().is_err());
    }

    #[test]
    fn month_succ_wraps_year() {
        let december = Month::new(2019, 12).unwrap();
        assert_eq!(december.succ(), Month::new(2020, 1).unwrap());
        assert!(december < december.succ());
    }

    #[test]
    fn usage_add() {
        let mut usage = Usage::new(Sbu::from_num(10), Sbu::from_num(1));
        usage.add(Usage::new(Sbu::from_num(2.5), Sbu::ZERO));
        assert_eq!(usage.get(Metric::Sbu), Sbu::from_num(12.5));
        assert_eq!(usage.get(Metric::Restituted), Sbu::from_num(1));
    }
}
