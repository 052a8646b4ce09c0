use chrono::{Datelike, NaiveDate};

use crate::Month;

/// Possible errors while resolving the reported interval
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DateError {
    #[error("'{0}' is not a date of the form YYYY, MM-YYYY or DD-MM-YYYY")]
    Format(String),
    #[error("'{0}' is not a valid calendar date")]
    Invalid(String),
    #[error("The end date {end} lies before the start date {start}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

/// The interval, both ends inclusive, a report covers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateError> {
        match start <= end {
            true => Ok(Self { start, end }),
            false => Err(DateError::Reversed { start, end }),
        }
    }

    /// Resolves the dates given on the command line
    ///
    /// Both dates accept the formats `YYYY`, `MM-YYYY` and `DD-MM-YYYY`, with
    /// a missing day defaulting to the first of the month.
    /// The start defaults to the first of January of the current year, the end
    /// to the first day of the current month. A bare year as start means
    /// January, a bare year as end means the current month of that year.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, DateError> {
        let start = parse_date(start, 1, today.year())?;
        let end = parse_date(end, today.month(), today.year())?;

        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Every month from the start month up to and including the end month
    pub fn months(&self) -> Vec<Month> {
        let last = Month::of(self.end);
        let mut months = vec![Month::of(self.start)];
        while let Some(&month) = months.last() {
            if month >= last {
                break;
            }
            months.push(month.succ());
        }
        months
    }

    /// Whether any day of `month` lies within the interval
    pub fn contains(&self, month: Month) -> bool {
        Month::of(self.start) <= month && month <= Month::of(self.end)
    }
}

fn parse_date(
    input: Option<&str>,
    default_month: u32,
    default_year: i32,
) -> Result<NaiveDate, DateError> {
    let input = match input.map(str::trim) {
        None | Some("") => {
            return NaiveDate::from_ymd_opt(default_year, default_month, 1)
                .ok_or_else(|| DateError::Invalid(format!("{}-{}", default_month, default_year)));
        }
        Some(input) => input,
    };

    let format = || DateError::Format(input.to_owned());
    let number = |part: &str| -> Result<u32, DateError> {
        match !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
            true => part.parse().map_err(|_| format()),
            false => Err(format()),
        }
    };

    let parts = input.split('-').collect::<Vec<_>>();
    let (day, month, year) = match parts.as_slice() {
        [year] => (1, default_month, number(year)?),
        [month, year] => (1, number(month)?, number(year)?),
        [day, month, year] => (number(day)?, number(month)?, number(year)?),
        _ => return Err(format()),
    };
    let year = i32::try_from(year).map_err(|_| format())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| DateError::Invalid(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn today() -> NaiveDate {
        date(2019, 5, 31)
    }

    macro_rules! range_test {
        (
            $name:ident
            $start:expr, $end:expr
            => $expected_start:expr, $expected_end:expr
        ) => {
            #[test]
            fn $name() {
                let range = DateRange::resolve($start, $end, today()).unwrap();
                assert_eq!(range.start(), $expected_start);
                assert_eq!(range.end(), $expected_end);
            }
        };
    }

    range_test!(defaults None, None => date(2019, 1, 1), date(2019, 5, 1));
    range_test!(bare_years Some("2018"), Some("2019") => date(2018, 1, 1), date(2019, 5, 1));
    range_test!(month_year Some("03-2018"), Some("11-2018") => date(2018, 3, 1), date(2018, 11, 1));
    range_test!(full_dates
        Some("22-10-2018"), Some("05-02-2019") => date(2018, 10, 22), date(2019, 2, 5));
    range_test!(padded Some(" 2019 "), None => date(2019, 1, 1), date(2019, 5, 1));

    #[test]
    fn rejects_malformed_dates() {
        assert!(matches!(
            DateRange::resolve(Some("1-2-3-2019"), None, today()),
            Err(DateError::Format(_))
        ));
        assert!(matches!(
            DateRange::resolve(Some("march"), None, today()),
            Err(DateError::Format(_))
        ));
        assert!(matches!(
            DateRange::resolve(Some("31-02-2019"), None, today()),
            Err(DateError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_reversed_range() {
        assert_eq!(
            DateRange::resolve(Some("2020"), Some("2019"), today()),
            Err(DateError::Reversed { start: date(2020, 1, 1), end: date(2019, 5, 1) })
        );
    }

    #[test]
    fn months_span_year_boundary() {
        let range = DateRange::new(date(2018, 11, 15), date(2019, 2, 1)).unwrap();
        let months = range.months().iter().map(Month::to_string).collect::<Vec<_>>();
        assert_eq!(months, ["2018-11", "2018-12", "2019-01", "2019-02"]);
        assert!(range.contains(Month::new(2018, 11).unwrap()));
        assert!(!range.contains(Month::new(2019, 3).unwrap()));
    }

    #[test]
    fn single_month() {
        let range = DateRange::new(date(2019, 1, 1), date(2019, 1, 1)).unwrap();
        assert_eq!(range.months(), vec![Month::new(2019, 1).unwrap()]);
    }
}
