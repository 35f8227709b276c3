//! Observation periods: a single night, an ISO week, a month, a year, or an
//! explicit range of nights.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{DetrendError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodKind {
    Day,
    Week,
    Month,
    Year,
    Range,
}

/// Half-open interval of nights `[start, end)` plus the label it was parsed from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub kind: PeriodKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Strip separators from a user-supplied day: `2019-04-04` -> `20190404`.
pub fn normalize_day(day: &str) -> String {
    day.trim().replace('-', "")
}

/// Parse a compact `YYYYMMDD` day.
pub fn parse_day(day: &str) -> Result<NaiveDate> {
    let compact = normalize_day(day);
    NaiveDate::parse_from_str(&compact, "%Y%m%d")
        .map_err(|e| DetrendError::InvalidPeriod(format!("{day}: {e}")))
}

/// Format a date as a compact `YYYYMMDD` day string.
pub fn day_label(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

impl Period {
    /// Parse `YYYY`, `YYYYMM`, `YYYYWWW`, `YYYYMMDD` or `START..END`.
    pub fn parse(input: &str) -> Result<Self> {
        if let Some((a, b)) = input.split_once("..") {
            let start = parse_day(a)?;
            let end = parse_day(b)?;
            if end <= start {
                return Err(DetrendError::InvalidPeriod(format!(
                    "{input}: end must be after start"
                )));
            }
            return Ok(Self {
                kind: PeriodKind::Range,
                start,
                end,
            });
        }

        let s = normalize_day(input);
        if !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(DetrendError::InvalidPeriod(input.to_string()));
        }
        let bad = |_| DetrendError::InvalidPeriod(input.to_string());
        let invalid = || DetrendError::InvalidPeriod(input.to_string());

        match s.len() {
            4 => {
                let year: i32 = s.parse().map_err(bad)?;
                let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
                let end = NaiveDate::from_ymd_opt(year + 1, 1, 1).ok_or_else(invalid)?;
                Ok(Self {
                    kind: PeriodKind::Year,
                    start,
                    end,
                })
            }
            6 => {
                let year: i32 = s[..4].parse().map_err(bad)?;
                let month: u32 = s[4..].parse().map_err(bad)?;
                let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
                let end = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)
                }
                .ok_or_else(invalid)?;
                Ok(Self {
                    kind: PeriodKind::Month,
                    start,
                    end,
                })
            }
            7 => {
                let year: i32 = s[..4].parse().map_err(bad)?;
                let week: u32 = s[4..].parse().map_err(bad)?;
                let start =
                    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(invalid)?;
                Ok(Self {
                    kind: PeriodKind::Week,
                    start,
                    end: start + Duration::weeks(1),
                })
            }
            8 => {
                let start = parse_day(&s)?;
                Ok(Self {
                    kind: PeriodKind::Day,
                    start,
                    end: start + Duration::days(1),
                })
            }
            _ => Err(DetrendError::InvalidPeriod(format!(
                "{input}: expected YYYY, YYYYMM, YYYYWWW or YYYYMMDD"
            ))),
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            kind: PeriodKind::Day,
            start: date,
            end: date + Duration::days(1),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// True when `day` (compact or dashed) falls inside the period.
    pub fn contains_day(&self, day: &str) -> bool {
        parse_day(day).map(|d| self.contains(d)).unwrap_or(false)
    }

    /// Every night in the period, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d < self.end)
    }

    /// Canonical compact label, used in artifact names.
    pub fn label(&self) -> String {
        match self.kind {
            PeriodKind::Day => day_label(self.start),
            PeriodKind::Week => format!(
                "{:04}{:03}",
                self.start.iso_week().year(),
                self.start.iso_week().week()
            ),
            PeriodKind::Month => self.start.format("%Y%m").to_string(),
            PeriodKind::Year => self.start.format("%Y").to_string(),
            PeriodKind::Range => format!(
                "{}-{}",
                day_label(self.start),
                day_label(self.end - Duration::days(1))
            ),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_with_dashes() {
        let p = Period::parse("2019-04-04").unwrap();
        assert_eq!(p.kind, PeriodKind::Day);
        assert_eq!(p.label(), "20190404");
        assert_eq!(p.days().count(), 1);
    }

    #[test]
    fn month_wraps_year() {
        let p = Period::parse("201912").unwrap();
        assert_eq!(p.end, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(p.days().count(), 31);
    }

    #[test]
    fn iso_week() {
        let p = Period::parse("2019045").unwrap();
        assert_eq!(p.kind, PeriodKind::Week);
        assert_eq!(p.start.weekday(), Weekday::Mon);
        assert_eq!(p.days().count(), 7);
        assert_eq!(p.label(), "2019045");
    }

    #[test]
    fn explicit_range_is_half_open() {
        let p = Period::parse("2019-04-04..2019-04-08").unwrap();
        let days: Vec<String> = p.days().map(day_label).collect();
        assert_eq!(days, ["20190404", "20190405", "20190406", "20190407"]);
        assert!(!p.contains_day("20190408"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Period::parse("2019-4").is_err());
        assert!(Period::parse("abcd").is_err());
        assert!(Period::parse("20191301").is_err());
    }
}
