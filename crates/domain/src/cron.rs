//! Cron-like schedule matching.
//!
//! A schedule has five whitespace separated fields: minute, hour,
//! day of month, month and ISO weekday (1 = Monday … 7 = Sunday).
//! Each field is `*` or a comma separated list of terms, a term being a
//! literal, an inclusive range `a-b`, or a step `*/n`. A step matches
//! when the value is a multiple of `n`; any prefix before the `/` is
//! ignored.

use chrono::{Datelike, Timelike};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields, found {found}")]
    FieldCount { found: usize },

    #[error("invalid term `{term}`")]
    InvalidTerm { term: String },

    #[error("step must be greater than zero in `{term}`")]
    ZeroStep { term: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Value(u32),
    Range(u32, u32),
    Step(u32),
}

impl Term {
    fn parse(raw: &str) -> Result<Self, CronError> {
        let invalid = || CronError::InvalidTerm {
            term: raw.to_string(),
        };
        if let Some((_, step)) = raw.split_once('/') {
            let step: u32 = step.trim().parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(CronError::ZeroStep {
                    term: raw.to_string(),
                });
            }
            return Ok(Self::Step(step));
        }
        if let Some((from, to)) = raw.split_once('-') {
            let from: u32 = from.trim().parse().map_err(|_| invalid())?;
            let to: u32 = to.trim().parse().map_err(|_| invalid())?;
            if from > to {
                return Err(invalid());
            }
            return Ok(Self::Range(from, to));
        }
        raw.trim().parse().map(Self::Value).map_err(|_| invalid())
    }

    fn matches(&self, value: u32) -> bool {
        match *self {
            Self::Value(v) => v == value,
            Self::Range(from, to) => (from..=to).contains(&value),
            Self::Step(step) => value % step == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Terms(Vec<Term>),
}

impl Field {
    fn parse(raw: &str) -> Result<Self, CronError> {
        if raw == "*" {
            return Ok(Self::Any);
        }
        let terms = raw
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(Term::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if terms.is_empty() {
            return Err(CronError::InvalidTerm {
                term: raw.to_string(),
            });
        }
        Ok(Self::Terms(terms))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Terms(terms) => terms.iter().any(|term| term.matches(value)),
        }
    }
}

/// A parsed five-field schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    fields: [Field; 5],
}

impl CronSchedule {
    /// Parse a schedule string.
    ///
    /// # Errors
    ///
    /// Returns [`CronError`] when the field count is not 5 or a term is malformed.
    pub fn parse(spec: &str) -> Result<Self, CronError> {
        let raw: Vec<&str> = spec.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = raw.as_slice() else {
            return Err(CronError::FieldCount { found: raw.len() });
        };
        Ok(Self {
            fields: [
                Field::parse(minute)?,
                Field::parse(hour)?,
                Field::parse(day)?,
                Field::parse(month)?,
                Field::parse(weekday)?,
            ],
        })
    }

    /// Whether every field matches the given wall-clock time.
    #[must_use]
    pub fn matches<T: Datelike + Timelike>(&self, t: &T) -> bool {
        let values = [
            t.minute(),
            t.hour(),
            t.day(),
            t.month(),
            t.weekday().number_from_monday(),
        ];
        self.fields
            .iter()
            .zip(values)
            .all(|(field, value)| field.matches(value))
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse `spec` and test it against `t`.
///
/// # Errors
///
/// Returns [`CronError`] when `spec` is not a valid schedule.
pub fn matches<T: Datelike + Timelike>(spec: &str, t: &T) -> Result<bool, CronError> {
    Ok(CronSchedule::parse(spec)?.matches(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // 2024-03-04 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn should_match_any_time_when_all_fields_are_wildcards() {
        assert!(matches("* * * * *", &at(4, 0, 0)).unwrap());
        assert!(matches("* * * * *", &at(9, 23, 59)).unwrap());
    }

    #[test]
    fn should_match_when_minute_is_in_list() {
        assert!(matches("18,20 * * * *", &at(4, 10, 20)).unwrap());
        assert!(!matches("18,20 * * * *", &at(4, 10, 19)).unwrap());
    }

    #[test]
    fn should_match_when_minute_is_in_range() {
        assert!(matches("18-20 * * * *", &at(4, 10, 19)).unwrap());
        assert!(!matches("18-20 * * * *", &at(4, 10, 21)).unwrap());
    }

    #[test]
    fn should_match_step_on_multiples_only() {
        assert!(matches("*/5 * * * *", &at(4, 10, 20)).unwrap());
        assert!(!matches("*/5 * * * *", &at(4, 10, 21)).unwrap());
    }

    #[test]
    fn should_ignore_step_prefix() {
        assert!(matches("3/5 * * * *", &at(4, 10, 20)).unwrap());
        assert!(!matches("3/5 * * * *", &at(4, 10, 23)).unwrap());
    }

    #[test]
    fn should_use_iso_weekday_numbering() {
        assert!(matches("* * * * 1", &at(4, 12, 0)).unwrap());
        assert!(matches("* * * * 7", &at(10, 12, 0)).unwrap());
        assert!(!matches("* * * * 1-5", &at(9, 12, 0)).unwrap());
    }

    #[test]
    fn should_require_all_fields_to_match() {
        assert!(matches("30 7 * 3 *", &at(4, 7, 30)).unwrap());
        assert!(!matches("30 7 * 4 *", &at(4, 7, 30)).unwrap());
        assert!(!matches("30 8 * 3 *", &at(4, 7, 30)).unwrap());
    }

    #[test]
    fn should_mix_terms_in_one_field() {
        assert!(matches("0 6-8,20 * * *", &at(4, 20, 0)).unwrap());
        assert!(matches("0 6-8,20 * * *", &at(4, 7, 0)).unwrap());
        assert!(!matches("0 6-8,20 * * *", &at(4, 9, 0)).unwrap());
    }

    #[test]
    fn should_reject_wrong_field_count() {
        assert_eq!(
            CronSchedule::parse("* * * *"),
            Err(CronError::FieldCount { found: 4 })
        );
    }

    #[test]
    fn should_reject_malformed_terms() {
        assert!(matches!(
            CronSchedule::parse("x * * * *"),
            Err(CronError::InvalidTerm { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::ZeroStep { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("20-10 * * * *"),
            Err(CronError::InvalidTerm { .. })
        ));
    }
}
