//! Accounting period labels and range expansion.
//!
//! The remote service keys everything by month-granularity period names such
//! as `Jan 2025`. Hosts hand us either a pre-formatted label or an Excel date
//! serial; both are normalized to the canonical label form before
//! fingerprinting so that equivalent calls share one cache slot.

use chrono::{Datelike, Days, NaiveDate};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A single accounting period (one calendar month).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Period {
    pub year: i32,
    /// 1-based month.
    pub month: u32,
}

impl Period {
    /// The canonical label, e.g. `Jan 2025`.
    pub fn label(&self) -> String {
        format!("{} {}", MONTHS[(self.month - 1) as usize], self.year)
    }

    /// Parses a period label such as `Jan 2025` or `january 2025`.
    ///
    /// Case-insensitive; accepts three-letter abbreviations and full month
    /// names. Returns `None` for anything else.
    pub fn parse(label: &str) -> Option<Period> {
        let mut parts = label.split_whitespace();
        let month_part = parts.next()?;
        let year_part = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let lower = month_part.to_ascii_lowercase();
        let month = MONTHS
            .iter()
            .position(|m| {
                let abbrev = m.to_ascii_lowercase();
                lower == abbrev || (lower.len() > 3 && lower.starts_with(&abbrev))
            })
            .map(|idx| idx as u32 + 1)?;

        let year: i32 = year_part.parse().ok()?;
        if !(1000..=9999).contains(&year) {
            return None;
        }

        Some(Period { year, month })
    }

    /// Converts an Excel date serial (days since 1899-12-30) into the period
    /// containing that date.
    pub fn from_serial(serial: f64) -> Option<Period> {
        if !serial.is_finite() || serial < 1.0 || serial > 4_000_000.0 {
            return None;
        }
        let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
        let date = base.checked_add_days(Days::new(serial.trunc() as u64))?;
        Some(Period {
            year: date.year(),
            month: date.month(),
        })
    }

    /// The next calendar month.
    fn succ(self) -> Period {
        if self.month == 12 {
            Period {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Period {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

/// A normalized, possibly open-ended period range.
///
/// Both markers are canonical labels when they were parseable, and verbatim
/// host input otherwise. Normalization happens at the host boundary; see
/// [`crate::host::PeriodArg`].
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PeriodRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl PeriodRange {
    /// Expands the range into its ordered list of period labels.
    ///
    /// Both markers parse and are ordered: month-by-month from start to end
    /// inclusive. A single marker expands to exactly one period. A malformed
    /// range (unparseable marker or start after end) falls back to the two
    /// endpoint labels verbatim rather than failing the batch. An absent
    /// range contributes no periods.
    pub fn expand(&self) -> Vec<String> {
        match (self.start.as_deref(), self.end.as_deref()) {
            (None, None) => Vec::new(),
            (Some(single), None) | (None, Some(single)) => vec![single.to_string()],
            (Some(start), Some(end)) => match (Period::parse(start), Period::parse(end)) {
                (Some(from), Some(to)) if from <= to => {
                    let mut labels = Vec::new();
                    let mut current = from;
                    while current <= to {
                        labels.push(current.label());
                        current = current.succ();
                    }
                    labels
                }
                _ if start == end => vec![start.to_string()],
                _ => vec![start.to_string(), end.to_string()],
            },
        }
    }

    /// Compact form used in fingerprints.
    pub fn describe(&self) -> String {
        format!(
            "{}..{}",
            self.start.as_deref().unwrap_or_default(),
            self.end.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_labels() {
        assert_eq!(
            Period::parse("Jan 2025"),
            Some(Period {
                year: 2025,
                month: 1
            })
        );
        assert_eq!(
            Period::parse("december 2024"),
            Some(Period {
                year: 2024,
                month: 12
            })
        );
        assert_eq!(
            Period::parse("  MAR   2025 "),
            Some(Period {
                year: 2025,
                month: 3
            })
        );
        assert_eq!(Period::parse("Q1 2025"), None);
        assert_eq!(Period::parse("Jan"), None);
        assert_eq!(Period::parse("Jan 25"), None);
        assert_eq!(Period::parse("Jan 2025 extra"), None);
    }

    #[test]
    fn serial_conversion() {
        // 45658 days after 1899-12-30 is 2025-01-01.
        assert_eq!(
            Period::from_serial(45658.0),
            Some(Period {
                year: 2025,
                month: 1
            })
        );
        // Mid-month serials land in the same period.
        assert_eq!(
            Period::from_serial(45689.5),
            Some(Period {
                year: 2025,
                month: 2
            })
        );
        assert_eq!(Period::from_serial(0.0), None);
        assert_eq!(Period::from_serial(f64::NAN), None);
        assert_eq!(Period::from_serial(f64::INFINITY), None);
    }

    #[test]
    fn expand_inclusive() {
        let range = PeriodRange {
            start: Some("Jan 2025".into()),
            end: Some("Mar 2025".into()),
        };
        assert_eq!(range.expand(), vec!["Jan 2025", "Feb 2025", "Mar 2025"]);
    }

    #[test]
    fn expand_across_year_boundary() {
        let range = PeriodRange {
            start: Some("Nov 2024".into()),
            end: Some("Feb 2025".into()),
        };
        assert_eq!(
            range.expand(),
            vec!["Nov 2024", "Dec 2024", "Jan 2025", "Feb 2025"]
        );
    }

    #[test]
    fn expand_single_marker() {
        let range = PeriodRange {
            start: Some("Jan 2025".into()),
            end: None,
        };
        assert_eq!(range.expand(), vec!["Jan 2025"]);

        let range = PeriodRange {
            start: None,
            end: Some("Feb 2025".into()),
        };
        assert_eq!(range.expand(), vec!["Feb 2025"]);
    }

    #[test]
    fn expand_malformed_falls_back_to_endpoints() {
        // Unparseable labels are passed through verbatim.
        let range = PeriodRange {
            start: Some("Q1 2025".into()),
            end: Some("Q2 2025".into()),
        };
        assert_eq!(range.expand(), vec!["Q1 2025", "Q2 2025"]);

        // Inverted ranges count as malformed too.
        let range = PeriodRange {
            start: Some("Mar 2025".into()),
            end: Some("Jan 2025".into()),
        };
        assert_eq!(range.expand(), vec!["Mar 2025", "Jan 2025"]);

        // Identical unparseable endpoints collapse to one label.
        let range = PeriodRange {
            start: Some("FY 2025".into()),
            end: Some("FY 2025".into()),
        };
        assert_eq!(range.expand(), vec!["FY 2025"]);
    }

    #[test]
    fn expand_absent_range_is_empty() {
        assert!(PeriodRange::default().expand().is_empty());
    }
}
