use std::fmt;

use crate::periods::PeriodRange;

/// The formula function families exposed to the spreadsheet host.
///
/// Each family has its own cache namespace and its own remote endpoint.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FunctionFamily {
    /// GL account balance over a period range.
    Balance,
    /// Budgeted amount over a period range, optionally per accounting book.
    Budget,
    /// Account display name.
    AccountTitle,
}

impl FunctionFamily {
    /// Short name used in log messages and fingerprints.
    pub fn name(self) -> &'static str {
        match self {
            FunctionFamily::Balance => "balance",
            FunctionFamily::Budget => "budget",
            FunctionFamily::AccountTitle => "title",
        }
    }
}

impl fmt::Display for FunctionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A final scalar value delivered back to the host.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    /// The "no data" sentinel.
    ///
    /// This is what an invocation resolves to when its request could not be
    /// fulfilled (malformed input, exhausted retries, transport failure, or a
    /// response that did not cover the requested key). The host adapter
    /// renders it as a visible "no data" marker; the engine never substitutes
    /// a plausible-looking number for a failure.
    NoData,
}

impl CellValue {
    /// Returns `true` if this is the "no data" sentinel.
    pub fn is_no_data(&self) -> bool {
        matches!(self, CellValue::NoData)
    }
}

/// The non-primary filter dimensions of a request.
///
/// Two pending requests group together iff all of these match exactly; they
/// may then differ only in account number and period range.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct QueryFilters {
    pub subsidiary: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub class: Option<String>,
    /// Accounting book / budget category selector.
    pub book: Option<String>,
}

impl QueryFilters {
    fn field(value: &Option<String>) -> &str {
        value.as_deref().unwrap_or_default()
    }

    pub fn subsidiary(&self) -> &str {
        Self::field(&self.subsidiary)
    }

    pub fn department(&self) -> &str {
        Self::field(&self.department)
    }

    pub fn location(&self) -> &str {
        Self::field(&self.location)
    }

    pub fn class(&self) -> &str {
        Self::field(&self.class)
    }

    pub fn book(&self) -> &str {
        Self::field(&self.book)
    }
}

/// The canonical, normalized parameters of one deduplicated request.
///
/// This is what a pending registry entry carries from registration to
/// drain time.
#[derive(Clone, Debug)]
pub struct BatchQuery {
    pub family: FunctionFamily,
    pub account: String,
    pub range: PeriodRange,
    pub filters: QueryFilters,
}
