//! Canonical request fingerprints.
//!
//! Two invocations with identical fingerprints are semantically
//! interchangeable: they share one cache slot and one in-flight network
//! effort. Computation is pure and total; every field is escaped before
//! joining so distinct inputs cannot collide.

use std::fmt;

use crate::periods::PeriodRange;
use crate::types::{FunctionFamily, QueryFilters};

/// Canonical string key identifying a semantically unique request.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestFingerprint(String);

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RequestFingerprint {
    /// Computes the fingerprint for a normalized request.
    pub fn compute(
        family: FunctionFamily,
        account: &str,
        range: &PeriodRange,
        filters: &QueryFilters,
    ) -> Self {
        let mut key = String::new();
        push_segment(&mut key, family.name());
        push_segment(&mut key, account);
        push_segment(&mut key, &range.describe());
        push_segment(&mut key, filters.subsidiary());
        push_segment(&mut key, filters.department());
        push_segment(&mut key, filters.location());
        push_segment(&mut key, filters.class());
        push_segment(&mut key, filters.book());
        RequestFingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Grouping key: all dimensions except the primary key and period range.
pub fn group_key(family: FunctionFamily, filters: &QueryFilters) -> String {
    let mut key = String::new();
    push_segment(&mut key, family.name());
    push_segment(&mut key, filters.subsidiary());
    push_segment(&mut key, filters.department());
    push_segment(&mut key, filters.location());
    push_segment(&mut key, filters.class());
    push_segment(&mut key, filters.book());
    key
}

/// Appends one escaped segment followed by the separator.
///
/// The separator itself and the escape character are escaped, so a segment
/// containing `|` can never be confused with a segment boundary.
fn push_segment(key: &mut String, segment: &str) {
    for ch in segment.chars() {
        if ch == '\\' || ch == '|' {
            key.push('\\');
        }
        key.push(ch);
    }
    key.push('|');
}
