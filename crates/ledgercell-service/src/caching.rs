//! Process-wide memoized results.
//!
//! One namespace per function family, keyed by [`RequestFingerprint`].
//! Entries live for the lifetime of the host session; there is no TTL and no
//! eviction other than an explicit user-triggered clear.

use moka::sync::Cache;

use crate::fingerprint::RequestFingerprint;
use crate::types::{CellValue, FunctionFamily};

/// The per-family result caches.
#[derive(Debug)]
pub struct CacheStore {
    balances: Cache<RequestFingerprint, CellValue>,
    budgets: Cache<RequestFingerprint, CellValue>,
    titles: Cache<RequestFingerprint, CellValue>,
}

impl CacheStore {
    pub fn new() -> Self {
        CacheStore {
            balances: Cache::builder().name("ledgercell-balances").build(),
            budgets: Cache::builder().name("ledgercell-budgets").build(),
            titles: Cache::builder().name("ledgercell-titles").build(),
        }
    }

    fn namespace(&self, family: FunctionFamily) -> &Cache<RequestFingerprint, CellValue> {
        match family {
            FunctionFamily::Balance => &self.balances,
            FunctionFamily::Budget => &self.budgets,
            FunctionFamily::AccountTitle => &self.titles,
        }
    }

    pub fn get(&self, family: FunctionFamily, fingerprint: &RequestFingerprint) -> Option<CellValue> {
        self.namespace(family).get(fingerprint)
    }

    /// Writes a resolved value.
    ///
    /// The "no data" sentinel is never written: it represents an unresolved
    /// remote lookup, and caching it would turn a transient failure into a
    /// permanent one. A later invocation with the same fingerprint gets a
    /// fresh attempt instead.
    pub fn put(&self, family: FunctionFamily, fingerprint: RequestFingerprint, value: CellValue) {
        if value.is_no_data() {
            return;
        }
        self.namespace(family).insert(fingerprint, value);
    }

    /// Clears one family's namespace.
    pub fn clear(&self, family: FunctionFamily) {
        self.namespace(family).invalidate_all();
    }

    /// Clears every namespace. This is the user-triggered "clear cache"
    /// entry point consumed by the UI layer.
    pub fn clear_all(&self) {
        self.balances.invalidate_all();
        self.budgets.invalidate_all();
        self.titles.invalidate_all();
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
