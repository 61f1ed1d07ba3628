//! The pending request registry.
//!
//! Holds one entry per distinct, not-yet-cached request shape, accumulating
//! every invocation waiting on that shape. A fingerprint never has two
//! concurrently-live entries: registrations between drains append to the
//! existing entry, and the drain removes entries wholesale.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::fingerprint::RequestFingerprint;
use crate::host::Invocation;
use crate::types::BatchQuery;

/// One distinct request shape and everything waiting on it.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub query: BatchQuery,
    pub invocations: Vec<Invocation>,
    /// Registration order, used to keep drains deterministic.
    seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<RequestFingerprint, PendingRequest>,
    next_seq: u64,
}

impl Registry {
    /// Registers an invocation under a fingerprint, creating the pending
    /// request on first miss.
    pub fn register(
        &mut self,
        fingerprint: RequestFingerprint,
        query: BatchQuery,
        invocation: Invocation,
    ) {
        match self.entries.entry(fingerprint) {
            Entry::Occupied(mut entry) => entry.get_mut().invocations.push(invocation),
            Entry::Vacant(slot) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                slot.insert(PendingRequest {
                    query,
                    invocations: vec![invocation],
                    seq,
                });
            }
        }
    }

    /// Removes one invocation (cancellation path). If this empties the
    /// pending request, the whole entry is dropped and never reaches the
    /// network.
    pub fn deregister(&mut self, fingerprint: &RequestFingerprint, invocation: &Invocation) {
        let Some(entry) = self.entries.get_mut(fingerprint) else {
            // Already drained; the invocation's own cancelled state keeps the
            // distributor from delivering a stale write.
            return;
        };
        entry
            .invocations
            .retain(|waiting| !waiting.same_handle(invocation));
        if entry.invocations.is_empty() {
            tracing::debug!(%fingerprint, "all waiters cancelled; dropping pending request");
            self.entries.remove(fingerprint);
        }
    }

    /// Snapshots and clears the registry, in registration order.
    pub fn drain(&mut self) -> Vec<(RequestFingerprint, PendingRequest)> {
        let mut snapshot: Vec<_> = self.entries.drain().collect();
        snapshot.sort_by_key(|(_, pending)| pending.seq);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::PeriodRange;
    use crate::types::{FunctionFamily, QueryFilters};

    fn query(account: &str) -> BatchQuery {
        BatchQuery {
            family: FunctionFamily::Balance,
            account: account.to_string(),
            range: PeriodRange::default(),
            filters: QueryFilters::default(),
        }
    }

    fn fingerprint(account: &str) -> RequestFingerprint {
        RequestFingerprint::compute(
            FunctionFamily::Balance,
            account,
            &PeriodRange::default(),
            &QueryFilters::default(),
        )
    }

    #[test]
    fn identical_fingerprints_share_one_entry() {
        let mut registry = Registry::default();
        registry.register(fingerprint("4010"), query("4010"), Invocation::new(|_| {}));
        registry.register(fingerprint("4010"), query("4010"), Invocation::new(|_| {}));
        assert_eq!(registry.len(), 1);

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.invocations.len(), 2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn deregister_drops_emptied_entries() {
        let mut registry = Registry::default();
        let kept = Invocation::new(|_| {});
        let cancelled = Invocation::new(|_| {});
        registry.register(fingerprint("4010"), query("4010"), kept.clone());
        registry.register(fingerprint("4010"), query("4010"), cancelled.clone());

        registry.deregister(&fingerprint("4010"), &cancelled);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries[&fingerprint("4010")].invocations.len(), 1);

        registry.deregister(&fingerprint("4010"), &kept);
        assert_eq!(registry.len(), 0);

        // Deregistering after the entry is gone is a no-op.
        registry.deregister(&fingerprint("4010"), &kept);
    }

    #[test]
    fn drain_preserves_registration_order() {
        let mut registry = Registry::default();
        for account in ["4010", "4011", "4012"] {
            registry.register(fingerprint(account), query(account), Invocation::new(|_| {}));
        }
        let accounts: Vec<_> = registry
            .drain()
            .into_iter()
            .map(|(_, pending)| pending.query.account)
            .collect();
        assert_eq!(accounts, vec!["4010", "4011", "4012"]);
    }
}
