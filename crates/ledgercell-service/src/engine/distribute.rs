//! The result distributor.
//!
//! Maps a chunk's outcome back onto every invocation that requested a
//! covered request shape. All pending requests in a chunk resolve together
//! with the same outcome; invocations cancelled after dispatch are skipped
//! by their own state check, so a cancelled cell never receives a stale
//! write.

use crate::caching::CacheStore;
use crate::transport::{ChunkOutcome, ChunkPayload};
use crate::types::CellValue;

use super::grouping::Chunk;

pub(crate) fn distribute(cache: &CacheStore, chunk: Chunk, outcome: ChunkOutcome) {
    match outcome {
        ChunkOutcome::Success(payload) => {
            let first_period = chunk.periods.first().map(String::as_str);
            for member in chunk.members {
                let value = match lookup(&payload, &member.account, first_period) {
                    Some(value) => value,
                    None => {
                        // The remote response should cover every requested
                        // key; a miss degrades this one request, not the
                        // rest of the chunk.
                        tracing::warn!(
                            family = %chunk.family,
                            account = %member.account,
                            "remote response missing requested key; resolving sentinel"
                        );
                        CellValue::NoData
                    }
                };
                cache.put(chunk.family, member.fingerprint, value.clone());
                for invocation in member.invocations {
                    invocation.resolve(value.clone());
                }
            }
        }
        ChunkOutcome::Backpressure => {
            tracing::warn!(
                family = %chunk.family,
                accounts = chunk.accounts.len(),
                "backpressure retries exhausted; resolving chunk with sentinel"
            );
            resolve_all(chunk, CellValue::NoData);
        }
        ChunkOutcome::Failure(error) => {
            tracing::warn!(
                family = %chunk.family,
                accounts = chunk.accounts.len(),
                error = %error,
                "chunk failed; resolving chunk with sentinel"
            );
            resolve_all(chunk, CellValue::NoData);
        }
    }
}

/// Applies the aggregate value policy.
///
/// The remote performs the range aggregation once per account and keys the
/// figure by the first period label of the expanded union; that aggregate is
/// the answer for every pending request that contributed to the expansion.
/// A chunk with no periods (members without a period pair) takes whatever
/// single figure the remote returned for the account.
fn lookup(payload: &ChunkPayload, account: &str, first_period: Option<&str>) -> Option<CellValue> {
    match payload {
        ChunkPayload::Aggregates(accounts) => {
            let per_account = accounts.get(account)?;
            let value = match first_period {
                Some(label) => per_account.get(label).copied(),
                None => per_account.values().next().copied(),
            };
            value.map(CellValue::Number)
        }
        ChunkPayload::Titles(titles) => titles.get(account).cloned().map(CellValue::Text),
    }
}

fn resolve_all(chunk: Chunk, value: CellValue) {
    for member in chunk.members {
        for invocation in member.invocations {
            invocation.resolve(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::super::grouping::Member;
    use super::*;
    use crate::fingerprint::RequestFingerprint;
    use crate::host::Invocation;
    use crate::periods::PeriodRange;
    use crate::types::{FunctionFamily, QueryFilters};

    fn fingerprint(account: &str) -> RequestFingerprint {
        RequestFingerprint::compute(
            FunctionFamily::Balance,
            account,
            &PeriodRange::default(),
            &QueryFilters::default(),
        )
    }

    fn capture() -> (Invocation, Arc<Mutex<Vec<CellValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let invocation = Invocation::new(move |value| {
            sink.lock().unwrap().push(value);
        });
        (invocation, seen)
    }

    fn chunk(members: Vec<Member>, periods: Vec<String>) -> Chunk {
        Chunk {
            family: FunctionFamily::Balance,
            accounts: members.iter().map(|m| m.account.clone()).collect(),
            periods,
            filters: QueryFilters::default(),
            members,
        }
    }

    #[test]
    fn success_resolves_and_caches_the_first_period_aggregate() {
        let cache = CacheStore::new();
        let (invocation, seen) = capture();
        let fp = fingerprint("4010");
        let chunk = chunk(
            vec![Member {
                fingerprint: fp.clone(),
                account: "4010".into(),
                invocations: vec![invocation],
            }],
            vec!["Jan 2025".into(), "Feb 2025".into()],
        );

        let mut per_account = HashMap::new();
        per_account.insert(
            "4010".to_string(),
            HashMap::from([
                ("Jan 2025".to_string(), 899910.15),
                ("Feb 2025".to_string(), 1.0),
            ]),
        );
        distribute(
            &cache,
            chunk,
            ChunkOutcome::Success(ChunkPayload::Aggregates(per_account)),
        );

        assert_eq!(*seen.lock().unwrap(), vec![CellValue::Number(899910.15)]);
        assert_eq!(
            cache.get(FunctionFamily::Balance, &fp),
            Some(CellValue::Number(899910.15))
        );
    }

    #[test]
    fn missing_account_degrades_only_that_member() {
        let cache = CacheStore::new();
        let (covered, covered_seen) = capture();
        let (missing, missing_seen) = capture();
        let chunk = chunk(
            vec![
                Member {
                    fingerprint: fingerprint("4010"),
                    account: "4010".into(),
                    invocations: vec![covered],
                },
                Member {
                    fingerprint: fingerprint("9999"),
                    account: "9999".into(),
                    invocations: vec![missing],
                },
            ],
            vec!["Jan 2025".into()],
        );

        let mut per_account = HashMap::new();
        per_account.insert(
            "4010".to_string(),
            HashMap::from([("Jan 2025".to_string(), 12.5)]),
        );
        distribute(
            &cache,
            chunk,
            ChunkOutcome::Success(ChunkPayload::Aggregates(per_account)),
        );

        assert_eq!(*covered_seen.lock().unwrap(), vec![CellValue::Number(12.5)]);
        assert_eq!(*missing_seen.lock().unwrap(), vec![CellValue::NoData]);
        // The sentinel is never cached, so a later invocation can retry.
        assert_eq!(cache.get(FunctionFamily::Balance, &fingerprint("9999")), None);
    }

    #[test]
    fn failure_resolves_every_waiter_with_the_sentinel() {
        let cache = CacheStore::new();
        let (first, first_seen) = capture();
        let (second, second_seen) = capture();
        let chunk = chunk(
            vec![Member {
                fingerprint: fingerprint("4010"),
                account: "4010".into(),
                invocations: vec![first, second],
            }],
            vec!["Jan 2025".into()],
        );

        distribute(
            &cache,
            chunk,
            ChunkOutcome::Failure(crate::transport::TransportError::Request("boom".into())),
        );

        assert_eq!(*first_seen.lock().unwrap(), vec![CellValue::NoData]);
        assert_eq!(*second_seen.lock().unwrap(), vec![CellValue::NoData]);
        assert_eq!(cache.get(FunctionFamily::Balance, &fingerprint("4010")), None);
    }

    #[test]
    fn cancelled_invocations_are_skipped() {
        let cache = CacheStore::new();
        let (cancelled, cancelled_seen) = capture();
        cancelled.cancel();
        let (live, live_seen) = capture();
        let chunk = chunk(
            vec![Member {
                fingerprint: fingerprint("4010"),
                account: "4010".into(),
                invocations: vec![cancelled, live],
            }],
            vec!["Jan 2025".into()],
        );

        let mut per_account = HashMap::new();
        per_account.insert(
            "4010".to_string(),
            HashMap::from([("Jan 2025".to_string(), 7.0)]),
        );
        distribute(
            &cache,
            chunk,
            ChunkOutcome::Success(ChunkPayload::Aggregates(per_account)),
        );

        assert!(cancelled_seen.lock().unwrap().is_empty());
        assert_eq!(*live_seen.lock().unwrap(), vec![CellValue::Number(7.0)]);
    }
}
