//! Drain-time grouping and chunking.
//!
//! A drained registry snapshot is partitioned into batch groups: pending
//! requests sharing every filter dimension except the account number and
//! period range. Within a group, the distinct accounts and the union of all
//! expanded periods are collected, which is what makes coalescing valuable:
//! one network call answers many different-but-overlapping period ranges at
//! once. Groups and chunks are ephemeral; they exist for one scheduling
//! cycle only.

use std::collections::{HashMap, HashSet};

use crate::fingerprint::{group_key, RequestFingerprint};
use crate::host::Invocation;
use crate::transport::BatchRequest;
use crate::types::{FunctionFamily, QueryFilters};

use super::registry::PendingRequest;

/// One pending request folded into a chunk.
#[derive(Debug)]
pub(crate) struct Member {
    pub fingerprint: RequestFingerprint,
    pub account: String,
    pub invocations: Vec<Invocation>,
}

/// A size-bounded slice of a group's accounts, sent in one network call.
///
/// All chunks of a group share the group's full period union and filters.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub family: FunctionFamily,
    pub accounts: Vec<String>,
    pub periods: Vec<String>,
    pub filters: QueryFilters,
    pub members: Vec<Member>,
}

impl Chunk {
    pub fn request(&self) -> BatchRequest<'_> {
        BatchRequest {
            accounts: &self.accounts,
            periods: &self.periods,
            subsidiary: self.filters.subsidiary(),
            class: self.filters.class(),
            department: self.filters.department(),
            location: self.filters.location(),
            book: self.filters.book(),
        }
    }
}

/// The chunks of one batch group, to be dispatched sequentially.
#[derive(Debug)]
pub(crate) struct GroupPlan {
    pub chunks: Vec<Chunk>,
}

/// Builds the dispatch plan for one drained snapshot.
///
/// `max_group_periods` bounds the expanded period union of a group: members
/// are greedily packed into subgroups that stay under the ceiling, in
/// registration order. A single member whose own range exceeds the ceiling
/// forms a one-member group; truncating it would silently change the
/// aggregate.
pub(crate) fn plan(
    snapshot: Vec<(RequestFingerprint, PendingRequest)>,
    max_group_periods: usize,
    max_chunk_accounts: usize,
) -> Vec<GroupPlan> {
    let mut partitions: Vec<(String, Vec<(RequestFingerprint, PendingRequest)>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (fingerprint, pending) in snapshot {
        let key = group_key(pending.query.family, &pending.query.filters);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            partitions.push((key, Vec::new()));
            partitions.len() - 1
        });
        partitions[slot].1.push((fingerprint, pending));
    }

    let mut plans = Vec::new();
    for (_, members) in partitions {
        for subgroup in pack_by_period_union(members, max_group_periods) {
            plans.push(build_group(subgroup, max_chunk_accounts));
        }
    }
    plans
}

struct ExpandedMember {
    fingerprint: RequestFingerprint,
    pending: PendingRequest,
    periods: Vec<String>,
}

/// Greedy packing under the period-union ceiling, preserving order.
fn pack_by_period_union(
    members: Vec<(RequestFingerprint, PendingRequest)>,
    max_group_periods: usize,
) -> Vec<Vec<ExpandedMember>> {
    let mut subgroups: Vec<Vec<ExpandedMember>> = Vec::new();
    let mut current: Vec<ExpandedMember> = Vec::new();
    let mut union: HashSet<String> = HashSet::new();

    for (fingerprint, pending) in members {
        let periods = pending.query.range.expand();
        let additional = periods
            .iter()
            .filter(|label| !union.contains(*label))
            .count();

        if !current.is_empty() && union.len() + additional > max_group_periods {
            subgroups.push(std::mem::take(&mut current));
            union.clear();
        }

        union.extend(periods.iter().cloned());
        current.push(ExpandedMember {
            fingerprint,
            pending,
            periods,
        });
    }

    if !current.is_empty() {
        subgroups.push(current);
    }
    subgroups
}

fn build_group(members: Vec<ExpandedMember>, max_chunk_accounts: usize) -> GroupPlan {
    debug_assert!(!members.is_empty());
    let family = members[0].pending.query.family;
    let filters = members[0].pending.query.filters.clone();

    // Union of periods and distinct accounts, both in first-contribution
    // order. The first period label drives the aggregate value policy.
    let mut periods: Vec<String> = Vec::new();
    let mut seen_periods: HashSet<String> = HashSet::new();
    let mut accounts: Vec<String> = Vec::new();
    let mut account_chunk: HashMap<String, usize> = HashMap::new();

    for member in &members {
        for label in &member.periods {
            if seen_periods.insert(label.clone()) {
                periods.push(label.clone());
            }
        }
        if !account_chunk.contains_key(&member.pending.query.account) {
            account_chunk.insert(member.pending.query.account.clone(), accounts.len() / max_chunk_accounts);
            accounts.push(member.pending.query.account.clone());
        }
    }

    let mut chunks: Vec<Chunk> = accounts
        .chunks(max_chunk_accounts)
        .map(|slice| Chunk {
            family,
            accounts: slice.to_vec(),
            periods: periods.clone(),
            filters: filters.clone(),
            members: Vec::new(),
        })
        .collect();

    for member in members {
        let chunk_index = account_chunk[&member.pending.query.account];
        chunks[chunk_index].members.push(Member {
            fingerprint: member.fingerprint,
            account: member.pending.query.account,
            invocations: member.pending.invocations,
        });
    }

    GroupPlan { chunks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::PeriodRange;
    use crate::types::BatchQuery;

    fn entry(
        family: FunctionFamily,
        account: &str,
        start: &str,
        end: &str,
        filters: QueryFilters,
    ) -> (RequestFingerprint, PendingRequest) {
        let range = PeriodRange {
            start: (!start.is_empty()).then(|| start.to_string()),
            end: (!end.is_empty()).then(|| end.to_string()),
        };
        let fingerprint = RequestFingerprint::compute(family, account, &range, &filters);
        let mut registry = super::super::registry::Registry::default();
        registry.register(
            fingerprint.clone(),
            BatchQuery {
                family,
                account: account.to_string(),
                range,
                filters,
            },
            Invocation::new(|_| {}),
        );
        registry.drain().pop().unwrap()
    }

    #[test]
    fn overlapping_ranges_union_in_contribution_order() {
        let snapshot = vec![
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Mar 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Balance,
                "4010",
                "Feb 2025",
                "Feb 2025",
                QueryFilters::default(),
            ),
        ];

        let plans = plan(snapshot, 96, 25);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].chunks.len(), 1);

        let chunk = &plans[0].chunks[0];
        assert_eq!(chunk.accounts, vec!["4010"]);
        assert_eq!(chunk.periods, vec!["Jan 2025", "Feb 2025", "Mar 2025"]);
        assert_eq!(chunk.members.len(), 3);
    }

    #[test]
    fn differing_filters_split_groups() {
        let snapshot = vec![
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Jan 2025",
                QueryFilters {
                    department: Some("13".into()),
                    ..Default::default()
                },
            ),
            entry(
                FunctionFamily::Balance,
                "4011",
                "Jan 2025",
                "Jan 2025",
                QueryFilters {
                    department: Some("14".into()),
                    ..Default::default()
                },
            ),
        ];

        let plans = plan(snapshot, 96, 25);
        assert_eq!(plans.len(), 2);
    }

    #[test]
    fn families_never_mix() {
        let snapshot = vec![
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Budget,
                "4010",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
        ];

        let plans = plan(snapshot, 96, 25);
        assert_eq!(plans.len(), 2);
    }

    #[test]
    fn accounts_are_chunked_by_the_ceiling() {
        let snapshot = vec![
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Balance,
                "4011",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Balance,
                "4012",
                "Jan 2025",
                "Jan 2025",
                QueryFilters::default(),
            ),
        ];

        let plans = plan(snapshot, 96, 2);
        assert_eq!(plans.len(), 1);
        let chunks = &plans[0].chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].accounts, vec!["4010", "4011"]);
        assert_eq!(chunks[1].accounts, vec!["4012"]);
        assert_eq!(chunks[0].members.len(), 2);
        assert_eq!(chunks[1].members.len(), 1);
        // Every chunk carries the group's full period union.
        assert_eq!(chunks[0].periods, chunks[1].periods);
    }

    #[test]
    fn period_ceiling_packs_members_into_subgroups() {
        let snapshot = vec![
            entry(
                FunctionFamily::Balance,
                "4010",
                "Jan 2025",
                "Jun 2025",
                QueryFilters::default(),
            ),
            entry(
                FunctionFamily::Balance,
                "4011",
                "Jul 2025",
                "Dec 2025",
                QueryFilters::default(),
            ),
        ];

        // Six periods each; a ceiling of 6 forces two subgroups.
        let plans = plan(snapshot, 6, 25);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].chunks[0].accounts, vec!["4010"]);
        assert_eq!(plans[1].chunks[0].accounts, vec!["4011"]);
    }

    #[test]
    fn oversized_member_still_dispatches_alone() {
        let snapshot = vec![entry(
            FunctionFamily::Balance,
            "4010",
            "Jan 2020",
            "Dec 2025",
            QueryFilters::default(),
        )];

        let plans = plan(snapshot, 12, 25);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].chunks[0].periods.len(), 72);
    }
}
