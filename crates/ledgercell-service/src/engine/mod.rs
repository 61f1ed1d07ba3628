//! The formula engine.
//!
//! One process-scoped context object owns the cache store, the pending
//! request registry, the batch scheduler, and the transport client; every
//! component receives it explicitly instead of reaching for hidden shared
//! state. All work runs as non-blocking tasks on the provided runtime; the
//! host-visible contract is that every accepted invocation is eventually
//! resolved with a value (possibly the sentinel), never an unhandled fault.

use std::sync::{Arc, Mutex, Weak};

use crate::caching::CacheStore;
use crate::config::{BatchingConfig, Config};
use crate::fingerprint::RequestFingerprint;
use crate::host::{FormulaCall, Invocation, PeriodArg};
use crate::periods::PeriodRange;
use crate::transport::{ChunkOutcome, RemoteClient};
use crate::types::{BatchQuery, CellValue, FunctionFamily};

mod distribute;
mod grouping;
mod registry;

use grouping::{Chunk, GroupPlan};
use registry::Registry;

/// Scheduler state: `Idle` until the first registration since the last
/// drain, then `Armed` with exactly one pending drain task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SchedulerState {
    Idle,
    Armed,
}

/// The request coalescing, caching, and invocation-lifecycle engine.
pub struct FormulaEngine {
    batching: BatchingConfig,
    runtime: tokio::runtime::Handle,
    cache: CacheStore,
    registry: Mutex<Registry>,
    scheduler: Mutex<SchedulerState>,
    transport: RemoteClient,
}

impl FormulaEngine {
    /// Creates the engine on the given runtime.
    pub fn new(config: &Config, runtime: tokio::runtime::Handle) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(FormulaEngine {
            batching: config.batching.clone(),
            runtime,
            cache: CacheStore::new(),
            registry: Mutex::new(Registry::default()),
            scheduler: Mutex::new(SchedulerState::Idle),
            transport: RemoteClient::new(&config.remote)?,
        }))
    }

    /// Submits a GL balance formula call.
    pub fn balance(self: &Arc<Self>, call: FormulaCall, invocation: Invocation) {
        self.submit(FunctionFamily::Balance, call, invocation);
    }

    /// Submits a budget formula call.
    pub fn budget(self: &Arc<Self>, call: FormulaCall, invocation: Invocation) {
        self.submit(FunctionFamily::Budget, call, invocation);
    }

    /// Submits an account title lookup.
    pub fn account_title(self: &Arc<Self>, account: impl Into<String>, invocation: Invocation) {
        let call = FormulaCall {
            account: account.into(),
            ..Default::default()
        };
        self.submit(FunctionFamily::AccountTitle, call, invocation);
    }

    /// Clears every cache namespace (the user-triggered reset).
    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    /// Clears one family's cache namespace.
    pub fn clear_namespace(&self, family: FunctionFamily) {
        self.cache.clear(family);
    }

    /// Number of distinct request shapes currently awaiting a drain.
    pub fn pending_requests(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    fn submit(self: &Arc<Self>, family: FunctionFamily, call: FormulaCall, invocation: Invocation) {
        let account = call.account.trim().to_string();
        if account.is_empty() {
            invocation.resolve(CellValue::NoData);
            return;
        }

        let range = match normalize_range(call.start.as_ref(), call.end.as_ref()) {
            Ok(range) => range,
            Err(()) => {
                // Malformed input resolves immediately; no network call.
                tracing::debug!(%family, %account, "malformed period argument; resolving sentinel");
                invocation.resolve(CellValue::NoData);
                return;
            }
        };

        let fingerprint = RequestFingerprint::compute(family, &account, &range, &call.filters);
        if let Some(value) = self.cache.get(family, &fingerprint) {
            invocation.resolve(value);
            return;
        }

        let query = BatchQuery {
            family,
            account,
            range,
            filters: call.filters,
        };
        self.registry
            .lock()
            .unwrap()
            .register(fingerprint.clone(), query, invocation.clone());

        // A cancellation arriving before the drain must remove the waiter so
        // an all-cancelled request never generates network traffic.
        let engine: Weak<FormulaEngine> = Arc::downgrade(self);
        let handle = invocation.clone();
        invocation.set_cancel_hook(move || {
            if let Some(engine) = engine.upgrade() {
                engine
                    .registry
                    .lock()
                    .unwrap()
                    .deregister(&fingerprint, &handle);
            }
        });

        self.arm();
    }

    /// Arms the scheduler if it is idle.
    ///
    /// Exactly one drain task exists while armed; every invocation arriving
    /// within the coalescing window lands in the same snapshot.
    fn arm(self: &Arc<Self>) {
        {
            let mut state = self.scheduler.lock().unwrap();
            if *state == SchedulerState::Armed {
                return;
            }
            *state = SchedulerState::Armed;
        }

        let engine = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(engine.batching.coalesce_window).await;
            engine.drain();
        });
    }

    /// Drains the registry and dispatches the resulting groups.
    ///
    /// The scheduler flips back to idle before the snapshot is taken: a
    /// formula call racing the drain either lands in this snapshot or
    /// registers fresh into the emptied registry and re-arms.
    fn drain(self: &Arc<Self>) {
        *self.scheduler.lock().unwrap() = SchedulerState::Idle;

        let snapshot = self.registry.lock().unwrap().drain();
        if snapshot.is_empty() {
            return;
        }

        let plans = grouping::plan(
            snapshot,
            self.batching.max_group_periods,
            self.batching.max_chunk_accounts,
        );
        tracing::debug!(groups = plans.len(), "drained registry");

        // Groups dispatch independently of one another; only chunks within a
        // group are ordered.
        for plan in plans {
            let engine = Arc::clone(self);
            self.runtime.spawn(async move {
                engine.dispatch_group(plan).await;
            });
        }
    }

    async fn dispatch_group(self: Arc<Self>, plan: GroupPlan) {
        let chunk_count = plan.chunks.len();
        for (index, chunk) in plan.chunks.into_iter().enumerate() {
            let outcome = self.send_with_backoff(&chunk).await;
            distribute::distribute(&self.cache, chunk, outcome);

            // The inter-chunk delay is a throttle for the remote concurrency
            // ceiling; the next chunk never starts before this one settled.
            if index + 1 < chunk_count {
                tokio::time::sleep(self.batching.inter_chunk_delay).await;
            }
        }
    }

    /// Sends one chunk, retrying the identical chunk on backpressure up to
    /// the configured ceiling.
    async fn send_with_backoff(&self, chunk: &Chunk) -> ChunkOutcome {
        let mut attempts = 0u32;
        loop {
            match self.transport.send_chunk(chunk.family, chunk.request()).await {
                ChunkOutcome::Backpressure if attempts < self.batching.backpressure_retries => {
                    attempts += 1;
                    tracing::debug!(
                        family = %chunk.family,
                        attempts,
                        "remote backpressure; retrying chunk after backoff"
                    );
                    tokio::time::sleep(self.batching.backpressure_backoff).await;
                }
                outcome => return outcome,
            }
        }
    }
}

impl std::fmt::Debug for FormulaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaEngine")
            .field("pending_requests", &self.pending_requests())
            .field("scheduler", &*self.scheduler.lock().unwrap())
            .finish()
    }
}

/// Normalizes the host's period pair. An absent or blank pair is fine; a
/// present-but-unconvertible date serial is malformed input.
fn normalize_range(
    start: Option<&PeriodArg>,
    end: Option<&PeriodArg>,
) -> Result<PeriodRange, ()> {
    let normalize = |arg: Option<&PeriodArg>| -> Result<Option<String>, ()> {
        match arg {
            None => Ok(None),
            Some(arg) => arg.normalize().map_err(|_| ()),
        }
    };
    Ok(PeriodRange {
        start: normalize(start)?,
        end: normalize(end)?,
    })
}
