//! The host adapter boundary.
//!
//! Spreadsheet hosts deliver formula calls through platform-specific calling
//! conventions (some append the invocation handle as a contextual trailing
//! argument, some supply a close operation, some do not). This module is the
//! thin shim that converts all of that into the engine's explicit types: a
//! [`FormulaCall`] with the raw arguments and an always-present [`Invocation`]
//! handle. Nothing past this boundary ever guesses which trailing value is
//! the handle.

use std::mem;
use std::sync::{Arc, Mutex};

use crate::types::{CellValue, QueryFilters};

/// A period argument exactly as the host supplies it: either a pre-formatted
/// period label or a numeric date serial.
#[derive(Clone, Debug)]
pub enum PeriodArg {
    Label(String),
    Serial(f64),
}

/// Raised when a period argument is present but cannot be normalized.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MalformedPeriod;

impl PeriodArg {
    /// Normalizes the argument into a canonical period label.
    ///
    /// A blank label counts as absent. A label that does not parse as a
    /// month period is passed through verbatim (the range expansion falls
    /// back to endpoint labels). A date serial that cannot be converted is
    /// malformed input.
    pub(crate) fn normalize(&self) -> Result<Option<String>, MalformedPeriod> {
        match self {
            PeriodArg::Label(label) => {
                let trimmed = label.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                let canonical = crate::periods::Period::parse(trimmed)
                    .map(|period| period.label())
                    .unwrap_or_else(|| trimmed.to_string());
                Ok(Some(canonical))
            }
            PeriodArg::Serial(serial) => match crate::periods::Period::from_serial(*serial) {
                Some(period) => Ok(Some(period.label())),
                None => Err(MalformedPeriod),
            },
        }
    }
}

/// One raw formula call as received from the host, before normalization.
#[derive(Clone, Debug, Default)]
pub struct FormulaCall {
    /// The primary key (GL account number).
    pub account: String,
    /// Optional period range markers.
    pub start: Option<PeriodArg>,
    pub end: Option<PeriodArg>,
    /// Optional filter dimensions and accounting-book selector.
    pub filters: QueryFilters,
}

type CompleteFn = Box<dyn FnOnce(CellValue) + Send + 'static>;
type HookFn = Box<dyn FnOnce() + Send + 'static>;

enum State {
    Pending {
        complete: CompleteFn,
        /// Explicit-close operation; not every host environment supplies one.
        close: Option<HookFn>,
        /// Installed by the engine at registration time so that a pre-drain
        /// cancellation removes the invocation from the pending registry.
        on_cancel: Option<HookFn>,
    },
    Resolved,
    Cancelled,
}

/// Handle representing one pending formula evaluation.
///
/// The engine exclusively owns the invocation from registration until
/// resolution or cancellation. Resolution invokes the completion callback
/// with the final value exactly once, then the explicit-close operation if
/// present; resolving an already-resolved or cancelled invocation is a no-op.
#[derive(Clone)]
pub struct Invocation {
    inner: Arc<Mutex<State>>,
}

impl Invocation {
    /// Creates an invocation with a completion callback.
    pub fn new(complete: impl FnOnce(CellValue) + Send + 'static) -> Self {
        Invocation {
            inner: Arc::new(Mutex::new(State::Pending {
                complete: Box::new(complete),
                close: None,
                on_cancel: None,
            })),
        }
    }

    /// Attaches the host's explicit-close operation, for host environments
    /// that have one. It runs once, right after the completion callback.
    pub fn with_close(self, close: impl FnOnce() + Send + 'static) -> Self {
        if let State::Pending { close: slot, .. } = &mut *self.inner.lock().unwrap() {
            *slot = Some(Box::new(close));
        }
        self
    }

    /// Cancels the invocation.
    ///
    /// After this, the completion callback and close operation will never be
    /// invoked, even if a covering network request later completes. Safe to
    /// call at any time; cancelling a resolved invocation is a no-op.
    pub fn cancel(&self) {
        let hook = {
            let mut state = self.inner.lock().unwrap();
            match mem::replace(&mut *state, State::Cancelled) {
                State::Pending { on_cancel, .. } => on_cancel,
                State::Resolved => {
                    *state = State::Resolved;
                    None
                }
                State::Cancelled => None,
            }
        };
        // Runs outside the state lock; the hook takes the registry lock.
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Resolves the invocation with its final value.
    ///
    /// At-most-once: a second resolution is a guarded no-op (an internal
    /// invariant violation, logged but never surfaced to the host), and a
    /// cancelled invocation silently drops the value.
    pub(crate) fn resolve(&self, value: CellValue) {
        let callbacks = {
            let mut state = self.inner.lock().unwrap();
            match mem::replace(&mut *state, State::Resolved) {
                State::Pending {
                    complete, close, ..
                } => Some((complete, close)),
                State::Resolved => {
                    tracing::warn!("attempted to resolve an invocation twice; ignoring");
                    None
                }
                State::Cancelled => {
                    *state = State::Cancelled;
                    None
                }
            }
        };
        if let Some((complete, close)) = callbacks {
            complete(value);
            if let Some(close) = close {
                close();
            }
        }
    }

    /// Installs the engine's cancellation hook.
    ///
    /// If the invocation was already cancelled between registration and this
    /// call, the hook runs immediately so the registry entry is cleaned up.
    pub(crate) fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { on_cancel, .. } => {
                    *on_cancel = Some(Box::new(hook));
                    return;
                }
                State::Cancelled => true,
                State::Resolved => false,
            }
        };
        if run_now {
            hook();
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.inner.lock().unwrap(), State::Pending { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.inner.lock().unwrap(), State::Cancelled)
    }

    /// Whether two handles refer to the same invocation.
    pub(crate) fn same_handle(&self, other: &Invocation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.lock().unwrap() {
            State::Pending { .. } => "pending",
            State::Resolved => "resolved",
            State::Cancelled => "cancelled",
        };
        f.debug_struct("Invocation").field("state", &state).finish()
    }
}
