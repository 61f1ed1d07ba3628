//! The request coalescing, caching, and invocation-lifecycle engine that sits
//! between spreadsheet formula invocations and a slow, rate-limited remote
//! general-ledger service.
//!
//! A spreadsheet can instantiate hundreds of near-identical formula calls
//! within milliseconds. The [`FormulaEngine`] deduplicates identical requests,
//! coalesces compatible ones into bounded batches, retries on backpressure,
//! and fans results back out to the exact invocation that asked for them,
//! including invocations cancelled or superseded mid-flight.

pub mod caching;
pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod host;
pub mod logging;
pub mod periods;
pub mod transport;
pub mod types;

pub use crate::config::Config;
pub use crate::engine::FormulaEngine;
pub use crate::host::{FormulaCall, Invocation, PeriodArg};
pub use crate::types::{CellValue, FunctionFamily, QueryFilters};
