use std::env;

use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;

use crate::config::{LogFormat, Logging};

/// Initializes logging for the formula engine.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the
/// level specified in the configuration. Additionally, this toggles
/// `RUST_BACKTRACE` based on the [`Logging::enable_backtraces`] config value.
pub fn init(config: &Logging) {
    if config.enable_backtraces {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| config.level.to_string());

    let builder = fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(rust_log);

    match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => builder.pretty().init(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            builder.compact().with_ansi(false).init()
        }
        (LogFormat::Json, _) => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
    }
}
