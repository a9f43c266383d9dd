//! Tracing setup for watch sessions.
//!
//! Bundlewatch is a library, so installing a subscriber is opt-in: a
//! bundler that already has one skips [`init_with_config`] and still sees
//! every session event, tagged with a `component` field (`watcher`,
//! `registry`, `backend`, `pipeline`, `bundle`, `sink`).
//!
//! Levels come from the `[logging]` table of `.bundlewatch/settings.toml`
//! unless `RUST_LOG` is set:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "bundlewatch::watcher" = "debug"   # every change and batch
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config.
fn directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut filter = config.default.clone();
    for (module, level) in modules {
        filter.push_str(&format!(",{module}={level}"));
    }
    filter
}

/// Initialize logging with configuration.
///
/// Only the first call takes effect. Embedding builders that install their
/// own subscriber should skip this entirely.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // Another subscriber may already be installed by the host process.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Initialize logging with `LoggingConfig::default()` (warnings and errors).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log a session event at info level.
///
/// The component is recorded as a structured `component` field, so
/// hosts with a JSON subscriber can filter on it; the compact formatter
/// prints it ahead of the message.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "changed", "{identity} (closed {n} watchers)");
/// log_event!("watcher", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!(component = $component, "{}", $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, "{}: {}", $event, format_args!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
///
/// # Examples
/// ```ignore
/// debug_event!("registry", "already watching", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!(component = $component, "{}", $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, "{}: {}", $event, format_args!($($arg)*))
    };
}

/// A fault the session recovers from; it is also reported to the sink.
///
/// # Examples
/// ```ignore
/// warn_event!("watcher", "watch failed", "{error}");
/// ```
#[macro_export]
macro_rules! warn_event {
    ($component:expr, $event:expr) => {
        tracing::warn!(component = $component, "{}", $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, "{}: {}", $event, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_from_config() {
        let mut config = LoggingConfig::default();
        config.modules.insert("watcher".into(), "debug".into());
        config.modules.insert("backend".into(), "trace".into());

        assert_eq!(directives(&config), "warn,backend=trace,watcher=debug");
    }

    #[test]
    fn test_event_macros_take_inline_args() {
        init();
        let path = std::path::Path::new("/proj/a.js");
        let handles = 2;
        crate::log_event!("watcher", "started");
        crate::debug_event!("registry", "watching", "{} ({handles} handles)", path.display());
        crate::warn_event!("watcher", "watch failed", "{}: refused", path.display());
    }

    #[test]
    fn test_init_is_repeatable() {
        init();
        init_with_config(&LoggingConfig::default());
    }
}
