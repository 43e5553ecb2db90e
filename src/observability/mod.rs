//! # Observability
//!
//! - Structured logging through `tracing`; every log line carries an
//!   `event` field naming one of the [`Event`] variants
//! - Monotonic counters in [`MetricsRegistry`], readable as a
//!   serializable [`MetricsSnapshot`] (the engine-health view)
//!
//! Observability never feeds back into replication or delivery decisions.
//!
//! ```ignore
//! use billsync::observability::{init_tracing, Event, MetricsRegistry};
//!
//! init_tracing(false);
//! let metrics = MetricsRegistry::new();
//! metrics.increment_operations_confirmed();
//! tracing::info!(event = Event::OperationConfirmed.as_str(), "saved");
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Honours `RUST_LOG`, defaulting to `info`. With `json` set, each event is
/// written as one JSON object per line. Calling this twice is a no-op.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };
}
