//! Observability
//!
//! Logging, metrics, and the structured session event stream.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventEmitter, SessionEvent};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
