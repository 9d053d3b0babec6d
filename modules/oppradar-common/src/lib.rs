pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{PersistenceError, SourceError};
pub use events::{EventEnvelope, EventSink, MemoryEventSink, NullEventSink, SystemEvent, TracingEventSink};
pub use fingerprint::TopicFingerprint;
pub use metrics::{MetricsSink, NullMetricsSink, TracingMetricsSink};
pub use types::*;
