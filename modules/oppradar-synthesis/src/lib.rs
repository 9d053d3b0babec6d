pub mod fallback;
pub mod locks;
pub mod orchestrator;
pub mod stages;

pub use locks::ClusterLocks;
pub use orchestrator::{AttemptState, Orchestrator, SynthesisError};
