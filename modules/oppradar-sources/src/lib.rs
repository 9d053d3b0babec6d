pub mod adapter;
pub mod directory;
pub mod engagement;
pub mod forum;
pub mod issue_tracker;
pub mod launch_feed;
pub mod registry;

pub use adapter::{AdapterDescriptor, FetchPage, SourceAdapter};
pub use engagement::Calibrations;
pub use registry::AdapterRegistry;
