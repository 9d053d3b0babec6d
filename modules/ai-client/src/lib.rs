pub mod claude;
pub mod error;
pub mod traits;

pub use claude::ClaudeInference;
pub use error::InferenceError;
pub use traits::{invoke_typed, InferenceClient, InferenceRequest, UnconfiguredInference};
