use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::error::InferenceError;

// =============================================================================
// Request
// =============================================================================

/// One structured inference invocation: a declared output schema, a system
/// preamble, and a structured input payload.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Stage label for logging ("market_research", ...).
    pub stage: String,
    pub system: String,
    pub input: serde_json::Value,
    /// JSON schema the output must satisfy.
    pub schema: serde_json::Value,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    pub fn new(
        stage: impl Into<String>,
        system: impl Into<String>,
        input: serde_json::Value,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            stage: stage.into(),
            system: system.into(),
            input,
            schema,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

// =============================================================================
// Client Trait
// =============================================================================

/// The inference capability collaborator. Implementations own the wire
/// protocol and must honor the declared timeout; all failures arrive as
/// typed [`InferenceError`] values.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn invoke(
        &self,
        request: &InferenceRequest,
    ) -> Result<serde_json::Value, InferenceError>;

    /// The declared per-call timeout.
    fn declared_timeout(&self) -> Duration;
}

/// Derive the schema for `T`, invoke, and deserialize the output into `T`.
/// Schema mismatches surface as [`InferenceError::MalformedOutput`].
pub async fn invoke_typed<T>(
    client: &dyn InferenceClient,
    stage: impl Into<String>,
    system: impl Into<String>,
    input: serde_json::Value,
    temperature: f32,
) -> Result<T, InferenceError>
where
    T: DeserializeOwned + JsonSchema,
{
    let root = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    let schema = serde_json::to_value(root)
        .map_err(|e| InferenceError::MalformedOutput(format!("schema generation: {e}")))?;

    let request = InferenceRequest::new(stage, system, input, schema).temperature(temperature);
    let output = client.invoke(&request).await?;
    serde_json::from_value(output).map_err(|e| InferenceError::MalformedOutput(e.to_string()))
}

/// Stand-in client for deployments with no inference credentials. Every
/// invocation is a typed `Unavailable`, so callers degrade to their fallback
/// paths instead of crashing.
pub struct UnconfiguredInference;

#[async_trait]
impl InferenceClient for UnconfiguredInference {
    async fn invoke(
        &self,
        request: &InferenceRequest,
    ) -> Result<serde_json::Value, InferenceError> {
        Err(InferenceError::Unavailable(format!(
            "no inference credentials configured (stage {})",
            request.stage
        )))
    }

    fn declared_timeout(&self) -> Duration {
        Duration::from_secs(0)
    }
}
