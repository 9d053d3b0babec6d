//! Claude messages-API backend for the inference capability.
//!
//! Structured output is obtained by declaring the stage schema as a single
//! tool and forcing the model to call it; the tool input IS the stage output.

mod client;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::InferenceError;
use crate::traits::{InferenceClient, InferenceRequest};
use client::ClaudeClient;
use types::{ChatRequest, ToolDefinitionWire, WireMessage};

pub struct ClaudeInference {
    client: ClaudeClient,
    model: String,
    timeout: Duration,
}

impl ClaudeInference {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ClaudeClient::new(api_key),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl InferenceClient for ClaudeInference {
    async fn invoke(
        &self,
        request: &InferenceRequest,
    ) -> Result<serde_json::Value, InferenceError> {
        let tool_name = format!("record_{}", request.stage);
        let chat = ChatRequest::new(&self.model)
            .system(&request.system)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .message(WireMessage::user(
                serde_json::to_string_pretty(&request.input)
                    .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?,
            ))
            .forced_tool(ToolDefinitionWire {
                name: tool_name.clone(),
                description: format!("Record the structured {} result.", request.stage),
                input_schema: request.schema.clone(),
            });

        let response = tokio::time::timeout(self.timeout, self.client.chat(&chat))
            .await
            .map_err(|_| InferenceError::Timeout {
                limit_secs: self.timeout.as_secs(),
            })??;

        let output = response.tool_input(&tool_name).cloned().ok_or_else(|| {
            InferenceError::MalformedOutput(format!("no {tool_name} tool call in response"))
        })?;

        debug!(stage = request.stage.as_str(), "inference stage output received");
        Ok(output)
    }

    fn declared_timeout(&self) -> Duration {
        self.timeout
    }
}
