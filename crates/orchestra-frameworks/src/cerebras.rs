//! Chat-completions plugin targeting a Cerebras-style inference endpoint.
//! No Cerebras integration exists upstream to crib from; this follows the
//! same streaming-SSE-over-reqwest shape the reference codebase uses for
//! its OpenAI-compatible provider (buffer on blank lines, parse `data: `
//! frames, stop at `[DONE]`), adapted to this crate's plugin contract
//! instead of a chat-provider trait.

use async_trait::async_trait;
use futures::StreamExt;
use orchestra_types::execution_log::LogLevel;
use serde_json::{json, Value};

use crate::{ConfigField, ConfigSchema, ExecutionOutcome, FieldType, FrameworkPlugin, PluginContext, PluginError};

const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";
const DEFAULT_MODEL: &str = "llama3.1-8b";

pub struct CerebrasPlugin {
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CerebrasPlugin {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    fn api_key_for(&self, configuration: &Value) -> Option<String> {
        configuration
            .get("apiKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.api_key.clone())
    }
}

#[async_trait]
impl FrameworkPlugin for CerebrasPlugin {
    fn tag(&self) -> &'static str {
        "cerebras"
    }

    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::optional("model", FieldType::String, "chat-completions model id", json!(DEFAULT_MODEL)),
            ConfigField::optional("baseUrl", FieldType::String, "API base URL", json!(DEFAULT_BASE_URL)),
            ConfigField::optional("apiKey", FieldType::String, "overrides the process-wide API key", json!(null)),
            ConfigField::optional("temperature", FieldType::Number, "sampling temperature", json!(0.7)),
            ConfigField::optional("maxTokens", FieldType::Number, "max completion tokens", json!(1024)),
            ConfigField::required("prompt", FieldType::String, "prompt sent as the user message"),
        ])
    }

    fn validate(&self, configuration: &Value) -> Result<(), Vec<String>> {
        self.schema().validate(configuration)?;
        if self.api_key_for(configuration).is_none() {
            return Err(vec!["no Cerebras API key configured (set apiKey or CEREBRAS_API_KEY)".to_string()]);
        }
        Ok(())
    }

    async fn execute(&self, context: PluginContext) -> Result<ExecutionOutcome, PluginError> {
        let api_key = self
            .api_key_for(&context.configuration)
            .ok_or_else(|| PluginError::new("no Cerebras API key configured"))?;
        let base_url = context
            .configuration
            .get("baseUrl")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BASE_URL);
        let model = context
            .configuration
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL);
        let temperature = context.configuration.get("temperature").and_then(Value::as_f64).unwrap_or(0.7);
        let max_tokens = context.configuration.get("maxTokens").and_then(Value::as_u64).unwrap_or(1024);
        let prompt = context
            .configuration
            .get("prompt")
            .and_then(Value::as_str)
            .or_else(|| context.input.get("prompt").and_then(Value::as_str))
            .ok_or_else(|| PluginError::new("no prompt in configuration or input"))?;

        let response = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(&api_key)
            .json(&json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": temperature,
                "max_tokens": max_tokens,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| PluginError::new(format!("cerebras request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PluginError::new(format!("cerebras returned {status}: {body}")));
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut completion = String::new();
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<Value> = None;

        while let Some(chunk) = byte_stream.next().await {
            if context.is_cancelled() {
                return Err(PluginError::new("cancelled during cerebras stream"));
            }
            let chunk = chunk.map_err(|e| PluginError::new(format!("stream read error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(boundary) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..boundary + 2).collect();
                for line in frame.lines() {
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        continue;
                    }
                    let event: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(choice) = event.get("choices").and_then(|c| c.get(0)) {
                        if let Some(delta) = choice.get("delta").and_then(|d| d.get("content")).and_then(Value::as_str) {
                            completion.push_str(delta);
                            context.log_with_meta(LogLevel::Debug, "cerebras: delta", json!({ "delta": delta }));
                        }
                        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                            finish_reason = Some(reason.to_string());
                        }
                    }
                    if let Some(u) = event.get("usage") {
                        usage = Some(u.clone());
                    }
                }
            }
        }

        context.progress(100.0);
        context.log(LogLevel::Info, format!("cerebras: finished ({})", finish_reason.as_deref().unwrap_or("stop")));

        let tokens_used = usage.as_ref().and_then(|u| u.get("total_tokens")).and_then(Value::as_u64);

        Ok(ExecutionOutcome {
            output: json!({ "completion": completion, "finish_reason": finish_reason }),
            tokens_used,
            cost_usd: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_api_key() {
        let plugin = CerebrasPlugin::new(None);
        let errors = plugin.validate(&json!({"prompt": "hi"})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("API key")));
    }

    #[test]
    fn validate_accepts_process_wide_key() {
        let plugin = CerebrasPlugin::new(Some("sk-test".to_string()));
        assert!(plugin.validate(&json!({"prompt": "hi"})).is_ok());
    }

    #[test]
    fn validate_rejects_missing_prompt() {
        let plugin = CerebrasPlugin::new(Some("sk-test".to_string()));
        let errors = plugin.validate(&json!({})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("prompt")));
    }
}
