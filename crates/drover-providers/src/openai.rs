use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use drover_types::TokenUsage;

use crate::{
    truncate_for_error, CompletionOutcome, CompletionRequest, ProviderCapabilities,
    ProviderClient, ToolExecutor,
};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const MAX_TOOL_ROUNDS: usize = 10;

/// Client for the OpenAI chat-completions wire, shared by OpenAI itself and
/// Ollama's compatible endpoint.
#[derive(Debug)]
pub struct OpenAiCompatibleClient {
    label: &'static str,
    base_url: String,
    model_name: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn openai(model_name: String, api_key: String) -> Self {
        Self {
            label: "openai",
            base_url: "https://api.openai.com/v1".to_string(),
            model_name,
            api_key: Some(api_key),
            client: Client::new(),
        }
    }

    pub fn ollama(model_name: String, api_key: Option<String>, target_url: Option<&str>) -> Self {
        let base = target_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_OLLAMA_URL);
        Self {
            label: "ollama",
            base_url: normalize_base(base),
            model_name,
            api_key: api_key.or_else(|| Some("ollama".to_string())),
            client: Client::new(),
        }
    }

    fn user_content(&self, request: &CompletionRequest) -> Value {
        if request.attachments.is_empty() {
            return Value::String(request.prompt.clone());
        }
        let mut parts = vec![json!({"type": "text", "text": request.prompt})];
        for attachment in &request.attachments {
            if attachment.media_type.starts_with("image/") {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.data);
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", attachment.media_type, encoded)
                    }
                }));
            } else {
                parts.push(json!({
                    "type": "text",
                    "text": format!("[attached file {} ({}) omitted]",
                        attachment.filename, attachment.media_type)
                }));
            }
        }
        Value::Array(parts)
    }

    fn base_messages(&self, request: &CompletionRequest) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": self.user_content(request)}));
        messages
    }

    async fn send(&self, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_error(&value)
                .unwrap_or_else(|| format!("{} request failed with status {status}", self.label));
            anyhow::bail!(detail);
        }
        if let Some(detail) = extract_error(&value) {
            anyhow::bail!(detail);
        }
        Ok(value)
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tools: true,
            supports_vision: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionOutcome> {
        let body = json!({
            "model": self.model_name,
            "messages": self.base_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": false,
        });
        let value = self.send(&body).await?;
        let output = extract_message_text(&value).ok_or_else(|| {
            anyhow::anyhow!(
                "{} returned no completion content for model `{}` (response: {})",
                self.label,
                self.model_name,
                truncate_for_error(&value.to_string(), 500)
            )
        })?;
        Ok(CompletionOutcome {
            output,
            usage: extract_usage(&value),
        })
    }

    async fn complete_with_tools(
        &self,
        request: &CompletionRequest,
        tools: &dyn ToolExecutor,
    ) -> anyhow::Result<CompletionOutcome> {
        let schemas = tools.schemas();
        if schemas.is_empty() {
            return self.complete(request).await;
        }

        let wire_tools: Vec<Value> = schemas
            .iter()
            .map(|schema| {
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.input_schema,
                    }
                })
            })
            .collect();

        let mut messages = self.base_messages(request);
        let mut usage = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let body = json!({
                "model": self.model_name,
                "messages": messages,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "tools": wire_tools,
                "tool_choice": "auto",
                "stream": false,
            });
            let value = self.send(&body).await?;
            if let Some(u) = extract_usage(&value) {
                usage = Some(u);
            }

            let message = value
                .pointer("/choices/0/message")
                .cloned()
                .unwrap_or_default();
            let tool_calls = message
                .get("tool_calls")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            if tool_calls.is_empty() {
                let output = message
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Ok(CompletionOutcome { output, usage });
            }

            debug!(
                "{} round {round}: executing {} tool call(s)",
                self.label,
                tool_calls.len()
            );
            messages.push(message.clone());
            for call in tool_calls {
                let call_id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = call
                    .pointer("/function/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let args: Value = call
                    .pointer("/function/arguments")
                    .and_then(|v| v.as_str())
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_else(|| json!({}));

                let result = match tools.execute(name, args).await {
                    Ok(result) => result,
                    Err(e) => json!({"error": e.to_string()}).to_string(),
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": result,
                }));
            }
        }

        anyhow::bail!("tool loop exceeded {MAX_TOOL_ROUNDS} rounds without a final answer")
    }
}

fn normalize_base(input: &str) -> String {
    let trimmed = input.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn extract_message_text(value: &Value) -> Option<String> {
    let content = value.pointer("/choices/0/message/content")?;
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    out.push_str(text);
                }
            }
            (!out.is_empty()).then_some(out)
        }
        _ => None,
    }
}

fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    let input_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(input_tokens.saturating_add(output_tokens));
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

fn extract_error(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
