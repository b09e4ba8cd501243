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

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOOL_ROUNDS: usize = 10;

#[derive(Debug)]
pub struct AnthropicClient {
    model_name: String,
    api_key: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(model_name: String, api_key: String) -> Self {
        Self {
            model_name,
            api_key,
            client: Client::new(),
        }
    }

    fn user_content(&self, request: &CompletionRequest) -> Value {
        if request.attachments.is_empty() {
            return Value::String(request.prompt.clone());
        }
        let mut blocks = vec![json!({"type": "text", "text": request.prompt})];
        for attachment in &request.attachments {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.data);
            if attachment.media_type.starts_with("image/") {
                blocks.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": attachment.media_type,
                        "data": encoded,
                    }
                }));
            } else if attachment.media_type == "application/pdf" {
                blocks.push(json!({
                    "type": "document",
                    "source": {
                        "type": "base64",
                        "media_type": "application/pdf",
                        "data": encoded,
                    }
                }));
            } else {
                blocks.push(json!({
                    "type": "text",
                    "text": format!("[attached file {} ({}) omitted]",
                        attachment.filename, attachment.media_type)
                }));
            }
        }
        Value::Array(blocks)
    }

    async fn send(&self, body: &Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = value
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "anthropic request failed with status {status}: {}",
                        truncate_for_error(&value.to_string(), 500)
                    )
                });
            anyhow::bail!(detail);
        }
        Ok(value)
    }

    fn request_body(&self, request: &CompletionRequest, messages: &[Value], tools: &[Value]) -> Value {
        let mut body = json!({
            "model": self.model_name,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        body
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tools: true,
            supports_vision: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionOutcome> {
        let messages = vec![json!({"role": "user", "content": self.user_content(request)})];
        let value = self.send(&self.request_body(request, &messages, &[])).await?;
        Ok(CompletionOutcome {
            output: collect_text_blocks(&value),
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
                    "name": schema.name,
                    "description": schema.description,
                    "input_schema": schema.input_schema,
                })
            })
            .collect();

        let mut messages = vec![json!({"role": "user", "content": self.user_content(request)})];
        let mut usage = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let value = self
                .send(&self.request_body(request, &messages, &wire_tools))
                .await?;
            if let Some(u) = extract_usage(&value) {
                usage = Some(u);
            }

            let stop_reason = value
                .get("stop_reason")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let content = value
                .get("content")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            if stop_reason != "tool_use" {
                return Ok(CompletionOutcome {
                    output: collect_text_blocks(&value),
                    usage,
                });
            }

            messages.push(json!({"role": "assistant", "content": content}));
            let mut results = Vec::new();
            for block in &content {
                if block.get("type").and_then(|v| v.as_str()) != Some("tool_use") {
                    continue;
                }
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));

                debug!("anthropic round {round}: executing tool {name}");
                let result = match tools.execute(name, input).await {
                    Ok(result) => result,
                    Err(e) => json!({"error": e.to_string()}).to_string(),
                };
                results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": result,
                }));
            }
            messages.push(json!({"role": "user", "content": results}));
        }

        anyhow::bail!("tool loop exceeded {MAX_TOOL_ROUNDS} rounds without a final answer")
    }
}

fn collect_text_blocks(value: &Value) -> String {
    let mut out = String::new();
    if let Some(blocks) = value.get("content").and_then(|v| v.as_array()) {
        for block in blocks {
            if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    out.push_str(text);
                }
            }
        }
    }
    out
}

fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64())?;
    let output_tokens = usage
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens.saturating_add(output_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_blocks_concatenate() {
        let value = json!({"content":[
            {"type":"text","text":"The answer "},
            {"type":"tool_use","id":"x","name":"noop","input":{}},
            {"type":"text","text":"is 4."}
        ]});
        assert_eq!(collect_text_blocks(&value), "The answer is 4.");
    }

    #[test]
    fn usage_sums_directional_counts() {
        let value = json!({"usage":{"input_tokens":11,"output_tokens":4}});
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn pdf_attachments_become_document_blocks() {
        let client = AnthropicClient::new("claude-3-5-sonnet-latest".into(), "key".into());
        let mut request = CompletionRequest::new("summarise");
        request.attachments.push(crate::BinaryAttachment {
            filename: "paper.pdf".into(),
            media_type: "application/pdf".into(),
            data: vec![0x25, 0x50, 0x44, 0x46],
        });
        let content = client.user_content(&request);
        let blocks = content.as_array().unwrap();
        assert_eq!(blocks[1]["type"], "document");
        assert_eq!(blocks[1]["source"]["media_type"], "application/pdf");
    }

    #[test]
    fn system_prompt_rides_at_top_level() {
        let client = AnthropicClient::new("claude-3-5-sonnet-latest".into(), "key".into());
        let mut request = CompletionRequest::new("hi");
        request.system_prompt = Some("You are terse.".into());
        let body = client.request_body(&request, &[], &[]);
        assert_eq!(body["system"], "You are terse.");
    }
}
