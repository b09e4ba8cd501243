use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use drover_types::TokenUsage;

use crate::{
    truncate_for_error, CompletionOutcome, CompletionRequest, ProviderCapabilities, ProviderClient,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Google generative-language REST API.
#[derive(Debug)]
pub struct GeminiClient {
    model_name: String,
    api_key: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(model_name: String, api_key: String) -> Self {
        Self {
            model_name,
            api_key,
            client: Client::new(),
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut parts = vec![json!({"text": request.prompt})];
        for attachment in &request.attachments {
            if attachment.media_type.starts_with("image/")
                || attachment.media_type == "application/pdf"
            {
                parts.push(json!({
                    "inline_data": {
                        "mime_type": attachment.media_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(&attachment.data),
                    }
                }));
            }
        }

        let mut body = json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        if let Some(system) = &request.system_prompt {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tools: false,
            supports_vision: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionOutcome> {
        let url = format!("{BASE_URL}/models/{}:generateContent", self.model_name);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(request))
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
                        "gemini request failed with status {status}: {}",
                        truncate_for_error(&value.to_string(), 500)
                    )
                });
            anyhow::bail!(detail);
        }

        let output = collect_candidate_text(&value).ok_or_else(|| {
            anyhow::anyhow!(
                "gemini returned no completion content for model `{}`",
                self.model_name
            )
        })?;
        Ok(CompletionOutcome {
            output,
            usage: extract_usage(&value),
        })
    }
}

fn collect_candidate_text(value: &Value) -> Option<String> {
    let parts = value
        .pointer("/candidates/0/content/parts")?
        .as_array()?;
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            out.push_str(text);
        }
    }
    (!out.is_empty()).then_some(out)
}

fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usageMetadata")?;
    let input_tokens = usage
        .get("promptTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = usage
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total_tokens = usage
        .get("totalTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(input_tokens.saturating_add(output_tokens));
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_text_concatenates_parts() {
        let value = json!({"candidates":[{"content":{"parts":[
            {"text":"Answer: "},{"text":"42"}]}}]});
        assert_eq!(collect_candidate_text(&value).as_deref(), Some("Answer: 42"));
        assert!(collect_candidate_text(&json!({})).is_none());
    }

    #[test]
    fn usage_metadata_maps_to_token_usage() {
        let value = json!({"usageMetadata":{
            "promptTokenCount": 12, "candidatesTokenCount": 8, "totalTokenCount": 20}});
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn system_instruction_included_when_present() {
        let client = GeminiClient::new("gemini-1.5-flash".into(), "key".into());
        let mut request = CompletionRequest::new("What is 2+2?");
        request.system_prompt = Some("Answer in one word.".into());
        let body = client.request_body(&request);
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "Answer in one word."
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2000);
    }
}
