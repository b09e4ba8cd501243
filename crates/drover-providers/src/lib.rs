pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod remote;
pub mod sanitize;

pub use remote::{parse_remote_payload, RemoteDispatcher, RemoteExecutionConfig};
pub use sanitize::strip_think_tags;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use drover_types::{Provider, TokenUsage, ToolSchema};

/// One single-turn completion request, already rendered and enhanced.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub attachments: Vec<BinaryAttachment>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 2000,
            temperature: 0.7,
            attachments: Vec::new(),
        }
    }
}

/// Raw file handed to a multimodal model alongside the prompt.
#[derive(Debug, Clone)]
pub struct BinaryAttachment {
    pub filename: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOutcome {
    pub output: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub supports_tools: bool,
    pub supports_vision: bool,
}

/// Functions the model may call mid-generation. The execution engine wires
/// this to the tool registry; providers only see schemas and results.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn schemas(&self) -> Vec<ToolSchema>;
    async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String>;
}

#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    fn capabilities(&self) -> ProviderCapabilities;

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionOutcome>;

    /// Run the completion with tools bound. Providers without tool support
    /// fall back to a plain completion.
    async fn complete_with_tools(
        &self,
        request: &CompletionRequest,
        _tools: &dyn ToolExecutor,
    ) -> anyhow::Result<CompletionOutcome> {
        self.complete(request).await
    }
}

/// Construct the in-process client for a provider.
///
/// Bedrock never runs in-process; it always routes through the remote
/// dispatcher, so asking for a local client is a configuration error.
pub fn build_client(
    provider: Provider,
    model_name: &str,
    api_key: Option<&str>,
    target_url: Option<&str>,
) -> anyhow::Result<Arc<dyn ProviderClient>> {
    let key_required = || {
        api_key
            .filter(|k| !k.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("API key required for {provider} provider"))
    };

    match provider {
        Provider::Gemini => Ok(Arc::new(gemini::GeminiClient::new(
            model_name.to_string(),
            key_required()?,
        ))),
        Provider::Openai => Ok(Arc::new(openai::OpenAiCompatibleClient::openai(
            model_name.to_string(),
            key_required()?,
        ))),
        Provider::Ollama => Ok(Arc::new(openai::OpenAiCompatibleClient::ollama(
            model_name.to_string(),
            api_key.filter(|k| !k.trim().is_empty()).map(str::to_string),
            target_url,
        ))),
        Provider::Anthropic => Ok(Arc::new(anthropic::AnthropicClient::new(
            model_name.to_string(),
            key_required()?,
        ))),
        Provider::Bedrock => anyhow::bail!(
            "BEDROCK completions dispatch through the remote execution function, not in-process"
        ),
    }
}

pub(crate) fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        let mut cut = max_len;
        while !input.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &input[..cut])
    }
}
