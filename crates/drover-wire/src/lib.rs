use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use drover_types::{AgentType, Provider, TokenUsage};

/// Request body sent to the remote execution function.
///
/// The remote side accepts exactly this shape; optional fields are omitted
/// rather than sent as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgentRequest {
    pub provider: Provider,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub agent_type: AgentType,
    pub agent_name: String,
    #[serde(default)]
    pub enable_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl RemoteAgentRequest {
    pub fn new(provider: Provider, model_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            api_key: None,
            target_url: None,
            prompt: prompt.into(),
            system_prompt: None,
            agent_type: AgentType::OneShot,
            agent_name: "Drover Agent".to_string(),
            enable_tools: false,
            context: None,
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

/// Response envelope returned by the remote execution function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgentResponse {
    pub response: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}
