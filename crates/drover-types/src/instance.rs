use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// AI provider backing an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "GEMINI")]
    Gemini,
    #[serde(rename = "OPENAI")]
    Openai,
    #[serde(rename = "OLLAMA")]
    Ollama,
    #[serde(rename = "ANTHROPIC")]
    Anthropic,
    #[serde(rename = "BEDROCK")]
    Bedrock,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI",
            Provider::Openai => "OPENAI",
            Provider::Ollama => "OLLAMA",
            Provider::Anthropic => "ANTHROPIC",
            Provider::Bedrock => "BEDROCK",
        }
    }

    /// Bedrock authenticates through IAM and never carries a per-instance key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Provider::Bedrock)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "chat")]
    Chat,
    #[serde(rename = "one-shot")]
    OneShot,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Chat => "chat",
            AgentType::OneShot => "one-shot",
        }
    }
}

/// A configured LLM endpoint: provider, model, credentials and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: Uuid,
    pub friendly_name: String,
    pub provider: Provider,
    pub model_name: String,
    /// Empty for Bedrock instances; encrypted at rest by the store.
    #[serde(default)]
    pub api_key: String,
    /// Base URL override, required for Ollama.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub agent_type: AgentType,
    /// Route completions through the remote execution function.
    #[serde(default)]
    pub use_lambda: bool,
    pub user_id: Uuid,
    /// Default system prompt; a generic one is synthesised when empty.
    #[serde(default)]
    pub instruction: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(
        friendly_name: impl Into<String>,
        provider: Provider,
        model_name: impl Into<String>,
        user_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            friendly_name: friendly_name.into(),
            provider,
            model_name: model_name.into(),
            api_key: String::new(),
            target_url: None,
            agent_type: AgentType::OneShot,
            use_lambda: provider == Provider::Bedrock,
            user_id,
            instruction: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// System prompt for this instance, falling back to a generic one.
    pub fn system_prompt(&self) -> String {
        if self.instruction.trim().is_empty() {
            format!(
                "You are a helpful AI assistant named {}. \
                 Provide clear, accurate, and helpful responses.",
                self.friendly_name
            )
        } else {
            self.instruction.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_serializes_upper_case() {
        let json = serde_json::to_string(&Provider::Anthropic).unwrap();
        assert_eq!(json, "\"ANTHROPIC\"");
        let back: Provider = serde_json::from_str("\"BEDROCK\"").unwrap();
        assert_eq!(back, Provider::Bedrock);
    }

    #[test]
    fn bedrock_needs_no_api_key() {
        assert!(!Provider::Bedrock.requires_api_key());
        assert!(Provider::Openai.requires_api_key());
    }

    #[test]
    fn empty_instruction_falls_back_to_generic_prompt() {
        let instance = AgentInstance::new(
            "Billing Bot",
            Provider::Openai,
            "gpt-4o-mini",
            Uuid::new_v4(),
        );
        assert!(instance.system_prompt().contains("Billing Bot"));
    }
}
