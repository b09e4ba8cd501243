use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-owned grouping of agent instances and environment secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProject {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent_instance_ids: Vec<Uuid>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl AgentProject {
    pub fn new(title: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            agent_instance_ids: Vec::new(),
            user_id,
            created_at: Utc::now(),
        }
    }
}

/// Project-scoped secret, unique per `(project_id, key, user_id)`.
/// The value field holds plaintext in memory; the store encrypts at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEnvironmentSecret {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectEnvironmentSecret {
    pub fn new(
        project_id: Uuid,
        user_id: Uuid,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            user_id,
            key: key.into(),
            value: value.into(),
            created_at: Utc::now(),
        }
    }

    /// Everything but the last four characters replaced with `*`.
    pub fn masked_value(&self) -> String {
        let len = self.value.chars().count();
        if len <= 4 {
            return "*".repeat(len);
        }
        let visible: String = self.value.chars().skip(len - 4).collect();
        format!("{}{}", "*".repeat(len - 4), visible)
    }
}

/// Secret keys follow environment-variable naming.
pub fn is_valid_secret_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
