use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Completed and failed executions are never reopened.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Audit record for one attempted invocation of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskExecution {
    pub id: Uuid,
    pub agent_task_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_security_summary: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AgentTaskExecution {
    pub fn pending(agent_task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_task_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
            input_data: None,
            output_data: None,
            error_message: None,
            api_security_summary: None,
            created_at: Utc::now(),
        }
    }

    /// The `result` string from `output_data`, if the execution produced one.
    pub fn output_result(&self) -> Option<&str> {
        self.output_data
            .as_ref()
            .and_then(|data| data.get("result"))
            .and_then(|value| value.as_str())
    }
}

/// Token accounting as reported by a provider or the remote executor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}
