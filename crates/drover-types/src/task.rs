use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::source::InputSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Manual,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    CustomInterval,
    /// Triggered by the completion of another task.
    Agent,
    /// Legacy alias kept for migrated rows: completes after the first
    /// successful run.
    Once,
}

impl ScheduleType {
    pub fn is_recurring(self) -> bool {
        matches!(
            self,
            ScheduleType::Hourly
                | ScheduleType::Daily
                | ScheduleType::Weekly
                | ScheduleType::Monthly
                | ScheduleType::CustomInterval
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

/// A durable invocation unit bound to one one-shot agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: Uuid,
    pub name: String,
    pub agent_instance_id: Uuid,
    pub instruction: String,
    #[serde(default)]
    pub input_sources: Vec<InputSource>,
    pub schedule_type: ScheduleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u32>,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by_task_id: Option<Uuid>,
    /// Template-variable metadata extracted from the instruction at save
    /// time, keyed by variable name.
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(
        name: impl Into<String>,
        agent_instance_id: Uuid,
        instruction: impl Into<String>,
        schedule_type: ScheduleType,
        user_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_instance_id,
            instruction: instruction.into(),
            input_sources: Vec::new(),
            schedule_type,
            scheduled_at: None,
            interval_minutes: None,
            status: TaskStatus::Active,
            last_executed_at: None,
            next_execution_at: None,
            max_executions: None,
            execution_count: 0,
            triggered_by_task_id: None,
            variables: Map::new(),
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scan loop may create an execution for this task now.
    pub fn is_ready_for_execution(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Active {
            return false;
        }
        if let Some(max) = self.max_executions {
            if self.execution_count >= max {
                return false;
            }
        }
        matches!(self.next_execution_at, Some(next) if next <= now)
    }

    pub fn has_reached_max_executions(&self) -> bool {
        matches!(self.max_executions, Some(max) if self.execution_count >= max)
    }

    /// Next fire time after a completed run, or `None` for non-recurring
    /// schedules.
    pub fn calculate_next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let base = self.last_executed_at.unwrap_or(now);
        match self.schedule_type {
            ScheduleType::Hourly => Some(base + Duration::hours(1)),
            ScheduleType::Daily => Some(base + Duration::days(1)),
            ScheduleType::Weekly => Some(base + Duration::days(7)),
            ScheduleType::Monthly => Some(base + Duration::days(30)),
            ScheduleType::CustomInterval => {
                let minutes = self.interval_minutes.unwrap_or(0);
                if minutes == 0 {
                    None
                } else {
                    Some(base + Duration::minutes(i64::from(minutes)))
                }
            }
            ScheduleType::Manual | ScheduleType::Agent | ScheduleType::Once => None,
        }
    }

    /// Initial fire time at creation: the explicit `scheduled_at` wins,
    /// otherwise recurring types start one interval from now.
    pub fn initial_next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.schedule_type == ScheduleType::Agent {
            return None;
        }
        if let Some(at) = self.scheduled_at {
            return Some(at);
        }
        let base = AgentTask {
            last_executed_at: Some(now),
            ..self.clone()
        };
        base.calculate_next_execution(now)
    }
}
