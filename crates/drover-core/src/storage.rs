use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use drover_ingest::ExecutionOutputSource;
use drover_tools::{merge_api_call_into_summary, ApiCallRecord, ProjectSummary, SecretSummary, ToolContext};
use drover_types::{
    is_valid_secret_key, AgentInstance, AgentProject, AgentTask, AgentTaskExecution, AgentType,
    ExecutionStatus, ProjectEnvironmentSecret, Provider, ScheduleType, TaskStatus,
};

use crate::crypto::SecretCipher;
use crate::template::extract_variables;

/// JSON-file backed store for instances, projects, secrets, tasks and
/// executions. Encrypted fields (provider keys, secret values) are
/// ciphertext on disk and plaintext in memory.
pub struct Store {
    base: PathBuf,
    cipher: SecretCipher,
    instances: RwLock<HashMap<Uuid, AgentInstance>>,
    projects: RwLock<HashMap<Uuid, AgentProject>>,
    secrets: RwLock<HashMap<Uuid, ProjectEnvironmentSecret>>,
    tasks: RwLock<HashMap<Uuid, AgentTask>>,
    executions: RwLock<HashMap<Uuid, AgentTaskExecution>>,
}

async fn load_map<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<HashMap<Uuid, T>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

impl Store {
    pub async fn new(base: impl AsRef<Path>, cipher: SecretCipher) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;

        let mut instances: HashMap<Uuid, AgentInstance> =
            load_map(&base.join("instances.json")).await?;
        for instance in instances.values_mut() {
            instance.api_key = cipher
                .decrypt(&instance.api_key)
                .with_context(|| format!("decrypting api key for instance {}", instance.id))?;
        }

        let mut secrets: HashMap<Uuid, ProjectEnvironmentSecret> =
            load_map(&base.join("secrets.json")).await?;
        for secret in secrets.values_mut() {
            secret.value = cipher
                .decrypt(&secret.value)
                .with_context(|| format!("decrypting secret {}", secret.id))?;
        }

        Ok(Self {
            projects: RwLock::new(load_map(&base.join("projects.json")).await?),
            tasks: RwLock::new(load_map(&base.join("tasks.json")).await?),
            executions: RwLock::new(load_map(&base.join("executions.json")).await?),
            instances: RwLock::new(instances),
            secrets: RwLock::new(secrets),
            base,
            cipher,
        })
    }

    async fn write_json<T: serde::Serialize>(&self, file: &str, data: &T) -> anyhow::Result<()> {
        let path = self.base.join(file);
        let raw = serde_json::to_string_pretty(data)?;
        fs::write(&path, raw)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn flush_instances(&self) -> anyhow::Result<()> {
        let mut snapshot = self.instances.read().await.clone();
        for instance in snapshot.values_mut() {
            if !instance.api_key.is_empty() {
                instance.api_key = self.cipher.encrypt(&instance.api_key)?;
            }
        }
        self.write_json("instances.json", &snapshot).await
    }

    async fn flush_secrets(&self) -> anyhow::Result<()> {
        let mut snapshot = self.secrets.read().await.clone();
        for secret in snapshot.values_mut() {
            secret.value = self.cipher.encrypt(&secret.value)?;
        }
        self.write_json("secrets.json", &snapshot).await
    }

    async fn flush_projects(&self) -> anyhow::Result<()> {
        let snapshot = self.projects.read().await.clone();
        self.write_json("projects.json", &snapshot).await
    }

    async fn flush_tasks(&self) -> anyhow::Result<()> {
        let snapshot = self.tasks.read().await.clone();
        self.write_json("tasks.json", &snapshot).await
    }

    async fn flush_executions(&self) -> anyhow::Result<()> {
        let snapshot = self.executions.read().await.clone();
        self.write_json("executions.json", &snapshot).await
    }

    // ---- agent instances ----

    /// Persist an instance after validating its provider configuration.
    pub async fn save_instance(&self, instance: AgentInstance) -> anyhow::Result<AgentInstance> {
        match instance.provider {
            Provider::Bedrock => {
                if !instance.use_lambda {
                    anyhow::bail!("BEDROCK instances must enable remote execution (use_lambda)");
                }
            }
            provider => {
                if instance.api_key.trim().is_empty() {
                    anyhow::bail!("API key is required for {provider} instances");
                }
                if provider == Provider::Ollama
                    && instance
                        .target_url
                        .as_deref()
                        .map(str::trim)
                        .unwrap_or("")
                        .is_empty()
                {
                    anyhow::bail!("target_url is required for OLLAMA instances");
                }
            }
        }

        self.instances
            .write()
            .await
            .insert(instance.id, instance.clone());
        self.flush_instances().await?;
        Ok(instance)
    }

    pub async fn instance(&self, id: Uuid) -> Option<AgentInstance> {
        self.instances.read().await.get(&id).cloned()
    }

    // ---- projects and secrets ----

    pub async fn save_project(&self, project: AgentProject) -> anyhow::Result<AgentProject> {
        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        self.flush_projects().await?;
        Ok(project)
    }

    pub async fn project(&self, id: Uuid) -> Option<AgentProject> {
        self.projects.read().await.get(&id).cloned()
    }

    /// The project an instance renders secrets from: first linked project in
    /// title order.
    pub async fn first_project_for_instance(&self, instance_id: Uuid) -> Option<AgentProject> {
        let mut linked: Vec<AgentProject> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.agent_instance_ids.contains(&instance_id))
            .cloned()
            .collect();
        linked.sort_by(|a, b| a.title.cmp(&b.title));
        linked.into_iter().next()
    }

    /// Upsert by `(project_id, key, user_id)`.
    pub async fn save_secret(
        &self,
        secret: ProjectEnvironmentSecret,
    ) -> anyhow::Result<ProjectEnvironmentSecret> {
        if !is_valid_secret_key(&secret.key) {
            anyhow::bail!(
                "invalid secret key '{}': expected [A-Z_][A-Z0-9_]*",
                secret.key
            );
        }
        {
            let mut secrets = self.secrets.write().await;
            let existing = secrets
                .values()
                .find(|s| {
                    s.project_id == secret.project_id
                        && s.user_id == secret.user_id
                        && s.key == secret.key
                })
                .map(|s| s.id);
            if let Some(existing_id) = existing {
                secrets.remove(&existing_id);
            }
            secrets.insert(secret.id, secret.clone());
        }
        self.flush_secrets().await?;
        Ok(secret)
    }

    pub async fn secret_value_for(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        key: &str,
    ) -> Option<String> {
        self.secrets
            .read()
            .await
            .values()
            .find(|s| s.project_id == project_id && s.user_id == user_id && s.key == key)
            .map(|s| s.value.clone())
    }

    pub async fn secrets_for_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Vec<ProjectEnvironmentSecret> {
        let mut secrets: Vec<ProjectEnvironmentSecret> = self
            .secrets
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id && s.user_id == user_id)
            .cloned()
            .collect();
        secrets.sort_by(|a, b| a.key.cmp(&b.key));
        secrets
    }

    // ---- tasks ----

    /// Validate and persist a new task, computing its first fire time and
    /// capturing template-variable metadata from the instruction.
    pub async fn create_task(&self, mut task: AgentTask) -> anyhow::Result<AgentTask> {
        let instance = self
            .instance(task.agent_instance_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("agent instance {} not found", task.agent_instance_id))?;
        if instance.agent_type != AgentType::OneShot {
            anyhow::bail!("tasks must reference a one-shot agent instance");
        }

        if task.schedule_type == ScheduleType::CustomInterval
            && task.interval_minutes.unwrap_or(0) == 0
        {
            anyhow::bail!("custom_interval tasks require interval_minutes > 0");
        }
        if task.schedule_type == ScheduleType::Agent {
            if task.triggered_by_task_id.is_none() {
                anyhow::bail!("agent-triggered tasks require triggered_by_task_id");
            }
            task.next_execution_at = None;
        } else {
            task.next_execution_at = task.initial_next_execution(Utc::now());
        }

        task.variables = extract_variables(&task.instruction)
            .into_iter()
            .map(|name| {
                (
                    name.clone(),
                    serde_json::json!({
                        "name": name,
                        "required": true,
                        "type": "environment_secret",
                    }),
                )
            })
            .collect();

        self.tasks.write().await.insert(task.id, task.clone());
        self.flush_tasks().await?;
        Ok(task)
    }

    pub async fn save_task(&self, mut task: AgentTask) -> anyhow::Result<AgentTask> {
        task.updated_at = Utc::now();
        self.tasks.write().await.insert(task.id, task.clone());
        self.flush_tasks().await?;
        Ok(task)
    }

    pub async fn task(&self, id: Uuid) -> Option<AgentTask> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Active tasks whose fire time has passed.
    pub async fn due_tasks(&self, now: chrono::DateTime<Utc>) -> Vec<AgentTask> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| {
                t.status == TaskStatus::Active
                    && matches!(t.next_execution_at, Some(next) if next <= now)
            })
            .cloned()
            .collect()
    }

    pub async fn tasks_triggered_by(&self, task_id: Uuid) -> Vec<AgentTask> {
        let mut triggered: Vec<AgentTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.triggered_by_task_id == Some(task_id))
            .cloned()
            .collect();
        triggered.sort_by(|a, b| a.name.cmp(&b.name));
        triggered
    }

    /// Admin reset: a failed task back to active with a recomputed fire
    /// time.
    pub async fn reset_task(&self, task_id: Uuid) -> anyhow::Result<AgentTask> {
        let mut task = self
            .task(task_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("task {task_id} not found"))?;
        if task.status != TaskStatus::Failed {
            anyhow::bail!("only failed tasks can be reset");
        }
        task.status = TaskStatus::Active;
        if task.schedule_type != ScheduleType::Agent {
            let now = Utc::now();
            task.next_execution_at = task
                .calculate_next_execution(now)
                .or_else(|| task.initial_next_execution(now));
        }
        self.save_task(task).await
    }

    // ---- executions ----

    /// True while any execution of the task is pending or running; both
    /// scheduling paths consult this so a task never has two in-flight
    /// executions.
    pub async fn has_in_flight_execution(&self, task_id: Uuid) -> bool {
        self.executions
            .read()
            .await
            .values()
            .any(|e| e.agent_task_id == task_id && e.status.is_in_flight())
    }

    /// Create a pending execution record, enforcing the in-flight and
    /// max-execution invariants.
    pub async fn create_execution(&self, task_id: Uuid) -> anyhow::Result<AgentTaskExecution> {
        let task = self
            .task(task_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("task {task_id} not found"))?;
        if task.has_reached_max_executions() {
            anyhow::bail!("task {} has reached maximum executions", task.name);
        }

        let execution = AgentTaskExecution::pending(task_id);
        {
            // check-and-insert under one write lock so concurrent schedulers
            // cannot both slip past the in-flight gate
            let mut executions = self.executions.write().await;
            if executions
                .values()
                .any(|e| e.agent_task_id == task_id && e.status.is_in_flight())
            {
                anyhow::bail!("task {} already has an execution in flight", task.name);
            }
            executions.insert(execution.id, execution.clone());
        }
        self.flush_executions().await?;
        Ok(execution)
    }

    pub async fn execution(&self, id: Uuid) -> Option<AgentTaskExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    pub async fn executions_for_task(&self, task_id: Uuid) -> Vec<AgentTaskExecution> {
        let mut executions: Vec<AgentTaskExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.agent_task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.created_at);
        executions
    }

    /// Apply a mutation to a non-terminal execution. Completed and failed
    /// rows are absorbing and refuse further writes.
    pub async fn update_execution<F>(&self, id: Uuid, mutate: F) -> anyhow::Result<AgentTaskExecution>
    where
        F: FnOnce(&mut AgentTaskExecution),
    {
        let updated = {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("execution {id} not found"))?;
            if execution.status.is_terminal() {
                anyhow::bail!(
                    "execution {id} is already {:?} and cannot be modified",
                    execution.status
                );
            }
            mutate(execution);
            execution.clone()
        };
        self.flush_executions().await?;
        Ok(updated)
    }

    pub async fn mark_execution_running(&self, id: Uuid) -> anyhow::Result<AgentTaskExecution> {
        self.update_execution(id, |execution| {
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
        })
        .await
    }

    pub async fn complete_execution(
        &self,
        id: Uuid,
        output_data: serde_json::Value,
        duration_seconds: f64,
    ) -> anyhow::Result<AgentTaskExecution> {
        self.update_execution(id, |execution| {
            execution.status = ExecutionStatus::Completed;
            execution.completed_at = Some(Utc::now());
            execution.execution_time_seconds = Some(duration_seconds);
            execution.output_data = Some(output_data);
        })
        .await
    }

    pub async fn fail_execution(
        &self,
        id: Uuid,
        message: &str,
        duration_seconds: Option<f64>,
    ) -> anyhow::Result<AgentTaskExecution> {
        self.update_execution(id, |execution| {
            execution.status = ExecutionStatus::Failed;
            execution.completed_at = Some(Utc::now());
            execution.execution_time_seconds = duration_seconds;
            execution.error_message = Some(message.to_string());
        })
        .await
    }
}

#[async_trait]
impl ExecutionOutputSource for Store {
    async fn completed_output(&self, execution_id: Uuid) -> Option<String> {
        let execution = self.execution(execution_id).await?;
        if execution.status != ExecutionStatus::Completed {
            return None;
        }
        execution.output_result().map(str::to_string)
    }
}

#[async_trait]
impl ToolContext for Store {
    async fn secret_value(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        key: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self.secret_value_for(project_id, user_id, key).await)
    }

    async fn projects_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<ProjectSummary>> {
        let mut projects: Vec<AgentProject> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.title.cmp(&b.title));

        let mut summaries = Vec::with_capacity(projects.len());
        for project in projects {
            let secrets = self
                .secrets_for_project(project.id, user_id)
                .await
                .into_iter()
                .map(|secret| SecretSummary {
                    masked_value: secret.masked_value(),
                    name: secret.key,
                })
                .collect();
            summaries.push(ProjectSummary {
                id: project.id,
                title: project.title,
                description: project.description,
                secrets,
            });
        }
        Ok(summaries)
    }

    async fn record_api_call(
        &self,
        execution_id: Uuid,
        record: ApiCallRecord,
    ) -> anyhow::Result<()> {
        self.update_execution(execution_id, |execution| {
            let mut summary = execution
                .api_security_summary
                .take()
                .unwrap_or(serde_json::Value::Null);
            merge_api_call_into_summary(&mut summary, &record);
            execution.api_security_summary = Some(summary);
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> Store {
        Store::new(dir.path(), SecretCipher::from_passphrase("test"))
            .await
            .unwrap()
    }

    fn one_shot_instance(user_id: Uuid) -> AgentInstance {
        let mut instance =
            AgentInstance::new("Summariser", Provider::Openai, "gpt-4o-mini", user_id);
        instance.api_key = "sk-test".to_string();
        instance
    }

    #[tokio::test]
    async fn bedrock_without_remote_execution_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut instance = AgentInstance::new(
            "Bedrock",
            Provider::Bedrock,
            "anthropic.claude-3-5-sonnet-20240620-v1:0",
            Uuid::new_v4(),
        );
        instance.use_lambda = false;
        assert!(store.save_instance(instance).await.is_err());
    }

    #[tokio::test]
    async fn non_bedrock_requires_api_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let instance = AgentInstance::new("NoKey", Provider::Openai, "gpt-4o-mini", Uuid::new_v4());
        assert!(store.save_instance(instance).await.is_err());
    }

    #[tokio::test]
    async fn api_keys_are_ciphertext_on_disk_and_plaintext_after_reload() {
        let dir = TempDir::new().unwrap();
        let user_id = Uuid::new_v4();
        let instance_id;
        {
            let store = store(&dir).await;
            let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
            instance_id = instance.id;
        }

        let raw = std::fs::read_to_string(dir.path().join("instances.json")).unwrap();
        assert!(!raw.contains("sk-test"));
        assert!(raw.contains("v1:"));

        let reloaded = store(&dir).await;
        let instance = reloaded.instance(instance_id).await.unwrap();
        assert_eq!(instance.api_key, "sk-test");
    }

    #[tokio::test]
    async fn secrets_upsert_by_project_key_and_user() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let (project_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .save_secret(ProjectEnvironmentSecret::new(project_id, user_id, "TOKEN", "one"))
            .await
            .unwrap();
        store
            .save_secret(ProjectEnvironmentSecret::new(project_id, user_id, "TOKEN", "two"))
            .await
            .unwrap();

        assert_eq!(
            store.secret_value_for(project_id, user_id, "TOKEN").await,
            Some("two".to_string())
        );
        assert_eq!(store.secrets_for_project(project_id, user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_secret_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let secret =
            ProjectEnvironmentSecret::new(Uuid::new_v4(), Uuid::new_v4(), "lower", "value");
        assert!(store.save_secret(secret).await.is_err());
    }

    #[tokio::test]
    async fn create_task_sets_fire_time_and_variables() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();

        let mut task = AgentTask::new(
            "digest",
            instance.id,
            "Use {{API_TOKEN}} to fetch the report.",
            ScheduleType::CustomInterval,
            user_id,
        );
        task.interval_minutes = Some(30);
        let task = store.create_task(task).await.unwrap();

        assert!(task.next_execution_at.is_some());
        assert!(task.variables.contains_key("API_TOKEN"));
    }

    #[tokio::test]
    async fn custom_interval_requires_positive_minutes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();

        let task = AgentTask::new(
            "bad",
            instance.id,
            "x",
            ScheduleType::CustomInterval,
            user_id,
        );
        assert!(store.create_task(task).await.is_err());
    }

    #[tokio::test]
    async fn agent_tasks_need_a_trigger_and_never_a_fire_time() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();

        let orphan = AgentTask::new("orphan", instance.id, "x", ScheduleType::Agent, user_id);
        assert!(store.create_task(orphan).await.is_err());

        let mut chained = AgentTask::new("chained", instance.id, "x", ScheduleType::Agent, user_id);
        chained.triggered_by_task_id = Some(Uuid::new_v4());
        chained.scheduled_at = Some(Utc::now());
        let chained = store.create_task(chained).await.unwrap();
        assert_eq!(chained.next_execution_at, None);
    }

    #[tokio::test]
    async fn at_most_one_in_flight_execution_per_task() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let task = store
            .create_task(AgentTask::new(
                "manual",
                instance.id,
                "x",
                ScheduleType::Manual,
                user_id,
            ))
            .await
            .unwrap();

        let first = store.create_execution(task.id).await.unwrap();
        assert!(store.create_execution(task.id).await.is_err());

        store.mark_execution_running(first.id).await.unwrap();
        assert!(store.create_execution(task.id).await.is_err());

        store
            .complete_execution(first.id, serde_json::json!({"result": "ok"}), 0.1)
            .await
            .unwrap();
        assert!(store.create_execution(task.id).await.is_ok());
    }

    #[tokio::test]
    async fn max_executions_blocks_new_records() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let mut task = AgentTask::new("capped", instance.id, "x", ScheduleType::Manual, user_id);
        task.max_executions = Some(1);
        let task = store.create_task(task).await.unwrap();

        let mut done = store.task(task.id).await.unwrap();
        done.execution_count = 1;
        store.save_task(done).await.unwrap();

        assert!(store.create_execution(task.id).await.is_err());
    }

    #[tokio::test]
    async fn terminal_executions_refuse_further_writes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let task = store
            .create_task(AgentTask::new(
                "manual",
                instance.id,
                "x",
                ScheduleType::Manual,
                user_id,
            ))
            .await
            .unwrap();

        let execution = store.create_execution(task.id).await.unwrap();
        store
            .complete_execution(execution.id, serde_json::json!({"result": "done"}), 1.0)
            .await
            .unwrap();

        assert!(store.fail_execution(execution.id, "late failure", None).await.is_err());
        let reloaded = store.execution(execution.id).await.unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Completed);
        assert_eq!(reloaded.output_result(), Some("done"));
    }

    #[tokio::test]
    async fn completed_output_resolves_only_completed_runs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let task = store
            .create_task(AgentTask::new(
                "manual",
                instance.id,
                "x",
                ScheduleType::Manual,
                user_id,
            ))
            .await
            .unwrap();

        let execution = store.create_execution(task.id).await.unwrap();
        assert_eq!(store.completed_output(execution.id).await, None);

        store
            .complete_execution(execution.id, serde_json::json!({"result": "HELLO"}), 0.2)
            .await
            .unwrap();
        assert_eq!(
            store.completed_output(execution.id).await,
            Some("HELLO".to_string())
        );
    }

    #[tokio::test]
    async fn api_call_audit_lands_in_security_summary() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let task = store
            .create_task(AgentTask::new(
                "manual",
                instance.id,
                "x",
                ScheduleType::Manual,
                user_id,
            ))
            .await
            .unwrap();
        let execution = store.create_execution(task.id).await.unwrap();
        store.mark_execution_running(execution.id).await.unwrap();

        let record: ApiCallRecord = serde_json::from_value(serde_json::json!({
            "url": "https://api.github.com/user",
            "method": "GET",
            "secret_used": "GH_TOKEN",
            "auth_methods_attempted": ["Bearer"],
            "auth_method_successful": "Bearer",
            "started_at": Utc::now(),
            "response_size_bytes": 100,
            "content_type": "application/json",
            "security_scan_passed": true,
            "prompt_injection_detected": true,
            "execution_time_ms": 12.0,
        }))
        .unwrap();
        ToolContext::record_api_call(&store, execution.id, record)
            .await
            .unwrap();

        let summary = store
            .execution(execution.id)
            .await
            .unwrap()
            .api_security_summary
            .unwrap();
        assert_eq!(summary["api_calls"].as_array().unwrap().len(), 1);
        assert_eq!(
            summary["api_calls"][0]["prompt_injection_detected"],
            serde_json::json!(true)
        );
    }

    #[tokio::test]
    async fn reset_task_reactivates_failed_tasks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let user_id = Uuid::new_v4();
        let instance = store.save_instance(one_shot_instance(user_id)).await.unwrap();
        let mut task = AgentTask::new("hourly", instance.id, "x", ScheduleType::Hourly, user_id);
        task.status = TaskStatus::Active;
        let task = store.create_task(task).await.unwrap();

        let mut failed = store.task(task.id).await.unwrap();
        failed.status = TaskStatus::Failed;
        store.save_task(failed).await.unwrap();

        let reset = store.reset_task(task.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Active);
        assert!(reset.next_execution_at.is_some());
    }
}
