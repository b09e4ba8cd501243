use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drover_core::{
    AgentRunner, CoreConfig, ExecutionEngine, SecretCipher, Store,
};
use drover_providers::{CompletionOutcome, CompletionRequest, ToolExecutor};
use drover_types::{
    AgentInstance, AgentTask, AgentType, ExecutionStatus, Provider, ScheduleType, SourceType,
    TaskStatus,
};
use drover_wire::RemoteAgentRequest;

/// Records dispatches instead of calling providers.
struct StubRunner {
    output: String,
    echo_prompt: bool,
    fail_with: Option<String>,
    local_calls: AtomicUsize,
    remote_requests: Mutex<Vec<RemoteAgentRequest>>,
    saw_tools: AtomicBool,
}

impl StubRunner {
    fn returning(output: &str) -> Self {
        Self {
            output: output.to_string(),
            echo_prompt: false,
            fail_with: None,
            local_calls: AtomicUsize::new(0),
            remote_requests: Mutex::new(Vec::new()),
            saw_tools: AtomicBool::new(false),
        }
    }

    fn echoing() -> Self {
        Self {
            echo_prompt: true,
            ..Self::returning("")
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::returning("")
        }
    }
}

#[async_trait]
impl AgentRunner for StubRunner {
    async fn run_local(
        &self,
        _instance: &AgentInstance,
        request: CompletionRequest,
        tools: Option<&dyn ToolExecutor>,
    ) -> anyhow::Result<CompletionOutcome> {
        self.local_calls.fetch_add(1, Ordering::SeqCst);
        if tools.is_some() {
            self.saw_tools.store(true, Ordering::SeqCst);
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        let output = if self.echo_prompt {
            request.prompt
        } else {
            self.output.clone()
        };
        Ok(CompletionOutcome {
            output,
            usage: None,
        })
    }

    async fn run_remote(&self, request: RemoteAgentRequest) -> anyhow::Result<CompletionOutcome> {
        self.remote_requests.lock().await.push(request);
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        Ok(CompletionOutcome {
            output: self.output.clone(),
            usage: None,
        })
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<Store>,
    engine: ExecutionEngine,
    runner: Arc<StubRunner>,
    user_id: Uuid,
}

async fn harness(runner: StubRunner, remote_enabled: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        Store::new(dir.path(), SecretCipher::from_passphrase("test"))
            .await
            .unwrap(),
    );
    let config = Arc::new(CoreConfig {
        production: true,
        state_dir: dir.path().to_path_buf(),
        use_remote_execution: remote_enabled,
        ..CoreConfig::default()
    });
    let runner = Arc::new(runner);
    let engine = ExecutionEngine::new(store.clone(), config, runner.clone()).unwrap();
    Harness {
        _dir: dir,
        store,
        engine,
        runner,
        user_id: Uuid::new_v4(),
    }
}

async fn openai_instance(h: &Harness) -> AgentInstance {
    let mut instance = AgentInstance::new("Answerer", Provider::Openai, "gpt-4o-mini", h.user_id);
    instance.api_key = "sk-test".to_string();
    instance.agent_type = AgentType::OneShot;
    h.store.save_instance(instance).await.unwrap()
}

#[tokio::test]
async fn manual_one_shot_completes_and_stays_active() {
    let h = harness(StubRunner::returning("Four."), false).await;
    let instance = openai_instance(&h).await;
    let task = h
        .store
        .create_task(AgentTask::new(
            "arithmetic",
            instance.id,
            "What is 2+2? Answer in one word.",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();

    let execution = h.store.create_execution(task.id).await.unwrap();
    let report = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.output, "Four.");
    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.output_result(), Some("Four."));
    assert!(execution.execution_time_seconds.is_some());

    let task = h.store.task(task.id).await.unwrap();
    assert_eq!(task.execution_count, 1);
    assert_eq!(task.status, TaskStatus::Active, "manual tasks stay active");
    assert!(task.last_executed_at.is_some());
}

#[tokio::test]
async fn recurring_task_completes_at_max_executions() {
    let h = harness(StubRunner::returning("tick"), false).await;
    let instance = openai_instance(&h).await;
    let mut task = AgentTask::new(
        "interval",
        instance.id,
        "tick",
        ScheduleType::CustomInterval,
        h.user_id,
    );
    task.interval_minutes = Some(60);
    task.max_executions = Some(2);
    let task = h.store.create_task(task).await.unwrap();

    for _ in 0..2 {
        let execution = h.store.create_execution(task.id).await.unwrap();
        h.engine
            .execute(execution.id, CancellationToken::new())
            .await
            .unwrap();
    }

    let task = h.store.task(task.id).await.unwrap();
    assert_eq!(task.execution_count, 2);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.next_execution_at, None);

    // the cap also blocks any further execution records
    assert!(h.store.create_execution(task.id).await.is_err());
}

#[tokio::test]
async fn recurring_task_under_cap_recomputes_next_fire_time() {
    let h = harness(StubRunner::returning("tick"), false).await;
    let instance = openai_instance(&h).await;
    let mut task = AgentTask::new(
        "hourly",
        instance.id,
        "tick",
        ScheduleType::Hourly,
        h.user_id,
    );
    task.interval_minutes = None;
    let task = h.store.create_task(task).await.unwrap();

    let execution = h.store.create_execution(task.id).await.unwrap();
    h.engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();

    let task = h.store.task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Active);
    let next = task.next_execution_at.unwrap();
    assert!(next > task.last_executed_at.unwrap());
}

#[tokio::test]
async fn bedrock_routes_through_remote_dispatch_without_api_key() {
    let h = harness(StubRunner::returning("bedrock says hi"), true).await;
    let mut instance = AgentInstance::new(
        "Bedrock",
        Provider::Bedrock,
        "anthropic.claude-3-5-sonnet-20240620-v1:0",
        h.user_id,
    );
    instance.use_lambda = true;
    instance.agent_type = AgentType::OneShot;
    let instance = h.store.save_instance(instance).await.unwrap();

    let task = h
        .store
        .create_task(AgentTask::new(
            "bedrock-task",
            instance.id,
            "hello",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();
    h.engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        h.runner.local_calls.load(Ordering::SeqCst),
        0,
        "no in-process client may be used"
    );
    let requests = h.runner.remote_requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].provider, Provider::Bedrock);
    assert_eq!(requests[0].api_key, None);
    let wire = serde_json::to_value(&requests[0]).unwrap();
    assert!(wire.get("api_key").is_none());
}

#[tokio::test]
async fn bedrock_without_remote_toggle_fails_the_execution() {
    let h = harness(StubRunner::returning("unused"), false).await;
    let mut instance = AgentInstance::new(
        "Bedrock",
        Provider::Bedrock,
        "anthropic.claude-3-5-sonnet-20240620-v1:0",
        h.user_id,
    );
    instance.use_lambda = true;
    instance.agent_type = AgentType::OneShot;
    let instance = h.store.save_instance(instance).await.unwrap();
    let task = h
        .store
        .create_task(AgentTask::new(
            "bedrock-task",
            instance.id,
            "hello",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();

    let err = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("remote execution"));
    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn unsafe_source_becomes_error_entry_and_execution_still_completes() {
    let h = harness(StubRunner::returning("summary without the blocked source"), false).await;
    let instance = openai_instance(&h).await;
    let mut task = AgentTask::new(
        "with-bad-source",
        instance.id,
        "Summarise the inputs.",
        ScheduleType::Manual,
        h.user_id,
    );
    task.input_sources = vec![drover_types::InputSource::from_url("http://10.0.0.5/secret")];
    let task = h.store.create_task(task).await.unwrap();

    let execution = h.store.create_execution(task.id).await.unwrap();
    let report = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.output.is_empty());

    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let input_data = execution.input_data.unwrap();
    let sources = input_data["input_sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0]["error"].as_str().unwrap().contains("unsafe"));
    assert!(input_data["enhanced_instruction"]
        .as_str()
        .unwrap()
        .contains("Error:"));

    let task = h.store.task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Active);
}

#[tokio::test]
async fn chain_trigger_rewrites_inputs_and_resolves_output() {
    let h = harness(StubRunner::returning("HELLO"), false).await;
    let instance = openai_instance(&h).await;

    let upstream = h
        .store
        .create_task(AgentTask::new(
            "producer",
            instance.id,
            "produce",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let mut downstream = AgentTask::new(
        "consumer",
        instance.id,
        "consume",
        ScheduleType::Agent,
        h.user_id,
    );
    downstream.triggered_by_task_id = Some(upstream.id);
    let downstream = h.store.create_task(downstream).await.unwrap();

    let execution = h.store.create_execution(upstream.id).await.unwrap();
    let report = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.triggered, vec![downstream.id]);

    let downstream = h.store.task(downstream.id).await.unwrap();
    assert_eq!(downstream.input_sources.len(), 1);
    let entry = &downstream.input_sources[0];
    assert_eq!(entry.url, format!("agent-output://{}", execution.id));
    assert_eq!(entry.source_type, SourceType::AgentOutput);
    assert_eq!(entry.processed_content.as_deref(), Some("HELLO"));
    assert_eq!(entry.filename.as_deref(), Some("producer_output.txt"));
    assert_eq!(entry.agent_execution_id, Some(execution.id));

    // the downstream run resolves the agent-output URL to the literal text
    let h2_execution = h.store.create_execution(downstream.id).await.unwrap();
    let echo = StubRunner::echoing();
    let engine = {
        let config = Arc::new(CoreConfig {
            production: true,
            ..CoreConfig::default()
        });
        ExecutionEngine::new(h.store.clone(), config, Arc::new(echo)).unwrap()
    };
    let report = engine
        .execute(h2_execution.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.output.contains("HELLO"));
    assert!(report.output.contains("--- INPUT SOURCES ---"));
}

#[tokio::test]
async fn chain_skips_targets_with_in_flight_executions() {
    let h = harness(StubRunner::returning("out"), false).await;
    let instance = openai_instance(&h).await;
    let upstream = h
        .store
        .create_task(AgentTask::new(
            "up",
            instance.id,
            "x",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let mut downstream = AgentTask::new("down", instance.id, "y", ScheduleType::Agent, h.user_id);
    downstream.triggered_by_task_id = Some(upstream.id);
    let downstream = h.store.create_task(downstream).await.unwrap();

    // pre-existing pending execution on the target blocks the trigger
    h.store.create_execution(downstream.id).await.unwrap();

    let execution = h.store.create_execution(upstream.id).await.unwrap();
    let report = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.triggered.is_empty());
    let downstream = h.store.task(downstream.id).await.unwrap();
    assert!(downstream.input_sources.is_empty(), "inputs not rewritten");
}

#[tokio::test]
async fn provider_failure_fails_execution_and_task() {
    let h = harness(StubRunner::failing("provider exploded"), false).await;
    let instance = openai_instance(&h).await;
    let task = h
        .store
        .create_task(AgentTask::new(
            "doomed",
            instance.id,
            "x",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();

    let err = h
        .engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("provider exploded"));

    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message.as_deref(), Some("provider exploded"));

    let task = h.store.task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.execution_count, 0);

    // admin reset brings the task back
    let reset = h.store.reset_task(task.id).await.unwrap();
    assert_eq!(reset.status, TaskStatus::Active);
}

#[tokio::test]
async fn think_tags_are_stripped_before_persistence() {
    let h = harness(
        StubRunner::returning("<think>let me count\n2+2=4</think>Four."),
        false,
    )
    .await;
    let instance = openai_instance(&h).await;
    let task = h
        .store
        .create_task(AgentTask::new(
            "thinker",
            instance.id,
            "2+2?",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();
    h.engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();

    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.output_result(), Some("Four."));
}

#[tokio::test]
async fn cancellation_is_observed_at_step_boundaries() {
    let h = harness(StubRunner::returning("never"), false).await;
    let instance = openai_instance(&h).await;
    let task = h
        .store
        .create_task(AgentTask::new(
            "cancelled",
            instance.id,
            "x",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.engine.execute(execution.id, cancel).await.unwrap_err();
    assert_eq!(err.to_string(), "Cancelled by user");

    let execution = h.store.execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message.as_deref(), Some("Cancelled by user"));
}

#[tokio::test]
async fn tools_are_offered_to_the_runner_on_the_local_path() {
    let h = harness(StubRunner::returning("done"), false).await;
    let instance = openai_instance(&h).await;
    let task = h
        .store
        .create_task(AgentTask::new(
            "tooling",
            instance.id,
            "call an api",
            ScheduleType::Manual,
            h.user_id,
        ))
        .await
        .unwrap();
    let execution = h.store.create_execution(task.id).await.unwrap();
    h.engine
        .execute(execution.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(h.runner.saw_tools.load(Ordering::SeqCst));
}
