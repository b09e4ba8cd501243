use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use drover_document::{process_file, ExtractLimits, PreprocessOptions};
use drover_ingest::{InputFetcher, Sandbox};
use drover_providers::{
    build_client, strip_think_tags, BinaryAttachment, CompletionOutcome, CompletionRequest,
    RemoteDispatcher, ToolExecutor,
};
use drover_tools::{ToolContext, ToolDeps, ToolRegistry};
use drover_types::{
    AgentInstance, AgentTask, InputSource, Provider, ScheduleType, SourceType, TaskStatus,
    ToolSchema,
};
use drover_wire::RemoteAgentRequest;

use crate::config::CoreConfig;
use crate::storage::Store;
use crate::template::render_task_instruction;

/// What one finished execution produced, including the chained tasks whose
/// input sources were rewritten and now need to be enqueued by the
/// scheduler (never run in-process, which would recurse inside a worker).
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub output: String,
    pub triggered: Vec<Uuid>,
}

/// Dispatch seam between the engine and the provider layer. The default
/// implementation talks to real providers; tests substitute a stub.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_local(
        &self,
        instance: &AgentInstance,
        request: CompletionRequest,
        tools: Option<&dyn ToolExecutor>,
    ) -> anyhow::Result<CompletionOutcome>;

    async fn run_remote(&self, request: RemoteAgentRequest) -> anyhow::Result<CompletionOutcome>;
}

/// Production runner: builds in-process provider clients per call and
/// holds the Lambda dispatcher when remote execution is configured.
pub struct ProviderRunner {
    remote: Option<RemoteDispatcher>,
}

impl ProviderRunner {
    pub async fn connect(config: &CoreConfig) -> anyhow::Result<Self> {
        let remote = match config.remote_execution() {
            Some(remote_config) => Some(RemoteDispatcher::connect(&remote_config).await?),
            None => None,
        };
        Ok(Self { remote })
    }
}

#[async_trait]
impl AgentRunner for ProviderRunner {
    async fn run_local(
        &self,
        instance: &AgentInstance,
        request: CompletionRequest,
        tools: Option<&dyn ToolExecutor>,
    ) -> anyhow::Result<CompletionOutcome> {
        let client = build_client(
            instance.provider,
            &instance.model_name,
            (!instance.api_key.is_empty()).then_some(instance.api_key.as_str()),
            instance.target_url.as_deref(),
        )?;
        match tools {
            Some(executor) if client.capabilities().supports_tools => {
                client.complete_with_tools(&request, executor).await
            }
            _ => client.complete(&request).await,
        }
    }

    async fn run_remote(&self, request: RemoteAgentRequest) -> anyhow::Result<CompletionOutcome> {
        let Some(remote) = &self.remote else {
            anyhow::bail!("remote execution is not configured (USE_REMOTE_EXECUTION disabled)");
        };
        remote.invoke_as_outcome(&request).await
    }
}

/// Adapter exposing the tool registry through the provider-facing executor
/// trait.
pub struct RegistryToolExecutor {
    registry: ToolRegistry,
}

impl RegistryToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for RegistryToolExecutor {
    fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String> {
        Ok(self.registry.execute(name, args).await?.output)
    }
}

/// One input source after fetch and preprocessing. The raw attachment is
/// kept out of serialisation so execution rows stay JSON-sized.
#[derive(Debug, Clone, Serialize)]
struct ProcessedSource {
    source_url: String,
    source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    raw_file_mode: bool,
    #[serde(skip)]
    attachment: Option<BinaryAttachment>,
}

impl ProcessedSource {
    fn failed(source: &InputSource, message: String) -> Self {
        Self {
            source_url: source.url.clone(),
            source_type: source.source_type,
            processed_content: Some(format!(
                "[Error processing {} URL: {}]",
                source.source_type.as_str(),
                source.url
            )),
            error: Some(message),
            content_type: None,
            file_type: None,
            filename: source.filename.clone(),
            content_preview: None,
            size_bytes: None,
            raw_file_mode: false,
            attachment: None,
        }
    }
}

/// Orchestrates one task execution end to end: fetch, preprocess, render,
/// dispatch, persist, chain.
pub struct ExecutionEngine {
    store: Arc<Store>,
    config: Arc<CoreConfig>,
    runner: Arc<dyn AgentRunner>,
    fetcher: InputFetcher,
    limits: ExtractLimits,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<Store>,
        config: Arc<CoreConfig>,
        runner: Arc<dyn AgentRunner>,
    ) -> anyhow::Result<Self> {
        let fetcher = InputFetcher::new(config.fetch_config())?;
        Ok(Self {
            store,
            config,
            runner,
            fetcher,
            limits: ExtractLimits::default(),
        })
    }

    pub async fn execute(
        &self,
        execution_id: Uuid,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExecutionReport> {
        let execution = self
            .store
            .execution(execution_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("execution {execution_id} not found"))?;
        let mut task = self
            .store
            .task(execution.agent_task_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("task {} not found", execution.agent_task_id))?;
        let instance = self
            .store
            .instance(task.agent_instance_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("agent instance {} not found", task.agent_instance_id))?;

        self.store.mark_execution_running(execution_id).await?;
        let started = std::time::Instant::now();

        let result = self
            .run_to_completion(&task, &instance, execution_id, &cancel)
            .await;
        let duration = started.elapsed().as_secs_f64();

        match result {
            Ok(output) => {
                self.store
                    .complete_execution(execution_id, json!({"result": output}), duration)
                    .await?;

                let now = Utc::now();
                task.execution_count += 1;
                task.last_executed_at = Some(now);
                let next = task.calculate_next_execution(now);
                if task.has_reached_max_executions() {
                    task.status = TaskStatus::Completed;
                    task.next_execution_at = None;
                } else if let Some(next) = next {
                    task.next_execution_at = Some(next);
                } else if task.schedule_type == ScheduleType::Once {
                    task.status = TaskStatus::Completed;
                }
                let task = self.store.save_task(task).await?;

                let triggered = self
                    .rewrite_chained_inputs(&task, execution_id, &output)
                    .await;

                info!(
                    "agent task execution {execution_id} completed successfully in {duration:.2} seconds"
                );
                Ok(ExecutionReport {
                    execution_id,
                    output,
                    triggered,
                })
            }
            Err(e) => {
                let message = e.to_string();
                error!("agent task execution {execution_id} failed: {message}");
                if let Err(persist_err) = self
                    .store
                    .fail_execution(execution_id, &message, Some(duration))
                    .await
                {
                    error!("failed to persist execution failure: {persist_err}");
                }
                task.status = TaskStatus::Failed;
                if let Err(persist_err) = self.store.save_task(task).await {
                    error!("failed to persist task failure: {persist_err}");
                }
                Err(e)
            }
        }
    }

    async fn run_to_completion(
        &self,
        task: &AgentTask,
        instance: &AgentInstance,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        let use_remote = self.config.use_remote_execution && instance.use_lambda;
        if instance.provider == Provider::Bedrock && !use_remote {
            anyhow::bail!(
                "BEDROCK instances require remote execution; enable USE_REMOTE_EXECUTION and use_lambda"
            );
        }

        ensure_not_cancelled(cancel)?;
        let sources = self.process_inputs(task, cancel).await?;
        let has_raw_files = sources.iter().any(|s| s.raw_file_mode);
        let attachments: Vec<BinaryAttachment> = sources
            .iter()
            .filter_map(|s| s.attachment.clone())
            .collect();

        let rendered = render_task_instruction(task, &self.store).await;
        let enhanced = build_enhanced_instruction(&rendered, &sources);

        let input_data = json!({
            "instruction": task.instruction,
            "enhanced_instruction": enhanced,
            "task_name": task.name,
            "execution_id": execution_id,
            "input_sources": sources,
            "has_raw_files": has_raw_files,
        });
        self.store
            .update_execution(execution_id, |execution| {
                execution.input_data = Some(input_data.clone());
            })
            .await?;

        ensure_not_cancelled(cancel)?;
        let outcome = if use_remote {
            if has_raw_files {
                warn!(
                    "task {} has raw binary sources; the remote execution path carries text only",
                    task.name
                );
            }
            let request = RemoteAgentRequest {
                provider: instance.provider,
                model_name: instance.model_name.clone(),
                api_key: (!instance.api_key.is_empty()).then(|| instance.api_key.clone()),
                target_url: instance.target_url.clone(),
                prompt: enhanced,
                system_prompt: Some(instance.system_prompt()),
                agent_type: instance.agent_type,
                agent_name: instance.friendly_name.clone(),
                enable_tools: false,
                context: Some(input_data),
                max_tokens: 2000,
                temperature: 0.7,
            };
            self.runner.run_remote(request).await?
        } else {
            let mut request = CompletionRequest::new(enhanced);
            request.system_prompt = Some(instance.system_prompt());
            request.attachments = attachments;

            let registry = ToolRegistry::new(ToolDeps {
                user_id: instance.user_id,
                execution_id: Some(execution_id),
                context: self.store.clone() as Arc<dyn ToolContext>,
            });
            let executor = RegistryToolExecutor::new(registry);
            self.runner
                .run_local(instance, request, Some(&executor))
                .await?
        };

        ensure_not_cancelled(cancel)?;
        Ok(strip_think_tags(&outcome.output))
    }

    async fn process_inputs(
        &self,
        task: &AgentTask,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<ProcessedSource>> {
        if task.input_sources.is_empty() {
            return Ok(Vec::new());
        }
        info!("processing {} input sources", task.input_sources.len());

        let sandbox = Sandbox::create()?;
        let mut processed = Vec::with_capacity(task.input_sources.len());

        for source in &task.input_sources {
            ensure_not_cancelled(cancel)?;
            if source.url.trim().is_empty() {
                warn!("skipping input source with missing URL");
                continue;
            }
            processed.push(self.process_single_source(source, &sandbox).await);
        }

        Ok(processed)
    }

    async fn process_single_source(
        &self,
        source: &InputSource,
        sandbox: &Sandbox,
    ) -> ProcessedSource {
        let fetched = match self
            .fetcher
            .fetch(&source.url, sandbox, self.store.as_ref())
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("failed to process input source {}: {e}", source.url);
                return ProcessedSource::failed(source, e.to_string());
            }
        };

        let options = PreprocessOptions {
            skip_preprocessing: source.skip_preprocessing.unwrap_or(false),
            preprocess_image: source.preprocess_image.unwrap_or(true),
            is_document_with_text: source.is_document_with_text.unwrap_or(true),
            replace_images_with_descriptions: source
                .replace_images_with_descriptions
                .unwrap_or(true),
            contains_images: source.contains_images.unwrap_or(true),
            extract_images_as_text: source.extract_images_as_text.unwrap_or(true),
        };

        match process_file(&fetched.file_path, &fetched.content_type, &options, &self.limits) {
            Ok(content) => {
                let attachment = content.binary_data.as_ref().map(|data| BinaryAttachment {
                    filename: fetched.filename.clone(),
                    media_type: content
                        .media_type
                        .clone()
                        .unwrap_or_else(|| fetched.content_type.clone()),
                    data: data.clone(),
                });
                ProcessedSource {
                    source_url: fetched.source_url,
                    source_type: source.source_type,
                    error: None,
                    content_type: Some(fetched.content_type),
                    file_type: Some(fetched.file_type.as_str().to_string()),
                    filename: Some(fetched.filename),
                    processed_content: Some(content.processed_content),
                    content_preview: Some(content.content_preview),
                    size_bytes: Some(fetched.size_bytes),
                    raw_file_mode: content.raw_file_mode,
                    attachment,
                }
            }
            Err(e) => {
                error!("preprocessing failed for {}: {e}", source.url);
                ProcessedSource::failed(source, e.to_string())
            }
        }
    }

    /// Rewrite each downstream task's input sources to this execution's
    /// output and report which tasks the scheduler should now enqueue.
    async fn rewrite_chained_inputs(
        &self,
        task: &AgentTask,
        execution_id: Uuid,
        output: &str,
    ) -> Vec<Uuid> {
        let targets = self.store.tasks_triggered_by(task.id).await;
        if targets.is_empty() {
            return Vec::new();
        }
        info!(
            "triggering {} agent(s) from completed task: {}",
            targets.len(),
            task.name
        );

        let mut queued = Vec::new();
        for mut target in targets {
            if target.id == task.id {
                warn!("task {} triggers itself; refusing the chain", task.name);
                continue;
            }
            if self.store.has_in_flight_execution(target.id).await {
                warn!(
                    "chained task {} already has an execution in flight; skipping trigger",
                    target.name
                );
                continue;
            }

            let mut entry = InputSource {
                url: format!("agent-output://{execution_id}"),
                source_type: SourceType::AgentOutput,
                filename: Some(format!("{}_output.txt", task.name)),
                content_type: Some("text/plain".to_string()),
                agent_execution_id: Some(execution_id),
                processed_content: Some(output.to_string()),
                ..Default::default()
            };
            if let Some(first) = task.input_sources.first() {
                entry.copy_preprocessing_flags(first);
            }

            target.input_sources = vec![entry];
            match self.store.save_task(target).await {
                Ok(saved) => queued.push(saved.id),
                Err(e) => error!("failed to rewrite chained task inputs: {e}"),
            }
        }
        queued
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        anyhow::bail!("Cancelled by user");
    }
    Ok(())
}

fn build_enhanced_instruction(rendered: &str, sources: &[ProcessedSource]) -> String {
    if sources.is_empty() {
        return rendered.to_string();
    }
    let mut text = String::from("\n\n--- INPUT SOURCES ---\n");
    for (index, source) in sources.iter().enumerate() {
        text.push_str(&format_source_block(index + 1, source));
    }
    format!("{rendered}\n{text}")
}

fn format_source_block(index: usize, source: &ProcessedSource) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "\nSource {index}: {}", source.source_url);
    let _ = writeln!(block, "Source Type: {}", source.source_type.as_str());

    if let Some(error) = &source.error {
        let _ = writeln!(block, "Error: {error}");
    } else {
        let file_type = source.file_type.as_deref().unwrap_or("unknown");
        let content_type = source.content_type.as_deref().unwrap_or("unknown");
        let filename = source.filename.as_deref().unwrap_or("unknown");
        let _ = writeln!(block, "File Type: {file_type} ({content_type})");
        let _ = writeln!(block, "Filename: {filename}");

        let content = source
            .processed_content
            .as_deref()
            .unwrap_or("[No content]");
        if matches!(file_type, "text" | "json") {
            let _ = writeln!(block, "Content:\n{content}");
        } else {
            let _ = writeln!(block, "Description: {content}");
            if let Some(size) = source.size_bytes {
                let _ = writeln!(block, "File Size: {:.2} MB", size as f64 / (1024.0 * 1024.0));
            }
        }
    }

    block.push('\n');
    block.push_str(&"-".repeat(50));
    block.push('\n');
    block
}
