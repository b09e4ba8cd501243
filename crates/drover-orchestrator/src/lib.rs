use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use drover_core::{CoreConfig, ExecutionEngine, Store};
use drover_types::{AgentTaskExecution, ExecutionStatus};

/// One unit of work for the pool: a pending execution row to drive.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    pub execution_id: Uuid,
}

/// Periodically scans for due tasks, creates execution records, and feeds a
/// bounded worker pool. Chain triggers re-enter through `schedule` rather
/// than running inline, so a chain can never recurse inside one worker.
pub struct TaskOrchestrator {
    store: Arc<Store>,
    engine: Arc<ExecutionEngine>,
    config: Arc<CoreConfig>,
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WorkItem>>>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<Store>, engine: Arc<ExecutionEngine>, config: Arc<CoreConfig>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            engine,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Create and enqueue an execution for a task.
    ///
    /// `force` (manual or chain-triggered runs) bypasses the fire-time gate
    /// but still requires an active task under its execution cap. Both
    /// paths refuse while another execution of the task is in flight.
    pub async fn schedule(
        &self,
        task_id: Uuid,
        force: bool,
    ) -> anyhow::Result<Option<AgentTaskExecution>> {
        let Some(task) = self.store.task(task_id).await else {
            error!("agent task {task_id} not found");
            return Ok(None);
        };

        if force {
            if task.status != drover_types::TaskStatus::Active {
                info!("task {} is not active", task.name);
                return Ok(None);
            }
            if task.has_reached_max_executions() {
                info!("task {} has reached maximum executions", task.name);
                return Ok(None);
            }
        } else if !task.is_ready_for_execution(Utc::now()) {
            info!("task {} is not ready for execution", task.name);
            return Ok(None);
        }

        if self.store.has_in_flight_execution(task_id).await {
            info!(
                "task {} already has an execution in flight; not scheduling another",
                task.name
            );
            return Ok(None);
        }

        let execution = self.store.create_execution(task_id).await?;
        self.tx
            .send(WorkItem {
                execution_id: execution.id,
            })
            .context("work queue closed")?;
        info!("scheduled execution {} for task {}", execution.id, task.name);
        Ok(Some(execution))
    }

    /// One pass of the pending scan: every due, ready task gets a pending
    /// execution enqueued.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self.store.due_tasks(now).await;
        debug!("pending scan found {} due task(s)", due.len());

        let mut scheduled = Vec::new();
        for task in due {
            if !task.is_ready_for_execution(now) {
                info!("task {} is not ready for execution", task.name);
                continue;
            }
            match self.schedule(task.id, false).await {
                Ok(Some(execution)) => scheduled.push(execution.id),
                Ok(None) => {}
                Err(e) => error!("failed to schedule task {}: {e}", task.name),
            }
        }
        scheduled
    }

    /// Cancel an execution: pending rows are failed immediately and their
    /// queue entry becomes a no-op; running rows observe the token at the
    /// next step boundary. Returns false for terminal rows.
    pub async fn cancel(&self, execution_id: Uuid) -> anyhow::Result<bool> {
        if let Some(token) = self.cancellations.lock().await.get(&execution_id) {
            token.cancel();
        }

        let Some(execution) = self.store.execution(execution_id).await else {
            anyhow::bail!("execution {execution_id} not found");
        };
        match execution.status {
            ExecutionStatus::Pending => {
                self.store
                    .fail_execution(execution_id, "Cancelled by user", None)
                    .await?;
                Ok(true)
            }
            ExecutionStatus::Running => Ok(true),
            _ => Ok(false),
        }
    }

    /// Drive the scan loop and worker pool until shutdown. Call once.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .context("orchestrator is already running")?;
        let worker_slots = self.config.worker_count.max(1);
        let semaphore = Arc::new(Semaphore::new(worker_slots));

        let mut scan = tokio::time::interval(Duration::from_secs(
            self.config.scan_interval_secs.max(1),
        ));
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("task orchestrator started with {worker_slots} worker slot(s)");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("task orchestrator shutting down");
                    break;
                }
                _ = scan.tick() => {
                    let scheduled = self.scan_once(Utc::now()).await;
                    if !scheduled.is_empty() {
                        info!("pending scan enqueued {} execution(s)", scheduled.len());
                    }
                }
                item = rx.recv() => {
                    let Some(item) = item else { break };
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .context("worker semaphore closed")?;
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        orchestrator.process_work_item(item).await;
                    });
                }
            }
        }
        Ok(())
    }

    async fn process_work_item(&self, item: WorkItem) {
        let execution_id = item.execution_id;
        let Some(execution) = self.store.execution(execution_id).await else {
            error!("execution {execution_id} not found; dropping work item");
            return;
        };
        if execution.status != ExecutionStatus::Pending {
            // cancelled (or otherwise resolved) while queued
            info!(
                "skipping execution {execution_id}: status is {:?}",
                execution.status
            );
            return;
        }

        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .await
            .insert(execution_id, token.clone());

        let result = self.engine.execute(execution_id, token).await;
        self.cancellations.lock().await.remove(&execution_id);

        match result {
            Ok(report) => {
                for task_id in report.triggered {
                    info!("enqueuing chain-triggered task {task_id}");
                    if let Err(e) = self.schedule(task_id, true).await {
                        error!("failed to schedule chain-triggered task {task_id}: {e}");
                    }
                }
            }
            Err(e) => {
                // the engine already persisted the failure
                warn!("execution {execution_id} failed: {e}");
            }
        }
    }

    /// Drain and run everything currently queued, serially. Test and CLI
    /// helper; the serving path uses `run`.
    pub async fn drain_queue(&self) -> anyhow::Result<usize> {
        let mut processed = 0;
        loop {
            let item = {
                let mut guard = self.rx.lock().await;
                let rx = guard.as_mut().context("orchestrator queue already taken")?;
                match rx.try_recv() {
                    Ok(item) => item,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }
            };
            self.process_work_item(item).await;
            processed += 1;
        }
        Ok(processed)
    }
}
