use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use drover_core::{CoreConfig, ExecutionEngine, ProviderRunner, SecretCipher, Store};
use drover_observability::{default_logs_dir, init_process_logging, LoggingOptions, ProcessKind};
use drover_orchestrator::TaskOrchestrator;
use drover_types::ExecutionStatus;

#[derive(Parser, Debug)]
#[command(name = "drover-engine")]
#[command(about = "Headless Drover agent task scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pending scan and worker pool until interrupted.
    Serve {
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Force-execute one task immediately and print its output.
    Execute {
        task_id: Uuid,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Summarise tasks and executions in the state directory.
    Status {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

struct AppState {
    store: Arc<Store>,
    orchestrator: Arc<TaskOrchestrator>,
}

async fn build_state(state_dir_override: Option<String>) -> anyhow::Result<(AppState, Arc<CoreConfig>)> {
    let mut config = CoreConfig::from_env();
    if let Some(dir) = state_dir_override {
        config.state_dir = PathBuf::from(dir);
    }
    let config = Arc::new(config);

    let cipher = SecretCipher::from_passphrase(&config.secret_key);
    let store = Arc::new(Store::new(&config.state_dir, cipher).await?);
    let runner = Arc::new(ProviderRunner::connect(&config).await?);
    let engine = Arc::new(ExecutionEngine::new(store.clone(), config.clone(), runner)?);
    let orchestrator = Arc::new(TaskOrchestrator::new(
        store.clone(),
        engine,
        config.clone(),
    ));

    Ok((AppState { store, orchestrator }, config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { state_dir } => {
            let (state, config) = build_state(state_dir).await?;
            let logs_dir = default_logs_dir(&config.state_dir);
            let (_guard, log_info) = init_process_logging(
                ProcessKind::Scheduler,
                &logs_dir,
                LoggingOptions::with_retention_days(config.log_retention_days),
            )?;
            info!(
                "drover engine starting; state dir {}, logs in {}",
                config.state_dir.display(),
                log_info.logs_dir
            );

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; shutting down");
                    signal_token.cancel();
                }
            });

            state.orchestrator.run(shutdown).await?;
        }
        Command::Execute { task_id, state_dir } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_target(false)
                .init();

            let (state, _config) = build_state(state_dir).await?;
            let execution = state
                .orchestrator
                .schedule(task_id, true)
                .await?
                .context("task was not scheduled (inactive, capped, or already in flight)")?;
            state.orchestrator.drain_queue().await?;

            let finished = state
                .store
                .execution(execution.id)
                .await
                .context("execution disappeared")?;
            match finished.status {
                ExecutionStatus::Completed => {
                    println!("{}", finished.output_result().unwrap_or_default());
                }
                other => {
                    anyhow::bail!(
                        "execution finished with status {other:?}: {}",
                        finished.error_message.unwrap_or_default()
                    );
                }
            }
        }
        Command::Status { state_dir } => {
            let (state, config) = build_state(state_dir).await?;
            let now = chrono::Utc::now();
            let due = state.store.due_tasks(now).await;
            println!("state dir: {}", config.state_dir.display());
            println!("remote execution: {}", config.use_remote_execution);
            println!("due tasks: {}", due.len());
            for task in due {
                println!(
                    "  {} ({}) next={}",
                    task.name,
                    task.id,
                    task.next_execution_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }

    Ok(())
}
