use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Scheduler,
    Worker,
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Scheduler => "scheduler",
            ProcessKind::Worker => "worker",
            ProcessKind::Cli => "cli",
        }
    }

    fn file_prefix(self) -> String {
        format!("drover.{}", self.as_str())
    }
}

/// How often the JSONL log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

/// Logging policy, normally derived from the runtime configuration.
/// Long-lived scheduler processes roll daily and prune by age; one-shot
/// CLI invocations can turn retention off entirely.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub rotation: LogRotation,
    /// Files whose last modification is older than this many days are
    /// removed at startup; `None` disables the sweep.
    pub retention_days: Option<u64>,
    pub console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            rotation: LogRotation::Daily,
            retention_days: Some(14),
            console: true,
        }
    }
}

impl LoggingOptions {
    pub fn with_retention_days(days: u64) -> Self {
        Self {
            retention_days: Some(days),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub rotation: LogRotation,
    pub retention_days: Option<u64>,
    pub initialized_at: DateTime<Utc>,
}

/// Structured fields attached to task-lifecycle log lines.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub task_id: Option<&'a str>,
    pub execution_id: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Secrets and rendered prompts never reach the log stream in the clear;
/// log their length and a short hash instead.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} hash={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn emit_task_event(level: Level, process: ProcessKind, event: TaskEvent<'_>) {
    macro_rules! emit {
        ($lvl:expr) => {
            tracing::event!(
                target: "drover.obs",
                $lvl,
                process = process.as_str(),
                component = event.component,
                event = event.event,
                task_id = event.task_id.unwrap_or(""),
                execution_id = event.execution_id.unwrap_or(""),
                provider = event.provider.unwrap_or(""),
                model = event.model.unwrap_or(""),
                status = event.status.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "task_event"
            )
        };
    }
    match level {
        Level::ERROR => emit!(Level::ERROR),
        Level::WARN => emit!(Level::WARN),
        Level::INFO => emit!(Level::INFO),
        Level::DEBUG => emit!(Level::DEBUG),
        Level::TRACE => emit!(Level::TRACE),
    }
}

/// Install the subscriber for this process: a JSONL file layer rolling per
/// the configured policy, plus an optional console layer. Expired files
/// are swept before the first write.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    options: LoggingOptions,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    let prefix = process.file_prefix();
    if let Some(days) = options.retention_days {
        let removed = sweep_expired_logs(logs_dir, &prefix, days)?;
        if removed > 0 {
            eprintln!("pruned {removed} expired log file(s) from {}", logs_dir.display());
        }
    }

    let rotation = match options.rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };
    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(rotation)
        .filename_prefix(&prefix)
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = options.console.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(true)
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        process: process.as_str().to_string(),
        logs_dir: logs_dir.display().to_string(),
        prefix,
        rotation: options.rotation,
        retention_days: options.retention_days,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

/// Delete this process's log files by modification age. Rotation stamps in
/// the filename are not parsed; the filesystem mtime decides, which also
/// covers files left behind after a rotation-policy change.
fn sweep_expired_logs(logs_dir: &Path, prefix: &str, retention_days: u64) -> anyhow::Result<u64> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(prefix) || !name.ends_with(".jsonl") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn default_logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_masks_content() {
        let raw = "sk-live-very-secret-value";
        let redacted = redact_text(raw);
        assert!(redacted.contains("[redacted len="));
        assert!(!redacted.contains("very-secret"));
    }

    #[test]
    fn redact_text_is_stable_per_input() {
        assert_eq!(redact_text("same"), redact_text("same"));
        assert_ne!(redact_text("one"), redact_text("two"));
    }

    #[test]
    fn default_logs_dir_lives_under_the_state_dir() {
        let state = PathBuf::from("/var/lib/drover");
        assert_eq!(default_logs_dir(&state), PathBuf::from("/var/lib/drover/logs"));
    }

    #[test]
    fn default_policy_is_daily_with_two_week_retention() {
        let options = LoggingOptions::default();
        assert_eq!(options.rotation, LogRotation::Daily);
        assert_eq!(options.retention_days, Some(14));
        assert!(options.console);
        assert_eq!(LoggingOptions::with_retention_days(3).retention_days, Some(3));
    }

    #[test]
    fn sweep_keeps_fresh_files_and_ignores_foreign_ones() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("drover.scheduler.2026-08-01.jsonl");
        let foreign = dir.path().join("other-service.jsonl");
        fs::write(&fresh, "{}").unwrap();
        fs::write(&foreign, "{}").unwrap();

        let removed = sweep_expired_logs(dir.path(), "drover.scheduler", 14).unwrap();
        assert_eq!(removed, 0);
        assert!(fresh.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn zero_day_retention_removes_everything_matching() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("drover.worker.2026-08-01.jsonl");
        let foreign = dir.path().join("drover.scheduler.2026-08-01.jsonl");
        fs::write(&log, "{}").unwrap();
        fs::write(&foreign, "{}").unwrap();
        // let the mtimes land strictly before the sweep's cutoff
        std::thread::sleep(Duration::from_millis(20));

        // cutoff saturates to "now", so any existing file is expired
        let removed = sweep_expired_logs(dir.path(), "drover.worker", 0).unwrap();
        assert_eq!(removed, 1);
        assert!(!log.exists());
        assert!(foreign.exists(), "other processes' files are untouched");
    }
}
