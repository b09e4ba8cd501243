use std::path::PathBuf;

use drover_ingest::FetchConfig;
use drover_providers::RemoteExecutionConfig;

/// Immutable runtime configuration, loaded from the environment at startup
/// and injected into workers. Provider API keys are always per-instance and
/// never read from the environment.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Enables loopback / private-range blocking in the input fetcher.
    pub production: bool,
    pub state_dir: PathBuf,
    /// Global toggle for the serverless execution path.
    pub use_remote_execution: bool,
    pub aws_lambda_region: String,
    pub lambda_agent_function_name: String,
    pub bedrock_model_id: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    /// Passphrase for the at-rest secret cipher.
    pub secret_key: String,
    pub scan_interval_secs: u64,
    pub worker_count: usize,
    pub max_file_size_mb: u64,
    pub fetch_timeout_secs: u64,
    pub our_s3_buckets: Vec<String>,
    /// Rolled log files older than this are pruned at startup.
    pub log_retention_days: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            production: false,
            state_dir: PathBuf::from("drover-state"),
            use_remote_execution: false,
            aws_lambda_region: "us-east-1".to_string(),
            lambda_agent_function_name: String::new(),
            bedrock_model_id: "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            secret_key: "drover-dev-secret".to_string(),
            scan_interval_secs: 60,
            worker_count: 4,
            max_file_size_mb: 50,
            fetch_timeout_secs: 30,
            our_s3_buckets: Vec::new(),
            log_retention_days: 14,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            production: env_flag("DROVER_PRODUCTION").unwrap_or(defaults.production),
            state_dir: env_var("DROVER_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            use_remote_execution: env_flag("USE_REMOTE_EXECUTION")
                .unwrap_or(defaults.use_remote_execution),
            aws_lambda_region: env_var("AWS_LAMBDA_REGION").unwrap_or(defaults.aws_lambda_region),
            lambda_agent_function_name: env_var("LAMBDA_AGENT_FUNCTION_NAME")
                .unwrap_or(defaults.lambda_agent_function_name),
            bedrock_model_id: env_var("BEDROCK_MODEL_ID").unwrap_or(defaults.bedrock_model_id),
            aws_access_key_id: env_var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: env_var("AWS_SECRET_ACCESS_KEY"),
            secret_key: env_var("DROVER_SECRET_KEY").unwrap_or(defaults.secret_key),
            scan_interval_secs: env_var("DROVER_SCAN_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scan_interval_secs),
            worker_count: env_var("DROVER_WORKER_COUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.worker_count),
            max_file_size_mb: defaults.max_file_size_mb,
            fetch_timeout_secs: defaults.fetch_timeout_secs,
            our_s3_buckets: env_var("DROVER_S3_BUCKETS")
                .map(|v| {
                    v.split(',')
                        .map(|b| b.trim().to_string())
                        .filter(|b| !b.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.our_s3_buckets),
            log_retention_days: env_var("DROVER_LOG_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_retention_days),
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            production: self.production,
            max_file_size_mb: self.max_file_size_mb,
            timeout_secs: self.fetch_timeout_secs,
            our_s3_buckets: self.our_s3_buckets.clone(),
            aws_region: Some(self.aws_lambda_region.clone()),
        }
    }

    /// Remote dispatch settings, or `None` when the global toggle is off or
    /// no function is configured.
    pub fn remote_execution(&self) -> Option<RemoteExecutionConfig> {
        if !self.use_remote_execution || self.lambda_agent_function_name.is_empty() {
            return None;
        }
        Some(RemoteExecutionConfig {
            region: self.aws_lambda_region.clone(),
            function_name: self.lambda_agent_function_name.clone(),
            access_key_id: self.aws_access_key_id.clone(),
            secret_access_key: self.aws_secret_access_key.clone(),
        })
    }
}
