use anyhow::Context;
use aws_sdk_lambda::primitives::Blob;
use serde_json::Value;
use tracing::info;

use drover_wire::{RemoteAgentRequest, RemoteAgentResponse};

use crate::{CompletionOutcome, truncate_for_error};

/// Settings for the serverless execution path.
#[derive(Debug, Clone)]
pub struct RemoteExecutionConfig {
    pub region: String,
    pub function_name: String,
    /// Explicit credentials for deployments without an ambient role; the
    /// default AWS credential chain is used when unset.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Invokes the remote agent function synchronously and unwraps its
/// response envelope.
pub struct RemoteDispatcher {
    client: aws_sdk_lambda::Client,
    function_name: String,
}

impl RemoteDispatcher {
    pub async fn connect(config: &RemoteExecutionConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_lambda::config::Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(aws_sdk_lambda::config::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "drover-config",
            ));
        }

        let shared = loader.load().await;
        Ok(Self {
            client: aws_sdk_lambda::Client::new(&shared),
            function_name: config.function_name.clone(),
        })
    }

    pub async fn invoke(&self, request: &RemoteAgentRequest) -> anyhow::Result<RemoteAgentResponse> {
        info!(
            "invoking remote function {} with provider {}",
            self.function_name, request.provider
        );

        let payload = serde_json::to_vec(request).context("serialising remote agent request")?;
        let response = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .payload(Blob::new(payload))
            .send()
            .await
            .context("remote function invocation failed")?;

        let body = response
            .payload()
            .map(|blob| blob.as_ref().to_vec())
            .unwrap_or_default();

        if let Some(function_error) = response.function_error() {
            anyhow::bail!(
                "remote function error ({function_error}): {}",
                truncate_for_error(&String::from_utf8_lossy(&body), 500)
            );
        }

        parse_remote_payload(&body)
    }

    pub async fn invoke_as_outcome(
        &self,
        request: &RemoteAgentRequest,
    ) -> anyhow::Result<CompletionOutcome> {
        let response = self.invoke(request).await?;
        Ok(CompletionOutcome {
            output: response.response,
            usage: response.token_usage,
        })
    }
}

/// Unwrap either an API-Gateway-style `{statusCode, body}` envelope or a
/// direct response payload.
pub fn parse_remote_payload(bytes: &[u8]) -> anyhow::Result<RemoteAgentResponse> {
    let value: Value =
        serde_json::from_slice(bytes).context("remote function returned invalid JSON")?;

    if let Some(status_code) = value.get("statusCode").and_then(|v| v.as_u64()) {
        let body = match value.get("body") {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .context("remote function returned invalid JSON body")?,
            Some(other) => other.clone(),
            None => anyhow::bail!("remote function envelope missing body"),
        };

        if status_code != 200 {
            let message = body
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            anyhow::bail!("remote function error (status {status_code}): {message}");
        }

        return serde_json::from_value(body).context("parsing remote agent response body");
    }

    serde_json::from_value(value).context("parsing remote agent response")
}
