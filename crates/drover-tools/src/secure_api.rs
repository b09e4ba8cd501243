use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use drover_types::{ToolResult, ToolSchema};

use crate::{Tool, ToolDeps};

const MAX_RESPONSE_SIZE: usize = 50 * 1024 * 1024;
const MAX_RESPONSE_CHARS: usize = 10_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SAFE_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "text/plain",
    "text/csv",
    "text/html",
    "text/xml",
    "application/xml",
    "application/pdf",
    "text/markdown",
    "application/yaml",
    "text/yaml",
];

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

fn malicious_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)<script[^>]*>.*?</script>",
            r"(?i)eval\s*\(",
            r"(?i)exec\s*\(",
            r"(?i)import\s+os",
            r"(?i)subprocess\.",
            r"(?i)__import__",
            r"(?i)\.exe\b",
            r"(?i)\.bat\b",
            r"(?i)\.sh\b",
            r"(?i)\.ps1\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn injection_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)ignore\s+previous\s+instructions",
            r"(?i)forget\s+everything",
            r"(?i)new\s+instructions?:",
            r"(?i)system\s*:",
            r"(?i)assistant\s*:",
            r"(?i)user\s*:",
            r"(?is)\[INST\].*?\[/INST\]",
            r"(?is)<\|.*?\|>",
            r"(?is)disregard\s+.*?prompt",
            r"(?is)override\s+.*?system",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

/// Candidate auth schemes to try for a URL, most likely first.
pub fn detect_likely_auth_methods(url: &str) -> Vec<&'static str> {
    let url = url.to_lowercase();

    if url.contains("api.github.com") {
        return vec!["Bearer", "Token"];
    }
    for host in [
        "api.slack.com",
        "api.stripe.com",
        "api.openai.com",
        "api.anthropic.com",
        "googleapis.com",
        "api.hubspot.com",
        "api.sendgrid.com",
    ] {
        if url.contains(host) {
            return vec!["Bearer"];
        }
    }

    if url.contains("/v1/") || url.contains("/api/v") {
        return vec!["Bearer", "X-API-Key", "Token"];
    }
    if url.contains("/graphql") {
        return vec!["Bearer", "Authorization"];
    }
    if url.contains("/rest/") {
        return vec!["Bearer", "X-API-Key"];
    }

    vec!["Bearer", "Token", "X-API-Key", "Authorization"]
}

fn auth_header(secret_value: &str, auth_method: &str) -> (&'static str, String) {
    match auth_method {
        "Token" => ("Authorization", format!("Token {secret_value}")),
        "X-API-Key" => ("X-API-Key", secret_value.to_string()),
        "Authorization" => ("Authorization", secret_value.to_string()),
        _ => ("Authorization", format!("Bearer {secret_value}")),
    }
}

pub fn scan_for_malicious_content(content: &str) -> Vec<String> {
    malicious_patterns()
        .iter()
        .filter(|pattern| pattern.is_match(content))
        .map(|pattern| format!("Potentially malicious pattern detected: {}", pattern.as_str()))
        .collect()
}

pub fn scan_for_prompt_injection(content: &str) -> Vec<String> {
    injection_patterns()
        .iter()
        .filter(|pattern| pattern.is_match(content))
        .map(|pattern| format!("Prompt injection pattern detected: {}", pattern.as_str()))
        .collect()
}

/// Replace injection markers with `[FILTERED_CONTENT]` and cap the length
/// so a hostile endpoint cannot flood the prompt.
pub fn sanitize_api_response(content: &str) -> String {
    let mut sanitized = content.to_string();
    for pattern in injection_patterns() {
        sanitized = pattern
            .replace_all(&sanitized, "[FILTERED_CONTENT]")
            .into_owned();
    }
    if sanitized.chars().count() > MAX_RESPONSE_CHARS {
        let head: String = sanitized.chars().take(MAX_RESPONSE_CHARS).collect();
        sanitized = format!("{head}\n[RESPONSE_TRUNCATED_FOR_SECURITY]");
    }
    sanitized
}

#[derive(Debug, Clone)]
pub struct SecurityScan {
    pub safe: bool,
    pub issues: Vec<String>,
    pub prompt_injection_detected: bool,
}

pub fn validate_response_security(content_type: &str, body: &[u8]) -> SecurityScan {
    let mut scan = SecurityScan {
        safe: true,
        issues: Vec::new(),
        prompt_injection_detected: false,
    };

    if body.len() > MAX_RESPONSE_SIZE {
        scan.safe = false;
        scan.issues.push(format!("File too large: {} bytes", body.len()));
        return scan;
    }

    let content_type = content_type.to_lowercase();
    if !SAFE_CONTENT_TYPES
        .iter()
        .any(|safe_type| content_type.contains(safe_type))
    {
        scan.safe = false;
        scan.issues.push(format!("Unsafe content type: {content_type}"));
        return scan;
    }

    let text_like = content_type.contains("text/")
        || content_type.contains("application/json")
        || content_type.contains("application/xml");
    if text_like {
        let content = String::from_utf8_lossy(body);

        let malicious = scan_for_malicious_content(&content);
        if !malicious.is_empty() {
            scan.safe = false;
            scan.issues.extend(malicious);
            return scan;
        }

        let injections = scan_for_prompt_injection(&content);
        if !injections.is_empty() {
            // not blocking: the content is sanitised before it reaches the
            // model, but the attempt is recorded
            scan.prompt_injection_detected = true;
            scan.issues.extend(injections);
        }
    }

    scan
}

/// One entry in the execution's `api_security_summary.api_calls` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_used: Option<String>,
    #[serde(default)]
    pub auth_methods_attempted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method_successful: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub response_size_bytes: u64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub security_scan_passed: bool,
    #[serde(default)]
    pub prompt_injection_detected: bool,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ApiCallRecord {
    fn new(url: &str, method: &str, secret_name: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            secret_used: secret_name.map(str::to_string),
            auth_methods_attempted: Vec::new(),
            auth_method_successful: None,
            started_at: Utc::now(),
            response_size_bytes: 0,
            content_type: "unknown".to_string(),
            security_scan_passed: false,
            prompt_injection_detected: false,
            execution_time_ms: 0.0,
            rate_limit_remaining: None,
            errors: Vec::new(),
        }
    }
}

pub fn format_bytes(mut bytes: f64) -> String {
    for unit in ["B", "KB", "MB", "GB"] {
        if bytes < 1024.0 {
            return format!("{bytes:.1}{unit}");
        }
        bytes /= 1024.0;
    }
    format!("{bytes:.1}TB")
}

/// Fold one call record into an execution's security summary, creating the
/// summary skeleton on first use.
pub fn merge_api_call_into_summary(summary: &mut Value, record: &ApiCallRecord) {
    if !summary.is_object() {
        *summary = json!({
            "api_calls": [],
            "security_checks": {
                "total_downloads": "0B",
                "malicious_content_detected": false,
                "prompt_injection_attempts": 0,
                "unsafe_redirects": 0,
                "rate_limits_hit": false,
            },
            "recommendations": [],
            "errors": [],
        });
    }

    let record_value = serde_json::to_value(record).unwrap_or_default();
    if let Some(calls) = summary["api_calls"].as_array_mut() {
        calls.push(record_value);
    }

    let total_bytes: u64 = summary["api_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| c["response_size_bytes"].as_u64())
                .sum()
        })
        .unwrap_or(0);
    summary["security_checks"]["total_downloads"] = json!(format_bytes(total_bytes as f64));

    if !record.errors.is_empty() {
        if let Some(errors) = summary["errors"].as_array_mut() {
            errors.extend(record.errors.iter().map(|e| json!(e)));
        }
    }
    if !record.security_scan_passed {
        summary["security_checks"]["malicious_content_detected"] = json!(true);
    }
    if record.prompt_injection_detected {
        let attempts = summary["security_checks"]["prompt_injection_attempts"]
            .as_u64()
            .unwrap_or(0);
        summary["security_checks"]["prompt_injection_attempts"] = json!(attempts + 1);
    }

    if let (Some(method), Some(secret)) =
        (&record.auth_method_successful, &record.secret_used)
    {
        let domain = record
            .url
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or(&record.url);
        let recommendation =
            format!("For {domain}: Use '{method} authentication with {secret}'");
        if let Some(recommendations) = summary["recommendations"].as_array_mut() {
            if !recommendations.iter().any(|r| r == &json!(recommendation)) {
                recommendations.push(json!(recommendation));
            }
        }
    }
    if let Some(remaining) = &record.rate_limit_remaining {
        if let Some(recommendations) = summary["recommendations"].as_array_mut() {
            recommendations.push(json!(format!("Rate limit remaining: {remaining} calls")));
        }
    }
}

/// Agent-callable HTTP client with stored-secret authentication and
/// response sanitisation.
pub struct SecureApiTool {
    client: reqwest::Client,
}

impl SecureApiTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("Drover/0.2")
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for SecureApiTool {
    fn default() -> Self {
        Self::new()
    }
}

fn error_result(message: impl Into<String>) -> ToolResult {
    ToolResult {
        output: json!({"error": message.into()}).to_string(),
        metadata: json!({}),
    }
}

#[async_trait]
impl Tool for SecureApiTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "secure_api_call".to_string(),
            description: "Make an HTTP(S) API call, optionally authenticated with a stored \
                          project secret; responses are security-scanned and sanitised"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "method": {"type": "string"},
                    "secret_name": {"type": "string"},
                    "project_id": {"type": "string"},
                    "body": {"type": "object"},
                    "headers": {"type": "object"},
                    "params": {"type": "object"},
                    "timeout": {"type": "integer"},
                    "description": {"type": "string"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, deps: &ToolDeps, args: Value) -> anyhow::Result<ToolResult> {
        let url = args["url"].as_str().unwrap_or("").to_string();
        if url.is_empty() {
            return Ok(error_result("URL is required"));
        }

        let method = args["method"]
            .as_str()
            .unwrap_or("GET")
            .to_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Ok(error_result(format!(
                "Invalid HTTP method. Must be one of: {VALID_METHODS:?}"
            )));
        }

        // localhost is exempt so local integration targets stay testable
        if !(url.starts_with("http://localhost")
            || url.starts_with("http://127.0.0.1")
            || url.starts_with("https://"))
        {
            return Ok(error_result("External URLs must use HTTPS for security"));
        }

        let secret_name = args["secret_name"].as_str().unwrap_or("").to_string();
        let project_id = args["project_id"].as_str().unwrap_or("").to_string();
        if !secret_name.is_empty() && project_id.is_empty() {
            return Ok(error_result("Project ID is required when using a secret"));
        }

        let timeout = args["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS);
        let body = args.get("body").filter(|v| !v.is_null()).cloned();
        let extra_headers = args.get("headers").and_then(|v| v.as_object()).cloned();
        let params = args.get("params").and_then(|v| v.as_object()).cloned();

        let mut record = ApiCallRecord::new(
            &url,
            &method,
            (!secret_name.is_empty()).then_some(secret_name.as_str()),
        );
        let started = Instant::now();

        struct AuthAttempt {
            label: &'static str,
            header_name: &'static str,
            header_value: String,
        }

        let auth_attempts: Vec<Option<AuthAttempt>> = if secret_name.is_empty() {
            vec![None]
        } else {
            let project_uuid = match project_id.parse() {
                Ok(id) => id,
                Err(_) => return Ok(error_result(format!("Invalid project ID: {project_id}"))),
            };
            let secret_value = match deps
                .context
                .secret_value(project_uuid, deps.user_id, &secret_name)
                .await?
            {
                Some(value) => value,
                None => {
                    return Ok(error_result(format!(
                        "Secret '{secret_name}' not found for user in project"
                    )))
                }
            };
            detect_likely_auth_methods(&url)
                .into_iter()
                .map(|auth_method| {
                    let (header_name, header_value) = auth_header(&secret_value, auth_method);
                    Some(AuthAttempt {
                        label: auth_method,
                        header_name,
                        header_value,
                    })
                })
                .collect()
        };

        let mut last_error: Option<String> = None;
        for attempt in auth_attempts {
            let mut request = self
                .client
                .request(reqwest::Method::from_bytes(method.as_bytes())?, &url)
                .timeout(Duration::from_secs(timeout))
                .header("Accept", "application/json");

            let auth_method_label = attempt.as_ref().map(|auth| auth.label.to_string());
            if let Some(auth) = &attempt {
                request = request.header(auth.header_name, auth.header_value.clone());
                record.auth_methods_attempted.push(auth.label.to_string());
            }

            if let Some(headers) = &extra_headers {
                for (name, value) in headers {
                    if let Some(value) = value.as_str() {
                        request = request.header(name.as_str(), value);
                    }
                }
            }
            if let Some(params) = &params {
                let pairs: Vec<(String, String)> = params
                    .iter()
                    .filter_map(|(k, v)| {
                        v.as_str()
                            .map(str::to_string)
                            .or_else(|| Some(v.to_string()))
                            .map(|v| (k.clone(), v))
                    })
                    .collect();
                request = request.query(&pairs);
            }
            if let Some(body) = &body {
                if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
                    request = request.json(body);
                }
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("Request failed: {e}"));
                    continue;
                }
            };

            let status = response.status();
            if matches!(status.as_u16(), 401 | 403) && auth_method_label.is_some() {
                last_error = Some(format!("Authentication failed: {status}"));
                continue;
            }
            if !status.is_success() {
                last_error = Some(format!("Request failed with status {status}"));
                continue;
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            record.rate_limit_remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .or_else(|| response.headers().get("x-rate-limit-remaining"))
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_error = Some(format!("Failed reading response body: {e}"));
                    continue;
                }
            };

            record.auth_method_successful = auth_method_label;
            record.response_size_bytes = bytes.len() as u64;
            record.content_type = content_type.clone();
            record.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

            let scan = validate_response_security(&content_type, &bytes);
            record.security_scan_passed = scan.safe;
            record.prompt_injection_detected = scan.prompt_injection_detected;
            if !scan.safe {
                record.errors.extend(scan.issues.clone());
                self.audit(deps, &record).await;
                return Ok(error_result(format!(
                    "Security validation failed: {:?}",
                    scan.issues
                )));
            }

            let text = String::from_utf8_lossy(&bytes);
            let sanitized = sanitize_api_response(&text);
            if scan.prompt_injection_detected {
                warn!("prompt injection markers sanitised in response from {url}");
            }

            self.audit(deps, &record).await;
            info!(
                "secure_api_call to {url} succeeded in {:.0}ms",
                record.execution_time_ms
            );
            let metadata = serde_json::to_value(&record).unwrap_or_default();
            return Ok(ToolResult {
                output: sanitized,
                metadata,
            });
        }

        let tried = record.auth_methods_attempted.clone();
        let last_error = last_error.unwrap_or_else(|| "Request failed".to_string());
        if secret_name.is_empty() {
            record.errors.push(last_error.clone());
        } else {
            record.errors.push(format!(
                "All authentication methods failed. Last error: {last_error}"
            ));
        }
        record.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.audit(deps, &record).await;

        if secret_name.is_empty() {
            return Ok(error_result(last_error));
        }
        Ok(error_result(format!(
            "Could not authenticate with any known method. Tried: {tried:?}"
        )))
    }
}

impl SecureApiTool {
    async fn audit(&self, deps: &ToolDeps, record: &ApiCallRecord) {
        if let Some(execution_id) = deps.execution_id {
            if let Err(e) = deps
                .context
                .record_api_call(execution_id, record.clone())
                .await
            {
                warn!("failed to update execution security summary: {e}");
            }
        }
    }
}
