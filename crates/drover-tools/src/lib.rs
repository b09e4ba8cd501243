pub mod discovery;
pub mod format;
pub mod secure_api;

pub use secure_api::{
    detect_likely_auth_methods, merge_api_call_into_summary, sanitize_api_response,
    scan_for_malicious_content, scan_for_prompt_injection, ApiCallRecord,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use drover_types::{ToolResult, ToolSchema};

/// Per-project view handed to the model by `list_user_projects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub secrets: Vec<SecretSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSummary {
    pub name: String,
    pub masked_value: String,
}

/// What tools need from the rest of the system: secret lookup, project
/// listing, and the execution audit trail. The store implements this.
#[async_trait]
pub trait ToolContext: Send + Sync {
    async fn secret_value(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        key: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn projects_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<ProjectSummary>>;

    async fn record_api_call(
        &self,
        execution_id: Uuid,
        record: ApiCallRecord,
    ) -> anyhow::Result<()>;
}

/// Identity and audit scope injected into every tool call.
#[derive(Clone)]
pub struct ToolDeps {
    pub user_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub context: Arc<dyn ToolContext>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, deps: &ToolDeps, args: Value) -> anyhow::Result<ToolResult>;
}

/// The tools bound to scheduled agent executions.
#[derive(Clone)]
pub struct ToolRegistry {
    deps: ToolDeps,
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new(deps: ToolDeps) -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        map.insert(
            "secure_api_call".to_string(),
            Arc::new(secure_api::SecureApiTool::new()),
        );
        map.insert(
            "list_user_projects".to_string(),
            Arc::new(ListUserProjectsTool),
        );
        map.insert("format_output".to_string(), Arc::new(format::FormatOutputTool));
        map.insert("api_discovery".to_string(), Arc::new(discovery::ApiDiscoveryTool));
        Self {
            deps,
            tools: Arc::new(map),
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<ToolResult> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolResult {
                output: json!({"error": format!("Unknown tool: {name}")}).to_string(),
                metadata: json!({}),
            });
        };
        tool.execute(&self.deps, args).await
    }
}

struct ListUserProjectsTool;

#[async_trait]
impl Tool for ListUserProjectsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "list_user_projects".to_string(),
            description: "List the user's projects and the names of their stored secrets"
                .to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, deps: &ToolDeps, _args: Value) -> anyhow::Result<ToolResult> {
        let projects = deps.context.projects_for_user(deps.user_id).await?;
        let output = json!({
            "projects": projects,
            "help": "Use the project ID when calling secure_api_call with a secret_name",
        });
        Ok(ToolResult {
            output: output.to_string(),
            metadata: json!({"count": output["projects"].as_array().map(Vec::len).unwrap_or(0)}),
        })
    }
}
