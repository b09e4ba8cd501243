use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-schema description of an agent-callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// What a tool hands back to the model, plus structured metadata for the
/// audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: String,
    pub metadata: Value,
}
