use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::warn;

use drover_types::AgentTask;

use crate::storage::Store;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([A-Z_][A-Z0-9_]*)\}\}").expect("static regex"))
}

/// Distinct `{{NAME}}` placeholders in the content, sorted.
pub fn extract_variables(content: &str) -> Vec<String> {
    let names: BTreeSet<String> = variable_pattern()
        .captures_iter(content)
        .map(|captures| captures[1].to_string())
        .collect();
    names.into_iter().collect()
}

/// Substitute placeholders from the secret map. Missing variables become
/// empty strings; their names (never their values) are logged.
pub fn render_with_secrets(content: &str, secrets: &HashMap<String, String>) -> String {
    let mut missing = BTreeSet::new();
    let rendered = variable_pattern().replace_all(content, |captures: &Captures| {
        let name = &captures[1];
        match secrets.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.insert(name.to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        warn!(
            "missing environment variables for template: {}",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        );
    }
    rendered.into_owned()
}

/// Render a task's instruction against its project-scoped secrets.
///
/// Scope comes from the task's agent instance: its first linked project and
/// the instance owner. Tasks without a project render unchanged.
pub async fn render_task_instruction(task: &AgentTask, store: &Store) -> String {
    let names = extract_variables(&task.instruction);
    if names.is_empty() {
        return task.instruction.clone();
    }

    let Some(instance) = store.instance(task.agent_instance_id).await else {
        return task.instruction.clone();
    };
    let Some(project) = store.first_project_for_instance(instance.id).await else {
        warn!(
            "task {} uses template variables but its instance has no project",
            task.name
        );
        return task.instruction.clone();
    };

    let mut secrets = HashMap::new();
    for name in &names {
        if let Some(value) = store
            .secret_value_for(project.id, instance.user_id, name)
            .await
        {
            secrets.insert(name.clone(), value);
        }
    }
    render_with_secrets(&task.instruction, &secrets)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReport {
    pub valid: bool,
    pub used: Vec<String>,
    pub missing: Vec<String>,
    pub unused: Vec<String>,
}

/// Compare the placeholders in content against the variables a project
/// actually has.
pub fn validate_variables(content: &str, available: &[String]) -> VariableReport {
    let used = extract_variables(content);
    let available: BTreeSet<&String> = available.iter().collect();
    let used_set: BTreeSet<&String> = used.iter().collect();

    let missing: Vec<String> = used_set
        .iter()
        .filter(|name| !available.contains(**name))
        .map(|name| (*name).clone())
        .collect();
    let unused: Vec<String> = available
        .iter()
        .filter(|name| !used_set.contains(**name))
        .map(|name| (*name).clone())
        .collect();

    VariableReport {
        valid: missing.is_empty(),
        used,
        missing,
        unused,
    }
}
