use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ports::PortStore;

/// Reserved step name: the workflow finished successfully.
pub const END: &str = "END";
/// Reserved step name: the workflow chose to stop as failed.
pub const ERROR: &str = "ERROR";

/// Whether `step` is one of the reserved terminal markers.
pub fn is_terminal(step: &str) -> bool {
    step == END || step == ERROR
}

/// Control-flow data shared by every step.
pub type Context = Map<String, Value>;

/// Dot-path lookup into any context-shaped map.
pub fn lookup_path<'a>(map: &'a Context, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(inner) => inner.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "Pending"),
            WorkflowStatus::Running => write!(f, "Running"),
            WorkflowStatus::Completed => write!(f, "Completed"),
            WorkflowStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One entry of the conversation log kept for LLM steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Persisted state of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub instance_id: String,
    pub current_step: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
    /// Port outputs by producing step; kept apart from `context`.
    #[serde(default, skip_serializing_if = "PortStore::is_empty")]
    pub ports: PortStore,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(instance_id: impl Into<String>, start_step: impl Into<String>, context: Context) -> Self {
        Self {
            instance_id: instance_id.into(),
            current_step: start_step.into(),
            status: WorkflowStatus::Pending,
            context,
            conversation_history: Vec::new(),
            ports: PortStore::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal(&self.current_step)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Looks up a dot-separated path into the context, descending through
    /// objects and array indices: `review.approved`, `files.0`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.context, path)
    }

    /// Shallow top-level merge: keys in `update` replace keys in the context.
    pub fn merge_context(&mut self, update: Context) {
        for (key, value) in update {
            self.context.insert(key, value);
        }
    }
}
