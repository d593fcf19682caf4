//! Workflow files: a named graph of declared steps, loaded from TOML or JSON.
//!
//! ```toml
//! name = "fix-issue"
//! start = "plan"
//! max_retries = 2
//!
//! [[steps]]
//! name = "plan"
//! type = "llm"
//! prompt = "Plan a fix for: {{title}}"
//! next = "test"
//!
//! [[steps]]
//! name = "test"
//! type = "shell"
//! command = "cargo test"
//! next = "END"
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::state::is_terminal;
use super::step::Step;
use super::steps::{DeclaredStep, StepConfig};
use super::transition::Transition;
use crate::error::DefinitionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub start: String,
    /// Overrides the configured retry count for every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Outcome of [`WorkflowDefinition::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl WorkflowDefinition {
    /// Reads a definition, choosing the format by file extension.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(ext.as_deref(), Some("toml" | "json")) {
            return Err(DefinitionError::UnsupportedFormat(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match ext.as_deref() {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, DefinitionError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Static checks. `llm_available` is `None` when it is not known yet
    /// whether a language model will be configured.
    pub fn validate(&self, llm_available: Option<bool>) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut names = HashSet::new();

        if self.steps.is_empty() {
            report.errors.push("workflow has no steps".to_string());
        }

        for step in &self.steps {
            if step.name.trim().is_empty() {
                report.errors.push("a step has an empty name".to_string());
            } else if is_terminal(&step.name) {
                report
                    .errors
                    .push(format!("step name '{}' is reserved", step.name));
            }
            if !names.insert(step.name.as_str()) {
                report.errors.push(format!("duplicate step '{}'", step.name));
            }
        }

        if !names.contains(self.start.as_str()) {
            report
                .errors
                .push(format!("start step '{}' is not defined", self.start));
        }

        for step in &self.steps {
            let transition = Transition::from(step.next.clone());
            for target in transition.static_targets().unwrap_or_default() {
                if !is_terminal(target) && !names.contains(target) {
                    report.errors.push(format!(
                        "step '{}' transitions to unknown step '{target}'",
                        step.name
                    ));
                }
            }
            for (slot, source) in &step.inputs {
                if !names.contains(source.step.as_str()) {
                    report.errors.push(format!(
                        "step '{}' input '{slot}' reads from unknown step '{}'",
                        step.name, source.step
                    ));
                }
            }
            if step.kind.needs_llm() && llm_available == Some(false) {
                report.errors.push(format!(
                    "step '{}' is an llm step but no language model is configured",
                    step.name
                ));
            }
        }

        let reachable = self.reachable_steps();
        for step in &self.steps {
            if !reachable.contains(step.name.as_str()) {
                report
                    .warnings
                    .push(format!("step '{}' is unreachable from '{}'", step.name, self.start));
            }
        }

        report
    }

    fn reachable_steps(&self) -> BTreeSet<&str> {
        let edges: HashMap<&str, Transition> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), Transition::from(s.next.clone())))
            .collect();

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.start.as_str()]);
        while let Some(name) = queue.pop_front() {
            let Some(transition) = edges.get(name) else {
                continue;
            };
            if !seen.insert(name) {
                continue;
            }
            for target in transition.static_targets().unwrap_or_default() {
                if let Some((key, _)) = edges.get_key_value(target) {
                    queue.push_back(*key);
                }
            }
        }
        seen
    }

    /// Validates, then builds the executable steps.
    pub fn into_steps(self, llm_available: Option<bool>) -> Result<Vec<Arc<dyn Step>>, DefinitionError> {
        let report = self.validate(llm_available);
        if !report.is_valid() {
            return Err(DefinitionError::Invalid {
                name: self.name,
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            tracing::warn!(workflow = %self.name, "{warning}");
        }
        Ok(self
            .steps
            .into_iter()
            .map(|config| Arc::new(DeclaredStep::from(config)) as Arc<dyn Step>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        name = "fix-issue"
        start = "plan"
        max_retries = 1

        [[steps]]
        name = "plan"
        type = "llm"
        prompt = "Plan {{title}}"
        next = "test"

        [[steps]]
        name = "test"
        type = "shell"
        command = "true"
        next = { type = "binary", condition = "test", then = "END", else = "report" }

        [[steps]]
        name = "report"
        type = "decide"
        set = { outcome = "failed" }
        inputs = { plan = "plan.response" }
        next = "ERROR"
    "#;

    #[test]
    fn valid_definition_has_no_findings() {
        let def = WorkflowDefinition::from_toml_str(VALID).unwrap();
        assert_eq!(def.max_retries, Some(1));
        let report = def.validate(Some(true));
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(def.into_steps(None).unwrap().len(), 3);
    }

    #[test]
    fn reports_structural_errors() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
            name = "broken"
            start = "missing"

            [[steps]]
            name = "a"
            type = "decide"
            next = "nowhere"
            inputs = { x = "ghost.out" }

            [[steps]]
            name = "a"
            type = "decide"
            next = "END"

            [[steps]]
            name = "END"
            type = "decide"
            next = "END"
            "#,
        )
        .unwrap();
        let report = def.validate(None);
        let all = report.errors.join("\n");
        assert!(all.contains("start step 'missing' is not defined"));
        assert!(all.contains("duplicate step 'a'"));
        assert!(all.contains("step name 'END' is reserved"));
        assert!(all.contains("transitions to unknown step 'nowhere'"));
        assert!(all.contains("reads from unknown step 'ghost'"));

        let err = def.into_steps(None).err().unwrap();
        assert!(matches!(err, DefinitionError::Invalid { .. }));
    }

    #[test]
    fn llm_steps_need_a_model_when_known() {
        let def = WorkflowDefinition::from_toml_str(VALID).unwrap();
        assert!(def.validate(None).is_valid());
        let report = def.validate(Some(false));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("'plan' is an llm step"));
    }

    #[test]
    fn unreachable_steps_are_warnings() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
            name = "w"
            start = "a"

            [[steps]]
            name = "a"
            type = "decide"
            next = "END"

            [[steps]]
            name = "orphan"
            type = "decide"
            next = "a"
            "#,
        )
        .unwrap();
        let report = def.validate(None);
        assert!(report.is_valid());
        assert_eq!(report.warnings, vec!["step 'orphan' is unreachable from 'a'".to_string()]);
    }

    #[test]
    fn loads_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("flow.toml");
        fs::write(&toml_path, VALID).unwrap();
        assert_eq!(WorkflowDefinition::load(&toml_path).unwrap().name, "fix-issue");

        let json_path = dir.path().join("flow.json");
        fs::write(
            &json_path,
            r#"{"name": "j", "start": "a", "steps": [{"name": "a", "type": "decide", "next": {"type": "fixed", "to": "END"}}]}"#,
        )
        .unwrap();
        let def = WorkflowDefinition::load(&json_path).unwrap();
        assert!(def.validate(None).is_valid());

        let yaml_path = dir.path().join("flow.yaml");
        fs::write(&yaml_path, "name: x").unwrap();
        assert!(matches!(
            WorkflowDefinition::load(&yaml_path),
            Err(DefinitionError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            WorkflowDefinition::load(&dir.path().join("absent.toml")),
            Err(DefinitionError::Read { .. })
        ));
    }

    #[test]
    fn unknown_transition_shape_fails_to_load() {
        let err = WorkflowDefinition::from_toml_str(
            r#"
            name = "w"
            start = "a"

            [[steps]]
            name = "a"
            type = "decide"
            next = { type = "coin_flip" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::Toml(_)));
    }
}
