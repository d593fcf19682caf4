use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::ports::PortInput;
use super::state::{Context, Turn, WorkflowState};
use super::transition::Transition;
use crate::anthropic::ConversationModel;

/// One node of a workflow graph.
///
/// `execute` must not mutate anything but its return value: the engine
/// merges the [`StepOutput`] into the state and persists it, so a failed
/// attempt leaves no trace and can be retried.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, state: &WorkflowState, rt: &RuntimeContext) -> anyhow::Result<StepOutput>;

    /// Picks the next step from the state after this step's output was
    /// merged in.
    fn next(&self, state: &WorkflowState) -> anyhow::Result<String>;

    /// Port inputs this step reads; resolved into [`RuntimeContext::inputs`].
    fn inputs(&self) -> Vec<PortInput> {
        Vec::new()
    }
}

/// Collaborators handed to a step for one execution.
#[derive(Clone)]
pub struct RuntimeContext {
    pub llm: Option<Arc<dyn ConversationModel>>,
    pub http: reqwest::Client,
    pub logger: StepLogger,
    /// Resolved port inputs, by input slot name.
    pub inputs: Context,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("llm", &self.llm.is_some())
            .field("logger", &self.logger)
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// Step-scoped logger: `tracing` events tagged with instance and step.
#[derive(Debug, Clone)]
pub struct StepLogger {
    instance: String,
    step: String,
}

impl StepLogger {
    pub fn new(instance: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            step: step.into(),
        }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(instance = %self.instance, step = %self.step, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(instance = %self.instance, step = %self.step, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(instance = %self.instance, step = %self.step, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(instance = %self.instance, step = %self.step, "{message}");
    }
}

/// What a step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Shallow-merged into the context.
    pub update: Context,
    /// Replaces the conversation history when present.
    pub conversation_history: Option<Vec<Turn>>,
    /// Output port values, by slot.
    pub ports: Context,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.update.insert(key.into(), value.into());
        self
    }

    pub fn port(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ports.insert(slot.into(), value.into());
        self
    }

    pub fn history(mut self, turns: Vec<Turn>) -> Self {
        self.conversation_history = Some(turns);
        self
    }
}

type StepBody =
    Arc<dyn Fn(WorkflowState, RuntimeContext) -> BoxFuture<'static, anyhow::Result<StepOutput>> + Send + Sync>;

/// A step built from a closure, for workflows assembled in code.
#[derive(Clone)]
pub struct FnStep {
    name: String,
    body: StepBody,
    transition: Transition,
    inputs: Vec<PortInput>,
}

impl FnStep {
    /// `body` receives owned copies so the returned future can be `'static`.
    pub fn new<F, Fut>(name: impl Into<String>, transition: Transition, body: F) -> Self
    where
        F: Fn(WorkflowState, RuntimeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StepOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |state, rt| Box::pin(body(state, rt))),
            transition,
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PortInput>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn transition(&self) -> &Transition {
        &self.transition
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("transition", &self.transition)
            .field("inputs", &self.inputs)
            .finish()
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: &WorkflowState, rt: &RuntimeContext) -> anyhow::Result<StepOutput> {
        (self.body)(state.clone(), rt.clone()).await
    }

    fn next(&self, state: &WorkflowState) -> anyhow::Result<String> {
        Ok(self.transition.resolve(state))
    }

    fn inputs(&self) -> Vec<PortInput> {
        self.inputs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runtime() -> RuntimeContext {
        RuntimeContext {
            llm: None,
            http: reqwest::Client::new(),
            logger: StepLogger::new("t", "greet"),
            inputs: json!({"name": "ada"}).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn fn_step_runs_closure_with_inputs() {
        let step = FnStep::new("greet", Transition::to("END"), |_state, rt| async move {
            let name = rt.inputs.get("name").and_then(Value::as_str).unwrap_or("nobody").to_string();
            Ok(StepOutput::new().set("greeting", format!("hi {name}")).port("name", name))
        })
        .with_inputs(vec![PortInput::new("name", "ask", "answer")]);

        let state = WorkflowState::new("t", "greet", Context::new());
        let out = step.execute(&state, &runtime()).await.unwrap();
        assert_eq!(out.update["greeting"], "hi ada");
        assert_eq!(out.ports["name"], "ada");
        assert_eq!(step.next(&state).unwrap(), "END");
        assert_eq!(step.inputs().len(), 1);
    }

    #[tokio::test]
    async fn fn_step_errors_propagate() {
        let step = FnStep::new("boom", Transition::to("END"), |_s, _rt| async {
            Err::<StepOutput, _>(anyhow::anyhow!("kaboom"))
        });
        let state = WorkflowState::new("t", "boom", Context::new());
        let err = step.execute(&state, &runtime()).await.unwrap_err();
        assert_eq!(err.to_string(), "kaboom");
    }

    #[test]
    fn output_builder_collects_fields() {
        let out = StepOutput::new()
            .set("a", 1)
            .history(vec![Turn::user("q"), Turn::assistant("a")]);
        assert_eq!(out.update["a"], 1);
        assert_eq!(out.conversation_history.unwrap().len(), 2);
        assert!(out.ports.is_empty());
    }
}
