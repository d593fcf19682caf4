use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::state::{Context, END, WorkflowState, WorkflowStatus, is_terminal};
use super::step::{RuntimeContext, Step, StepLogger};
use super::store::StateStore;
use crate::anthropic::ConversationModel;
use crate::error::WorkflowError;

/// Bounded retry of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a step runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Base delay for exponential backoff. 0 retries immediately.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 0,
        }
    }
}

/// The last error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub error: anyhow::Error,
}

impl RetryPolicy {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Runs `op` until it succeeds or the retries are used up. `op` receives
    /// the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    let delay_ms = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms,
                        error = %format!("{error:#}"),
                        "attempt failed, retrying"
                    );
                    if delay_ms > 0 {
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Runs workflow instances over a fixed set of steps, checkpointing to a
/// [`StateStore`] before and after every step.
pub struct WorkflowEngine {
    steps: HashMap<String, Arc<dyn Step>>,
    start: String,
    store: StateStore,
    retry: RetryPolicy,
    llm: Option<Arc<dyn ConversationModel>>,
    http: reqwest::Client,
}

pub struct WorkflowEngineBuilder {
    steps: Vec<Arc<dyn Step>>,
    start: String,
    store: StateStore,
    retry: RetryPolicy,
    llm: Option<Arc<dyn ConversationModel>>,
    http: Option<reqwest::Client>,
}

impl WorkflowEngineBuilder {
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Arc<dyn Step>>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn llm(mut self, llm: Option<Arc<dyn ConversationModel>>) -> Self {
        self.llm = llm;
        self
    }

    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        WorkflowEngine::validate_graph(&self.steps, &self.start)?;
        let steps = self
            .steps
            .into_iter()
            .map(|step| (step.name().to_string(), step))
            .collect();
        Ok(WorkflowEngine {
            steps,
            start: self.start,
            store: self.store,
            retry: self.retry,
            llm: self.llm,
            http: self.http.unwrap_or_default(),
        })
    }
}

impl WorkflowEngine {
    pub fn builder(start: impl Into<String>, store: StateStore) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            steps: Vec::new(),
            start: start.into(),
            store,
            retry: RetryPolicy::default(),
            llm: None,
            http: None,
        }
    }

    /// Step names must be unique and non-reserved, and `start` must be one
    /// of them. Transition targets are not checked here: an unknown target
    /// fails the instance when it is reached.
    pub fn validate_graph(steps: &[Arc<dyn Step>], start: &str) -> Result<(), WorkflowError> {
        let mut names = HashSet::new();
        for step in steps {
            let name = step.name();
            if is_terminal(name) {
                return Err(WorkflowError::InvalidGraph(format!("step name '{name}' is reserved")));
            }
            if !names.insert(name) {
                return Err(WorkflowError::InvalidGraph(format!("duplicate step '{name}'")));
            }
        }
        if !names.contains(start) {
            return Err(WorkflowError::InvalidGraph(format!("start step '{start}' is not registered")));
        }
        Ok(())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Starts or resumes instance `id` and drives it to a terminal step.
    ///
    /// A stored instance resumes at its checkpointed step, whatever its
    /// status, and `initial_context` is ignored. An instance already at
    /// `END` or `ERROR` is returned as is.
    pub async fn run(&self, id: &str, initial_context: Context) -> Result<WorkflowState, WorkflowError> {
        let mut state = match self.store.load(id) {
            Some(existing) if existing.is_terminal() && existing.status.is_finished() => {
                tracing::info!(instance = id, status = %existing.status, "workflow already finished");
                return Ok(existing);
            }
            Some(existing) => {
                tracing::info!(
                    instance = id,
                    step = %existing.current_step,
                    status = %existing.status,
                    "resuming workflow"
                );
                existing
            }
            None => {
                tracing::info!(instance = id, start = %self.start, "starting workflow");
                WorkflowState::new(id, self.start.clone(), initial_context)
            }
        };

        loop {
            if state.is_terminal() {
                state.status = if state.current_step == END {
                    WorkflowStatus::Completed
                } else {
                    WorkflowStatus::Failed
                };
                state.touch();
                self.store.save(id, &state)?;
                tracing::info!(instance = id, status = %state.status, "workflow finished");
                return Ok(state);
            }

            let step_name = state.current_step.clone();
            let Some(step) = self.steps.get(&step_name).cloned() else {
                state.status = WorkflowStatus::Failed;
                state.touch();
                self.store.save(id, &state)?;
                tracing::error!(instance = id, step = %step_name, "step is not defined");
                return Err(WorkflowError::MissingStep { step: step_name });
            };

            state.status = WorkflowStatus::Running;
            state.touch();
            self.store.save(id, &state)?;

            let outcome = self
                .retry
                .run(|attempt| self.attempt(step.as_ref(), &state, attempt))
                .await;

            match outcome {
                Ok(next) => {
                    tracing::info!(instance = id, step = %step_name, next = %next.current_step, "step completed");
                    state = next;
                    self.store.save(id, &state)?;
                }
                Err(RetryExhausted { attempts, error }) => {
                    state.status = WorkflowStatus::Failed;
                    state.touch();
                    self.store.save(id, &state)?;
                    tracing::error!(
                        instance = id,
                        step = %step_name,
                        attempts,
                        error = %format!("{error:#}"),
                        "step failed"
                    );
                    return Err(WorkflowError::StepFailed {
                        step: step_name,
                        attempts,
                        source: error,
                    });
                }
            }
        }
    }

    /// One attempt on a copy of `state`; the copy is returned already
    /// pointing at the next step.
    async fn attempt(&self, step: &dyn Step, state: &WorkflowState, attempt: u32) -> anyhow::Result<WorkflowState> {
        let mut draft = state.clone();
        let logger = StepLogger::new(&draft.instance_id, step.name());
        if attempt > 1 {
            logger.info(&format!("attempt {attempt}"));
        }

        let rt = RuntimeContext {
            llm: self.llm.clone(),
            http: self.http.clone(),
            logger,
            inputs: draft.ports.resolve(&step.inputs()),
        };
        let output = step.execute(&draft, &rt).await?;

        draft.ports.record(step.name(), output.ports);
        draft.merge_context(output.update);
        if let Some(history) = output.conversation_history {
            draft.conversation_history = history;
        }
        draft.touch();

        draft.current_step = step.next(&draft)?;
        Ok(draft)
    }

    pub fn get_state(&self, id: &str) -> Option<WorkflowState> {
        self.store.load(id)
    }

    pub fn delete_workflow(&self, id: &str) -> Result<(), WorkflowError> {
        Ok(self.store.delete(id)?)
    }

    pub fn list_workflows(&self) -> Result<Vec<String>, WorkflowError> {
        Ok(self.store.list()?)
    }
}
