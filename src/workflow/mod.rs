//! Resumable, step-wise workflow execution with persisted checkpoints.

pub mod definition;
pub mod engine;
pub mod ports;
pub mod state;
pub mod step;
pub mod steps;
pub mod store;
pub mod transition;

pub use definition::{ValidationReport, WorkflowDefinition};
pub use engine::{RetryPolicy, WorkflowEngine, WorkflowEngineBuilder};
pub use ports::{PortInput, PortSource, PortStore};
pub use state::{Context, END, ERROR, Turn, WorkflowState, WorkflowStatus};
pub use step::{FnStep, RuntimeContext, Step, StepLogger, StepOutput};
pub use steps::{DeclaredStep, StepConfig, StepKind};
pub use store::StateStore;
pub use transition::{Condition, Transition, TransitionSpec};
