//! Dependency-aware selection of the next batch of work items.

pub mod graph;
pub mod matrix;
pub mod orchestrator;
pub mod parser;
pub mod priority;

#[cfg(test)]
pub(crate) mod testing;

pub use graph::{CycleInfo, DagNode, DependencyGraph, GraphBuilder, Hierarchy, ItemStatus, ResolvedItem};
pub use matrix::{MatrixEntry, MatrixOutput};
pub use orchestrator::{DispatchOptions, DispatchResult, Dispatcher, ItemSource};
pub use parser::parse_dependencies;
pub use priority::{Priority, Schedulable, apply_max_concurrent, extract_priority, priority_score, sort_by_priority};
