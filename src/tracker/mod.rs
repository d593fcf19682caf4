pub mod client;
pub mod error;
pub mod types;

pub use client::{GitHubClient, Tracker};
pub use error::TrackerError;
pub use types::{DependencyRef, IssueRef, IssueState, ProjectRef, WorkItem};
