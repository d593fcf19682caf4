use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::tracker::TrackerError;

/// Closed set of dispatch failure kinds, surfaced to callers and CI logs as
/// stable upper-case codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailed,
    RateLimited,
    NotFound,
    ApiError,
    ParseError,
    InvalidConfig,
    CycleDetected,
    IoError,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
            ErrorKind::CycleDetected => "CYCLE_DETECTED",
            ErrorKind::IoError => "IO_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised only with `DispatchOptions::fail_on_cycle`.
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Tracker(e) => match e {
                TrackerError::Unauthorized { .. } => ErrorKind::AuthFailed,
                TrackerError::RateLimited { .. } => ErrorKind::RateLimited,
                TrackerError::NotFound { .. } => ErrorKind::NotFound,
                TrackerError::Parse(_) => ErrorKind::ParseError,
                TrackerError::Api { .. } | TrackerError::Network(_) => ErrorKind::ApiError,
            },
            DispatchError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            DispatchError::CycleDetected(_) => ErrorKind::CycleDetected,
            DispatchError::Json(_) => ErrorKind::ParseError,
            DispatchError::Io(_) => ErrorKind::IoError,
        }
    }
}

/// Failures of the on-disk workflow state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize workflow state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The current step name has no registered definition. Never retried.
    #[error("step '{step}' is not defined in this workflow")]
    MissingStep { step: String },

    #[error("step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures loading a workflow definition file.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read workflow file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported workflow file {} (expected .toml or .json)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid TOML workflow: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON workflow: {0}")]
    Json(#[from] serde_json::Error),

    #[error("workflow '{name}' is invalid: {}", errors.join("; "))]
    Invalid { name: String, errors: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_are_stable() {
        assert_eq!(ErrorKind::InvalidConfig.to_string(), "INVALID_CONFIG");
        assert_eq!(ErrorKind::RateLimited.code(), "RATE_LIMITED");
    }

    #[test]
    fn tracker_errors_map_to_kinds() {
        let auth = DispatchError::from(TrackerError::Unauthorized {
            status: 401,
            body: String::new(),
        });
        assert_eq!(auth.kind(), ErrorKind::AuthFailed);

        let missing = DispatchError::from(TrackerError::NotFound {
            status: 404,
            body: String::new(),
        });
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let api = DispatchError::from(TrackerError::Api {
            status: 500,
            body: String::new(),
        });
        assert_eq!(api.kind(), ErrorKind::ApiError);
    }

    #[test]
    fn io_and_config_kinds() {
        let io = DispatchError::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::IoError);
        assert_eq!(
            DispatchError::InvalidConfig("missing token".into()).to_string(),
            "invalid configuration: missing token"
        );
    }

    #[test]
    fn step_failed_display_includes_attempts() {
        let err = WorkflowError::StepFailed {
            step: "build".into(),
            attempts: 3,
            source: anyhow::anyhow!("exit status 1"),
        };
        assert_eq!(
            err.to_string(),
            "step 'build' failed after 3 attempt(s): exit status 1"
        );
    }

    #[test]
    fn invalid_definition_lists_every_error() {
        let err = DefinitionError::Invalid {
            name: "ship".into(),
            errors: vec!["start step 'plan' is not defined".into(), "duplicate step 'x'".into()],
        };
        assert_eq!(
            err.to_string(),
            "workflow 'ship' is invalid: start step 'plan' is not defined; duplicate step 'x'"
        );
    }
}
