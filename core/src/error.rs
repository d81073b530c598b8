use std::fmt;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Where in a workflow's lifecycle a failure was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    InitialState,
    Render,
    Action,
    Snapshot,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            FailurePhase::InitialState => "initial state",
            FailurePhase::Render => "render",
            FailurePhase::Action => "action",
            FailurePhase::Snapshot => "snapshot",
        };
        f.write_str(phase)
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("child workflow {identity} was declared more than once in a single render pass")]
    DuplicateChild { identity: String },

    #[error("worker {identity} was declared more than once in a single render pass")]
    DuplicateWorker { identity: String },

    #[error("{phase} failed in workflow {identity}")]
    Workflow {
        identity: String,
        phase: FailurePhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid tree snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("props stream completed before emitting an initial value")]
    NoInitialProps,

    #[error("workflow runtime cancelled")]
    Cancelled(#[source] anyhow::Error),

    #[error("internal runtime error: {0}")]
    Internal(&'static str),
}

impl RuntimeError {
    pub fn workflow(
        identity: impl fmt::Display,
        phase: FailurePhase,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        RuntimeError::Workflow {
            identity: identity.to_string(),
            phase,
            source: source.into(),
        }
    }

    /// Contract violations are programming errors in a workflow's render
    /// method, as opposed to failures raised by the state machine itself.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RuntimeError::DuplicateChild { .. } | RuntimeError::DuplicateWorker { .. }
        )
    }

    /// Walks `Workflow` wrappers down to the innermost runtime error, if the
    /// failure originated in the runtime rather than in user code.
    pub fn root_cause(&self) -> &RuntimeError {
        let mut current = self;
        while let RuntimeError::Workflow { source, .. } = current {
            match source.downcast_ref::<RuntimeError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }
}

/// Rejections returned synchronously by `Sink::send`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error(
        "a sink from render pass {pass} already accepted an action; only one action may be sent per render pass"
    )]
    AlreadyAccepted { pass: u64 },

    #[error(
        "sink from render pass {sink_pass} used during pass {current_pass}; is an old rendering being used?"
    )]
    Stale { sink_pass: u64, current_pass: u64 },

    #[error("sink from render pass {pass} sent to before the render pass finished")]
    DuringRender { pass: u64 },

    #[error("sink used after its workflow was torn down")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot truncated: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("snapshot string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("{0} trailing bytes after tree snapshot")]
    TrailingBytes(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_workflow_failures() {
        let duplicate = RuntimeError::DuplicateChild {
            identity: "Child:a".into(),
        };
        let inner = RuntimeError::workflow("Child:", FailurePhase::Render, duplicate);
        let outer = RuntimeError::workflow("Root:", FailurePhase::Render, inner);

        assert!(!outer.is_contract_violation());
        assert!(outer.root_cause().is_contract_violation());
        assert_eq!(outer.to_string(), "render failed in workflow Root:");
    }

    #[test]
    fn test_root_cause_stops_at_user_errors() {
        let err = RuntimeError::workflow("Root:", FailurePhase::Action, anyhow::anyhow!("boom"));
        assert!(matches!(err.root_cause(), RuntimeError::Workflow { .. }));
    }
}
