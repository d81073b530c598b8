//! # Dendrite Core
//!
//! Executor-agnostic building blocks for hierarchical workflow trees:
//! actions, workers, identities, snapshots, diagnostics and configuration.

pub mod action;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod identity;
pub mod schematic;
pub mod snapshot;
pub mod telemetry;
pub mod timeline;
pub mod worker;

pub use action::Action;
pub use config::{ConfigError, DiagnosticsMode, RuntimeConfig};
pub use diagnostic::{ChainedListener, Diagnostics, WorkflowDiagnosticListener};
pub use error::{FailurePhase, RuntimeError, RuntimeResult, SinkError, SnapshotError};
pub use identity::{Identity, SnapshotKey};
pub use schematic::{WorkerSchematic, WorkflowSchematic};
pub use snapshot::{ParsedTreeSnapshot, Snapshot, SnapshotBufMutExt, SnapshotReader, TreeSnapshot};
pub use telemetry::TracingListener;
pub use timeline::{DiagnosticEvent, RecordingListener, Timeline};
pub use worker::{Worker, WorkerEvent};

pub mod prelude {
    pub use crate::action::Action;
    pub use crate::config::RuntimeConfig;
    pub use crate::diagnostic::WorkflowDiagnosticListener;
    pub use crate::error::{RuntimeError, SinkError};
    pub use crate::snapshot::{Snapshot, SnapshotBufMutExt};
    pub use crate::worker::{Worker, WorkerEvent};
}
