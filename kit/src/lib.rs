//! Dendrite facade crate.
//!
//! Re-exports the core, runtime and std crates behind a single entry point.
//! Start a tree with [`WorkflowHost`].

pub use dendrite_core as core;
pub use dendrite_runtime as runtime;
#[cfg(feature = "std")]
pub use dendrite_std as std;

pub use dendrite_core::{
    Action, RuntimeConfig, RuntimeError, SinkError, Snapshot, Worker, WorkerEvent,
    WorkflowDiagnosticListener,
};
pub use dendrite_runtime::{
    RenderContext, RenderingAndSnapshot, Sink, Stateless, StatelessWorkflow, Workflow, WorkflowHost,
    WorkflowSession,
};

pub mod prelude {
    pub use dendrite_core::prelude::*;
    pub use dendrite_runtime::prelude::*;
    #[cfg(feature = "std")]
    pub use dendrite_std::prelude::*;
}
