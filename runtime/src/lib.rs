//! # Dendrite Runtime
//!
//! Runs trees of [`Workflow`]s on tokio: render passes, child reuse, worker
//! lifecycles, ordered update races and the host-facing runtime loop.

pub mod context;
pub mod executor;
pub mod node;
pub mod recording;
pub mod select;
mod subtree;
mod workers;
pub mod workflow;

pub use context::{EventHandler, RenderContext, Sink};
pub use executor::{
    OutputStream, RenderingAndSnapshot, RenderingStream, SessionHandle, SharedError, WorkflowHost,
    WorkflowSession,
};
pub use node::{NodeEnv, Update, WorkflowNode};
pub use recording::RenderRecording;
pub use workflow::{Stateless, StatelessWorkflow, Workflow};

pub mod prelude {
    pub use crate::context::{EventHandler, RenderContext, Sink};
    pub use crate::executor::{RenderingAndSnapshot, WorkflowHost, WorkflowSession};
    pub use crate::workflow::{Stateless, StatelessWorkflow, Workflow};
}
