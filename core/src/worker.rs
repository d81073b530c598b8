//! Workers: asynchronous units of work declared by a workflow's render pass.
//!
//! A worker describes work; the runtime decides when to start and cancel it.
//! Declaring an equivalent worker on consecutive passes keeps the running
//! instance alive.

use crate::identity::short_type_name;
use futures_util::stream::BoxStream;

/// An asynchronous producer of outputs.
///
/// `run` is called once, during the render pass that first declares the
/// worker. The stream ends when the work is finished; an `Err` item is a
/// terminal failure.
pub trait Worker: Send + Sync + 'static {
    type Output: Send + 'static;

    fn run(&self) -> BoxStream<'static, anyhow::Result<Self::Output>>;

    /// Whether a newly declared worker of the same type and key may keep the
    /// already running instance. Defaults to `true`.
    fn does_same_work_as(&self, _other: &Self) -> bool {
        true
    }

    fn describe(&self) -> String {
        short_type_name::<Self>()
    }
}

/// Everything a worker can report to the workflow that declared it.
#[derive(Debug)]
pub enum WorkerEvent<T> {
    Output(T),
    /// The worker's stream completed.
    Finished,
    /// The worker's stream yielded an error. No further events follow.
    Failed(anyhow::Error),
}

impl<T> WorkerEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Output(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, op: F) -> WorkerEvent<U> {
        match self {
            WorkerEvent::Output(value) => WorkerEvent::Output(op(value)),
            WorkerEvent::Finished => WorkerEvent::Finished,
            WorkerEvent::Failed(err) => WorkerEvent::Failed(err),
        }
    }

    pub fn output(self) -> Option<T> {
        match self {
            WorkerEvent::Output(value) => Some(value),
            _ => None,
        }
    }
}
