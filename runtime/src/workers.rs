//! Worker lifecycle for one workflow node.
//!
//! Each declared worker runs as its own tokio task that pumps the worker's
//! stream into a bounded channel. The node polls those channels during its
//! tick. Workers carried over from the previous pass keep their task and
//! channel; workers no longer declared are aborted when the pass commits.

use crate::node::NodeEnv;
use crate::select::{Contender, poll_first};
use dendrite_core::action::Action;
use dendrite_core::diagnostic::Diagnostics;
use dendrite_core::error::RuntimeError;
use dendrite_core::identity::Identity;
use dendrite_core::schematic::WorkerSchematic;
use dendrite_core::worker::{Worker, WorkerEvent};
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Maps a worker event to an action; `None` means the event needs no action.
pub(crate) type WorkerHandler<T, S, O> = Box<dyn Fn(WorkerEvent<T>) -> Option<Action<S, O>> + Send>;

pub(crate) trait WorkerSlot<S, O>: Send {
    fn identity(&self) -> &Identity;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn poll_action(&mut self, cx: &mut Context<'_>) -> Poll<Action<S, O>>;
    fn stop(&mut self, graveyard: &mut Vec<JoinHandle<()>>);
    fn schematic(&self) -> WorkerSchematic;
}

impl<S, O> Contender for dyn WorkerSlot<S, O> {
    type Output = Action<S, O>;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<Action<S, O>> {
        self.poll_action(cx)
    }
}

struct RunningWorker<W: Worker, S, O> {
    identity: Identity,
    worker: W,
    worker_id: u64,
    description: String,
    events: mpsc::Receiver<WorkerEvent<W::Output>>,
    task: Option<JoinHandle<()>>,
    handler: WorkerHandler<W::Output, S, O>,
    finished: bool,
}

impl<W: Worker, S: Send + 'static, O: Send + 'static> RunningWorker<W, S, O> {
    fn launch(
        identity: Identity,
        worker: W,
        handler: WorkerHandler<W::Output, S, O>,
        workflow_id: u64,
        env: &NodeEnv,
    ) -> Self {
        let worker_id = env.diagnostics.next_id();
        let description = worker.describe();
        env.diagnostics.emit(|l| {
            l.on_worker_started(worker_id, workflow_id, identity.key(), &description)
        });

        let (events_tx, events) = mpsc::channel(env.worker_buffer.max(1));
        let stream = worker.run();
        let notice = StopNotice {
            diagnostics: env.diagnostics.clone(),
            worker_id,
            workflow_id,
        };
        let span = tracing::debug_span!(
            "Worker",
            dendrite.worker = %description,
            key = %identity.key(),
            worker_id,
            workflow_id
        );
        let task = tokio::spawn(pump(stream, events_tx, notice).instrument(span));

        Self {
            identity,
            worker,
            worker_id,
            description,
            events,
            task: Some(task),
            handler,
            finished: false,
        }
    }
}

impl<W: Worker, S: Send + 'static, O: Send + 'static> WorkerSlot<S, O> for RunningWorker<W, S, O> {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn poll_action(&mut self, cx: &mut Context<'_>) -> Poll<Action<S, O>> {
        while !self.finished {
            let event = match self.events.poll_recv(cx) {
                Poll::Ready(Some(event)) => event,
                // The task ended without a terminal event, so it panicked.
                Poll::Ready(None) => {
                    WorkerEvent::Failed(anyhow::anyhow!("worker task ended unexpectedly"))
                }
                Poll::Pending => return Poll::Pending,
            };
            self.finished = event.is_terminal();
            if let Some(action) = (self.handler)(event) {
                return Poll::Ready(action);
            }
        }
        Poll::Pending
    }

    fn stop(&mut self, graveyard: &mut Vec<JoinHandle<()>>) {
        self.finished = true;
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
            graveyard.push(task);
        }
    }

    fn schematic(&self) -> WorkerSchematic {
        WorkerSchematic {
            worker_id: self.worker_id,
            key: self.identity.key().to_string(),
            description: self.description.clone(),
            finished: self.finished,
        }
    }
}

impl<W: Worker, S, O> Drop for RunningWorker<W, S, O> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reports the worker as stopped however its task ends, aborts included.
struct StopNotice {
    diagnostics: Diagnostics,
    worker_id: u64,
    workflow_id: u64,
}

impl Drop for StopNotice {
    fn drop(&mut self) {
        self.diagnostics
            .emit(|l| l.on_worker_stopped(self.worker_id, self.workflow_id));
    }
}

async fn pump<T: Send + 'static>(
    mut stream: BoxStream<'static, anyhow::Result<T>>,
    events: mpsc::Sender<WorkerEvent<T>>,
    notice: StopNotice,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => {
                notice
                    .diagnostics
                    .emit(|l| l.on_worker_output(notice.worker_id, notice.workflow_id));
                if events.send(WorkerEvent::Output(value)).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Worker failed");
                let _ = events.send(WorkerEvent::Failed(error)).await;
                return;
            }
        }
    }
    tracing::trace!("Worker finished");
    let _ = events.send(WorkerEvent::Finished).await;
}

/// The workers of one node: `active` from the last committed pass and
/// `staging` for the pass being rendered.
pub(crate) struct WorkerSet<S, O> {
    active: Vec<Box<dyn WorkerSlot<S, O>>>,
    staging: Vec<Box<dyn WorkerSlot<S, O>>>,
    retiring: Vec<JoinHandle<()>>,
    workflow_id: u64,
    env: NodeEnv,
}

impl<S: Send + 'static, O: Send + 'static> WorkerSet<S, O> {
    pub(crate) fn new(workflow_id: u64, env: NodeEnv) -> Self {
        Self {
            active: Vec::new(),
            staging: Vec::new(),
            retiring: Vec::new(),
            workflow_id,
            env,
        }
    }

    pub(crate) fn declare<W: Worker>(
        &mut self,
        worker: W,
        key: &str,
        handler: WorkerHandler<W::Output, S, O>,
    ) -> Result<(), RuntimeError> {
        let identity = Identity::of::<W>(key);
        let same_work = |slot: &Box<dyn WorkerSlot<S, O>>| {
            slot.identity() == &identity
                && slot
                    .as_any()
                    .downcast_ref::<RunningWorker<W, S, O>>()
                    .is_some_and(|running| running.worker.does_same_work_as(&worker))
        };

        if self.staging.iter().any(|slot| slot.identity() == &identity) {
            return Err(RuntimeError::DuplicateWorker {
                identity: identity.to_string(),
            });
        }

        if let Some(index) = self.active.iter().position(same_work) {
            let mut slot = self.active.remove(index);
            if let Some(running) = slot.as_any_mut().downcast_mut::<RunningWorker<W, S, O>>() {
                running.handler = handler;
            }
            self.staging.push(slot);
            return Ok(());
        }

        let running = RunningWorker::launch(identity, worker, handler, self.workflow_id, &self.env);
        self.staging.push(Box::new(running));
        Ok(())
    }

    /// Ends the render pass: workers not redeclared are aborted.
    pub(crate) fn commit(&mut self) {
        for mut slot in self.active.drain(..) {
            slot.stop(&mut self.retiring);
        }
        self.active = std::mem::take(&mut self.staging);
    }

    /// Ready once every aborted worker task has completed.
    pub(crate) fn poll_retired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.retiring.retain_mut(|task| task.poll_unpin(cx).is_pending());
        if self.retiring.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// First action produced by a worker, in declaration order.
    pub(crate) fn poll_next_action(&mut self, cx: &mut Context<'_>) -> Poll<Action<S, O>> {
        poll_first(self.active.iter_mut(), cx).map(|(_, action)| action)
    }

    pub(crate) fn schematics(&self) -> Vec<WorkerSchematic> {
        self.active.iter().map(|slot| slot.schematic()).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn shutdown(&mut self, graveyard: &mut Vec<JoinHandle<()>>) {
        for mut slot in self.active.drain(..).chain(self.staging.drain(..)) {
            slot.stop(graveyard);
        }
        graveyard.append(&mut self.retiring);
    }
}
