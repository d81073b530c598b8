//! # Render Context
//!
//! The handle a workflow receives while it renders. Through it the workflow
//! declares children and workers and obtains sinks for later events.
//!
//! A context borrows its node mutably for exactly one render pass, so it
//! cannot outlive the pass. Sinks handed out during a pass can: they share
//! one slot per pass that accepts a single action, and stop accepting as soon
//! as a newer pass begins.

use crate::recording::Stubs;
use crate::subtree::SubtreeManager;
use crate::workers::{WorkerHandler, WorkerSet};
use crate::workflow::Workflow;
use dendrite_core::action::Action;
use dendrite_core::diagnostic::Diagnostics;
use dendrite_core::error::{RuntimeError, SinkError};
use dendrite_core::worker::{Worker, WorkerEvent};
use futures_util::task::AtomicWaker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

pub struct RenderContext<'a, S, O> {
    declarations: Declarations<'a, S, O>,
    sink: &'a Arc<SinkChannel<S, O>>,
    pass: u64,
}

/// Where declarations go: a live node, or a recording that only notes them.
enum Declarations<'a, S, O> {
    Node {
        subtree: &'a mut SubtreeManager<S, O>,
        workers: &'a mut WorkerSet<S, O>,
    },
    Recorded(&'a mut Stubs<S, O>),
}

impl<'a, S: Send + 'static, O: Send + 'static> RenderContext<'a, S, O> {
    pub(crate) fn new(
        subtree: &'a mut SubtreeManager<S, O>,
        workers: &'a mut WorkerSet<S, O>,
        sink: &'a Arc<SinkChannel<S, O>>,
        pass: u64,
    ) -> Self {
        Self {
            declarations: Declarations::Node { subtree, workers },
            sink,
            pass,
        }
    }

    pub(crate) fn recorded(stubs: &'a mut Stubs<S, O>, sink: &'a Arc<SinkChannel<S, O>>, pass: u64) -> Self {
        Self {
            declarations: Declarations::Recorded(stubs),
            sink,
            pass,
        }
    }

    /// The render pass this context belongs to. Starts at 1 for a new node.
    pub fn render_pass(&self) -> u64 {
        self.pass
    }

    /// Renders `child` as part of this pass and returns its rendering.
    ///
    /// A child previously declared with the same type and `key` is reused and
    /// receives `props` through its props-changed hook; otherwise a new node
    /// is created. `handler` translates the child's outputs into actions for
    /// this workflow and replaces the handler of earlier passes.
    pub fn declare_child<C, H>(
        &mut self,
        child: &C,
        props: C::Props,
        key: &str,
        handler: H,
    ) -> Result<C::Rendering, RuntimeError>
    where
        C: Workflow,
        H: Fn(C::Output) -> Action<S, O> + Send + 'static,
    {
        match &mut self.declarations {
            Declarations::Node { subtree, .. } => subtree.declare(child, props, key, handler),
            Declarations::Recorded(stubs) => stubs.declare_child::<C, H>(props, key, handler),
        }
    }

    /// Ensures `worker` is running. Its outputs are mapped through `handler`;
    /// completion is silent and a failure fails the workflow.
    pub fn declare_work<W, H>(&mut self, worker: W, key: &str, handler: H) -> Result<(), RuntimeError>
    where
        W: Worker,
        H: Fn(W::Output) -> Action<S, O> + Send + 'static,
    {
        let worker_key = key.to_string();
        let handler: WorkerHandler<W::Output, S, O> = Box::new(move |event| match event {
            WorkerEvent::Output(value) => Some(handler(value)),
            WorkerEvent::Finished => None,
            WorkerEvent::Failed(error) => {
                Some(Action::fail(error.context(format!("worker '{worker_key}' failed"))))
            }
        });
        self.declare_worker(worker, key, handler)
    }

    /// Like [`RenderContext::declare_work`], but `handler` also sees the
    /// terminal `Finished` and `Failed` events.
    pub fn declare_work_until_finished<W, H>(
        &mut self,
        worker: W,
        key: &str,
        handler: H,
    ) -> Result<(), RuntimeError>
    where
        W: Worker,
        H: Fn(WorkerEvent<W::Output>) -> Action<S, O> + Send + 'static,
    {
        self.declare_worker(worker, key, Box::new(move |event| Some(handler(event))))
    }

    fn declare_worker<W: Worker>(
        &mut self,
        worker: W,
        key: &str,
        handler: WorkerHandler<W::Output, S, O>,
    ) -> Result<(), RuntimeError> {
        match &mut self.declarations {
            Declarations::Node { workers, .. } => workers.declare(worker, key, handler),
            Declarations::Recorded(stubs) => stubs.declare_worker(worker, key, handler),
        }
    }

    pub fn make_action_sink(&self) -> Sink<S, O> {
        Sink {
            channel: self.sink.clone(),
            pass: self.pass,
        }
    }

    /// Event callback for renderings: each event becomes an action sent
    /// through this pass's sink.
    pub fn event_handler<E, F>(&self, f: F) -> EventHandler<E>
    where
        E: 'static,
        F: Fn(E) -> Action<S, O> + Send + Sync + 'static,
    {
        self.make_action_sink().contramap(f)
    }
}

impl<S, O> fmt::Debug for RenderContext<'_, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext").field("pass", &self.pass).finish()
    }
}

/// Accepts at most one action for the node that created it, and only while
/// the render pass it came from is the node's latest.
pub struct Sink<S, O> {
    channel: Arc<SinkChannel<S, O>>,
    pass: u64,
}

impl<S: Send + 'static, O: Send + 'static> Sink<S, O> {
    pub fn send(&self, action: Action<S, O>) -> Result<(), SinkError> {
        self.channel.offer(self.pass, action)
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn contramap<E, F>(self, f: F) -> EventHandler<E>
    where
        E: 'static,
        F: Fn(E) -> Action<S, O> + Send + Sync + 'static,
    {
        EventHandler {
            handler: Arc::new(move |event| self.send(f(event))),
        }
    }
}

impl<S, O> Clone for Sink<S, O> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            pass: self.pass,
        }
    }
}

impl<S, O> fmt::Debug for Sink<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("workflow_id", &self.channel.workflow_id)
            .field("pass", &self.pass)
            .finish()
    }
}

/// A type-erased event callback bound to one render pass.
pub struct EventHandler<E> {
    handler: Arc<dyn Fn(E) -> Result<(), SinkError> + Send + Sync>,
}

impl<E> EventHandler<E> {
    pub fn handle(&self, event: E) -> Result<(), SinkError> {
        (self.handler)(event)
    }
}

impl<E> Clone for EventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<E> fmt::Debug for EventHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler")
    }
}

/// Per-node queue behind every sink the node hands out.
pub(crate) struct SinkChannel<S, O> {
    state: Mutex<SinkState<S, O>>,
    waker: AtomicWaker,
    workflow_id: u64,
    diagnostics: Diagnostics,
}

struct SinkState<S, O> {
    pass: u64,
    rendering: bool,
    accepted: bool,
    closed: bool,
    queue: VecDeque<Action<S, O>>,
}

impl<S: 'static, O: 'static> SinkChannel<S, O> {
    pub(crate) fn new(workflow_id: u64, diagnostics: Diagnostics) -> Self {
        Self {
            state: Mutex::new(SinkState {
                pass: 0,
                rendering: false,
                accepted: false,
                closed: false,
                queue: VecDeque::new(),
            }),
            waker: AtomicWaker::new(),
            workflow_id,
            diagnostics,
        }
    }

    /// Starts a new render pass, invalidating sinks from earlier passes.
    /// Actions they already sent stay queued. Sinks of the new pass reject
    /// sends until [`SinkChannel::end_pass`].
    pub(crate) fn begin_pass(&self) -> u64 {
        let mut state = self.state.lock();
        state.pass += 1;
        state.rendering = true;
        state.accepted = false;
        state.pass
    }

    pub(crate) fn end_pass(&self) {
        self.state.lock().rendering = false;
    }

    fn offer(&self, pass: u64, action: Action<S, O>) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SinkError::Closed);
            }
            if pass != state.pass {
                return Err(SinkError::Stale {
                    sink_pass: pass,
                    current_pass: state.pass,
                });
            }
            if state.rendering {
                return Err(SinkError::DuringRender { pass });
            }
            if state.accepted {
                return Err(SinkError::AlreadyAccepted { pass });
            }
            state.accepted = true;
        }

        self.diagnostics
            .emit(|l| l.on_sink_received(self.workflow_id, action.name()));
        self.state.lock().queue.push_back(action);
        self.waker.wake();
        Ok(())
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Action<S, O>> {
        self.waker.register(cx.waker());
        match self.state.lock().queue.pop_front() {
            Some(action) => Poll::Ready(action),
            None => Poll::Pending,
        }
    }

    pub(crate) fn drain(&self) -> Vec<Action<S, O>> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Rejects all further sends and discards queued actions.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.clear();
    }
}
