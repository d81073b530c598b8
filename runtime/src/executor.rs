//! # Executor: the runtime loop
//!
//! [`WorkflowHost`] launches a root workflow on a tokio task and hands back a
//! [`WorkflowSession`]:
//!
//! * `renderings` always holds the latest rendering with its snapshot. A new
//!   subscriber sees the current value first.
//! * `outputs` carries the root's outputs once each. The loop waits for
//!   capacity before it continues, so outputs are never dropped.
//! * `handle` cancels the loop. Dropping it cancels as well.
//!
//! The loop: render, snapshot, publish, deliver the pending output, then race
//! cancellation against new props and the root's next tick.

use crate::node::{NodeEnv, WorkflowNode};
use crate::workflow::Workflow;
use dendrite_core::config::{DiagnosticsMode, RuntimeConfig};
use dendrite_core::diagnostic::{ChainedListener, Diagnostics, WorkflowDiagnosticListener};
use dendrite_core::error::RuntimeError;
use dendrite_core::identity::short_type_name;
use dendrite_core::snapshot::Snapshot;
use dendrite_core::telemetry::TracingListener;
use futures_core::Stream;
use futures_util::future::FutureExt;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// A failure shared by both host streams.
pub type SharedError = Arc<RuntimeError>;

type FailureCell = Arc<OnceLock<SharedError>>;

/// One published state of the tree.
#[derive(Debug, Clone)]
pub struct RenderingAndSnapshot<R> {
    pub rendering: R,
    pub snapshot: Snapshot,
}

pub struct WorkflowHost<W: Workflow> {
    workflow: W,
    config: RuntimeConfig,
    listener: Option<Arc<dyn WorkflowDiagnosticListener>>,
    snapshot: Option<Snapshot>,
}

impl<W> WorkflowHost<W>
where
    W: Workflow,
    W::Rendering: Clone + Sync,
{
    pub fn new(workflow: W) -> Self {
        Self {
            workflow,
            config: RuntimeConfig::default(),
            listener: None,
            snapshot: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn WorkflowDiagnosticListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Restores the tree from a snapshot published by an earlier session.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    fn diagnostics(&mut self) -> Diagnostics {
        let listener = match (self.config.diagnostics, self.listener.take()) {
            (DiagnosticsMode::Off, listener) => listener,
            (DiagnosticsMode::Tracing, None) => {
                Some(Arc::new(TracingListener) as Arc<dyn WorkflowDiagnosticListener>)
            }
            (DiagnosticsMode::Tracing, Some(user)) => Some(Arc::new(
                ChainedListener::new().with(Arc::new(TracingListener)).with(user),
            ) as Arc<dyn WorkflowDiagnosticListener>),
        };
        Diagnostics::new(listener)
    }

    /// Starts the runtime with a single, fixed props value.
    pub fn launch_with_props(self, props: W::Props) -> WorkflowSession<W::Rendering, W::Output> {
        self.launch(stream::once(std::future::ready(props)))
    }

    /// Starts the runtime. The first item of `props` is the root's initial
    /// props; every later item triggers a render pass. When the stream ends
    /// the last props stay in effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch<P>(mut self, props: P) -> WorkflowSession<W::Rendering, W::Output>
    where
        P: Stream<Item = W::Props> + Send + 'static,
    {
        let diagnostics = self.diagnostics();
        let env = NodeEnv::new(&self.config, diagnostics);
        let session_id = Uuid::new_v4();
        let failure: FailureCell = Arc::new(OnceLock::new());
        let (rendering_tx, rendering_rx) = watch::channel(None);
        let (output_tx, output_rx) = mpsc::channel(self.config.output_buffer.max(1));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let span = tracing::info_span!(
            "WorkflowRuntime",
            dendrite.workflow = %short_type_name::<W>(),
            dendrite.session = %session_id,
        );
        let runtime = RuntimeLoop {
            workflow: self.workflow,
            env,
            renderings: rendering_tx,
            outputs: output_tx,
            failure: failure.clone(),
        };
        let task = tokio::spawn(
            runtime
                .run(props.boxed(), self.snapshot, cancel_rx)
                .instrument(span),
        );

        WorkflowSession {
            renderings: RenderingStream {
                rx: rendering_rx,
                failure: failure.clone(),
                replay_pending: true,
                finished: false,
            },
            outputs: OutputStream {
                rx: output_rx,
                failure: failure.clone(),
                finished: false,
            },
            handle: SessionHandle {
                session_id,
                cancel: Some(cancel_tx),
                task: Some(task),
                failure,
            },
        }
    }
}

pub struct WorkflowSession<R, O> {
    pub renderings: RenderingStream<R>,
    pub outputs: OutputStream<O>,
    pub handle: SessionHandle,
}

/// Latest-value stream of renderings.
///
/// Intermediate renderings are skipped when the reader falls behind. After
/// the runtime stops, the stream yields the runtime's failure once, if there
/// was one, and then ends.
pub struct RenderingStream<R> {
    rx: watch::Receiver<Option<RenderingAndSnapshot<R>>>,
    failure: FailureCell,
    replay_pending: bool,
    finished: bool,
}

impl<R: Clone + Send + Sync + 'static> RenderingStream<R> {
    pub async fn next(&mut self) -> Option<Result<RenderingAndSnapshot<R>, SharedError>> {
        if self.replay_pending {
            self.replay_pending = false;
            if let Some(current) = self.rx.borrow_and_update().clone() {
                return Some(Ok(current));
            }
        }
        loop {
            if self.rx.changed().await.is_err() {
                if self.finished {
                    return None;
                }
                self.finished = true;
                return self.failure.get().cloned().map(Err);
            }
            if let Some(current) = self.rx.borrow_and_update().clone() {
                return Some(Ok(current));
            }
        }
    }

    /// The most recent rendering, without waiting.
    pub fn latest(&self) -> Option<RenderingAndSnapshot<R>> {
        self.rx.borrow().clone()
    }

    /// A new reader that starts from the current rendering.
    pub fn subscribe(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            failure: self.failure.clone(),
            replay_pending: true,
            finished: false,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<RenderingAndSnapshot<R>, SharedError>> {
        stream::unfold(self, |mut renderings| async move {
            let item = renderings.next().await?;
            Some((item, renderings))
        })
    }
}

impl<R: Clone + Send + Sync + 'static> Clone for RenderingStream<R> {
    fn clone(&self) -> Self {
        self.subscribe()
    }
}

/// The root's outputs, each delivered once.
pub struct OutputStream<O> {
    rx: mpsc::Receiver<O>,
    failure: FailureCell,
    finished: bool,
}

impl<O> Stream for OutputStream<O> {
    type Item = Result<O, SharedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(output)) => Poll::Ready(Some(Ok(output))),
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(this.failure.get().cloned().map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Controls a running session.
pub struct SessionHandle {
    session_id: Uuid,
    cancel: Option<oneshot::Sender<Option<anyhow::Error>>>,
    task: Option<JoinHandle<()>>,
    failure: FailureCell,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the runtime; both streams end without error.
    pub fn cancel(mut self) {
        self.signal(None);
    }

    /// Stops the runtime; both streams end with [`RuntimeError::Cancelled`].
    pub fn cancel_with(mut self, cause: impl Into<anyhow::Error>) {
        self.signal(Some(cause.into()));
    }

    /// Waits for the runtime to stop on its own and reports how it ended.
    pub async fn join(mut self) -> Result<(), SharedError> {
        if let Some(task) = self.task.take()
            && task.await.is_err()
        {
            return Err(Arc::new(RuntimeError::Internal("runtime task was aborted")));
        }
        match self.failure.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn signal(&mut self, cause: Option<anyhow::Error>) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(cause);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.signal(None);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .finish()
    }
}

type CancelSignal = oneshot::Receiver<Option<anyhow::Error>>;

/// How the loop ended when nothing failed.
enum Stop {
    Cancelled,
}

fn cancelled(signal: Result<Option<anyhow::Error>, oneshot::error::RecvError>) -> Result<Stop, RuntimeError> {
    match signal {
        Ok(Some(cause)) => Err(RuntimeError::Cancelled(cause)),
        // An explicit cancel, or the handle was dropped.
        Ok(None) | Err(_) => Ok(Stop::Cancelled),
    }
}

struct RuntimeLoop<W: Workflow> {
    workflow: W,
    env: NodeEnv,
    renderings: watch::Sender<Option<RenderingAndSnapshot<W::Rendering>>>,
    outputs: mpsc::Sender<W::Output>,
    failure: FailureCell,
}

impl<W> RuntimeLoop<W>
where
    W: Workflow,
    W::Rendering: Clone + Sync,
{
    async fn run(
        mut self,
        props: BoxStream<'static, W::Props>,
        snapshot: Option<Snapshot>,
        cancel: CancelSignal,
    ) {
        let workflow_type = short_type_name::<W>();
        self.env
            .diagnostics
            .emit(|l| l.on_runtime_started(&workflow_type));
        tracing::debug!(restored = snapshot.is_some(), "Runtime started");

        let result = AssertUnwindSafe(self.drive(props, snapshot, cancel))
            .catch_unwind()
            .await
            .unwrap_or(Err(RuntimeError::Internal("workflow code panicked")));

        match result {
            Ok(Stop::Cancelled) => tracing::debug!("Runtime cancelled"),
            Err(error) => {
                if matches!(error, RuntimeError::Cancelled(_)) {
                    tracing::debug!(%error, "Runtime cancelled with a cause");
                } else {
                    tracing::error!(%error, "Runtime failed");
                }
                let _ = self.failure.set(Arc::new(error));
            }
        }
        self.env.diagnostics.emit(|l| l.on_runtime_stopped());
        // Dropping `self` closes both streams after the failure is recorded.
    }

    async fn drive(
        &mut self,
        mut props: BoxStream<'static, W::Props>,
        snapshot: Option<Snapshot>,
        mut cancel: CancelSignal,
    ) -> Result<Stop, RuntimeError> {
        let initial = tokio::select! {
            biased;
            signal = &mut cancel => return cancelled(signal),
            first = props.next() => first.ok_or(RuntimeError::NoInitialProps)?,
        };

        let mut root = WorkflowNode::new(
            self.workflow.clone(),
            initial,
            snapshot.as_ref(),
            self.env.clone(),
        )?;
        let result = self.serve(&mut root, props, &mut cancel).await;
        root.cancel().await;
        result
    }

    async fn serve(
        &mut self,
        root: &mut WorkflowNode<W>,
        mut props: BoxStream<'static, W::Props>,
        cancel: &mut CancelSignal,
    ) -> Result<Stop, RuntimeError> {
        let diagnostics = &self.env.diagnostics;
        let mut props_open = true;
        let mut next_props = None;
        let mut pending_output = None;

        loop {
            diagnostics.emit(|l| l.on_before_render_pass());
            let (rendering, schematic) = root.render_pass(&self.workflow, next_props.take())?;
            diagnostics.emit(|l| l.on_after_render_pass());
            tracing::trace!(tree = %schematic, "Render pass complete");

            diagnostics.emit(|l| l.on_before_snapshot_pass());
            let snapshot = root.snapshot()?;
            diagnostics.emit(|l| l.on_after_snapshot_pass());

            self.renderings
                .send_replace(Some(RenderingAndSnapshot { rendering, snapshot }));

            if let Some(output) = pending_output.take() {
                tokio::select! {
                    biased;
                    signal = &mut *cancel => return cancelled(signal),
                    sent = self.outputs.send(output) => {
                        if sent.is_err() {
                            tracing::trace!("Output dropped, nobody is listening");
                        }
                    }
                }
            }

            loop {
                tokio::select! {
                    biased;
                    signal = &mut *cancel => return cancelled(signal),
                    update = props.next(), if props_open => match update {
                        Some(update) => {
                            next_props = Some(update);
                            break;
                        }
                        None => {
                            props_open = false;
                            tracing::debug!("Props stream ended, keeping the last props");
                        }
                    },
                    tick = root.tick() => {
                        pending_output = tick?;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderContext;
    use dendrite_core::action::Action;
    use dendrite_core::snapshot::TreeSnapshot;
    use dendrite_core::timeline::{DiagnosticEvent, RecordingListener};
    use dendrite_core::worker::Worker;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Emits whatever the test pushes into the paired sender.
    #[derive(Clone)]
    struct Feed(Arc<Mutex<Option<mpsc::UnboundedReceiver<u32>>>>);

    fn feed() -> (Feed, mpsc::UnboundedSender<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Feed(Arc::new(Mutex::new(Some(rx)))), tx)
    }

    impl Worker for Feed {
        type Output = u32;

        fn run(&self) -> BoxStream<'static, anyhow::Result<u32>> {
            match self.0.lock().take() {
                Some(rx) => stream::unfold(rx, |mut rx| async move {
                    let value = rx.recv().await?;
                    Some((Ok(value), rx))
                })
                .boxed(),
                None => stream::empty().boxed(),
            }
        }
    }

    /// Renders its state; emits values at or above `props`; fails on zero.
    #[derive(Clone)]
    struct Counter {
        feed: Feed,
    }

    impl Workflow for Counter {
        type Props = u32;
        type State = u32;
        type Output = u32;
        type Rendering = String;

        fn initial_state(&self, _props: &u32, snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
            match snapshot {
                Some(snapshot) => Ok(snapshot.reader().read_u32()?),
                None => Ok(0),
            }
        }

        fn render(&self, props: &u32, state: &u32, ctx: &mut RenderContext<'_, u32, u32>) -> anyhow::Result<String> {
            let threshold = *props;
            ctx.declare_work(self.feed.clone(), "feed", move |value| {
                Action::try_new("count", move |state: &mut u32| {
                    anyhow::ensure!(value != 0, "zero is not a count");
                    *state = value;
                    Ok((value >= threshold).then_some(value))
                })
            })?;
            Ok(state.to_string())
        }

        fn snapshot_state(&self, state: &u32) -> anyhow::Result<Snapshot> {
            Ok(Snapshot::of_u32(*state))
        }
    }

    async fn next_text(renderings: &mut RenderingStream<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), renderings.next())
            .await
            .expect("rendering in time")
            .expect("stream open")
            .expect("no failure")
            .rendering
    }

    async fn assert_quiet(renderings: &mut RenderingStream<String>) {
        let next = tokio::time::timeout(Duration::from_millis(50), renderings.next()).await;
        assert!(next.is_err(), "unexpected rendering");
    }

    #[tokio::test]
    async fn test_counting_worker_renders_each_value_and_no_outputs() {
        let (feed, tx) = feed();
        let WorkflowSession {
            mut renderings,
            mut outputs,
            handle,
        } = WorkflowHost::new(Counter { feed }).launch_with_props(u32::MAX);

        assert_eq!(next_text(&mut renderings).await, "0");
        for n in 1..=3 {
            tx.send(n).unwrap();
            assert_eq!(next_text(&mut renderings).await, n.to_string());
        }
        drop(tx);
        assert_quiet(&mut renderings).await;

        handle.cancel();
        assert!(outputs.next().await.is_none());
        assert!(renderings.next().await.is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_rendering() {
        let (feed, tx) = feed();
        let session = WorkflowHost::new(Counter { feed }).launch_with_props(u32::MAX);
        let mut renderings = session.renderings;
        next_text(&mut renderings).await;
        tx.send(7).unwrap();
        assert_eq!(next_text(&mut renderings).await, "7");

        let mut late = renderings.subscribe();
        assert_eq!(next_text(&mut late).await, "7");
        assert_eq!(renderings.latest().unwrap().rendering, "7");
        let published = TreeSnapshot::parse(renderings.latest().unwrap().snapshot.bytes()).unwrap();
        assert_eq!(published.root, Some(Snapshot::of_u32(7).bytes()));
        session.handle.cancel();
    }

    #[tokio::test]
    async fn test_outputs_are_delivered_in_order_with_buffer_of_one() {
        let (feed, tx) = feed();
        let session = WorkflowHost::new(Counter { feed })
            .with_config(RuntimeConfig::default().with_output_buffer(1))
            .launch_with_props(2);
        let mut outputs = session.outputs;

        for n in [1, 2, 3, 4] {
            tx.send(n).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(outputs.next().await.unwrap().unwrap());
        }
        assert_eq!(seen, vec![2, 3, 4]);
        session.handle.cancel();
    }

    #[tokio::test]
    async fn test_new_props_rerender_and_closed_props_keep_last() {
        let (feed, tx) = feed();
        let (props_tx, props_rx) = mpsc::unbounded_channel();
        let props = stream::unfold(props_rx, |mut rx| async move {
            let props = rx.recv().await?;
            Some((props, rx))
        });
        let WorkflowSession {
            mut renderings,
            mut outputs,
            handle,
        } = WorkflowHost::new(Counter { feed }).launch(props);

        props_tx.send(10).unwrap();
        assert_eq!(next_text(&mut renderings).await, "0");
        props_tx.send(1).unwrap();
        assert_eq!(next_text(&mut renderings).await, "0");
        drop(props_tx);
        assert_quiet(&mut renderings).await;

        tx.send(5).unwrap();
        assert_eq!(next_text(&mut renderings).await, "5");
        assert_eq!(outputs.next().await.unwrap().unwrap(), 5);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_missing_initial_props_fails_both_streams() {
        let (feed, _tx) = feed();
        let WorkflowSession {
            mut renderings,
            mut outputs,
            handle,
        } = WorkflowHost::new(Counter { feed }).launch(stream::empty());

        let failure = renderings.next().await.unwrap().unwrap_err();
        assert!(matches!(*failure, RuntimeError::NoInitialProps));
        assert!(renderings.next().await.is_none());
        assert!(matches!(
            *outputs.next().await.unwrap().unwrap_err(),
            RuntimeError::NoInitialProps
        ));
        assert!(matches!(*handle.join().await.unwrap_err(), RuntimeError::NoInitialProps));
    }

    #[tokio::test]
    async fn test_cancel_with_cause_fails_both_streams() {
        let (feed, _tx) = feed();
        let WorkflowSession {
            mut renderings,
            mut outputs,
            handle,
        } = WorkflowHost::new(Counter { feed }).launch_with_props(0);
        next_text(&mut renderings).await;

        handle.cancel_with(anyhow::anyhow!("host shutting down"));
        let failure = renderings.next().await.unwrap().unwrap_err();
        assert!(matches!(*failure, RuntimeError::Cancelled(_)));
        assert!(matches!(*outputs.next().await.unwrap().unwrap_err(), RuntimeError::Cancelled(_)));
        assert!(outputs.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_action_fails_both_streams_and_stops_workers() {
        let listener = Arc::new(RecordingListener::new());
        let (feed, tx) = feed();
        let WorkflowSession {
            mut renderings,
            mut outputs,
            handle,
        } = WorkflowHost::new(Counter { feed })
            .with_listener(listener.clone())
            .launch_with_props(0);
        next_text(&mut renderings).await;

        tx.send(0).unwrap();
        let failure = renderings.next().await.unwrap().unwrap_err();
        assert!(failure.to_string().contains("Counter"));
        assert!(outputs.next().await.unwrap().is_err());
        assert!(handle.join().await.is_err());

        let stopped = listener.count(|e| matches!(e, DiagnosticEvent::WorkerStopped { .. }));
        assert_eq!(stopped, 1);
        assert_eq!(listener.count(|e| *e == DiagnosticEvent::RuntimeStopped), 1);
    }

    #[tokio::test]
    async fn test_restores_from_published_snapshot() {
        let (first, tx) = feed();
        let session = WorkflowHost::new(Counter { feed: first }).launch_with_props(u32::MAX);
        let mut renderings = session.renderings;
        next_text(&mut renderings).await;
        tx.send(42).unwrap();
        next_text(&mut renderings).await;
        let snapshot = renderings.latest().unwrap().snapshot;
        session.handle.cancel();

        let (second, _tx) = feed();
        let restored = WorkflowHost::new(Counter { feed: second })
            .with_snapshot(Snapshot::of(snapshot.bytes()))
            .launch_with_props(u32::MAX);
        let mut renderings = restored.renderings;
        assert_eq!(next_text(&mut renderings).await, "42");
        restored.handle.cancel();
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_runtime() {
        let (feed, _tx) = feed();
        let session = WorkflowHost::new(Counter { feed }).launch_with_props(0);
        let mut renderings = session.renderings;
        next_text(&mut renderings).await;
        drop(session.handle);
        assert!(renderings.next().await.is_none());
    }
}
