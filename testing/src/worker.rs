use crate::tester::TestError;
use dendrite_core::worker::Worker;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::mpsc;

/// Counts how often a worker was started and how often its stream was
/// dropped, whether by completion or cancellation.
#[derive(Debug, Clone, Default)]
pub struct WorkerProbe {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl WorkerProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.starts() > self.stops()
    }

    /// Wraps `events` so the probe sees it start now and stop when dropped.
    pub fn watch<T: Send + 'static>(&self, events: BoxStream<'static, T>) -> BoxStream<'static, T> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let guard = StopGuard(self.stops.clone());
        let mut events = events;
        stream::poll_fn(move |cx| {
            let _held = &guard;
            events.poll_next_unpin(cx)
        })
        .boxed()
    }
}

struct StopGuard(Arc<AtomicUsize>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A worker driven step by step from the test through its [`WorkerScript`].
///
/// Clones share the script, so a workflow can hold the worker and redeclare
/// it each pass. Only the first run reads the script; later runs wait forever.
pub struct ScriptedWorker<T> {
    script: Arc<Mutex<Option<mpsc::UnboundedReceiver<anyhow::Result<T>>>>>,
    probe: WorkerProbe,
}

/// The test's end of a [`ScriptedWorker`].
pub struct WorkerScript<T> {
    tx: Option<mpsc::UnboundedSender<anyhow::Result<T>>>,
}

impl<T: Send + 'static> ScriptedWorker<T> {
    pub fn new() -> (Self, WorkerScript<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(Some(rx))),
                probe: WorkerProbe::new(),
            },
            WorkerScript { tx: Some(tx) },
        )
    }

    pub fn probe(&self) -> &WorkerProbe {
        &self.probe
    }
}

impl<T> Clone for ScriptedWorker<T> {
    fn clone(&self) -> Self {
        Self {
            script: self.script.clone(),
            probe: self.probe.clone(),
        }
    }
}

impl<T: Send + 'static> Worker for ScriptedWorker<T> {
    type Output = T;

    fn run(&self) -> BoxStream<'static, anyhow::Result<T>> {
        let events = match self.script.lock().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                let item = rx.recv().await?;
                Some((item, rx))
            })
            .boxed(),
            None => stream::poll_fn(|_| Poll::Pending).boxed(),
        };
        self.probe.watch(events)
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.script, &other.script)
    }

    fn describe(&self) -> String {
        "ScriptedWorker".to_string()
    }
}

impl<T> WorkerScript<T> {
    /// Queues an output. Returns `false` once the script is closed or the
    /// worker was cancelled.
    pub fn emit(&self, value: T) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(Ok(value)).is_ok())
    }

    /// Queues a failure and closes the script.
    pub fn fail(&mut self, error: impl Into<anyhow::Error>) -> bool {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(Err(error.into())).is_ok());
        self.tx = None;
        sent
    }

    /// Ends the worker's stream after the queued outputs.
    pub fn finish(&mut self) {
        self.tx = None;
    }
}

/// Runs one worker outside any workflow and reads its stream with timeouts.
pub struct WorkerTester<T> {
    events: BoxStream<'static, anyhow::Result<T>>,
    timeout: Duration,
}

impl<T: Send + 'static> WorkerTester<T> {
    pub fn start<K: Worker<Output = T>>(worker: &K) -> Self {
        Self {
            events: worker.run(),
            timeout: Duration::from_secs(1),
        }
    }

    /// How long `next_*` and `assert_finished` wait. Defaults to one second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn next_output(&mut self) -> Result<T, TestError> {
        match tokio::time::timeout(self.timeout, self.events.next()).await {
            Err(_) => Err(TestError::Timeout(self.timeout, "a worker output")),
            Ok(None) => Err(TestError::Closed("worker")),
            Ok(Some(Err(error))) => Err(TestError::Failed(error)),
            Ok(Some(Ok(output))) => Ok(output),
        }
    }

    /// Waits for the worker to fail and returns the error.
    pub async fn next_failure(&mut self) -> Result<anyhow::Error, TestError> {
        match tokio::time::timeout(self.timeout, self.events.next()).await {
            Err(_) => Err(TestError::Timeout(self.timeout, "a worker failure")),
            Ok(None) => Err(TestError::Closed("worker")),
            Ok(Some(Err(error))) => Ok(error),
            Ok(Some(Ok(_))) => Err(TestError::Unexpected("worker output")),
        }
    }

    /// Fails if an output or failure arrives within `within`. A worker that
    /// finishes quietly passes.
    pub async fn assert_no_output(&mut self, within: Duration) -> Result<(), TestError> {
        match tokio::time::timeout(within, self.events.next()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(Err(error))) => Err(TestError::Failed(error)),
            Ok(Some(Ok(_))) => Err(TestError::Unexpected("worker output")),
        }
    }

    /// Expects the stream to end with nothing further emitted.
    pub async fn assert_finished(&mut self) -> Result<(), TestError> {
        match tokio::time::timeout(self.timeout, self.events.next()).await {
            Err(_) => Err(TestError::Timeout(self.timeout, "the worker to finish")),
            Ok(None) => Ok(()),
            Ok(Some(Err(error))) => Err(TestError::Failed(error)),
            Ok(Some(Ok(_))) => Err(TestError::Unexpected("worker output")),
        }
    }

    /// Drops the stream, as a runtime does when the worker is no longer declared.
    pub fn cancel(self) {
        drop(self.events);
    }
}
