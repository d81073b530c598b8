use dendrite_core::config::RuntimeConfig;
use dendrite_core::snapshot::Snapshot;
use dendrite_core::timeline::{DiagnosticEvent, RecordingListener};
use dendrite_runtime::executor::{
    OutputStream, RenderingAndSnapshot, RenderingStream, SessionHandle, SharedError, WorkflowHost,
    WorkflowSession,
};
use dendrite_runtime::workflow::Workflow;
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
    #[error("{0} stream ended")]
    Closed(&'static str),
    #[error("runtime failed: {0}")]
    Runtime(SharedError),
    #[error("expected no {0}, but one arrived")]
    Unexpected(&'static str),
    #[error("render failed: {0:#}")]
    Render(anyhow::Error),
    #[error("{0}")]
    Expectation(String),
    #[error("failed: {0:#}")]
    Failed(anyhow::Error),
}

/// Runs a workflow in a real runtime and reads its streams with timeouts.
///
/// Props are fed through [`WorkflowTester::send_props`]; every runtime
/// notification is recorded and available from [`WorkflowTester::recorder`].
pub struct WorkflowTester<W: Workflow> {
    renderings: RenderingStream<W::Rendering>,
    outputs: OutputStream<W::Output>,
    handle: Option<SessionHandle>,
    props: mpsc::UnboundedSender<W::Props>,
    recorder: Arc<RecordingListener>,
    timeout: Duration,
}

impl<W> WorkflowTester<W>
where
    W: Workflow,
    W::Rendering: Clone + Sync,
{
    pub fn start(workflow: W, props: W::Props) -> Self {
        Self::start_with(workflow, props, RuntimeConfig::default(), None)
    }

    pub fn start_with(
        workflow: W,
        props: W::Props,
        config: RuntimeConfig,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let recorder = Arc::new(RecordingListener::new());
        let (props_tx, props_rx) = mpsc::unbounded_channel();
        let _ = props_tx.send(props);
        let props_stream = stream::unfold(props_rx, |mut rx| async move {
            let props = rx.recv().await?;
            Some((props, rx))
        });

        let mut host = WorkflowHost::new(workflow)
            .with_config(config)
            .with_listener(recorder.clone());
        if let Some(snapshot) = snapshot {
            host = host.with_snapshot(snapshot);
        }
        let WorkflowSession {
            renderings,
            outputs,
            handle,
        } = host.launch(props_stream);

        Self {
            renderings,
            outputs,
            handle: Some(handle),
            props: props_tx,
            recorder,
            timeout: Duration::from_secs(1),
        }
    }

    /// How long `next_*` calls wait. Defaults to one second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn next_rendering(&mut self) -> Result<W::Rendering, TestError> {
        Ok(self.next_rendering_and_snapshot().await?.rendering)
    }

    pub async fn next_rendering_and_snapshot(
        &mut self,
    ) -> Result<RenderingAndSnapshot<W::Rendering>, TestError> {
        match tokio::time::timeout(self.timeout, self.renderings.next()).await {
            Err(_) => Err(TestError::Timeout(self.timeout, "a rendering")),
            Ok(None) => Err(TestError::Closed("rendering")),
            Ok(Some(Err(error))) => Err(TestError::Runtime(error)),
            Ok(Some(Ok(rendering))) => Ok(rendering),
        }
    }

    pub async fn next_output(&mut self) -> Result<W::Output, TestError> {
        match tokio::time::timeout(self.timeout, self.outputs.next()).await {
            Err(_) => Err(TestError::Timeout(self.timeout, "an output")),
            Ok(None) => Err(TestError::Closed("output")),
            Ok(Some(Err(error))) => Err(TestError::Runtime(error)),
            Ok(Some(Ok(output))) => Ok(output),
        }
    }

    /// Waits until the runtime stops and returns its failure.
    pub async fn next_failure(&mut self) -> Result<SharedError, TestError> {
        loop {
            match self.next_rendering_and_snapshot().await {
                Ok(_) => continue,
                Err(TestError::Runtime(error)) => return Ok(error),
                Err(other) => return Err(other),
            }
        }
    }

    /// Fails if a rendering arrives within `within`.
    pub async fn assert_no_rendering(&mut self, within: Duration) -> Result<(), TestError> {
        match tokio::time::timeout(within, self.renderings.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Err(error))) => Err(TestError::Runtime(error)),
            Ok(_) => Err(TestError::Unexpected("rendering")),
        }
    }

    pub async fn assert_no_output(&mut self, within: Duration) -> Result<(), TestError> {
        match tokio::time::timeout(within, self.outputs.next()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(Err(error))) => Err(TestError::Runtime(error)),
            Ok(Some(Ok(_))) => Err(TestError::Unexpected("output")),
        }
    }

    pub fn send_props(&self, props: W::Props) {
        let _ = self.props.send(props);
    }

    pub fn latest(&self) -> Option<RenderingAndSnapshot<W::Rendering>> {
        self.renderings.latest()
    }

    pub fn recorder(&self) -> &RecordingListener {
        &self.recorder
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.recorder.events()
    }

    /// The recorded timeline as pretty JSON, for failure messages.
    pub fn timeline_json(&self) -> String {
        serde_json::to_string_pretty(&self.recorder.timeline()).unwrap_or_default()
    }

    /// Cancels the runtime and drains both streams.
    pub async fn cancel(mut self) -> Result<(), TestError> {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        self.drain().await
    }

    pub async fn cancel_with(mut self, cause: impl Into<anyhow::Error>) -> Result<(), TestError> {
        if let Some(handle) = self.handle.take() {
            handle.cancel_with(cause);
        }
        self.drain().await
    }

    async fn drain(&mut self) -> Result<(), TestError> {
        let mut failure = None;
        while let Some(item) = self.renderings.next().await {
            if let Err(error) = item {
                failure = Some(error);
            }
        }
        while self.outputs.next().await.is_some() {}
        match failure {
            Some(error) => Err(TestError::Runtime(error)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ScriptedWorker;
    use dendrite_core::action::Action;
    use dendrite_runtime::context::RenderContext;

    #[derive(Clone)]
    struct Echo {
        worker: ScriptedWorker<String>,
    }

    impl Workflow for Echo {
        type Props = String;
        type State = Vec<String>;
        type Output = String;
        type Rendering = String;

        fn initial_state(&self, _props: &String, _snapshot: Option<&Snapshot>) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn render(
            &self,
            props: &String,
            state: &Vec<String>,
            ctx: &mut RenderContext<'_, Vec<String>, String>,
        ) -> anyhow::Result<String> {
            let prefix = props.clone();
            ctx.declare_work(self.worker.clone(), "", move |line: String| {
                let echoed = format!("{prefix}{line}");
                Action::new("echo", move |seen: &mut Vec<String>| {
                    seen.push(echoed.clone());
                    Some(echoed)
                })
            })?;
            Ok(state.join(","))
        }
    }

    #[tokio::test]
    async fn test_tester_reads_renderings_and_outputs() {
        let (worker, script) = ScriptedWorker::new();
        let mut tester = WorkflowTester::start(Echo { worker: worker.clone() }, "> ".to_string());
        assert_eq!(tester.next_rendering().await.unwrap(), "");

        tester.send_props("# ".to_string());
        assert_eq!(tester.next_rendering().await.unwrap(), "");
        script.emit("hi".to_string());
        assert_eq!(tester.next_rendering().await.unwrap(), "# hi");
        assert_eq!(tester.next_output().await.unwrap(), "# hi");
        tester.assert_no_output(Duration::from_millis(20)).await.unwrap();

        assert_eq!(worker.probe().starts(), 1);
        assert!(tester.timeline_json().contains("WorkerStarted"));
        tester.cancel().await.unwrap();
        assert!(!worker.probe().is_running());
    }

    #[tokio::test]
    async fn test_cancel_with_cause_reports_failure() {
        let (worker, _script) = ScriptedWorker::<String>::new();
        let mut tester = WorkflowTester::start(Echo { worker }, String::new());
        tester.next_rendering().await.unwrap();
        let result = tester.cancel_with(anyhow::anyhow!("stop")).await;
        assert!(matches!(result, Err(TestError::Runtime(_))));
    }
}
