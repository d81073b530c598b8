use crate::tester::TestError;
use dendrite_core::action::Action;
use dendrite_core::worker::Worker;
use dendrite_runtime::recording::RenderRecording;
use dendrite_runtime::workflow::Workflow;

/// Runs a single render pass of a workflow with its children and workers
/// stubbed out, then checks what the pass declared and which action it
/// produced.
///
/// Every child the workflow declares needs an expectation that supplies its
/// rendering. Declared workers need one too; workers are never started.
pub struct RenderTester<W: Workflow> {
    workflow: W,
    props: W::Props,
    state: W::State,
    recording: RenderRecording<W::State, W::Output>,
}

impl<W: Workflow> RenderTester<W> {
    pub fn new(workflow: W, props: W::Props, state: W::State) -> Self {
        Self {
            workflow,
            props,
            state,
            recording: RenderRecording::new(),
        }
    }

    /// Starts from the state `initial_state` builds for `props`.
    pub fn from_initial_state(workflow: W, props: W::Props) -> Result<Self, TestError> {
        let state = workflow.initial_state(&props, None).map_err(TestError::Render)?;
        Ok(Self::new(workflow, props, state))
    }

    pub fn expect_workflow<C: Workflow>(mut self, key: &str, rendering: C::Rendering) -> Self {
        self.recording.stub_child::<C>(key, rendering, None);
        self
    }

    /// Expects the child and feeds `output` to the handler it is declared with.
    pub fn expect_workflow_output<C: Workflow>(mut self, key: &str, rendering: C::Rendering, output: C::Output) -> Self {
        self.recording.stub_child::<C>(key, rendering, Some(output));
        self
    }

    pub fn expect_worker<K: Worker>(mut self, key: &str) -> Self {
        self.recording.stub_worker::<K>(key, None);
        self
    }

    /// Expects the worker and feeds `output` to the handler it is declared with.
    pub fn expect_worker_output<K: Worker>(mut self, key: &str, output: K::Output) -> Self {
        self.recording.stub_worker::<K>(key, Some(output));
        self
    }

    /// Renders once. Fails if the render fails, an expectation was not
    /// declared, or a worker was declared without an expectation.
    pub fn render(mut self) -> Result<RenderOutcome<W>, TestError> {
        let rendering = self
            .recording
            .render(&self.workflow, &self.props, &self.state)
            .map_err(TestError::Render)?;

        let unused: Vec<String> = self.recording.unused_stubs().iter().map(|id| id.to_string()).collect();
        if !unused.is_empty() {
            return Err(TestError::Expectation(format!(
                "expected declarations were not made: {}",
                unused.join(", ")
            )));
        }
        let unexpected: Vec<String> = self
            .recording
            .unexpected_workers()
            .iter()
            .map(|declared| declared.identity.to_string())
            .collect();
        if !unexpected.is_empty() {
            return Err(TestError::Expectation(format!(
                "unexpected workers were declared: {}",
                unexpected.join(", ")
            )));
        }

        Ok(RenderOutcome {
            rendering,
            state: self.state,
            recording: self.recording,
        })
    }
}

/// The result of [`RenderTester::render`].
///
/// Events sent through the rendering's sinks are captured too, so a test can
/// poke the rendering before calling [`RenderOutcome::apply`].
pub struct RenderOutcome<W: Workflow> {
    pub rendering: W::Rendering,
    state: W::State,
    recording: RenderRecording<W::State, W::Output>,
}

impl<W: Workflow> RenderOutcome<W> {
    /// Props the child declared under `key` received.
    pub fn child_props<C: Workflow>(&self, key: &str) -> Option<&C::Props> {
        self.recording
            .children()
            .iter()
            .find(|declared| declared.identity.type_id() == std::any::TypeId::of::<C>() && declared.identity.key() == key)
            .and_then(|declared| declared.props::<C::Props>())
    }

    /// The worker declared under `key`.
    pub fn worker<K: Worker>(&self, key: &str) -> Option<&K> {
        self.recording
            .workers()
            .iter()
            .filter(|declared| declared.identity.key() == key)
            .find_map(|declared| declared.worker::<K>())
    }

    /// Takes the one action the pass produced, if any. More than one is an
    /// error, as a node would only accept the first.
    pub fn action(&mut self) -> Result<Option<Action<W::State, W::Output>>, TestError> {
        let mut actions = self.recording.take_actions();
        match actions.len() {
            0 | 1 => Ok(actions.pop()),
            n => Err(TestError::Expectation(format!(
                "expected at most one action, the render pass produced {n}"
            ))),
        }
    }

    /// Applies the pass's action to the state it rendered with.
    pub fn apply(mut self) -> Result<(W::State, Option<W::Output>), TestError> {
        let Some(action) = self.action()? else {
            return Err(TestError::Expectation("the render pass produced no action".into()));
        };
        action.apply(self.state).map_err(TestError::Failed)
    }

    pub fn assert_no_action(mut self) -> Result<(), TestError> {
        match self.action()? {
            None => Ok(()),
            Some(action) => Err(TestError::Expectation(format!(
                "expected no action, got '{}'",
                action.name()
            ))),
        }
    }
}
