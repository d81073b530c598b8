//! # Workflow Node
//!
//! A [`WorkflowNode`] runs one workflow: it owns the state, the children
//! declared by the last render pass and the workers they started.
//!
//! ## Lifecycle
//!
//! * **render**: synchronous; declares children and workers, never mutates
//!   state.
//! * **tick**: waits for the next update from the node's own sink, a child,
//!   or a worker (in that order), then applies it.
//! * **snapshot**: serializes state and children lazily.
//! * **cancel**: tears the subtree down, awaiting every worker task.

use crate::context::{RenderContext, SinkChannel};
use crate::subtree::SubtreeManager;
use crate::workers::WorkerSet;
use crate::workflow::Workflow;
use bytes::Bytes;
use dendrite_core::action::Action;
use dendrite_core::config::RuntimeConfig;
use dendrite_core::diagnostic::{Diagnostics, WorkflowDiagnosticListener};
use dendrite_core::error::{FailurePhase, RuntimeError};
use dendrite_core::identity::Identity;
use dendrite_core::schematic::WorkflowSchematic;
use dendrite_core::snapshot::{ParsedTreeSnapshot, Snapshot, TreeSnapshot};
use std::future::poll_fn;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::task::JoinHandle;

/// Settings shared by every node of one tree.
#[derive(Debug, Clone)]
pub struct NodeEnv {
    pub diagnostics: Diagnostics,
    pub worker_buffer: usize,
}

impl NodeEnv {
    pub fn new(config: &RuntimeConfig, diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            worker_buffer: config.worker_buffer.max(1),
        }
    }

    pub fn with_listener(listener: Arc<dyn WorkflowDiagnosticListener>) -> Self {
        Self {
            diagnostics: Diagnostics::new(Some(listener)),
            ..Self::default()
        }
    }
}

impl Default for NodeEnv {
    fn default() -> Self {
        Self {
            diagnostics: Diagnostics::disabled(),
            worker_buffer: 1,
        }
    }
}

/// What a node's tick race produced.
#[derive(Debug)]
pub enum Update<S, O> {
    /// An action to apply to this node.
    Action(Action<S, O>),
    /// A descendant changed without producing anything for this node.
    Advanced,
}

pub struct WorkflowNode<W: Workflow> {
    identity: Identity,
    workflow: W,
    props: W::Props,
    state: W::State,
    subtree: SubtreeManager<W::State, W::Output>,
    workers: WorkerSet<W::State, W::Output>,
    sink: Arc<SinkChannel<W::State, W::Output>>,
    env: NodeEnv,
    workflow_id: u64,
    is_root: bool,
    rendered: bool,
    stopped: bool,
}

impl<W: Workflow> WorkflowNode<W> {
    /// Creates a root node, restoring from `snapshot` when one is given.
    pub fn new(
        workflow: W,
        props: W::Props,
        snapshot: Option<&Snapshot>,
        env: NodeEnv,
    ) -> Result<Self, RuntimeError> {
        Self::create(
            Identity::of::<W>("").with_persisted_name(workflow.persisted_type_name()),
            workflow,
            props,
            snapshot.map(Snapshot::bytes),
            None,
            env,
        )
    }

    pub(crate) fn create(
        identity: Identity,
        workflow: W,
        props: W::Props,
        snapshot: Option<Bytes>,
        parent_id: Option<u64>,
        env: NodeEnv,
    ) -> Result<Self, RuntimeError> {
        let parsed = match snapshot {
            Some(bytes) => TreeSnapshot::parse(bytes)?,
            None => ParsedTreeSnapshot::default(),
        };
        let restored = parsed.root.is_some() || !parsed.children.is_empty();
        let root_snapshot = parsed.root.map(Snapshot::of);

        let state = workflow
            .initial_state(&props, root_snapshot.as_ref())
            .map_err(|e| RuntimeError::workflow(&identity, FailurePhase::InitialState, e))?;

        let workflow_id = env.diagnostics.next_id();
        let mut subtree = SubtreeManager::new(workflow_id, env.clone());
        subtree.restore(parsed.children);
        let workers = WorkerSet::new(workflow_id, env.clone());
        let sink = Arc::new(SinkChannel::new(workflow_id, env.diagnostics.clone()));

        env.diagnostics.emit(|l| {
            l.on_workflow_started(
                workflow_id,
                parent_id,
                &identity.short_name(),
                identity.key(),
                restored,
            )
        });
        tracing::debug!(%identity, workflow_id, restored, "Workflow node created");

        Ok(Self {
            identity,
            workflow,
            props,
            state,
            subtree,
            workers,
            sink,
            env,
            workflow_id,
            is_root: parent_id.is_none(),
            rendered: false,
            stopped: false,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn workflow_id(&self) -> u64 {
        self.workflow_id
    }

    pub fn state(&self) -> &W::State {
        &self.state
    }

    pub fn props(&self) -> &W::Props {
        &self.props
    }

    /// Renders with new props. After the first render, the props-changed
    /// hook runs before `render`.
    pub fn render(
        &mut self,
        workflow: &W,
        props: W::Props,
    ) -> Result<(W::Rendering, WorkflowSchematic), RuntimeError> {
        self.render_pass(workflow, Some(props))
    }

    /// Renders again with the current props.
    pub fn rerender(&mut self, workflow: &W) -> Result<(W::Rendering, WorkflowSchematic), RuntimeError> {
        self.render_pass(workflow, None)
    }

    pub(crate) fn render_pass(
        &mut self,
        workflow: &W,
        props: Option<W::Props>,
    ) -> Result<(W::Rendering, WorkflowSchematic), RuntimeError> {
        self.workflow = workflow.clone();
        if let Some(props) = props {
            if self.rendered {
                self.workflow
                    .on_props_changed(&self.props, &props, &mut self.state);
                let changed = (!self.is_root).then_some(self.workflow_id);
                self.env.diagnostics.emit(|l| l.on_props_changed(changed));
            }
            self.props = props;
        }
        self.rendered = true;

        let pass = self.sink.begin_pass();
        self.env
            .diagnostics
            .emit(|l| l.on_before_workflow_rendered(self.workflow_id));

        let result = {
            let mut ctx = RenderContext::new(&mut self.subtree, &mut self.workers, &self.sink, pass);
            self.workflow.render(&self.props, &self.state, &mut ctx)
        };
        self.sink.end_pass();
        self.subtree.commit();
        self.workers.commit();
        let schematic = self.schematic();

        self.env
            .diagnostics
            .emit(|l| l.on_after_workflow_rendered(self.workflow_id));

        let rendering =
            result.map_err(|e| RuntimeError::workflow(&self.identity, FailurePhase::Render, e))?;
        Ok((rendering, schematic))
    }

    fn schematic(&mut self) -> WorkflowSchematic {
        WorkflowSchematic {
            workflow_id: self.workflow_id,
            workflow_type: self.identity.short_name(),
            key: self.identity.key().to_string(),
            workers: self.workers.schematics(),
            children: self.subtree.take_schematics(),
        }
    }

    /// Waits for the next update without applying it.
    pub async fn next_update(&mut self) -> Result<Update<W::State, W::Output>, RuntimeError> {
        poll_fn(|cx| self.poll_next_update(cx)).await
    }

    pub(crate) fn poll_next_update(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Update<W::State, W::Output>, RuntimeError>> {
        // Torn-down work must finish before anything else is observed.
        let workers_settled = self.workers.poll_retired(cx).is_ready();
        let children_settled = self.subtree.poll_retired(cx).is_ready();
        if !(workers_settled && children_settled) {
            return Poll::Pending;
        }

        if let Poll::Ready(action) = self.sink.poll_take(cx) {
            return Poll::Ready(Ok(Update::Action(action)));
        }
        if let Poll::Ready(update) = self.subtree.poll_next_update(cx) {
            return Poll::Ready(update);
        }
        self.workers
            .poll_next_action(cx)
            .map(|action| Ok(Update::Action(action)))
    }

    /// Applies `action` to the state and returns its output, if any.
    pub fn apply_action(
        &mut self,
        action: Action<W::State, W::Output>,
    ) -> Result<Option<W::Output>, RuntimeError> {
        let name = self
            .env
            .diagnostics
            .is_enabled()
            .then(|| action.name().to_string());
        tracing::trace!(workflow = %self.identity, action = action.name(), "Applying action");

        let output = action
            .apply_in_place(&mut self.state)
            .map_err(|e| RuntimeError::workflow(&self.identity, FailurePhase::Action, e))?;

        if let Some(name) = name {
            let emitted = output.is_some();
            self.env
                .diagnostics
                .emit(|l| l.on_action_applied(self.workflow_id, &name, emitted));
        }
        Ok(output)
    }

    /// Waits for one update and applies it. `Ok(None)` means something in the
    /// subtree changed but there is no output for the parent.
    pub async fn tick(&mut self) -> Result<Option<W::Output>, RuntimeError> {
        poll_fn(|cx| self.poll_tick(cx)).await
    }

    pub(crate) fn poll_tick(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<W::Output>, RuntimeError>> {
        let result = match ready!(self.poll_next_update(cx)) {
            Ok(Update::Action(action)) => self.apply_action(action),
            Ok(Update::Advanced) => Ok(None),
            Err(error) => Err(error),
        };
        Poll::Ready(result)
    }

    /// Snapshot of this node and its children. Bytes are produced on read.
    pub fn snapshot(&self) -> Result<Snapshot, RuntimeError> {
        let root = self
            .workflow
            .snapshot_state(&self.state)
            .map_err(|e| RuntimeError::workflow(&self.identity, FailurePhase::Snapshot, e))?;
        let children = self.subtree.child_snapshots()?;
        Ok(TreeSnapshot::new(root, children).into_snapshot())
    }

    /// Stops the subtree and collects the aborted worker tasks.
    pub(crate) fn shutdown(&mut self, graveyard: &mut Vec<JoinHandle<()>>) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.sink.close();
        self.workers.shutdown(graveyard);
        self.subtree.shutdown(graveyard);
        self.env
            .diagnostics
            .emit(|l| l.on_workflow_stopped(self.workflow_id));
        tracing::debug!(workflow = %self.identity, workflow_id = self.workflow_id, "Workflow node stopped");
    }

    /// Tears down the whole subtree and waits for every worker task to end.
    pub async fn cancel(mut self) {
        let mut graveyard = Vec::new();
        self.shutdown(&mut graveyard);
        for task in graveyard {
            let _ = task.await;
        }
    }
}

impl<W: Workflow> Drop for WorkflowNode<W> {
    fn drop(&mut self) {
        if !self.stopped {
            // Aborted tasks finish on their own; nobody is left to await them.
            let mut graveyard = Vec::new();
            self.shutdown(&mut graveyard);
        }
    }
}
