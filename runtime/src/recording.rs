//! # Recorded render passes
//!
//! A [`RenderRecording`] renders a workflow once without a node behind it.
//! Children return renderings stubbed in advance, workers are noted but never
//! started, and outputs stubbed for either are turned into actions through
//! the handlers the workflow declared. Sinks handed out by the pass work as
//! usual; whatever they accept after the pass is collected with the stubbed
//! actions.
//!
//! This is the seam unit-level render tests are built on.

use crate::context::{RenderContext, SinkChannel};
use crate::workers::WorkerHandler;
use crate::workflow::Workflow;
use dendrite_core::action::Action;
use dendrite_core::diagnostic::Diagnostics;
use dendrite_core::error::{FailurePhase, RuntimeError};
use dendrite_core::identity::Identity;
use dendrite_core::worker::{Worker, WorkerEvent};
use std::any::Any;
use std::sync::Arc;

type Erased = Box<dyn Any + Send>;

/// A child declared during a recorded pass.
pub struct ChildDeclaration {
    pub identity: Identity,
    props: Erased,
}

impl ChildDeclaration {
    pub fn props<P: 'static>(&self) -> Option<&P> {
        self.props.downcast_ref()
    }
}

/// A worker declared during a recorded pass.
pub struct WorkerDeclaration {
    pub identity: Identity,
    pub description: String,
    worker: Erased,
}

impl WorkerDeclaration {
    pub fn worker<W: Worker>(&self) -> Option<&W> {
        self.worker.downcast_ref()
    }
}

struct ChildStub {
    identity: Identity,
    rendering: Option<Erased>,
    output: Option<Erased>,
}

struct WorkerStub {
    identity: Identity,
    output: Option<Erased>,
    used: bool,
}

/// Stubs and declarations of one recording.
pub(crate) struct Stubs<S, O> {
    children: Vec<ChildStub>,
    workers: Vec<WorkerStub>,
    declared_children: Vec<ChildDeclaration>,
    declared_workers: Vec<WorkerDeclaration>,
    actions: Vec<Action<S, O>>,
}

impl<S: Send + 'static, O: Send + 'static> Stubs<S, O> {
    pub(crate) fn declare_child<C, H>(
        &mut self,
        props: C::Props,
        key: &str,
        handler: H,
    ) -> Result<C::Rendering, RuntimeError>
    where
        C: Workflow,
        H: Fn(C::Output) -> Action<S, O> + Send + 'static,
    {
        let identity = Identity::of::<C>(key);
        if self.declared_children.iter().any(|d| d.identity == identity) {
            return Err(RuntimeError::DuplicateChild {
                identity: identity.to_string(),
            });
        }

        let Some(stub) = self
            .children
            .iter_mut()
            .find(|stub| stub.identity == identity && stub.rendering.is_some())
        else {
            let error = anyhow::anyhow!("child {identity} was declared but no rendering is stubbed for it");
            return Err(RuntimeError::workflow(&identity, FailurePhase::Render, error));
        };

        let rendering = stub
            .rendering
            .take()
            .and_then(|rendering| rendering.downcast::<C::Rendering>().ok())
            .ok_or(RuntimeError::Internal("stubbed rendering does not match its child type"))?;
        if let Some(output) = stub.output.take() {
            let output = output
                .downcast::<C::Output>()
                .map_err(|_| RuntimeError::Internal("stubbed output does not match its child type"))?;
            self.actions.push(handler(*output));
        }

        self.declared_children.push(ChildDeclaration {
            identity,
            props: Box::new(props),
        });
        Ok(*rendering)
    }

    pub(crate) fn declare_worker<W: Worker>(
        &mut self,
        worker: W,
        key: &str,
        handler: WorkerHandler<W::Output, S, O>,
    ) -> Result<(), RuntimeError> {
        let identity = Identity::of::<W>(key);
        if self.declared_workers.iter().any(|d| d.identity == identity) {
            return Err(RuntimeError::DuplicateWorker {
                identity: identity.to_string(),
            });
        }

        if let Some(stub) = self.workers.iter_mut().find(|stub| stub.identity == identity) {
            stub.used = true;
            if let Some(output) = stub.output.take() {
                let output = output
                    .downcast::<W::Output>()
                    .map_err(|_| RuntimeError::Internal("stubbed output does not match its worker type"))?;
                self.actions.extend(handler(WorkerEvent::Output(*output)));
            }
        }

        self.declared_workers.push(WorkerDeclaration {
            identity,
            description: worker.describe(),
            worker: Box::new(worker),
        });
        Ok(())
    }
}

/// Renders workflows against stubbed children and workers.
pub struct RenderRecording<S, O> {
    stubs: Stubs<S, O>,
    sink: Arc<SinkChannel<S, O>>,
}

impl<S: Send + 'static, O: Send + 'static> RenderRecording<S, O> {
    pub fn new() -> Self {
        Self {
            stubs: Stubs {
                children: Vec::new(),
                workers: Vec::new(),
                declared_children: Vec::new(),
                declared_workers: Vec::new(),
                actions: Vec::new(),
            },
            sink: Arc::new(SinkChannel::new(0, Diagnostics::disabled())),
        }
    }

    /// Declaring a `C` under `key` returns `rendering`. With `output`, the
    /// declaring handler's action for it is recorded.
    pub fn stub_child<C: Workflow>(&mut self, key: &str, rendering: C::Rendering, output: Option<C::Output>) {
        self.stubs.children.push(ChildStub {
            identity: Identity::of::<C>(key),
            rendering: Some(Box::new(rendering)),
            output: output.map(|output| Box::new(output) as Erased),
        });
    }

    /// Declaring a `W` under `key` is expected. With `output`, the declaring
    /// handler's action for it is recorded.
    pub fn stub_worker<W: Worker>(&mut self, key: &str, output: Option<W::Output>) {
        self.stubs.workers.push(WorkerStub {
            identity: Identity::of::<W>(key),
            output: output.map(|output| Box::new(output) as Erased),
            used: false,
        });
    }

    pub fn render<W>(&mut self, workflow: &W, props: &W::Props, state: &S) -> anyhow::Result<W::Rendering>
    where
        W: Workflow<State = S, Output = O>,
    {
        let pass = self.sink.begin_pass();
        let result = {
            let mut ctx = RenderContext::recorded(&mut self.stubs, &self.sink, pass);
            workflow.render(props, state, &mut ctx)
        };
        self.sink.end_pass();
        result
    }

    pub fn children(&self) -> &[ChildDeclaration] {
        &self.stubs.declared_children
    }

    pub fn workers(&self) -> &[WorkerDeclaration] {
        &self.stubs.declared_workers
    }

    /// Stubbed children and workers that no render declared.
    pub fn unused_stubs(&self) -> Vec<&Identity> {
        let children = self
            .stubs
            .children
            .iter()
            .filter(|stub| stub.rendering.is_some())
            .map(|stub| &stub.identity);
        let workers = self
            .stubs
            .workers
            .iter()
            .filter(|stub| !stub.used)
            .map(|stub| &stub.identity);
        children.chain(workers).collect()
    }

    /// Declared workers that have no stub.
    pub fn unexpected_workers(&self) -> Vec<&WorkerDeclaration> {
        self.stubs
            .declared_workers
            .iter()
            .filter(|declared| !self.stubs.workers.iter().any(|stub| stub.identity == declared.identity))
            .collect()
    }

    /// Actions from stubbed outputs, then actions accepted by the pass's
    /// sinks, oldest first.
    pub fn take_actions(&mut self) -> Vec<Action<S, O>> {
        let mut actions = std::mem::take(&mut self.stubs.actions);
        actions.extend(self.sink.drain());
        actions
    }
}

impl<S: Send + 'static, O: Send + 'static> Default for RenderRecording<S, O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventHandler;
    use crate::workflow::{Stateless, StatelessWorkflow};
    use dendrite_core::snapshot::Snapshot;
    use futures_util::stream::{self, BoxStream, StreamExt};

    #[derive(Clone)]
    struct Ticker;

    impl Worker for Ticker {
        type Output = u32;

        fn run(&self) -> BoxStream<'static, anyhow::Result<u32>> {
            stream::empty().boxed()
        }
    }

    #[derive(Clone)]
    struct Badge;

    impl StatelessWorkflow for Badge {
        type Props = u32;
        type Output = String;
        type Rendering = String;

        fn render(&self, props: &u32, _ctx: &mut RenderContext<'_, (), String>) -> anyhow::Result<String> {
            Ok(format!("#{props}"))
        }
    }

    #[derive(Clone)]
    struct Board;

    impl Workflow for Board {
        type Props = Vec<&'static str>;
        type State = u32;
        type Output = String;
        type Rendering = (Vec<String>, EventHandler<u32>);

        fn initial_state(&self, _props: &Self::Props, _snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
            Ok(0)
        }

        fn render(
            &self,
            props: &Self::Props,
            state: &u32,
            ctx: &mut RenderContext<'_, u32, String>,
        ) -> anyhow::Result<Self::Rendering> {
            let mut badges = Vec::new();
            for key in props {
                badges.push(ctx.declare_child(&Stateless(Badge), *state, key, |label| Action::emit(label))?);
            }
            ctx.declare_work(Ticker, "tick", |n| Action::set_state(n))?;
            Ok((badges, ctx.event_handler(Action::set_state)))
        }
    }

    #[test]
    fn test_stubbed_children_render_and_outputs_become_actions() {
        let mut recording = RenderRecording::new();
        recording.stub_child::<Stateless<Badge>>("a", "A".to_string(), None);
        recording.stub_child::<Stateless<Badge>>("b", "B".to_string(), Some("clicked".to_string()));
        recording.stub_worker::<Ticker>("tick", Some(3));

        let (badges, set) = recording.render(&Board, &vec!["a", "b"], &7).unwrap();
        assert_eq!(badges, vec!["A", "B"]);
        assert_eq!(recording.children()[1].props::<u32>(), Some(&7));
        assert_eq!(recording.workers()[0].description, "Ticker");
        assert!(recording.unused_stubs().is_empty());
        assert!(recording.unexpected_workers().is_empty());

        set.handle(11).unwrap();
        let outputs: Vec<_> = recording
            .take_actions()
            .into_iter()
            .map(|action| action.apply(0).unwrap())
            .collect();
        assert_eq!(outputs, vec![(0, Some("clicked".to_string())), (3, None), (11, None)]);
    }

    #[test]
    fn test_unstubbed_and_duplicate_children_fail_render() {
        let mut recording = RenderRecording::new();
        recording.stub_child::<Stateless<Badge>>("a", "A".to_string(), None);
        let err = recording.render(&Board, &vec!["a", "z"], &0).err().unwrap();
        assert!(err.to_string().contains("Stateless<Badge>:z"));

        let mut recording = RenderRecording::new();
        recording.stub_child::<Stateless<Badge>>("a", "A".to_string(), None);
        recording.stub_child::<Stateless<Badge>>("a", "A".to_string(), None);
        let err = recording.render(&Board, &vec!["a", "a"], &0).err().unwrap();
        let runtime = err.downcast_ref::<RuntimeError>().unwrap();
        assert!(matches!(runtime, RuntimeError::DuplicateChild { .. }));
    }

    #[test]
    fn test_unstubbed_worker_is_reported() {
        let mut recording = RenderRecording::new();
        recording.render(&Board, &vec![], &0).unwrap();
        let unexpected = recording.unexpected_workers();
        assert_eq!(unexpected.len(), 1);
        assert!(unexpected[0].worker::<Ticker>().is_some());
    }
}
