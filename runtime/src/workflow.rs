use crate::context::RenderContext;
use dendrite_core::snapshot::Snapshot;
use std::any::type_name;
use std::borrow::Cow;

/// A state machine that renders itself and may declare children and workers.
///
/// A workflow value is a description: it is cloned into the node that runs it
/// and replaced by the parent's latest copy on every render pass. Mutable
/// data belongs in `State`, which only actions may change.
pub trait Workflow: Clone + Send + 'static {
    type Props: Send + 'static;
    type State: Send + 'static;
    type Output: Send + 'static;
    type Rendering: Send + 'static;

    /// Creates the state for a new node. `snapshot` holds the bytes produced
    /// by [`Workflow::snapshot_state`] when the node is being restored.
    fn initial_state(
        &self,
        props: &Self::Props,
        snapshot: Option<&Snapshot>,
    ) -> anyhow::Result<Self::State>;

    /// Called on every render pass after the first, before `render`, with the
    /// previous and newly declared props. Invoked even if they are equal.
    fn on_props_changed(&self, _old: &Self::Props, _new: &Self::Props, _state: &mut Self::State) {}

    fn render(
        &self,
        props: &Self::Props,
        state: &Self::State,
        ctx: &mut RenderContext<'_, Self::State, Self::Output>,
    ) -> anyhow::Result<Self::Rendering>;

    /// Serializes `state`. Prefer [`Snapshot::lazy`] or [`Snapshot::write`]
    /// so bytes are only produced when a host reads them.
    fn snapshot_state(&self, _state: &Self::State) -> anyhow::Result<Snapshot> {
        Ok(Snapshot::empty())
    }

    /// The type name a parent's snapshot records for this child. Restoring
    /// matches children by this name and their key.
    ///
    /// Defaults to [`std::any::type_name`], which changes when the type is
    /// moved or renamed and is not guaranteed stable across compiler
    /// versions. Override it for snapshots that outlive a build.
    fn persisted_type_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }
}

/// A workflow without state of its own.
pub trait StatelessWorkflow: Clone + Send + 'static {
    type Props: Send + 'static;
    type Output: Send + 'static;
    type Rendering: Send + 'static;

    fn render(
        &self,
        props: &Self::Props,
        ctx: &mut RenderContext<'_, (), Self::Output>,
    ) -> anyhow::Result<Self::Rendering>;

    /// See [`Workflow::persisted_type_name`].
    fn persisted_type_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Stateless<Self>>())
    }
}

/// Runs a [`StatelessWorkflow`] as a [`Workflow`] with unit state.
#[derive(Debug, Clone, Default)]
pub struct Stateless<T>(pub T);

impl<T: StatelessWorkflow> Workflow for Stateless<T> {
    type Props = T::Props;
    type State = ();
    type Output = T::Output;
    type Rendering = T::Rendering;

    fn initial_state(&self, _props: &Self::Props, _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(
        &self,
        props: &Self::Props,
        _state: &(),
        ctx: &mut RenderContext<'_, (), Self::Output>,
    ) -> anyhow::Result<Self::Rendering> {
        self.0.render(props, ctx)
    }

    fn persisted_type_name(&self) -> Cow<'static, str> {
        self.0.persisted_type_name()
    }
}
