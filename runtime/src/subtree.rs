//! Child workflows of one node.
//!
//! Children are keyed by [`Identity`]. During a render pass every declared
//! child moves from `active` (last pass) to `staging` (this pass), reusing the
//! existing node when its identity matches. Whatever remains in `active` when
//! the pass commits is torn down.

use crate::node::{NodeEnv, Update, WorkflowNode};
use crate::select::{Contender, poll_first};
use crate::workflow::Workflow;
use ahash::AHashMap;
use bytes::Bytes;
use dendrite_core::action::Action;
use dendrite_core::error::RuntimeError;
use dendrite_core::identity::{Identity, SnapshotKey};
use dendrite_core::schematic::WorkflowSchematic;
use dendrite_core::snapshot::Snapshot;
use futures_util::FutureExt;
use std::any::Any;
use std::task::{Context, Poll, ready};
use tokio::task::JoinHandle;

type ChildUpdate<S, O> = Result<Update<S, O>, RuntimeError>;
type ChildHandler<T, S, O> = Box<dyn Fn(T) -> Action<S, O> + Send>;

pub(crate) trait ChildSlot<S, O>: Send {
    fn identity(&self) -> &Identity;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Ticks the child and translates its output through the parent's handler.
    fn poll_update(&mut self, cx: &mut Context<'_>) -> Poll<ChildUpdate<S, O>>;
    fn snapshot(&self) -> Result<Snapshot, RuntimeError>;
    fn shutdown(&mut self, graveyard: &mut Vec<JoinHandle<()>>);
}

impl<S, O> Contender for dyn ChildSlot<S, O> {
    type Output = ChildUpdate<S, O>;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_update(cx)
    }
}

struct ChildEntry<C: Workflow, S, O> {
    node: WorkflowNode<C>,
    handler: ChildHandler<C::Output, S, O>,
}

impl<C, S, O> ChildSlot<S, O> for ChildEntry<C, S, O>
where
    C: Workflow,
    S: Send + 'static,
    O: Send + 'static,
{
    fn identity(&self) -> &Identity {
        self.node.identity()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn poll_update(&mut self, cx: &mut Context<'_>) -> Poll<ChildUpdate<S, O>> {
        let update = match ready!(self.node.poll_tick(cx)) {
            Ok(Some(output)) => Ok(Update::Action((self.handler)(output))),
            Ok(None) => Ok(Update::Advanced),
            Err(error) => Err(error),
        };
        Poll::Ready(update)
    }

    fn snapshot(&self) -> Result<Snapshot, RuntimeError> {
        self.node.snapshot()
    }

    fn shutdown(&mut self, graveyard: &mut Vec<JoinHandle<()>>) {
        self.node.shutdown(graveyard);
    }
}

pub(crate) struct SubtreeManager<S, O> {
    active: Vec<Box<dyn ChildSlot<S, O>>>,
    staging: Vec<Box<dyn ChildSlot<S, O>>>,
    retiring: Vec<JoinHandle<()>>,
    restored: AHashMap<SnapshotKey, Bytes>,
    schematics: Vec<WorkflowSchematic>,
    parent_id: u64,
    env: NodeEnv,
}

impl<S: Send + 'static, O: Send + 'static> SubtreeManager<S, O> {
    pub(crate) fn new(parent_id: u64, env: NodeEnv) -> Self {
        Self {
            active: Vec::new(),
            staging: Vec::new(),
            retiring: Vec::new(),
            restored: AHashMap::new(),
            schematics: Vec::new(),
            parent_id,
            env,
        }
    }

    /// Child snapshots consulted when children are first created. Dropped
    /// after the first committed pass.
    pub(crate) fn restore(&mut self, children: Vec<(SnapshotKey, Bytes)>) {
        self.restored = children.into_iter().collect();
    }

    pub(crate) fn declare<C, H>(
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
        let identity = Identity::of::<C>(key);
        if self.staging.iter().any(|slot| slot.identity() == &identity) {
            return Err(RuntimeError::DuplicateChild {
                identity: identity.to_string(),
            });
        }

        let handler: ChildHandler<C::Output, S, O> = Box::new(handler);
        let existing = self
            .active
            .iter()
            .position(|slot| slot.identity() == &identity)
            .map(|index| self.active.remove(index));

        // A reused child takes this pass's handler and props; a new one was
        // just built from them.
        let (mut slot, props, replacement): (Box<dyn ChildSlot<S, O>>, _, _) = match existing {
            Some(slot) => (slot, Some(props), Some(handler)),
            None => {
                let identity = identity.with_persisted_name(child.persisted_type_name());
                let snapshot = self.restored.remove(&identity.snapshot_key());
                let node = WorkflowNode::create(
                    identity,
                    child.clone(),
                    props,
                    snapshot,
                    Some(self.parent_id),
                    self.env.clone(),
                )?;
                let slot: Box<dyn ChildSlot<S, O>> = Box::new(ChildEntry { node, handler });
                (slot, None, None)
            }
        };

        let Some(entry) = slot.as_any_mut().downcast_mut::<ChildEntry<C, S, O>>() else {
            return Err(RuntimeError::Internal("child slot does not match its identity"));
        };
        if let Some(handler) = replacement {
            entry.handler = handler;
        }

        match entry.node.render_pass(child, props) {
            Ok((rendering, schematic)) => {
                self.schematics.push(schematic);
                self.staging.push(slot);
                Ok(rendering)
            }
            Err(error) => {
                slot.shutdown(&mut self.retiring);
                Err(error)
            }
        }
    }

    /// Ends the render pass: children not redeclared are torn down.
    pub(crate) fn commit(&mut self) {
        for mut slot in self.active.drain(..) {
            slot.shutdown(&mut self.retiring);
        }
        self.active = std::mem::take(&mut self.staging);
        self.restored.clear();
    }

    pub(crate) fn take_schematics(&mut self) -> Vec<WorkflowSchematic> {
        std::mem::take(&mut self.schematics)
    }

    pub(crate) fn poll_retired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.retiring.retain_mut(|task| task.poll_unpin(cx).is_pending());
        if self.retiring.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// First update from a child, in declaration order. A child whose tick
    /// fails is torn down before the failure is returned.
    pub(crate) fn poll_next_update(&mut self, cx: &mut Context<'_>) -> Poll<ChildUpdate<S, O>> {
        let (index, update) = ready!(poll_first(self.active.iter_mut(), cx));
        if update.is_err() {
            let mut failed = self.active.remove(index);
            failed.shutdown(&mut self.retiring);
        }
        Poll::Ready(update)
    }

    pub(crate) fn child_snapshots(&self) -> Result<Vec<(SnapshotKey, Snapshot)>, RuntimeError> {
        self.active
            .iter()
            .map(|slot| Ok((slot.identity().snapshot_key(), slot.snapshot()?)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn shutdown(&mut self, graveyard: &mut Vec<JoinHandle<()>>) {
        for mut slot in self.active.drain(..).chain(self.staging.drain(..)) {
            slot.shutdown(graveyard);
        }
        graveyard.append(&mut self.retiring);
        self.restored.clear();
    }
}
