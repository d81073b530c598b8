//! Diagnostic hooks into the workflow runtime.
//!
//! A [`WorkflowDiagnosticListener`] is handed to the runtime explicitly and
//! threaded down to every node through a [`Diagnostics`] handle. The runtime
//! never depends on a listener being present.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives notifications about runtime, workflow and worker lifecycles.
///
/// All methods default to no-ops. Ids are unique within one runtime.
pub trait WorkflowDiagnosticListener: Send + Sync {
    fn on_runtime_started(&self, _root_workflow_type: &str) {}
    fn on_runtime_stopped(&self) {}

    fn on_before_render_pass(&self) {}
    fn on_after_render_pass(&self) {}
    fn on_before_snapshot_pass(&self) {}
    fn on_after_snapshot_pass(&self) {}

    fn on_workflow_started(
        &self,
        _workflow_id: u64,
        _parent_id: Option<u64>,
        _workflow_type: &str,
        _key: &str,
        _restored_from_snapshot: bool,
    ) {
    }
    fn on_workflow_stopped(&self, _workflow_id: u64) {}
    fn on_before_workflow_rendered(&self, _workflow_id: u64) {}
    fn on_after_workflow_rendered(&self, _workflow_id: u64) {}

    /// `workflow_id` is `None` when the host supplied new props to the root.
    fn on_props_changed(&self, _workflow_id: Option<u64>) {}

    fn on_worker_started(&self, _worker_id: u64, _workflow_id: u64, _key: &str, _description: &str) {}
    fn on_worker_output(&self, _worker_id: u64, _workflow_id: u64) {}
    fn on_worker_stopped(&self, _worker_id: u64, _workflow_id: u64) {}

    fn on_sink_received(&self, _workflow_id: u64, _action: &str) {}
    fn on_action_applied(&self, _workflow_id: u64, _action: &str, _emitted_output: bool) {}
}

/// Fans every notification out to several listeners, in order.
#[derive(Default, Clone)]
pub struct ChainedListener {
    listeners: Vec<Arc<dyn WorkflowDiagnosticListener>>,
}

impl ChainedListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn WorkflowDiagnosticListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn each(&self, f: impl Fn(&dyn WorkflowDiagnosticListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

impl WorkflowDiagnosticListener for ChainedListener {
    fn on_runtime_started(&self, root_workflow_type: &str) {
        self.each(|l| l.on_runtime_started(root_workflow_type));
    }
    fn on_runtime_stopped(&self) {
        self.each(|l| l.on_runtime_stopped());
    }
    fn on_before_render_pass(&self) {
        self.each(|l| l.on_before_render_pass());
    }
    fn on_after_render_pass(&self) {
        self.each(|l| l.on_after_render_pass());
    }
    fn on_before_snapshot_pass(&self) {
        self.each(|l| l.on_before_snapshot_pass());
    }
    fn on_after_snapshot_pass(&self) {
        self.each(|l| l.on_after_snapshot_pass());
    }
    fn on_workflow_started(
        &self,
        workflow_id: u64,
        parent_id: Option<u64>,
        workflow_type: &str,
        key: &str,
        restored_from_snapshot: bool,
    ) {
        self.each(|l| {
            l.on_workflow_started(workflow_id, parent_id, workflow_type, key, restored_from_snapshot)
        });
    }
    fn on_workflow_stopped(&self, workflow_id: u64) {
        self.each(|l| l.on_workflow_stopped(workflow_id));
    }
    fn on_before_workflow_rendered(&self, workflow_id: u64) {
        self.each(|l| l.on_before_workflow_rendered(workflow_id));
    }
    fn on_after_workflow_rendered(&self, workflow_id: u64) {
        self.each(|l| l.on_after_workflow_rendered(workflow_id));
    }
    fn on_props_changed(&self, workflow_id: Option<u64>) {
        self.each(|l| l.on_props_changed(workflow_id));
    }
    fn on_worker_started(&self, worker_id: u64, workflow_id: u64, key: &str, description: &str) {
        self.each(|l| l.on_worker_started(worker_id, workflow_id, key, description));
    }
    fn on_worker_output(&self, worker_id: u64, workflow_id: u64) {
        self.each(|l| l.on_worker_output(worker_id, workflow_id));
    }
    fn on_worker_stopped(&self, worker_id: u64, workflow_id: u64) {
        self.each(|l| l.on_worker_stopped(worker_id, workflow_id));
    }
    fn on_sink_received(&self, workflow_id: u64, action: &str) {
        self.each(|l| l.on_sink_received(workflow_id, action));
    }
    fn on_action_applied(&self, workflow_id: u64, action: &str, emitted_output: bool) {
        self.each(|l| l.on_action_applied(workflow_id, action, emitted_output));
    }
}

/// Cheap, cloneable handle passed down the node tree: an optional listener
/// plus the id counter shared by every node and worker of one runtime.
#[derive(Clone, Default)]
pub struct Diagnostics {
    listener: Option<Arc<dyn WorkflowDiagnosticListener>>,
    ids: Arc<AtomicU64>,
}

impl Diagnostics {
    pub fn new(listener: Option<Arc<dyn WorkflowDiagnosticListener>>) -> Self {
        Self {
            listener,
            ids: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.listener.is_some()
    }

    /// Ids start at 1 and are never reused within a runtime.
    pub fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn emit(&self, notify: impl FnOnce(&dyn WorkflowDiagnosticListener)) {
        if let Some(listener) = &self.listener {
            notify(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Names(Mutex<Vec<String>>);

    impl WorkflowDiagnosticListener for Names {
        fn on_workflow_started(&self, id: u64, _: Option<u64>, ty: &str, key: &str, _: bool) {
            self.0.lock().push(format!("{id}:{ty}:{key}"));
        }
    }

    #[test]
    fn test_chained_listener_notifies_in_order() {
        let first = Arc::new(Names::default());
        let second = Arc::new(Names::default());
        let chain = ChainedListener::new().with(first.clone()).with(second.clone());
        assert_eq!(chain.len(), 2);

        chain.on_workflow_started(1, None, "Root", "", false);
        assert_eq!(*first.0.lock(), vec!["1:Root:".to_string()]);
        assert_eq!(*second.0.lock(), vec!["1:Root:".to_string()]);
    }

    #[test]
    fn test_disabled_diagnostics_skip_notifications() {
        let diagnostics = Diagnostics::disabled();
        let mut called = false;
        diagnostics.emit(|_| called = true);
        assert!(!called);
        assert_eq!(diagnostics.next_id(), 1);
        assert_eq!(diagnostics.clone().next_id(), 2);
    }
}
