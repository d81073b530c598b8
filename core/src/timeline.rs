use crate::diagnostic::WorkflowDiagnosticListener;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A discrete diagnostic event observed in a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticEvent {
    RuntimeStarted { root_workflow_type: String },
    RuntimeStopped,
    BeforeRenderPass,
    AfterRenderPass,
    BeforeSnapshotPass,
    AfterSnapshotPass,
    WorkflowStarted {
        workflow_id: u64,
        parent_id: Option<u64>,
        workflow_type: String,
        key: String,
        restored_from_snapshot: bool,
    },
    WorkflowStopped { workflow_id: u64 },
    BeforeWorkflowRendered { workflow_id: u64 },
    AfterWorkflowRendered { workflow_id: u64 },
    PropsChanged { workflow_id: Option<u64> },
    WorkerStarted {
        worker_id: u64,
        workflow_id: u64,
        key: String,
        description: String,
    },
    WorkerOutput { worker_id: u64, workflow_id: u64 },
    WorkerStopped { worker_id: u64, workflow_id: u64 },
    SinkReceived { workflow_id: u64, action: String },
    ActionApplied {
        workflow_id: u64,
        action: String,
        emitted_output: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub event: DiagnosticEvent,
}

/// A sequential record of a runtime session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DiagnosticEvent) {
        self.entries.push(TimelineEntry {
            at: Utc::now(),
            event,
        });
    }

    pub fn events(&self) -> impl Iterator<Item = &DiagnosticEvent> {
        self.entries.iter().map(|entry| &entry.event)
    }

    pub fn count(&self, predicate: impl Fn(&DiagnosticEvent) -> bool) -> usize {
        self.events().filter(|event| predicate(event)).count()
    }
}

/// Listener that records every notification into a [`Timeline`].
#[derive(Debug, Default)]
pub struct RecordingListener {
    timeline: Mutex<Timeline>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline.lock().clone()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.timeline.lock().events().cloned().collect()
    }

    pub fn count(&self, predicate: impl Fn(&DiagnosticEvent) -> bool) -> usize {
        self.timeline.lock().count(predicate)
    }

    pub fn clear(&self) {
        self.timeline.lock().entries.clear();
    }

    fn record(&self, event: DiagnosticEvent) {
        self.timeline.lock().push(event);
    }
}

impl WorkflowDiagnosticListener for RecordingListener {
    fn on_runtime_started(&self, root_workflow_type: &str) {
        self.record(DiagnosticEvent::RuntimeStarted {
            root_workflow_type: root_workflow_type.to_string(),
        });
    }
    fn on_runtime_stopped(&self) {
        self.record(DiagnosticEvent::RuntimeStopped);
    }
    fn on_before_render_pass(&self) {
        self.record(DiagnosticEvent::BeforeRenderPass);
    }
    fn on_after_render_pass(&self) {
        self.record(DiagnosticEvent::AfterRenderPass);
    }
    fn on_before_snapshot_pass(&self) {
        self.record(DiagnosticEvent::BeforeSnapshotPass);
    }
    fn on_after_snapshot_pass(&self) {
        self.record(DiagnosticEvent::AfterSnapshotPass);
    }
    fn on_workflow_started(
        &self,
        workflow_id: u64,
        parent_id: Option<u64>,
        workflow_type: &str,
        key: &str,
        restored_from_snapshot: bool,
    ) {
        self.record(DiagnosticEvent::WorkflowStarted {
            workflow_id,
            parent_id,
            workflow_type: workflow_type.to_string(),
            key: key.to_string(),
            restored_from_snapshot,
        });
    }
    fn on_workflow_stopped(&self, workflow_id: u64) {
        self.record(DiagnosticEvent::WorkflowStopped { workflow_id });
    }
    fn on_before_workflow_rendered(&self, workflow_id: u64) {
        self.record(DiagnosticEvent::BeforeWorkflowRendered { workflow_id });
    }
    fn on_after_workflow_rendered(&self, workflow_id: u64) {
        self.record(DiagnosticEvent::AfterWorkflowRendered { workflow_id });
    }
    fn on_props_changed(&self, workflow_id: Option<u64>) {
        self.record(DiagnosticEvent::PropsChanged { workflow_id });
    }
    fn on_worker_started(&self, worker_id: u64, workflow_id: u64, key: &str, description: &str) {
        self.record(DiagnosticEvent::WorkerStarted {
            worker_id,
            workflow_id,
            key: key.to_string(),
            description: description.to_string(),
        });
    }
    fn on_worker_output(&self, worker_id: u64, workflow_id: u64) {
        self.record(DiagnosticEvent::WorkerOutput {
            worker_id,
            workflow_id,
        });
    }
    fn on_worker_stopped(&self, worker_id: u64, workflow_id: u64) {
        self.record(DiagnosticEvent::WorkerStopped {
            worker_id,
            workflow_id,
        });
    }
    fn on_sink_received(&self, workflow_id: u64, action: &str) {
        self.record(DiagnosticEvent::SinkReceived {
            workflow_id,
            action: action.to_string(),
        });
    }
    fn on_action_applied(&self, workflow_id: u64, action: &str, emitted_output: bool) {
        self.record(DiagnosticEvent::ActionApplied {
            workflow_id,
            action: action.to_string(),
            emitted_output,
        });
    }
}
