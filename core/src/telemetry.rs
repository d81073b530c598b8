//! # Telemetry: Diagnostics through `tracing`
//!
//! [`TracingListener`] forwards runtime notifications to the `tracing`
//! ecosystem; [`init_stdout_tracing`] installs a stdout subscriber for
//! binaries and examples.

use crate::diagnostic::WorkflowDiagnosticListener;
use tracing_subscriber::EnvFilter;

/// Initialize stdout tracing honoring `RUST_LOG`.
pub fn init_stdout_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dendrite_runtime=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Logs every diagnostic notification. Lifecycle changes go to `debug`,
/// per-pass chatter to `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl WorkflowDiagnosticListener for TracingListener {
    fn on_runtime_started(&self, root_workflow_type: &str) {
        tracing::debug!(dendrite.workflow = %root_workflow_type, "Runtime started");
    }

    fn on_runtime_stopped(&self) {
        tracing::debug!("Runtime stopped");
    }

    fn on_before_render_pass(&self) {
        tracing::trace!("Render pass starting");
    }

    fn on_after_render_pass(&self) {
        tracing::trace!("Render pass finished");
    }

    fn on_before_snapshot_pass(&self) {
        tracing::trace!("Snapshot pass starting");
    }

    fn on_after_snapshot_pass(&self) {
        tracing::trace!("Snapshot pass finished");
    }

    fn on_workflow_started(
        &self,
        workflow_id: u64,
        parent_id: Option<u64>,
        workflow_type: &str,
        key: &str,
        restored_from_snapshot: bool,
    ) {
        tracing::debug!(
            workflow_id,
            ?parent_id,
            dendrite.workflow = %workflow_type,
            key,
            restored_from_snapshot,
            "Workflow started"
        );
    }

    fn on_workflow_stopped(&self, workflow_id: u64) {
        tracing::debug!(workflow_id, "Workflow stopped");
    }

    fn on_before_workflow_rendered(&self, workflow_id: u64) {
        tracing::trace!(workflow_id, "Rendering workflow");
    }

    fn on_props_changed(&self, workflow_id: Option<u64>) {
        tracing::trace!(?workflow_id, "Props changed");
    }

    fn on_worker_started(&self, worker_id: u64, workflow_id: u64, key: &str, description: &str) {
        tracing::debug!(worker_id, workflow_id, key, dendrite.worker = %description, "Worker started");
    }

    fn on_worker_output(&self, worker_id: u64, workflow_id: u64) {
        tracing::trace!(worker_id, workflow_id, "Worker emitted output");
    }

    fn on_worker_stopped(&self, worker_id: u64, workflow_id: u64) {
        tracing::debug!(worker_id, workflow_id, "Worker stopped");
    }

    fn on_sink_received(&self, workflow_id: u64, action: &str) {
        tracing::debug!(workflow_id, action, "Sink received action");
    }

    fn on_action_applied(&self, workflow_id: u64, action: &str, emitted_output: bool) {
        tracing::debug!(workflow_id, action, emitted_output, "Action applied");
    }
}
