//! # Dendrite Test
//!
//! Harness for running workflows under test. [`WorkflowTester`] drives a
//! real runtime and [`RenderTester`] runs a single render pass against
//! stubbed children and workers. [`WorkerTester`] reads one worker on its
//! own, [`ScriptedWorker`] lets the test decide when a worker emits, and
//! [`WorkerProbe`] observes worker starts and cancellations.

pub mod render;
pub mod tester;
pub mod worker;

pub use dendrite_core::timeline::{DiagnosticEvent, RecordingListener};
pub use render::{RenderOutcome, RenderTester};
pub use tester::{TestError, WorkflowTester};
pub use worker::{ScriptedWorker, WorkerProbe, WorkerScript, WorkerTester};
