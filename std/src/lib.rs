//! # Dendrite Std
//!
//! Ready-made [`Worker`](dendrite_core::Worker)s: timers, intervals, streams,
//! channels and one-shot async tasks.

pub mod prelude;
pub mod workers;

pub use workers::channel::{ChannelWorker, channel};
pub use workers::stream::StreamWorker;
pub use workers::task::{FutureWorker, Task, TaskWorker, from_fn};
pub use workers::timer::{IntervalWorker, TimerWorker};
