pub use crate::workers::channel::{ChannelWorker, channel};
pub use crate::workers::stream::StreamWorker;
pub use crate::workers::task::{FutureWorker, Task, TaskWorker, from_fn};
pub use crate::workers::timer::{IntervalWorker, TimerWorker};
