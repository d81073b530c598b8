pub mod channel;
pub mod stream;
pub mod task;
pub mod timer;
