pub mod consumer;
pub mod job;
pub mod pool;
pub mod scanner;

pub use consumer::MessageConsumer;
pub use job::{JobOutcome, JobResult};
pub use pool::WorkerPool;
pub use scanner::{InboxScanner, ScanReport};

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
