pub mod local;
pub mod message;

pub use local::{
    content_dedup_id, DeadLetterRecord, JobQueue, LocalQueue, QueueSettings, ReceivedMessage,
    SendOutcome, DEFAULT_GROUP,
};
pub use message::{group_id_for, parse_job, JobDescriptor, JobMessage};
