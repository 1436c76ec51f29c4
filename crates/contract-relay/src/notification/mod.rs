pub mod assembler;
pub mod channel;
pub mod payload;
pub mod report;
pub mod router;
pub mod store;

pub use assembler::{assemble, assemble_at, assemble_error, degrade_confidence};
pub use channel::{NotificationChannel, WebhookChannel};
pub use payload::{
    notification_subject, NotificationPayload, PayloadSource, PayloadStatus, PayloadUnit,
};
pub use report::render_units_report;
pub use router::{
    resume_pending_deliveries, spawn_retries, DeliveryRecord, DeliveryRouter, DeliveryState,
    RetryPolicy,
};
pub use store::PayloadStore;
