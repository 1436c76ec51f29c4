use std::path::PathBuf;

use crate::notification::{DeliveryState, PayloadStatus};

/// How handling one received message ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Payload persisted, delivery routed, message deleted.
    Completed {
        payload_path: PathBuf,
        status: PayloadStatus,
        delivery: DeliveryState,
        warnings: Vec<String>,
    },
    /// Permanent validation failure; message dead-lettered without processing.
    Rejected { reason: String },
    /// Processing failed; message released for redelivery.
    Failed { error: String },
    /// Processing exceeded the invocation timeout; message released.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub message_id: String,
    /// `None` when the message never validated.
    pub job_id: Option<String>,
    pub receive_count: u32,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn completed(
        message_id: &str,
        job_id: &str,
        receive_count: u32,
        payload_path: PathBuf,
        status: PayloadStatus,
        delivery: DeliveryState,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            job_id: Some(job_id.to_string()),
            receive_count,
            outcome: JobOutcome::Completed {
                payload_path,
                status,
                delivery,
                warnings,
            },
        }
    }

    pub fn rejected(message_id: &str, receive_count: u32, reason: String) -> Self {
        Self {
            message_id: message_id.to_string(),
            job_id: None,
            receive_count,
            outcome: JobOutcome::Rejected { reason },
        }
    }

    pub fn failed(message_id: &str, job_id: &str, receive_count: u32, error: String) -> Self {
        Self {
            message_id: message_id.to_string(),
            job_id: Some(job_id.to_string()),
            receive_count,
            outcome: JobOutcome::Failed { error },
        }
    }

    pub fn timed_out(message_id: &str, job_id: &str, receive_count: u32) -> Self {
        Self {
            message_id: message_id.to_string(),
            job_id: Some(job_id.to_string()),
            receive_count,
            outcome: JobOutcome::TimedOut,
        }
    }

    /// Whether the message was acknowledged (deleted) by the consumer.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_result_completed() {
        let result = JobResult::completed(
            "m-1",
            "c1",
            1,
            PathBuf::from("/out/c1/notification_payload.json"),
            PayloadStatus::Success,
            DeliveryState::Skipped,
            vec![],
        );
        assert!(result.is_success());
        assert_eq!(result.job_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_job_result_rejected_has_no_job_id() {
        let result = JobResult::rejected("m-2", 1, "missing contract_id".to_string());
        assert!(!result.is_success());
        assert!(result.job_id.is_none());
        assert_eq!(
            result.outcome,
            JobOutcome::Rejected {
                reason: "missing contract_id".to_string()
            }
        );
    }

    #[test]
    fn test_job_result_failure_variants() {
        assert!(!JobResult::failed("m", "c1", 2, "boom".to_string()).is_success());
        assert_eq!(JobResult::timed_out("m", "c1", 3).outcome, JobOutcome::TimedOut);
    }
}
