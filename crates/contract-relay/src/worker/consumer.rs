use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::pipeline::Pipeline;
use crate::queue::{parse_job, JobQueue, ReceivedMessage};
use crate::worker::job::JobResult;

/// Pulls one message at a time and owns its acknowledgement.
///
/// A message is deleted only after the pipeline finished. Validation
/// failures are dead-lettered at once; every other failure, including the
/// invocation timeout, releases the message for redelivery.
pub struct MessageConsumer {
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    invocation_timeout: Duration,
}

impl MessageConsumer {
    pub fn new(queue: Arc<dyn JobQueue>, pipeline: Arc<Pipeline>, invocation_timeout: Duration) -> Self {
        Self {
            queue,
            pipeline,
            invocation_timeout,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Receives and handles at most one message. `None` when nothing is visible.
    pub async fn poll_once(&self) -> Option<JobResult> {
        let message = self.queue.receive()?;
        Some(self.handle(message).await)
    }

    async fn handle(&self, message: ReceivedMessage) -> JobResult {
        let job = match parse_job(&message.body, &message.message_id, message.receive_count) {
            Ok(job) => job,
            Err(e) => {
                warn!("Rejecting message {}: {}", message.message_id, e);
                if let Err(qe) = self.queue.dead_letter(&message.receipt, &e.to_string()) {
                    error!("Failed to dead-letter message {}: {}", message.message_id, qe);
                }
                return JobResult::rejected(&message.message_id, message.receive_count, e.to_string());
            }
        };

        if let Some(bucket) = &job.ignored_bucket_name {
            warn!(
                "Message {} carries bucket_name '{}'; ignored in favour of the configured bucket",
                message.message_id, bucket
            );
        }

        debug!(
            "Processing job {} from message {} (receive #{})",
            job.job_id, message.message_id, message.receive_count
        );

        let job_id = job.job_id.clone();
        match tokio::time::timeout(self.invocation_timeout, self.pipeline.run(job.clone())).await {
            Ok(Ok(outcome)) => {
                if let Err(e) = self.queue.delete(&message.receipt) {
                    // Redelivery after a lost ack is safe: keys and paths are job-keyed
                    warn!("Failed to delete message {}: {}", message.message_id, e);
                }
                info!(
                    "Job {} completed ({} unit(s), delivery {})",
                    job_id, outcome.unit_count, outcome.delivery
                );
                JobResult::completed(
                    &message.message_id,
                    &job_id,
                    message.receive_count,
                    outcome.payload_path,
                    outcome.status,
                    outcome.delivery,
                    outcome.warnings.iter().map(ToString::to_string).collect(),
                )
            }
            Ok(Err(e)) => {
                self.release(&message);
                error!(
                    "Job {} failed on receive #{}: {}",
                    job_id, message.receive_count, e
                );
                JobResult::failed(&message.message_id, &job_id, message.receive_count, e.to_string())
            }
            Err(_) => {
                error!(
                    "Job {} exceeded the invocation timeout of {:?}",
                    job_id, self.invocation_timeout
                );
                self.pipeline
                    .record_timeout(job, self.invocation_timeout)
                    .await;
                self.release(&message);
                JobResult::timed_out(&message.message_id, &job_id, message.receive_count)
            }
        }
    }

    fn release(&self, message: &ReceivedMessage) {
        if let Err(e) = self.queue.release(&message.receipt) {
            warn!("Failed to release message {}: {}", message.message_id, e);
        }
    }
}
