//! Delivery state machine for assembled payloads.
//!
//! ```text
//! Pending -> Delivering -> Delivered
//!                       -> RetryScheduled -> Delivering ...
//!                       -> DeadLettered
//! Skipped (no channel or no bucket)
//! ```

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::error::StorageError;

use super::channel::NotificationChannel;
use super::payload::NotificationPayload;
use super::store::PayloadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivering,
    Delivered,
    RetryScheduled,
    DeadLettered,
    Skipped,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered | DeliveryState::DeadLettered | DeliveryState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Delivering => "delivering",
            DeliveryState::Delivered => "delivered",
            DeliveryState::RetryScheduled => "retry_scheduled",
            DeliveryState::DeadLettered => "dead_lettered",
            DeliveryState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted outcome of routing one job's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub job_id: String,
    pub state: DeliveryState,
    pub attempts: u32,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    fn new(job_id: &str, state: DeliveryState) -> Self {
        Self {
            job_id: job_id.to_string(),
            state,
            attempts: 0,
            first_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            message_id: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Measured from the first attempt.
    pub window: Duration,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window: Duration::from_secs(config.window_secs),
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
        }
    }

    /// Exponential schedule starting at `initial_backoff` and doubling, with
    /// one delay per retry after the first attempt.
    pub fn schedule(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.window)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Delay before retry `k` (1-based), `None` past the retry budget.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        let index = retry.checked_sub(1)? as usize;
        self.schedule().build().nth(index)
    }

    /// When the next attempt may run after `attempts` failed ones, or `None`
    /// once attempts or the window are exhausted. Never past the window end.
    pub fn next_attempt_at(
        &self,
        first_attempt_at: DateTime<Utc>,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }
        let window_end = first_attempt_at + chrono::Duration::from_std(self.window).ok()?;
        if now >= window_end {
            return None;
        }
        let delay = chrono::Duration::from_std(self.backoff(attempts)?).ok()?;
        Some((now + delay).min(window_end))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

pub struct DeliveryRouter {
    channel: Option<Arc<dyn NotificationChannel>>,
    policy: RetryPolicy,
}

impl DeliveryRouter {
    pub fn new(channel: Option<Arc<dyn NotificationChannel>>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Initial state for a freshly assembled payload.
    pub fn begin(&self, payload: &NotificationPayload) -> DeliveryRecord {
        match &self.channel {
            None => {
                info!(job_id = %payload.job_id, "No notification channel configured; delivery skipped");
                DeliveryRecord::new(&payload.job_id, DeliveryState::Skipped)
            }
            Some(_) if payload.bucket_name.trim().is_empty() => {
                info!(job_id = %payload.job_id, "No bucket name on payload; delivery skipped");
                DeliveryRecord::new(&payload.job_id, DeliveryState::Skipped)
            }
            Some(_) => DeliveryRecord::new(&payload.job_id, DeliveryState::Pending),
        }
    }

    /// Runs one publish attempt. Terminal records are returned unchanged.
    pub async fn step(&self, record: &mut DeliveryRecord, payload: &NotificationPayload) {
        if record.state.is_terminal() {
            return;
        }
        let Some(channel) = &self.channel else {
            record.state = DeliveryState::Skipped;
            return;
        };

        let now = Utc::now();
        record.state = DeliveryState::Delivering;
        record.attempts += 1;
        let first_attempt_at = *record.first_attempt_at.get_or_insert(now);

        match channel.publish(&payload.subject(), payload).await {
            Ok(message_id) => {
                info!(
                    job_id = %record.job_id,
                    attempt = record.attempts,
                    message_id = %message_id,
                    destination = %channel.describe(),
                    "Notification delivered"
                );
                record.state = DeliveryState::Delivered;
                record.message_id = Some(message_id);
                record.last_error = None;
                record.next_attempt_at = None;
            }
            Err(e) => {
                record.last_error = Some(e.to_string());
                let next = if e.is_transient() {
                    self.policy
                        .next_attempt_at(first_attempt_at, record.attempts, Utc::now())
                } else {
                    None
                };

                match next {
                    Some(at) => {
                        warn!(
                            job_id = %record.job_id,
                            attempt = record.attempts,
                            retry_at = %at,
                            "Notification delivery failed, retry scheduled: {}",
                            e
                        );
                        record.state = DeliveryState::RetryScheduled;
                        record.next_attempt_at = Some(at);
                    }
                    None => {
                        warn!(
                            job_id = %record.job_id,
                            attempts = record.attempts,
                            "Notification delivery dead-lettered: {}",
                            e
                        );
                        record.state = DeliveryState::DeadLettered;
                        record.next_attempt_at = None;
                    }
                }
            }
        }
        record.updated_at = Utc::now();
    }

    /// Drives a record to a terminal state, sleeping between retries.
    pub async fn resume(
        &self,
        mut record: DeliveryRecord,
        payload: &NotificationPayload,
    ) -> DeliveryRecord {
        while !record.state.is_terminal() {
            if let Some(at) = record.next_attempt_at {
                let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
            }
            self.step(&mut record, payload).await;
        }
        record
    }

    /// Routes a payload from scratch to a terminal state.
    pub async fn route(&self, payload: &NotificationPayload) -> DeliveryRecord {
        let record = self.begin(payload);
        self.resume(record, payload).await
    }
}

/// Finishes a scheduled delivery in the background and persists each
/// transition.
pub fn spawn_retries(
    router: Arc<DeliveryRouter>,
    store: Arc<PayloadStore>,
    mut record: DeliveryRecord,
    payload: NotificationPayload,
) -> tokio::task::JoinHandle<DeliveryRecord> {
    tokio::spawn(async move {
        while !record.state.is_terminal() {
            if let Some(at) = record.next_attempt_at {
                let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
            }
            router.step(&mut record, &payload).await;
            if let Err(e) = store.write_delivery(&record).await {
                warn!(job_id = %record.job_id, "Failed to persist delivery record: {}", e);
            }
        }
        record
    })
}

/// Picks up retries that were scheduled before a restart. Returns how many
/// were resumed.
pub async fn resume_pending_deliveries(
    router: Arc<DeliveryRouter>,
    store: Arc<PayloadStore>,
) -> Result<usize, StorageError> {
    let mut resumed = 0;
    for record in store.pending_deliveries() {
        let payload = match store.load_payload(&record.job_id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %record.job_id, "Cannot resume delivery without payload: {}", e);
                continue;
            }
        };
        info!(
            job_id = %record.job_id,
            attempts = record.attempts,
            "Resuming scheduled notification delivery"
        );
        spawn_retries(Arc::clone(&router), Arc::clone(&store), record, payload);
        resumed += 1;
    }
    Ok(resumed)
}
