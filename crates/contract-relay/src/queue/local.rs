//! In-process FIFO queue with message groups, content-based deduplication,
//! visibility timeouts and dead-letter redrive.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Group used for messages that carry no usable ordering key.
pub const DEFAULT_GROUP: &str = "default";

/// Queue semantics the consumer relies on. `LocalQueue` is the in-process
/// implementation; a managed queue adapter would implement the same contract.
pub trait JobQueue: Send + Sync {
    /// Returns at most one visible message and hides it for the visibility timeout.
    fn receive(&self) -> Option<ReceivedMessage>;

    /// Acknowledges a message. Only the most recent receipt is accepted.
    fn delete(&self, receipt: &str) -> Result<(), QueueError>;

    /// Records a failed attempt. The message reappears once its visibility
    /// timeout elapses.
    fn release(&self, receipt: &str) -> Result<(), QueueError>;

    /// Moves a message straight to the dead-letter path.
    fn dead_letter(&self, receipt: &str, reason: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
    pub dedup_window: Duration,
    pub dead_letter_directory: Option<PathBuf>,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            visibility_timeout: config.visibility_timeout(),
            max_receive_count: config.max_receive_count,
            dedup_window: config.dedup_window(),
            dead_letter_directory: config.dead_letter_directory.clone(),
        }
    }
}

/// Outcome of [`LocalQueue::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued { message_id: String },
    /// Same deduplication id seen inside the window; nothing was enqueued.
    Duplicate { dedup_id: String },
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt: String,
    pub body: String,
    pub group_id: String,
    pub receive_count: u32,
}

/// A message that exhausted its receive budget or failed permanently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub body: String,
    pub group_id: String,
    pub dedup_id: String,
    pub receive_count: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    group_id: String,
    dedup_id: String,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
}

#[derive(Default)]
struct QueueState {
    /// Groups in order of first arrival; each group is strictly FIFO.
    groups: IndexMap<String, VecDeque<StoredMessage>>,
    dead_letters: Vec<DeadLetterRecord>,
}

pub struct LocalQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    dedup: Cache<String, ()>,
}

/// Content-based deduplication id: SHA-256 of the exact body bytes.
pub fn content_dedup_id(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

impl LocalQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let dedup = Cache::builder()
            .time_to_live(settings.dedup_window.max(Duration::from_millis(1)))
            .build();
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            dedup,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Enqueues a body in `group_id`. Without an explicit `dedup_id` the
    /// content hash is used.
    pub fn send(
        &self,
        body: &str,
        group_id: &str,
        dedup_id: Option<&str>,
    ) -> Result<SendOutcome, QueueError> {
        let dedup_id = dedup_id
            .map(str::to_string)
            .unwrap_or_else(|| content_dedup_id(body));
        let group_id = if group_id.trim().is_empty() {
            DEFAULT_GROUP.to_string()
        } else {
            group_id.to_string()
        };

        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;

        // Checked under the state lock so two concurrent senders cannot both win
        if self.dedup.contains_key(&dedup_id) {
            debug!("Dropping duplicate message (dedup id {})", short(&dedup_id));
            return Ok(SendOutcome::Duplicate { dedup_id });
        }
        self.dedup.insert(dedup_id.clone(), ());

        let message_id = uuid::Uuid::new_v4().to_string();
        state
            .groups
            .entry(group_id.clone())
            .or_default()
            .push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                group_id,
                dedup_id,
                receive_count: 0,
                visible_at: Instant::now(),
                receipt: None,
            });

        Ok(SendOutcome::Enqueued { message_id })
    }

    /// Messages waiting or in flight.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.groups.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.state
            .lock()
            .map(|s| s.dead_letters.clone())
            .unwrap_or_default()
    }

    fn redrive(&self, state: &mut QueueState, message: StoredMessage, reason: &str) {
        let record = DeadLetterRecord {
            message_id: message.message_id,
            body: message.body,
            group_id: message.group_id,
            dedup_id: message.dedup_id,
            receive_count: message.receive_count,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        };

        warn!(
            "Message {} moved to dead-letter after {} receive(s): {}",
            record.message_id, record.receive_count, reason
        );

        if let Err(e) = self.persist_dead_letter(&record) {
            error!("{}", e);
        }
        state.dead_letters.push(record);
    }

    fn persist_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), QueueError> {
        let Some(dir) = &self.settings.dead_letter_directory else {
            return Ok(());
        };
        let path = dir.join(format!("{}.json", record.message_id));
        std::fs::create_dir_all(dir).map_err(|e| QueueError::DeadLetterWrite {
            path: path.clone(),
            source: e,
        })?;
        let json = serde_json::to_vec_pretty(record).map_err(|e| QueueError::DeadLetterWrite {
            path: path.clone(),
            source: e.into(),
        })?;
        std::fs::write(&path, json).map_err(|e| QueueError::DeadLetterWrite { path, source: e })
    }

    /// Locates the head message holding `receipt`.
    fn find_by_receipt(state: &QueueState, receipt: &str) -> Option<usize> {
        state.groups.values().position(|group| {
            group
                .front()
                .and_then(|m| m.receipt.as_deref())
                .is_some_and(|r| r == receipt)
        })
    }

    fn pop_head(state: &mut QueueState, group_index: usize) -> Option<StoredMessage> {
        let (_, group) = state.groups.get_index_mut(group_index)?;
        let message = group.pop_front();
        if group.is_empty() {
            state.groups.shift_remove_index(group_index);
        }
        message
    }
}

impl JobQueue for LocalQueue {
    fn receive(&self) -> Option<ReceivedMessage> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                error!("Queue lock poisoned; no messages can be received");
                return None;
            }
        };
        let now = Instant::now();

        let mut index = 0;
        while index < state.groups.len() {
            let head_ready = state
                .groups
                .get_index(index)
                .and_then(|(_, group)| group.front())
                .map(|head| (head.visible_at <= now, head.receive_count));

            match head_ready {
                // Head in flight or waiting out its visibility timeout: the whole group is blocked
                Some((false, _)) => index += 1,
                Some((true, count)) if count >= self.settings.max_receive_count => {
                    if let Some(message) = Self::pop_head(&mut state, index) {
                        let reason = format!(
                            "maximum receive count ({}) exceeded",
                            self.settings.max_receive_count
                        );
                        self.redrive(&mut state, message, &reason);
                    }
                    // Same index now points at the group's next head, or the next group
                }
                Some((true, _)) => {
                    let (_, group) = state.groups.get_index_mut(index)?;
                    let head = group.front_mut()?;
                    let receipt = uuid::Uuid::new_v4().to_string();
                    head.receive_count += 1;
                    head.visible_at = now + self.settings.visibility_timeout;
                    head.receipt = Some(receipt.clone());

                    debug!(
                        "Received message {} (group {}, receive #{})",
                        head.message_id, head.group_id, head.receive_count
                    );

                    return Some(ReceivedMessage {
                        message_id: head.message_id.clone(),
                        receipt,
                        body: head.body.clone(),
                        group_id: head.group_id.clone(),
                        receive_count: head.receive_count,
                    });
                }
                None => {
                    state.groups.shift_remove_index(index);
                }
            }
        }

        None
    }

    fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let index = Self::find_by_receipt(&state, receipt)
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))?;
        if let Some(message) = Self::pop_head(&mut state, index) {
            info!(
                "Deleted message {} after {} receive(s)",
                message.message_id, message.receive_count
            );
        }
        Ok(())
    }

    fn release(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let index = Self::find_by_receipt(&state, receipt)
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))?;
        if let Some((_, group)) = state.groups.get_index_mut(index) {
            if let Some(head) = group.front_mut() {
                head.receipt = None;
                debug!(
                    "Released message {}; visible again in {:?}",
                    head.message_id,
                    head.visible_at.saturating_duration_since(Instant::now())
                );
            }
        }
        Ok(())
    }

    fn dead_letter(&self, receipt: &str, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let index = Self::find_by_receipt(&state, receipt)
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))?;
        if let Some(message) = Self::pop_head(&mut state, index) {
            self.redrive(&mut state, message, reason);
        }
        Ok(())
    }
}

/// First 12 characters of an id, for log lines.
fn short(id: &str) -> &str {
    id.char_indices().nth(12).map_or(id, |(end, _)| &id[..end])
}
