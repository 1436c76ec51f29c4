use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use walkdir::WalkDir;

use crate::error::WorkerError;
use crate::queue::{group_id_for, LocalQueue, SendOutcome, DEFAULT_GROUP};
use crate::sanitize;

pub const REJECTED_DIR: &str = "rejected";

/// Default quiet period before an inbox file counts as fully written.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub enqueued: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Files skipped because they were modified within the settle time.
    pub unsettled: usize,
}

/// Feeds the local queue from `*.json` files dropped into an inbox directory.
pub struct InboxScanner {
    inbox_directory: PathBuf,
    queue: Arc<LocalQueue>,
    settle_time: Duration,
}

impl InboxScanner {
    pub fn new<P: AsRef<Path>>(inbox_directory: P, queue: Arc<LocalQueue>) -> Self {
        Self {
            inbox_directory: inbox_directory.as_ref().to_path_buf(),
            queue,
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn inbox_directory(&self) -> &Path {
        &self.inbox_directory
    }

    /// Sends every settled top-level message file, oldest name first, then
    /// removes it. Files still being written are left in place.
    pub fn scan_once(&self) -> Result<ScanReport, WorkerError> {
        let mut report = ScanReport::default();

        if !self.inbox_directory.is_dir() {
            debug!("Inbox {} does not exist yet", self.inbox_directory.display());
            return Ok(report);
        }

        for entry in WalkDir::new(&self.inbox_directory)
            .min_depth(1)
            .max_depth(1) // Only the top level; rejected/ is a subdirectory
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| WorkerError::ScanFailed {
                path: self.inbox_directory.clone(),
                source: e,
            })?;
            let path = entry.path();

            if !entry.file_type().is_file() || !is_message_file(path) {
                continue;
            }

            if !self.is_settled(path) {
                debug!("Inbox file {} is still being written", sanitize::redact_path(path));
                report.unsettled += 1;
                continue;
            }

            let body = match std::fs::read_to_string(path) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Unreadable inbox file {}: {}", sanitize::redact_path(path), e);
                    self.reject(path)?;
                    report.rejected += 1;
                    continue;
                }
            };

            let group = group_id_for(&body).unwrap_or_else(|| DEFAULT_GROUP.to_string());
            match self
                .queue
                .send(&body, &group, None)
                .map_err(|e| WorkerError::Inbox(e.to_string()))?
            {
                SendOutcome::Enqueued { message_id } => {
                    debug!(
                        "Enqueued {} as message {} (group {})",
                        sanitize::redact_path(path),
                        message_id,
                        group
                    );
                    report.enqueued += 1;
                }
                SendOutcome::Duplicate { .. } => {
                    info!("Duplicate message {} dropped", sanitize::redact_path(path));
                    report.duplicates += 1;
                }
            }

            if let Err(e) = std::fs::remove_file(path) {
                warn!(
                    "Failed to remove inbox file {}: {}",
                    sanitize::redact_path(path),
                    e
                );
            }
        }

        if report.enqueued + report.duplicates + report.rejected > 0 {
            info!(
                "Inbox scan: {} enqueued, {} duplicate(s), {} rejected",
                report.enqueued, report.duplicates, report.rejected
            );
        }
        Ok(report)
    }

    /// Watches the inbox until `shutdown` is set, scanning once at start and
    /// again whenever debounced changes arrive.
    pub fn watch(&self, poll_interval: Duration, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError> {
        std::fs::create_dir_all(&self.inbox_directory).map_err(|e| {
            WorkerError::Inbox(format!(
                "cannot create {}: {}",
                self.inbox_directory.display(),
                e
            ))
        })?;

        // Use PollWatcher for Docker/NFS compatibility
        let poll_config = NotifyConfig::default().with_poll_interval(poll_interval);

        let debouncer_config = DebouncerConfig::default()
            .with_timeout(self.settle_time.max(Duration::from_millis(100)))
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.inbox_directory, RecursiveMode::NonRecursive)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        info!("Watching inbox: {}", self.inbox_directory.display());

        // Files present before the watcher started produce no events
        let mut rescan = true;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Inbox scanner shutting down...");
                break;
            }

            if rescan {
                rescan = match self.scan_once() {
                    Ok(report) => report.unsettled > 0,
                    Err(e) => {
                        error!("Inbox scan failed: {}", e);
                        false
                    }
                };
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    if events.iter().any(|event| {
                        matches!(event.kind, DebouncedEventKind::Any) && is_message_file(&event.path)
                    }) {
                        rescan = true;
                    }
                }
                Ok(Err(errors)) => {
                    warn!("Inbox watch error: {:?}", errors);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Inbox watch channel disconnected");
                    return Err(WorkerError::WatchError("watch channel disconnected".to_string()));
                }
            }
        }

        Ok(())
    }

    fn is_settled(&self, path: &Path) -> bool {
        if self.settle_time.is_zero() {
            return true;
        }
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            // A modification time in the future counts as unsettled
            Ok(modified) => modified
                .elapsed()
                .is_ok_and(|age| age >= self.settle_time),
            Err(_) => true,
        }
    }

    fn reject(&self, path: &Path) -> Result<(), WorkerError> {
        let rejected_dir = self.inbox_directory.join(REJECTED_DIR);
        std::fs::create_dir_all(&rejected_dir)
            .map_err(|e| WorkerError::Inbox(format!("cannot create {}: {}", rejected_dir.display(), e)))?;
        let file_name = path.file_name().unwrap_or_default();
        std::fs::rename(path, rejected_dir.join(file_name)).map_err(|e| {
            WorkerError::Inbox(format!(
                "cannot move {} to {}: {}",
                sanitize::redact_path(path),
                REJECTED_DIR,
                e
            ))
        })
    }
}

fn is_message_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobQueue, QueueSettings};
    use tempfile::TempDir;

    fn scanner(inbox: &Path, queue: Arc<LocalQueue>) -> InboxScanner {
        InboxScanner::new(inbox, queue).with_settle_time(Duration::ZERO)
    }

    fn queue() -> Arc<LocalQueue> {
        Arc::new(LocalQueue::new(QueueSettings {
            visibility_timeout: Duration::from_secs(60),
            max_receive_count: 3,
            dedup_window: Duration::from_secs(300),
            dead_letter_directory: None,
        }))
    }

    #[test]
    fn test_scan_missing_inbox() {
        let tmp = TempDir::new().unwrap();
        let scanner = scanner(&tmp.path().join("nope"), queue());
        assert_eq!(scanner.scan_once().unwrap(), ScanReport::default());
    }

    #[test]
    fn test_scan_enqueues_and_removes_files() {
        let tmp = TempDir::new().unwrap();
        let queue = queue();
        std::fs::write(
            tmp.path().join("001.json"),
            r#"{"file_key":"contracts/c1.pdf","contract_id":"c1"}"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let scanner = scanner(tmp.path(), Arc::clone(&queue));
        let report = scanner.scan_once().unwrap();
        assert_eq!(report.enqueued, 1);
        assert!(!tmp.path().join("001.json").exists());
        assert!(tmp.path().join("notes.txt").exists());

        let message = queue.receive().unwrap();
        assert_eq!(message.group_id, "c1");
    }

    #[test]
    fn test_scan_drops_duplicates() {
        let tmp = TempDir::new().unwrap();
        let queue = queue();
        let body = r#"{"file_key":"contracts/c1.pdf","contract_id":"c1"}"#;
        std::fs::write(tmp.path().join("a.json"), body).unwrap();
        std::fs::write(tmp.path().join("b.json"), body).unwrap();

        let scanner = scanner(tmp.path(), Arc::clone(&queue));
        let report = scanner.scan_once().unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unparseable_body_goes_to_default_group() {
        let tmp = TempDir::new().unwrap();
        let queue = queue();
        std::fs::write(tmp.path().join("bad.json"), "not json").unwrap();

        let scanner = scanner(tmp.path(), Arc::clone(&queue));
        scanner.scan_once().unwrap();
        assert_eq!(queue.receive().unwrap().group_id, DEFAULT_GROUP);
    }

    #[test]
    fn test_non_utf8_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("binary.json"), [0xff, 0xfe, 0x00]).unwrap();

        let scanner = scanner(tmp.path(), queue());
        let report = scanner.scan_once().unwrap();
        assert_eq!(report.rejected, 1);
        assert!(tmp.path().join(REJECTED_DIR).join("binary.json").exists());
    }

    #[test]
    fn test_file_still_being_written_is_left_in_place() {
        let tmp = TempDir::new().unwrap();
        let queue = queue();
        let path = tmp.path().join("c1.json");
        std::fs::write(&path, r#"{"file_key":"contracts/c1.pdf","contr"#).unwrap();

        let scanner = InboxScanner::new(tmp.path(), Arc::clone(&queue))
            .with_settle_time(Duration::from_secs(60));
        let report = scanner.scan_once().unwrap();

        assert_eq!(report.unsettled, 1);
        assert_eq!(report.enqueued, 0);
        assert!(path.exists());
        assert!(queue.is_empty());

        // Once the writer finishes and the file settles it is picked up whole
        std::fs::write(&path, r#"{"file_key":"contracts/c1.pdf","contract_id":"c1"}"#).unwrap();
        let report = scanner.with_settle_time(Duration::ZERO).scan_once().unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(queue.receive().unwrap().group_id, "c1");
    }

    #[test]
    fn test_watch_picks_up_existing_files_and_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let queue = queue();
        std::fs::write(
            tmp.path().join("c1.json"),
            r#"{"file_key":"contracts/c1.pdf","contract_id":"c1"}"#,
        )
        .unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher = scanner(tmp.path(), Arc::clone(&queue));
        let flag = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || watcher.watch(Duration::from_millis(50), flag));

        let mut waited = Duration::ZERO;
        while queue.is_empty() && waited < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();

        assert_eq!(queue.len(), 1);
        assert!(!tmp.path().join("c1.json").exists());
    }
}
