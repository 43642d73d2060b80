// ambassador-providers/src/audit.rs
// ============================================================================
// Module: File-Based Audit Sink
// Description: Reference audit sink writing JSON-lines events to disk.
// Purpose: Durably record every pipeline decision, with a bounded buffered
//          ("fail-open") mode and a blocking ("fail-closed") mode.
// Dependencies: ambassador-core, tokio, serde_json
// ============================================================================

//! ## Overview
//! In blocking mode, [`FileAuditSink::record`] writes the event to disk
//! before returning, so a write failure propagates straight back to the
//! pipeline (fail-closed). In buffered mode it pushes onto a fixed-capacity
//! ring channel drained by a background writer task; once the ring is full
//! the oldest queued event is dropped and an `audit_buffer_overflow` event
//! is recorded at the next successful flush (spec.md §4.8, Open Question c).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use ambassador_core::AuditError;
use ambassador_core::AuditEvent;
use ambassador_core::AuditSink;
use ambassador_core::Timestamp;
use async_trait::async_trait;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum audit log file size before rotation, in bytes (100MB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;
/// Default maximum audit log retention age before rotation, in seconds (90 days).
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 90 * 24 * 60 * 60;
/// Default capacity of the buffered-mode ring channel.
pub const DEFAULT_RING_CAPACITY: usize = 10_000;
/// How long [`FileAuditSink::flush`] waits for the buffered-mode drain task
/// to catch up before giving up and reporting an error.
pub const DEFAULT_FLUSH_TIMEOUT_SECONDS: u64 = 5;

// ============================================================================
// SECTION: Failure Mode
// ============================================================================

/// Whether the sink blocks on write failures or buffers past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// `record` fails immediately when the write fails (fail-closed).
    Blocking,
    /// `record` enqueues onto a bounded ring and always succeeds, short of
    /// the channel itself being closed (fail-open).
    Buffered,
}

// ============================================================================
// SECTION: Serialization
// ============================================================================

fn to_json_line(event: &AuditEvent) -> String {
    json!({
        "timestamp": event.timestamp.as_offset_date_time().to_string(),
        "user_id": event.user_id.as_ref().map(ToString::to_string),
        "client_id": event.client_id.as_ref().map(ToString::to_string),
        "event_type": event.event_type,
        "detail": event.detail,
        "outcome": event.outcome,
    })
    .to_string()
}

// ============================================================================
// SECTION: Rotating Writer
// ============================================================================

struct RotatingWriter {
    directory: PathBuf,
    base_name: String,
    max_file_bytes: u64,
    max_age_seconds: u64,
    current_path: PathBuf,
    current_bytes: AtomicU64,
    opened_at: Timestamp,
}

impl RotatingWriter {
    fn new(directory: PathBuf, base_name: String, max_file_bytes: u64, max_age_seconds: u64) -> Self {
        let current_path = directory.join(format!("{base_name}.jsonl"));
        Self {
            directory,
            base_name,
            max_file_bytes,
            max_age_seconds,
            current_path,
            current_bytes: AtomicU64::new(0),
            opened_at: Timestamp::now(),
        }
    }

    async fn append_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        if self.should_rotate() {
            self.rotate().await?;
        }

        tokio::fs::create_dir_all(&self.directory).await?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.current_path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        self.current_bytes.fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
        Ok(())
    }

    fn should_rotate(&self) -> bool {
        let age_exceeded = Timestamp::now().seconds_since(self.opened_at) > self.max_age_seconds;
        let size_exceeded = self.current_bytes.load(Ordering::Relaxed) > self.max_file_bytes;
        age_exceeded || size_exceeded
    }

    async fn rotate(&mut self) -> Result<(), std::io::Error> {
        if tokio::fs::try_exists(&self.current_path).await.unwrap_or(false) {
            let archived_name = format!("{}.{}.jsonl", self.base_name, Timestamp::now().as_offset_date_time().unix_timestamp());
            let archived_path = self.directory.join(archived_name);
            tokio::fs::rename(&self.current_path, archived_path).await?;
        }
        self.current_bytes.store(0, Ordering::Relaxed);
        self.opened_at = Timestamp::now();
        Ok(())
    }
}

// ============================================================================
// SECTION: Buffered-Mode Channel Items
// ============================================================================

/// An item placed on the buffered-mode ring channel: either an event to
/// write, or a flush barrier to acknowledge once every item queued ahead of
/// it has been written.
enum BufferedItem {
    /// An event awaiting a durable write.
    Event(AuditEvent),
    /// A flush request; the drain task signals the sender once every item
    /// queued ahead of this one has been written.
    Barrier(oneshot::Sender<()>),
}

// ============================================================================
// SECTION: File Audit Sink
// ============================================================================

/// File-based [`AuditSink`] writing newline-delimited JSON.
pub struct FileAuditSink {
    writer: Arc<Mutex<RotatingWriter>>,
    mode: FailureMode,
    buffered_sender: Option<mpsc::Sender<BufferedItem>>,
    dropped_count: Arc<AtomicU64>,
}

impl FileAuditSink {
    /// Builds a sink rooted at `directory/<base_name>.jsonl`, rotating at
    /// `max_file_bytes` or `max_age_seconds`, whichever comes first.
    ///
    /// In [`FailureMode::Buffered`] mode this spawns a background task on
    /// the current Tokio runtime that drains the ring channel.
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        base_name: impl Into<String>,
        mode: FailureMode,
        max_file_bytes: u64,
        max_age_seconds: u64,
    ) -> Self {
        let writer = Arc::new(Mutex::new(RotatingWriter::new(
            directory.into(),
            base_name.into(),
            max_file_bytes,
            max_age_seconds,
        )));
        let dropped_count = Arc::new(AtomicU64::new(0));

        let buffered_sender = match mode {
            FailureMode::Blocking => None,
            FailureMode::Buffered => {
                let (sender, mut receiver) = mpsc::channel::<BufferedItem>(DEFAULT_RING_CAPACITY);
                let writer = Arc::clone(&writer);
                let dropped_count = Arc::clone(&dropped_count);
                tokio::spawn(async move {
                    while let Some(item) = receiver.recv().await {
                        let event = match item {
                            BufferedItem::Event(event) => event,
                            BufferedItem::Barrier(acknowledge) => {
                                let _ignored_dropped_receiver = acknowledge.send(());
                                continue;
                            }
                        };

                        let mut writer = writer.lock().await;
                        let _ = writer.append_line(&to_json_line(&event)).await;
                        let dropped = dropped_count.swap(0, Ordering::Relaxed);
                        if dropped > 0 {
                            let overflow = AuditEvent {
                                timestamp: Timestamp::now(),
                                user_id: None,
                                client_id: None,
                                event_type: "audit_buffer_overflow".to_string(),
                                detail: json!({ "dropped_events": dropped }),
                                outcome: "degraded".to_string(),
                            };
                            let _ = writer.append_line(&to_json_line(&overflow)).await;
                        }
                    }
                });
                Some(sender)
            }
        };

        Self { writer, mode, buffered_sender, dropped_count }
    }

    /// Convenience constructor using the default rotation thresholds.
    #[must_use]
    pub fn with_defaults(directory: impl Into<PathBuf>, base_name: impl Into<String>, mode: FailureMode) -> Self {
        Self::new(directory, base_name, mode, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_AGE_SECONDS)
    }

    /// Returns the path the sink is currently appending to.
    pub async fn current_path(&self) -> PathBuf {
        self.writer.lock().await.current_path.clone()
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        match self.mode {
            FailureMode::Blocking => {
                let mut writer = self.writer.lock().await;
                writer
                    .append_line(&to_json_line(&event))
                    .await
                    .map_err(|error| AuditError::Sink(error.to_string()))
            }
            FailureMode::Buffered => {
                #[allow(clippy::expect_used, reason = "buffered mode always constructs a sender")]
                let sender = self.buffered_sender.as_ref().expect("buffered sender present in buffered mode");
                if let Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) =
                    sender.try_send(BufferedItem::Event(event))
                {
                    self.dropped_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        }
    }

    async fn emit_batch(&self, events: Vec<AuditEvent>) -> Result<(), AuditError> {
        for event in events {
            self.record(event).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AuditError> {
        match self.mode {
            // Every blocking-mode write already calls `append_line`, which
            // itself flushes the file handle, before `record` returns.
            FailureMode::Blocking => Ok(()),
            FailureMode::Buffered => {
                #[allow(clippy::expect_used, reason = "buffered mode always constructs a sender")]
                let sender = self.buffered_sender.as_ref().expect("buffered sender present in buffered mode");
                let (acknowledge, barrier_reached) = oneshot::channel();
                if sender.send(BufferedItem::Barrier(acknowledge)).await.is_err() {
                    return Err(AuditError::Sink("buffered audit drain task is no longer running".to_string()));
                }

                let timeout = std::time::Duration::from_secs(DEFAULT_FLUSH_TIMEOUT_SECONDS);
                match tokio::time::timeout(timeout, barrier_reached).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_recv_error)) => Err(AuditError::Sink("buffered audit drain task dropped the flush barrier".to_string())),
                    Err(_elapsed) => Err(AuditError::Sink("timed out waiting for buffered audit sink to drain".to_string())),
                }
            }
        }
    }
}

/// Reads back every JSON-lines audit record written to `path`, for tests
/// and operator inspection tooling.
///
/// # Errors
///
/// Returns an I/O error when the file cannot be read.
pub async fn read_audit_lines(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents.lines().map(ToString::to_string).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    fn sample_event(event_type: &str) -> AuditEvent {
        AuditEvent {
            timestamp: Timestamp::now(),
            user_id: None,
            client_id: None,
            event_type: event_type.to_string(),
            detail: json!({ "tool": "github.create_repo" }),
            outcome: "success".to_string(),
        }
    }

    #[tokio::test]
    async fn blocking_mode_writes_immediately() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sink = FileAuditSink::with_defaults(temp_dir.path(), "audit", FailureMode::Blocking);
        sink.record(sample_event("tool_invocation")).await.expect("records");

        let path = sink.current_path().await;
        let lines = read_audit_lines(&path).await.expect("reads lines");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("tool_invocation"));
    }

    #[tokio::test]
    async fn buffered_mode_flush_waits_for_the_drain_task() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sink = FileAuditSink::with_defaults(temp_dir.path(), "audit", FailureMode::Buffered);
        sink.record(sample_event("tool_invocation")).await.expect("records");
        sink.flush().await.expect("flush drains the ring");

        let path = sink.current_path().await;
        let lines = read_audit_lines(&path).await.expect("reads lines");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("tool_invocation"));
    }

    #[tokio::test]
    async fn blocking_mode_flush_is_a_no_op() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sink = FileAuditSink::with_defaults(temp_dir.path(), "audit", FailureMode::Blocking);
        sink.record(sample_event("tool_invocation")).await.expect("records");
        sink.flush().await.expect("blocking mode has nothing to drain");
    }

    #[tokio::test]
    async fn emit_batch_records_every_event() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sink = FileAuditSink::with_defaults(temp_dir.path(), "audit", FailureMode::Blocking);
        sink.emit_batch(vec![sample_event("authn_success"), sample_event("tool_invocation")]).await.expect("records batch");

        let path = sink.current_path().await;
        let lines = read_audit_lines(&path).await.expect("reads lines");
        assert_eq!(lines.len(), 2);
    }
}
