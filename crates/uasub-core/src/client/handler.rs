// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification handlers.
//!
//! A [`NotificationHandler`] receives data changes and events for the nodes
//! it is registered on. Each invocation runs on its own task under the
//! session's handler timeout, so a handler may await, but work that takes
//! longer than a notification interval should be handed to a worker. The
//! [`RecordHandler`] shows the pattern: it only enqueues a [`Record`] and a
//! background writer performs the blocking file append.
//!
//! # Provided Handlers
//!
//! | Handler | Behavior |
//! |---------|----------|
//! | [`AlertHandler`] | Logs every notification through `tracing` |
//! | [`RecordHandler`] | Appends one line per notification to a [`RecordSink`] |
//! | [`ChannelHandler`] | Forwards notifications into an mpsc channel |
//! | [`FnHandler`] | Wraps a closure for data changes |

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::notification::{DataChange, EventNotification, Notification};
use crate::error::HandlerError;
use crate::types::{MonitorKind, NodeId};

/// Result of a handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

// =============================================================================
// NotificationHandler Trait
// =============================================================================

/// Receives notifications for the nodes it is subscribed to.
///
/// Both capabilities default to doing nothing, so a handler registered for
/// events only needs to implement [`on_event`](Self::on_event).
///
/// Returning an error, panicking or exceeding the handler timeout is logged
/// with the handler's [`name`](Self::name) and the node, and never affects
/// other handlers or later notifications.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once per data change notification.
    async fn on_data_change(&self, _change: &DataChange) -> HandlerResult {
        Ok(())
    }

    /// Called once per event notification.
    async fn on_event(&self, _event: &EventNotification) -> HandlerResult {
        Ok(())
    }
}

// =============================================================================
// AlertHandler
// =============================================================================

/// Logs notifications.
///
/// Data changes with a non-good status and events at or above the alert
/// severity are logged at `WARN`, everything else at `INFO`.
#[derive(Debug, Clone)]
pub struct AlertHandler {
    name: String,
    alert_severity: u16,
}

impl AlertHandler {
    /// Creates an alert handler with the given label.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alert_severity: 500,
        }
    }

    /// Sets the event severity that is logged as a warning.
    pub fn with_alert_severity(mut self, severity: u16) -> Self {
        self.alert_severity = severity;
        self
    }
}

impl Default for AlertHandler {
    fn default() -> Self {
        Self::new("alert")
    }
}

#[async_trait]
impl NotificationHandler for AlertHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
        if change.is_good() {
            info!(
                handler = %self.name,
                node = %change.node,
                value = %change.value,
                sequence = change.metadata.sequence_number,
                "Data change"
            );
        } else {
            warn!(
                handler = %self.name,
                node = %change.node,
                value = %change.value,
                status = %change.metadata.status,
                "Data change with non-good status"
            );
        }
        Ok(())
    }

    async fn on_event(&self, event: &EventNotification) -> HandlerResult {
        if event.payload.severity >= self.alert_severity {
            warn!(
                handler = %self.name,
                node = %event.node,
                severity = event.payload.severity,
                message = %event.payload.message,
                "Event"
            );
        } else {
            info!(
                handler = %self.name,
                node = %event.node,
                severity = event.payload.severity,
                message = %event.payload.message,
                "Event"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Record / RecordSink
// =============================================================================

/// One line of notification history.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// When the notification was received.
    pub timestamp: DateTime<Utc>,
    /// Notification kind.
    pub kind: MonitorKind,
    /// The monitored node.
    pub node: NodeId,
    /// Rendered value or event message.
    pub text: String,
}

impl Record {
    /// Builds a record from a data change.
    pub fn from_change(change: &DataChange) -> Self {
        Self {
            timestamp: change.metadata.received_at,
            kind: MonitorKind::DataChange,
            node: change.node.clone(),
            text: change.value.to_string(),
        }
    }

    /// Builds a record from an event.
    pub fn from_event(event: &EventNotification) -> Self {
        Self {
            timestamp: event.received_at,
            kind: MonitorKind::Event,
            node: event.node.clone(),
            text: format!("[{}] {}", event.payload.severity, event.payload.message),
        }
    }

    /// Formats the record as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.kind,
            self.node,
            self.text
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Blocking destination for records.
///
/// Called from a blocking-pool thread, never from the async runtime.
pub trait RecordSink: Send + Sync + 'static {
    /// Appends one record.
    fn append(&self, record: &Record) -> io::Result<()>;

    /// Flushes buffered output.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// FileRecordSink
// =============================================================================

/// Appends records to one text file per day.
///
/// Files are named `<prefix><YYYYMMDD>.txt` inside the sink directory and
/// are selected by the record's timestamp. Each record is on disk once
/// `append` returns.
pub struct FileRecordSink {
    dir: PathBuf,
    prefix: String,
    current: Mutex<Option<(NaiveDate, BufWriter<File>)>>,
}

impl FileRecordSink {
    /// Default file name prefix.
    pub const DEFAULT_PREFIX: &'static str = "workfile";

    /// Creates a sink writing into `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: Self::DEFAULT_PREFIX.to_string(),
            current: Mutex::new(None),
        })
    }

    /// Sets the file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Returns the file used for records of the given date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}.txt", self.prefix, date.format("%Y%m%d")))
    }

    fn open(&self, date: NaiveDate) -> io::Result<BufWriter<File>> {
        let path = self.path_for(date);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Opened record file");
        Ok(BufWriter::new(file))
    }
}

impl RecordSink for FileRecordSink {
    fn append(&self, record: &Record) -> io::Result<()> {
        let date = record.timestamp.date_naive();
        let mut current = self.current.lock();

        let rotate = !matches!(current.as_ref(), Some((open_date, _)) if *open_date == date);
        if rotate {
            if let Some((_, mut writer)) = current.take() {
                writer.flush()?;
            }
            *current = Some((date, self.open(date)?));
        }

        match current.as_mut() {
            Some((_, writer)) => {
                writeln!(writer, "{}", record.to_line())?;
                writer.flush()
            }
            None => Err(io::Error::other("record file not open")),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.current.lock().as_mut() {
            Some((_, writer)) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FileRecordSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRecordSink")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .finish()
    }
}

// =============================================================================
// MemoryRecordSink
// =============================================================================

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<Record>>,
}

impl MemoryRecordSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored records.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Returns the stored records formatted as lines.
    pub fn lines(&self) -> Vec<String> {
        self.records.lock().iter().map(Record::to_line).collect()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemoryRecordSink {
    fn append(&self, record: &Record) -> io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// RecordHandler
// =============================================================================

enum WriterCommand {
    Append(Record),
    Flush(oneshot::Sender<io::Result<()>>),
}

#[derive(Debug, Default)]
struct WriterStats {
    written: AtomicU64,
    failed: AtomicU64,
}

/// Hands notifications to a background writer that appends them to a sink.
///
/// The handler itself only enqueues; a full queue fails the invocation
/// instead of waiting. Must be created inside a Tokio runtime.
pub struct RecordHandler {
    name: String,
    sender: mpsc::Sender<WriterCommand>,
    stats: Arc<WriterStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordHandler {
    /// Default queue capacity.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Creates a record handler writing to `sink`.
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self::with_capacity(sink, Self::DEFAULT_CAPACITY)
    }

    /// Creates a record handler with a custom queue capacity.
    pub fn with_capacity(sink: Arc<dyn RecordSink>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(WriterStats::default());
        let worker = tokio::spawn(run_writer(sink, receiver, Arc::clone(&stats)));

        Self {
            name: "record".to_string(),
            sender,
            stats,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Sets the diagnostic name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Waits until every record enqueued so far is appended and flushed.
    pub async fn flush(&self) -> HandlerResult {
        let (reply, done) = oneshot::channel();
        self.sender
            .send(WriterCommand::Flush(reply))
            .await
            .map_err(|_| HandlerError::WorkerStopped)?;
        done.await
            .map_err(|_| HandlerError::WorkerStopped)?
            .map_err(HandlerError::from)
    }

    /// Flushes and stops the writer.
    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            warn!(handler = %self.name, error = %e, "Record flush failed during shutdown");
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
    }

    /// Number of records appended.
    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    /// Number of appends that failed.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    fn enqueue(&self, record: Record) -> HandlerResult {
        self.sender
            .try_send(WriterCommand::Append(record))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HandlerError::failed("record queue full"),
                mpsc::error::TrySendError::Closed(_) => HandlerError::WorkerStopped,
            })
    }
}

impl fmt::Debug for RecordHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordHandler")
            .field("name", &self.name)
            .field("written", &self.written())
            .field("failed", &self.failed())
            .finish()
    }
}

#[async_trait]
impl NotificationHandler for RecordHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
        self.enqueue(Record::from_change(change))
    }

    async fn on_event(&self, event: &EventNotification) -> HandlerResult {
        self.enqueue(Record::from_event(event))
    }
}

async fn run_writer(
    sink: Arc<dyn RecordSink>,
    mut receiver: mpsc::Receiver<WriterCommand>,
    stats: Arc<WriterStats>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            WriterCommand::Append(record) => {
                let sink = Arc::clone(&sink);
                match tokio::task::spawn_blocking(move || sink.append(&record)).await {
                    Ok(Ok(())) => {
                        stats.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Record append failed");
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "Record append task failed");
                    }
                }
            }
            WriterCommand::Flush(reply) => {
                let sink = Arc::clone(&sink);
                let result = tokio::task::spawn_blocking(move || sink.flush())
                    .await
                    .unwrap_or_else(|e| Err(io::Error::other(e)));
                let _ = reply.send(result);
            }
        }
    }
    debug!("Record writer stopped");
}

// =============================================================================
// ChannelHandler
// =============================================================================

/// Forwards notifications into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<Notification>,
}

impl ChannelHandler {
    /// Creates a channel handler.
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Creates a channel handler with its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn forward(&self, notification: Notification) -> HandlerResult {
        self.sender
            .send(notification)
            .await
            .map_err(|_| HandlerError::failed("notification receiver dropped"))
    }
}

#[async_trait]
impl NotificationHandler for ChannelHandler {
    fn name(&self) -> &str {
        "channel"
    }

    async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
        self.forward(change.clone().into()).await
    }

    async fn on_event(&self, event: &EventNotification) -> HandlerResult {
        self.forward(event.clone().into()).await
    }
}

// =============================================================================
// FnHandler
// =============================================================================

/// Wraps a synchronous closure as a data change handler.
///
/// The closure runs on the blocking thread pool, so it may do file or
/// network I/O without stalling delivery, and the handler timeout still
/// applies to it.
///
/// ```
/// use uasub_core::client::{DataChange, FnHandler};
///
/// let handler = FnHandler::new("print", |change: &DataChange| {
///     println!("{} = {}", change.node, change.value);
///     Ok(())
/// });
/// ```
pub struct FnHandler<F> {
    name: String,
    f: Arc<F>,
}

impl<F> FnHandler<F>
where
    F: Fn(&DataChange) -> HandlerResult + Send + Sync + 'static,
{
    /// Creates a closure handler.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> NotificationHandler for FnHandler<F>
where
    F: Fn(&DataChange) -> HandlerResult + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
        let f = Arc::clone(&self.f);
        let change = change.clone();
        match tokio::task::spawn_blocking(move || (*f)(&change)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Panicked),
            Err(e) => Err(HandlerError::failed(e.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{DataValue, EventPayload};
    use chrono::TimeZone;

    fn change(value: f64, sequence: u32) -> DataChange {
        DataChange::from_frame(NodeId::numeric(2, 1001), 1, sequence, DataValue::new(value))
    }

    #[test]
    fn test_record_line_format() {
        let record = Record {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap(),
            kind: MonitorKind::DataChange,
            node: NodeId::numeric(2, 1001),
            text: "42".to_string(),
        };
        assert_eq!(
            record.to_line(),
            "2024-03-05T08:30:00.000Z data_change ns=2;i=1001 42"
        );
    }

    #[test]
    fn test_file_sink_daily_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileRecordSink::new(dir.path().join("records")).unwrap();

        let day1 = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 6, 0, 1, 0).unwrap();
        for (timestamp, text) in [(day1, "a"), (day1, "b"), (day2, "c")] {
            let record = Record {
                timestamp,
                kind: MonitorKind::DataChange,
                node: NodeId::numeric(1, 1),
                text: text.to_string(),
            };
            sink.append(&record).unwrap();
        }
        sink.flush().unwrap();

        let first = fs::read_to_string(dir.path().join("records/workfile20240305.txt")).unwrap();
        let second = fs::read_to_string(dir.path().join("records/workfile20240306.txt")).unwrap();
        assert_eq!(first.lines().count(), 2);
        assert_eq!(second.lines().count(), 1);
        assert!(second.ends_with(" c\n"));
    }

    #[test]
    fn test_file_sink_append_is_durable_without_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileRecordSink::new(dir.path()).unwrap().with_prefix("log");
        let timestamp = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let record = Record {
            timestamp,
            kind: MonitorKind::DataChange,
            node: NodeId::numeric(2, 1001),
            text: "17".to_string(),
        };
        sink.append(&record).unwrap();

        let content = fs::read_to_string(sink.path_for(timestamp.date_naive())).unwrap();
        assert_eq!(content, format!("{}\n", record.to_line()));
    }

    #[tokio::test]
    async fn test_record_handler_writes_through_worker() {
        let sink = Arc::new(MemoryRecordSink::new());
        let handler = RecordHandler::new(sink.clone());

        for i in 1..=3 {
            handler.on_data_change(&change(i as f64, i)).await.unwrap();
        }
        let event = EventNotification {
            node: NodeId::numeric(2, 5),
            payload: EventPayload::new("Overheat", 900),
            subscription_id: 1,
            sequence_number: 4,
            received_at: Utc::now(),
        };
        handler.on_event(&event).await.unwrap();
        handler.flush().await.unwrap();

        assert_eq!(handler.written(), 4);
        let lines = sink.lines();
        assert!(lines[0].ends_with("ns=2;i=1001 1"));
        assert!(lines[3].ends_with("event ns=2;i=5 [900] Overheat"));
    }

    #[tokio::test]
    async fn test_record_handler_after_shutdown() {
        let handler = RecordHandler::new(Arc::new(MemoryRecordSink::new()));
        handler.shutdown().await;

        let result = handler.on_data_change(&change(1.0, 1)).await;
        assert!(matches!(result, Err(HandlerError::WorkerStopped)));
    }

    #[tokio::test]
    async fn test_channel_handler_forwards() {
        let (handler, mut rx) = ChannelHandler::with_channel(4);
        handler.on_data_change(&change(7.0, 1)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence_number(), 1);

        drop(rx);
        assert!(handler.on_data_change(&change(8.0, 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_fn_handler_and_defaults() {
        let handler = FnHandler::new("reject", |_change: &DataChange| Err(HandlerError::failed("nope")));
        assert_eq!(handler.name(), "reject");
        assert!(handler.on_data_change(&change(1.0, 1)).await.is_err());

        let event = EventNotification {
            node: NodeId::numeric(0, 2253),
            payload: EventPayload::default(),
            subscription_id: 1,
            sequence_number: 1,
            received_at: Utc::now(),
        };
        assert!(handler.on_event(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_handler_panic_is_reported() {
        let handler = FnHandler::new("panics", |_change: &DataChange| -> HandlerResult {
            panic!("closure failure")
        });
        let result = handler.on_data_change(&change(1.0, 1)).await;
        assert!(matches!(result, Err(HandlerError::Panicked)));
    }

    #[tokio::test]
    async fn test_alert_handler_never_fails() {
        let handler = AlertHandler::default();
        let bad = DataChange::from_frame(
            NodeId::numeric(2, 1),
            1,
            1,
            DataValue::new(0i32).with_status(crate::client::transport::StatusCode(0x8000_0000)),
        );
        assert!(handler.on_data_change(&bad).await.is_ok());
        assert_eq!(handler.name(), "alert");
    }
}
