//! Progress reporting for running jobs
//!
//! Sinks are fire-and-forget: the orchestrator never waits on them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Snapshot of a job's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub current_page: u32,
    pub total_pages: u32,
    pub found: u64,
    pub processed: u64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Operator-facing log line tied to a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of progress updates
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);

    fn on_log(&self, line: LogLine);
}

/// Sink used when nothing is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _event: ProgressEvent) {}

    fn on_log(&self, _line: LogLine) {}
}

/// Message delivered through a [`ChannelProgress`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMessage {
    Progress(ProgressEvent),
    Log(LogLine),
}

/// Forwards updates over a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressMessage>,
}

impl ChannelProgress {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn send(&self, message: ProgressMessage) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(message) {
            tracing::trace!("Progress channel full, dropping update");
        }
    }
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, event: ProgressEvent) {
        self.send(ProgressMessage::Progress(event));
    }

    fn on_log(&self, line: LogLine) {
        self.send(ProgressMessage::Log(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(processed: u64) -> ProgressEvent {
        ProgressEvent {
            job_id: "job".to_string(),
            current_page: 1,
            total_pages: 1,
            found: 10,
            processed,
            progress_percent: processed as f64 * 10.0,
        }
    }

    #[test]
    fn test_channel_drops_when_full() {
        let (sink, mut rx) = ChannelProgress::new(2);
        sink.on_progress(event(1));
        sink.on_progress(event(2));
        sink.on_progress(event(3));

        assert_eq!(rx.try_recv().unwrap(), ProgressMessage::Progress(event(1)));
        assert_eq!(rx.try_recv().unwrap(), ProgressMessage::Progress(event(2)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_survives_closed_receiver() {
        let (sink, rx) = ChannelProgress::new(1);
        drop(rx);
        sink.on_log(LogLine {
            level: LogLevel::Info,
            message: "still fine".to_string(),
            timestamp: Utc::now(),
        });
    }
}
