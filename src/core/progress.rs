use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Pipeline stage reported with each progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Bounds,
    Search,
    Scoring,
    Alignment,
    Masking,
    GapFilling,
    Classification,
    Output,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-100
    pub percentage: u8,
    pub stage: Stage,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(percentage: u8, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            stage,
            message: message.into(),
        }
    }
}

/// Consumer of progress events
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events over a channel; a closed receiver is ignored
pub struct ChannelProgress {
    sender: Mutex<Sender<ProgressEvent>>,
}

impl ChannelProgress {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender: Mutex::new(sender) }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event);
        }
    }
}

/// Writes events to the log at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: ProgressEvent) {
        log::info!("[{:>3}%] {:?}: {}", event.percentage, event.stage, event.message);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_closure_and_channel_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: ProgressEvent| seen.lock().unwrap().push(event.percentage);
        sink.report(ProgressEvent::new(40, Stage::Alignment, "aligning"));
        sink.report(ProgressEvent::new(180, Stage::Complete, "done"));
        assert_eq!(*seen.lock().unwrap(), vec![40, 100]);

        let (tx, rx) = mpsc::channel();
        let channel = ChannelProgress::new(tx);
        channel.report(ProgressEvent::new(10, Stage::Search, "searching"));
        assert_eq!(rx.recv().unwrap().stage, Stage::Search);
        drop(rx);
        channel.report(ProgressEvent::new(20, Stage::Scoring, "ignored"));
    }
}
