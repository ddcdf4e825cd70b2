//! Human-readable session status updates.

use crossbeam_channel::Sender;

/// Receives status lines in the order they are issued. Publishing never blocks
/// on the consumer.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: String);
}

/// Forwards updates to a single consumer thread.
impl StatusSink for Sender<String> {
    fn publish(&self, status: String) {
        if self.send(status).is_err() {
            log::debug!("Status consumer is gone, dropping update");
        }
    }
}

/// Writes updates to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn publish(&self, status: String) {
        log::info!("{}", status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_preserves_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink: &dyn StatusSink = &tx;
        sink.publish("Get ready...".to_string());
        sink.publish("Prompt: Octave".to_string());
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec!["Get ready...", "Prompt: Octave"]);
    }

    #[test]
    fn test_publishing_after_consumer_left_is_silent() {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        drop(rx);
        tx.publish("Session ended.".to_string());
    }
}
