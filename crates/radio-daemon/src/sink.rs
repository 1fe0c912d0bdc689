use crate::BroadcastMessage;
use radio_core::protocol::Broadcast;
use radio_core::{NotificationSink, PlaybackStatus, SessionError, Station};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Fans session notifications out to connected clients.
///
/// State changes only raise a flag; the core loop publishes one full
/// [`radio_core::SessionView`] per handled event once it sees the flag.
pub struct BroadcastSink {
    tx: broadcast::Sender<BroadcastMessage>,
    state_dirty: bool,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            tx,
            state_dirty: false,
        }
    }

    /// Returns whether the state changed since the last call.
    pub fn take_state_dirty(&mut self) -> bool {
        std::mem::take(&mut self.state_dirty)
    }
}

impl NotificationSink for BroadcastSink {
    fn on_state_changed(&mut self, status: PlaybackStatus, station: Option<&Station>, metadata: &str) {
        let name = station.map(|s| s.name.as_str()).unwrap_or("-");
        info!("Now {:?}: {} | {}", status, name, metadata);
        self.state_dirty = true;
    }

    fn on_sleep_timer_tick(&mut self, remaining: Duration) {
        // no receivers is fine
        let _ = self.tx.send(BroadcastMessage::Notice(Broadcast::SleepTimer {
            remaining_secs: remaining.as_secs(),
        }));
    }

    fn on_error(&mut self, err: &SessionError) {
        if err.is_fatal() {
            error!("Session error: {}", err);
        } else {
            warn!("Session error: {}", err);
        }
        let _ = self.tx.send(BroadcastMessage::Notice(Broadcast::error(err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_flag_is_taken_once() {
        let (tx, _rx) = broadcast::channel(8);
        let mut sink = BroadcastSink::new(tx);
        assert!(!sink.take_state_dirty());
        sink.on_state_changed(PlaybackStatus::Buffering, None, "");
        assert!(sink.take_state_dirty());
        assert!(!sink.take_state_dirty());
    }

    #[test]
    fn test_errors_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut sink = BroadcastSink::new(tx);
        sink.on_error(&SessionError::RestartExhausted { attempts: 5 });
        match rx.try_recv() {
            Ok(BroadcastMessage::Notice(Broadcast::Error {
                kind, persistent, ..
            })) => {
                assert_eq!(kind, "restart_exhausted");
                assert!(persistent);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
