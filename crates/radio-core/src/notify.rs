use std::time::Duration;

use crate::error::SessionError;
use crate::machine::PlaybackStatus;
use crate::station::Station;

/// Receives read-only updates for the notification / UI layer.
pub trait NotificationSink {
    fn on_state_changed(&mut self, status: PlaybackStatus, station: Option<&Station>, metadata: &str);

    fn on_sleep_timer_tick(&mut self, remaining: Duration);

    fn on_error(&mut self, error: &SessionError);
}
