use crate::error::SessionError;
use crate::machine::AttemptId;

/// Adapter around the audio streaming library.
///
/// Calls are fire-and-forget: an implementation queues the request and
/// returns.  Results come back later as [`EngineEvent`]s tagged with the
/// attempt they belong to.  An `Err` means the engine could not be reached
/// at all.
pub trait PlaybackEngine {
    fn prepare(
        &mut self,
        attempt: AttemptId,
        stream_uri: &str,
        content_type: Option<&str>,
    ) -> Result<(), SessionError>;

    fn set_play_when_ready(&mut self, play: bool) -> Result<(), SessionError>;

    fn stop(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    Playing,
    Buffering,
    /// Paused by the user or the OS (e.g. audio focus loss).
    Paused,
    /// Stopped outside of a session command.
    Stopped,
    /// The stream ended unexpectedly.
    EndOfStream,
    /// Now-playing title; `None` when the stream sent an empty or
    /// unsupported entry.
    Metadata(Option<String>),
    /// The engine failed to play the attempt.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub attempt: AttemptId,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(attempt: AttemptId, kind: EngineEventKind) -> Self {
        Self { attempt, kind }
    }
}
