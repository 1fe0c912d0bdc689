//! Playback state machine.
//!
//! Transitions:
//!
//! ```text
//!   Stopped ──prepare──▶ Buffering ──playing──▶ Playing ──paused──▶ Paused
//!      ▲                    ▲  │                  │                   │
//!      │                    │  └──────────────────┼───────────────────┤
//!      │                    └── end-of-stream ────┘ (restart < max)   │
//!      └────────── stop / end-of-stream (restarts exhausted) ─────────┘
//! ```
//!
//! The machine only decides the canonical status; side effects (engine
//! calls, persistence, notifications) are applied by the coordinator based
//! on the returned [`Transition`].
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SessionError};
use crate::station::Station;

pub const DEFAULT_MAX_RESTARTS: u8 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Buffering,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Playing or about to be.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Buffering)
    }
}

/// Identifies one station-preparation attempt.  Engine events carry the
/// attempt they belong to so late events for a superseded attempt can be
/// dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PlaybackStatus,
    pub to: PlaybackStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Leaving `Playing` makes the shown metadata stale.
    pub fn left_playing(&self) -> bool {
        self.changed() && self.from == PlaybackStatus::Playing
    }
}

/// Outcome of an unexpected end of stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOfStream {
    /// Re-prepare this station; `attempt` is the 1-based restart number.
    Restart { station: Station, attempt: u8 },
    /// Restart budget spent, status forced to `Stopped`.
    Exhausted(Transition),
}

#[derive(Debug)]
pub struct PlaybackStateMachine {
    station: Option<Station>,
    status: PlaybackStatus,
    /// Attempt whose engine events are currently accepted.
    attempt: Option<AttemptId>,
    next_attempt: u64,
    restarts: u8,
    max_restarts: u8,
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESTARTS)
    }
}

impl PlaybackStateMachine {
    pub fn new(max_restarts: u8) -> Self {
        Self {
            station: None,
            status: PlaybackStatus::Stopped,
            attempt: None,
            next_attempt: 1,
            restarts: 0,
            max_restarts,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn station(&self) -> Option<&Station> {
        self.station.as_ref()
    }

    pub fn attempt(&self) -> Option<AttemptId> {
        self.attempt
    }

    pub fn restart_count(&self) -> u8 {
        self.restarts
    }

    pub fn max_restarts(&self) -> u8 {
        self.max_restarts
    }

    pub fn reset_restarts(&mut self) {
        self.restarts = 0;
    }

    /// Hand out a fresh attempt id.  Ids are never reused, even when the
    /// preparation they were reserved for is abandoned.
    pub fn reserve_attempt(&mut self) -> AttemptId {
        let id = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        id
    }

    pub fn accepts(&self, attempt: AttemptId) -> bool {
        self.attempt == Some(attempt)
    }

    /// Make `station` current and enter `Buffering` under `attempt`.
    pub fn prepare(&mut self, station: Station, attempt: AttemptId) -> Result<Transition> {
        if !station.is_valid() {
            return Err(SessionError::InvalidStation);
        }
        self.station = Some(station);
        self.attempt = Some(attempt);
        Ok(self.set_status(PlaybackStatus::Buffering))
    }

    pub fn on_playing(&mut self) -> Transition {
        self.restarts = 0;
        self.set_status(PlaybackStatus::Playing)
    }

    pub fn on_paused(&mut self) -> Transition {
        self.set_status(PlaybackStatus::Paused)
    }

    pub fn on_buffering(&mut self) -> Transition {
        if self.status == PlaybackStatus::Stopped {
            return self.unchanged();
        }
        self.set_status(PlaybackStatus::Buffering)
    }

    /// Stop playback and stop listening to the current attempt.
    pub fn stop(&mut self) -> Transition {
        self.attempt = None;
        self.set_status(PlaybackStatus::Stopped)
    }

    pub fn on_end_of_stream(&mut self) -> EndOfStream {
        if let Some(station) = self.station.clone() {
            if self.restarts < self.max_restarts {
                self.restarts += 1;
                warn!(
                    "stream ended, restarting '{}' (attempt {}/{})",
                    station.name, self.restarts, self.max_restarts
                );
                return EndOfStream::Restart {
                    station,
                    attempt: self.restarts,
                };
            }
        }
        EndOfStream::Exhausted(self.stop())
    }

    fn unchanged(&self) -> Transition {
        Transition {
            from: self.status,
            to: self.status,
        }
    }

    fn set_status(&mut self, to: PlaybackStatus) -> Transition {
        let from = self.status;
        if from != to {
            info!("playback status {:?} → {:?}", from, to);
        }
        self.status = to;
        Transition { from, to }
    }
}
