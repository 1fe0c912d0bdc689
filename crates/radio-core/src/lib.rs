//! Playback-session core for an internet radio player.
//!
//! The crate is a synchronous state-machine library.  Audio streaming,
//! station storage, persistence and notifications are collaborators behind
//! the traits in [`engine`], [`station`], [`store`] and [`notify`]; the
//! [`coordinator::SessionCoordinator`] binds them together.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod history;
pub mod machine;
pub mod notify;
pub mod platform;
pub mod protocol;
pub mod sleep_timer;
pub mod station;
pub mod store;

pub use coordinator::{ProgressSnapshot, SessionCoordinator, SessionView};
pub use engine::{EngineEvent, EngineEventKind, PlaybackEngine};
pub use error::{SessionError, StoreError};
pub use history::MetadataHistory;
pub use machine::{AttemptId, PlaybackStateMachine, PlaybackStatus, Transition};
pub use notify::NotificationSink;
pub use sleep_timer::SleepTimer;
pub use station::{Direction, Station, StationCollection, StationList};
pub use store::{JsonStateStore, SessionSnapshot, StateStore};
