//! SessionCoordinator: owns all mutable playback-session state.
//!
//! Commands and engine events both go through `&mut self`, so whoever owns
//! the coordinator (the daemon keeps it inside one event loop) gets
//! linearizable mutations for free.  Every station preparation gets a fresh
//! [`AttemptId`]; engine events tagged with any other attempt are dropped.
//!
//! ```text
//!   engine event ──▶ on_engine_event ──▶ PlaybackStateMachine ──▶ Transition
//!                                   └──▶ MetadataHistory            │
//!                                                                   ▼
//!                                         StateStore::save_snapshot + NotificationSink
//! ```
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::engine::{EngineEvent, EngineEventKind, PlaybackEngine};
use crate::error::{Result, SessionError, StoreError};
use crate::history::MetadataHistory;
use crate::machine::{AttemptId, EndOfStream, PlaybackStateMachine, PlaybackStatus, Transition};
use crate::notify::NotificationSink;
use crate::sleep_timer::SleepTimer;
use crate::station::{Direction, Station, StationCollection};
use crate::store::{SessionSnapshot, StateStore};

/// Answer to a periodic progress poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    /// Oldest to newest.
    pub metadata_history: Vec<String>,
    pub sleep_remaining: Option<Duration>,
}

/// Read-only view of the session, handed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionView {
    pub station: Option<Station>,
    pub status: PlaybackStatus,
    pub metadata: String,
    pub restart_count: u8,
    pub sleep_remaining_secs: Option<u64>,
}

pub struct SessionCoordinator<C, E, S, N> {
    collection: C,
    engine: E,
    store: S,
    sink: N,
    machine: PlaybackStateMachine,
    history: MetadataHistory,
    sleep_timer: SleepTimer,
    sleep_duration: Duration,
}

impl<C, E, S, N> SessionCoordinator<C, E, S, N>
where
    C: StationCollection,
    E: PlaybackEngine,
    S: StateStore,
    N: NotificationSink,
{
    /// Build a session and restore the persisted metadata history.
    pub fn new(config: &SessionConfig, collection: C, engine: E, store: S, sink: N) -> Self {
        let mut history = MetadataHistory::new(config.history_capacity, config.max_entry_len);
        history.restore(store.load_metadata_history());
        debug!("session: restored {} history entries", history.len());

        Self {
            collection,
            engine,
            store,
            sink,
            machine: PlaybackStateMachine::new(config.max_restarts),
            history,
            sleep_timer: SleepTimer::default(),
            sleep_duration: config.sleep_duration(),
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> PlaybackStatus {
        self.machine.status()
    }

    pub fn station(&self) -> Option<&Station> {
        self.machine.station()
    }

    /// Attempt whose engine events are currently accepted.
    pub fn attempt(&self) -> Option<AttemptId> {
        self.machine.attempt()
    }

    pub fn restart_count(&self) -> u8 {
        self.machine.restart_count()
    }

    pub fn history(&self) -> &MetadataHistory {
        &self.history
    }

    pub fn sleep_remaining(&self) -> Option<Duration> {
        self.sleep_timer.remaining()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut N {
        &mut self.sink
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            station: self.machine.station().cloned(),
            status: self.machine.status(),
            metadata: self.history.latest().to_string(),
            restart_count: self.machine.restart_count(),
            sleep_remaining_secs: self.sleep_timer.remaining().map(|d| d.as_secs()),
        }
    }

    pub fn request_progress_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            metadata_history: self.history.all().to_vec(),
            sleep_remaining: self.sleep_timer.remaining(),
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    /// Play the station with `id`; unknown ids fall back to the first
    /// station of the collection.
    pub fn play_station(&mut self, id: &str) -> Result<()> {
        let station = match self.collection.get_by_id(id) {
            Some(s) => s,
            None => {
                let first = self
                    .collection
                    .all()
                    .into_iter()
                    .next()
                    .ok_or(SessionError::NoStationsAvailable)?;
                info!("session: station '{}' not found, using '{}'", id, first.name);
                first
            }
        };
        self.begin_lifecycle(station)
    }

    /// Play a raw stream address without looking it up in the collection.
    pub fn play_stream_directly(&mut self, uri: &str) -> Result<()> {
        self.begin_lifecycle(Station::transient(uri.trim()))
    }

    pub fn stop(&mut self) -> Result<()> {
        self.engine.stop()?;
        self.sleep_timer.cancel();
        let t = self.machine.stop();
        info!("session: stopped");
        self.apply(t);
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        self.step(Direction::Next)
    }

    pub fn previous(&mut self) -> Result<()> {
        self.step(Direction::Previous)
    }

    /// Match `query` against station names: whole name first, then any
    /// query word contained in a name.  An empty query replays the last
    /// played station.
    pub fn search_to_play(&mut self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            let last = self.store.load_snapshot().station_id;
            info!("session: empty search, replaying last station '{}'", last);
            return self.play_station(&last);
        }

        let needle = query.to_lowercase();
        let stations = self.collection.all();
        let names: Vec<String> = stations.iter().map(|s| s.name.to_lowercase()).collect();

        let full = names.iter().position(|n| *n == needle);
        let found = full.or_else(|| {
            let words: Vec<&str> = needle.split_whitespace().collect();
            names
                .iter()
                .position(|n| words.iter().any(|w| n.contains(w)))
        });

        match found {
            Some(idx) => {
                let station = stations[idx].clone();
                info!("session: search '{}' matched '{}'", query, station.name);
                self.begin_lifecycle(station)
            }
            None => Err(SessionError::NoMatch {
                query: query.to_string(),
            }),
        }
    }

    /// Start the sleep timer, or extend a running one.  Returns the time left.
    pub fn start_sleep_timer(&mut self) -> Result<Duration> {
        if !self.machine.status().is_active() {
            return Err(SessionError::NotActive);
        }
        let was_running = self.sleep_timer.is_running();
        let remaining = self.sleep_timer.start(self.sleep_duration);
        info!("session: sleep timer set, {}s left", remaining.as_secs());
        if !was_running {
            self.save_snapshot();
        }
        self.sink.on_sleep_timer_tick(remaining);
        Ok(remaining)
    }

    pub fn cancel_sleep_timer(&mut self) {
        if !self.sleep_timer.is_running() {
            return;
        }
        info!("session: sleep timer cancelled");
        self.sleep_timer.cancel();
        self.save_snapshot();
    }

    /// Advance the sleep timer; stops playback when it runs out.
    pub fn tick_sleep_timer(&mut self, elapsed: Duration) -> Result<()> {
        if !self.sleep_timer.is_running() {
            return Ok(());
        }
        if self.sleep_timer.tick(elapsed) {
            info!("session: sleep timer finished, stopping playback");
            self.sink.on_sleep_timer_tick(Duration::ZERO);
            if let Err(e) = self.stop() {
                warn!("session: sleep timer could not stop playback: {}", e);
                self.sink.on_error(&e);
                return Err(e);
            }
        } else if let Some(remaining) = self.sleep_timer.remaining() {
            self.sink.on_sleep_timer_tick(remaining);
        }
        Ok(())
    }

    /// Persist everything before the host goes away.
    pub fn shutdown(&mut self) {
        info!("session: shutting down");
        if let Err(e) = self.store.save_metadata_history(self.history.all()) {
            self.report_storage(e);
        }
        self.save_snapshot();
    }

    // ── engine ingress ────────────────────────────────────────────────────────

    pub fn on_engine_event(&mut self, event: EngineEvent) {
        if !self.machine.accepts(event.attempt) {
            debug!(
                "session: dropping {:?} for stale attempt {:?} (current {:?})",
                event.kind,
                event.attempt,
                self.machine.attempt()
            );
            return;
        }

        match event.kind {
            EngineEventKind::Playing => {
                let t = self.machine.on_playing();
                self.apply(t);
            }
            EngineEventKind::Buffering => {
                let t = self.machine.on_buffering();
                self.apply(t);
            }
            EngineEventKind::Paused => {
                let t = self.machine.on_paused();
                self.apply(t);
            }
            EngineEventKind::Stopped => {
                self.sleep_timer.cancel();
                let t = self.machine.stop();
                self.apply(t);
            }
            EngineEventKind::EndOfStream => self.handle_end_of_stream(),
            EngineEventKind::Metadata(raw) => {
                if self.record_metadata(raw.as_deref()) {
                    self.sink.on_state_changed(
                        self.machine.status(),
                        self.machine.station(),
                        self.history.latest(),
                    );
                }
            }
            EngineEventKind::Error(message) => {
                warn!("session: engine error: {}", message);
                let t = self.machine.stop();
                self.apply(t);
                self.sink
                    .on_error(&SessionError::EngineUnavailable(message));
            }
        }
    }

    fn handle_end_of_stream(&mut self) {
        match self.machine.on_end_of_stream() {
            EndOfStream::Restart { station, attempt } => {
                debug!("session: auto-restart {} for '{}'", attempt, station.name);
                if let Err(e) = self.prepare(station) {
                    warn!("session: auto-restart failed: {}", e);
                    let t = self.machine.stop();
                    self.apply(t);
                    self.sink.on_error(&e);
                }
            }
            EndOfStream::Exhausted(t) => {
                if let Err(e) = self.engine.stop() {
                    debug!("session: engine stop after exhausted restarts: {}", e);
                }
                self.apply(t);
                let err = SessionError::RestartExhausted {
                    attempts: self.machine.max_restarts(),
                };
                error!("session: {}", err);
                self.sink.on_error(&err);
            }
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    /// A user-initiated play starts a fresh lifecycle with a full restart budget.
    fn begin_lifecycle(&mut self, station: Station) -> Result<()> {
        self.prepare(station)?;
        self.machine.reset_restarts();
        Ok(())
    }

    fn step(&mut self, direction: Direction) -> Result<()> {
        let adjacent = self
            .machine
            .station()
            .and_then(|s| self.collection.get_adjacent(&s.id, direction));
        let target = match adjacent {
            Some(s) => s,
            None => self
                .collection
                .all()
                .into_iter()
                .next()
                .ok_or(SessionError::NoStationsAvailable)?,
        };
        self.begin_lifecycle(target)
    }

    /// Hand `station` to the engine under a new attempt and enter
    /// `Buffering`.  Nothing changes if the engine cannot be reached.  If the
    /// old stream was already stopped when the new one fails to start, the
    /// session becomes `Stopped`.
    fn prepare(&mut self, station: Station) -> Result<()> {
        if !station.is_valid() {
            return Err(SessionError::InvalidStation);
        }
        let attempt = self.machine.reserve_attempt();

        let was_running = self.machine.status() != PlaybackStatus::Stopped;
        if was_running {
            self.engine.stop()?;
        }
        if let Err(e) = self.start_engine(attempt, &station) {
            if was_running {
                warn!(
                    "session: '{}' failed to start after the old stream stopped: {}",
                    station.name, e
                );
                self.sleep_timer.cancel();
                let t = self.machine.stop();
                self.apply(t);
            }
            return Err(e);
        }

        info!(
            "session: preparing '{}' ({}) attempt {:?}",
            station.name,
            station.stream_uri(),
            attempt
        );
        let t = self.machine.prepare(station, attempt)?;
        self.record_metadata(None);
        if t.changed() {
            self.apply(t);
        } else {
            // same status, different station or attempt
            self.publish();
        }
        Ok(())
    }

    fn start_engine(&mut self, attempt: AttemptId, station: &Station) -> Result<()> {
        self.engine
            .prepare(attempt, station.stream_uri(), station.content_type_hint())?;
        self.engine.set_play_when_ready(true)
    }

    fn apply(&mut self, t: Transition) {
        if !t.changed() {
            return;
        }
        if t.left_playing() {
            self.record_metadata(None);
        }
        self.publish();
    }

    fn publish(&mut self) {
        self.save_snapshot();
        self.sink.on_state_changed(
            self.machine.status(),
            self.machine.station(),
            self.history.latest(),
        );
    }

    /// Record a title (`None` resets to the station name); persists the
    /// history when the newest entry changed.
    fn record_metadata(&mut self, raw: Option<&str>) -> bool {
        let fallback = self
            .machine
            .station()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        if !self.history.record(raw, &fallback) {
            return false;
        }
        debug!("session: metadata → {:?}", self.history.latest());
        if let Err(e) = self.store.save_metadata_history(self.history.all()) {
            self.report_storage(e);
        }
        true
    }

    fn save_snapshot(&mut self) {
        let snapshot = self.current_snapshot();
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            self.report_storage(e);
        }
    }

    fn current_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            station_id: self
                .machine
                .station()
                .map(|s| s.id.clone())
                .unwrap_or_default(),
            status: self.machine.status(),
            sleep_timer_running: self.sleep_timer.is_running(),
        }
    }

    fn report_storage(&mut self, e: StoreError) {
        warn!("session: failed to persist state: {}", e);
        self.sink.on_error(&SessionError::from(e));
    }
}
