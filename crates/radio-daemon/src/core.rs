/// DaemonCore: single owner of the playback session.
///
/// Architecture:
///   - All mutations go through `DaemonCore::run()`, a single-threaded event loop.
///   - External inputs (socket, HTTP, sleep ticks, engine events) arrive as
///     `DaemonEvent` messages on an mpsc channel.
///   - Commands carry a oneshot reply; clients never touch the session.
///   - After every handled event the current `SessionView` is broadcast if
///     anything changed.
use crate::sink::BroadcastSink;
use crate::BroadcastMessage;
use radio_core::protocol::{Broadcast, Command};
use radio_core::{
    EngineEvent, JsonStateStore, PlaybackEngine, SessionCoordinator, SessionError, StationList,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

pub type CommandReply = Result<Broadcast, SessionError>;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand {
        cmd: Command,
        reply: Option<oneshot::Sender<CommandReply>>,
    },
    /// Canonical event from the playback engine.
    Engine(EngineEvent),
    /// Sleep timer tick, one per tick interval.
    SleepTick,
    /// Shutdown requested.
    Shutdown,
}

/// Send `cmd` into the core loop and wait for its reply.
///
/// `None` means the core loop is gone.
pub async fn request(event_tx: &mpsc::Sender<DaemonEvent>, cmd: Command) -> Option<CommandReply> {
    let (reply_tx, reply_rx) = oneshot::channel();
    event_tx
        .send(DaemonEvent::ClientCommand {
            cmd,
            reply: Some(reply_tx),
        })
        .await
        .ok()?;
    reply_rx.await.ok()
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub type Session<E> = SessionCoordinator<StationList, E, JsonStateStore, BroadcastSink>;

pub struct DaemonCore<E: PlaybackEngine> {
    session: Session<E>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Used by the tick task to feed `SleepTick`s back into the loop.
    event_tx: mpsc::Sender<DaemonEvent>,
    tick_interval: Duration,
}

impl<E: PlaybackEngine> DaemonCore<E> {
    pub fn new(
        session: Session<E>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            session,
            broadcast_tx,
            event_tx,
            tick_interval,
        }
    }

    // ── event loop ────────────────────────────────────────────────────────────

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let tick_tx = self.event_tx.clone();
        let tick_interval = self.tick_interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if tick_tx.send(DaemonEvent::SleepTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand { cmd, reply }) => {
                    info!("DaemonCore: command {:?}", cmd);
                    let result = self.handle_command(cmd);
                    if let Err(ref e) = result {
                        warn!("DaemonCore: command failed: {}", e);
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }

                Some(DaemonEvent::Engine(evt)) => {
                    debug!("DaemonCore: engine event {:?}", evt);
                    self.session.on_engine_event(evt);
                }

                Some(DaemonEvent::SleepTick) => {
                    if let Err(e) = self.session.tick_sleep_timer(self.tick_interval) {
                        warn!("DaemonCore: sleep timer stop failed: {}", e);
                    }
                }
            }
            self.publish_state();
        }

        ticker.abort();
        self.session.shutdown();
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) -> Result<Broadcast, SessionError> {
        match cmd {
            Command::Play { station_id } => self.session.play_station(&station_id)?,
            Command::PlayStream { uri } => self.session.play_stream_directly(&uri)?,
            Command::Stop => self.session.stop()?,
            Command::Next => self.session.next()?,
            Command::Prev => self.session.previous()?,
            Command::Search { query } => self.session.search_to_play(&query)?,
            Command::StartSleepTimer => {
                self.session.start_sleep_timer()?;
            }
            Command::CancelSleepTimer => self.session.cancel_sleep_timer(),
            Command::GetProgress => {
                let progress = self.session.request_progress_snapshot();
                return Ok(Broadcast::Progress {
                    metadata_history: progress.metadata_history,
                    sleep_remaining_secs: progress.sleep_remaining.map(|d| d.as_secs()),
                });
            }
            Command::GetState => {}
        }
        Ok(Broadcast::State {
            data: self.session.view(),
        })
    }

    fn publish_state(&mut self) {
        if self.session.sink_mut().take_state_dirty() {
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::State(self.session.view()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::config::SessionConfig;
    use radio_core::{AttemptId, EngineEventKind, PlaybackStatus, Station};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeEngine {
        loads: Arc<Mutex<Vec<(AttemptId, String)>>>,
    }

    impl PlaybackEngine for FakeEngine {
        fn prepare(
            &mut self,
            attempt: AttemptId,
            stream_uri: &str,
            _content_type: Option<&str>,
        ) -> Result<(), SessionError> {
            self.loads
                .lock()
                .unwrap()
                .push((attempt, stream_uri.to_string()));
            Ok(())
        }

        fn set_play_when_ready(&mut self, _play: bool) -> Result<(), SessionError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct Harness {
        event_tx: mpsc::Sender<DaemonEvent>,
        broadcast_rx: broadcast::Receiver<BroadcastMessage>,
        loads: Arc<Mutex<Vec<(AttemptId, String)>>>,
        handle: tokio::task::JoinHandle<anyhow::Result<()>>,
        _dir: tempfile::TempDir,
    }

    fn start(config: SessionConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"), dir.path().join("history.json"));
        let stations = StationList::new(vec![
            Station::new("fip", "FIP", "http://fip.example/stream.mp3"),
            Station::new("nts-1", "NTS 1", "http://nts.example/1"),
        ]);
        let engine = FakeEngine::default();
        let loads = engine.loads.clone();

        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let sink = BroadcastSink::new(broadcast_tx.clone());
        let session = SessionCoordinator::new(&config, stations, engine, store, sink);
        let core = DaemonCore::new(session, broadcast_tx, event_tx.clone(), config.tick_interval());
        let handle = tokio::spawn(core.run(event_rx));

        Harness {
            event_tx,
            broadcast_rx,
            loads,
            handle,
            _dir: dir,
        }
    }

    fn last_attempt(h: &Harness) -> AttemptId {
        h.loads.lock().unwrap().last().unwrap().0
    }

    #[tokio::test]
    async fn test_play_replies_with_state() {
        let h = start(SessionConfig::default());
        let reply = request(&h.event_tx, Command::Play {
            station_id: "nts-1".into(),
        })
        .await
        .unwrap()
        .unwrap();
        match reply {
            Broadcast::State { data } => {
                assert_eq!(data.status, PlaybackStatus::Buffering);
                assert_eq!(data.station.unwrap().id, "nts-1");
                assert_eq!(data.metadata, "NTS 1");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(h.loads.lock().unwrap()[0].1, "http://nts.example/1");
    }

    #[tokio::test]
    async fn test_command_error_is_replied() {
        let h = start(SessionConfig::default());
        let reply = request(&h.event_tx, Command::StartSleepTimer).await.unwrap();
        assert_eq!(reply.unwrap_err(), SessionError::NotActive);
    }

    #[tokio::test]
    async fn test_engine_events_are_broadcast() {
        let mut h = start(SessionConfig::default());
        request(&h.event_tx, Command::Play {
            station_id: "fip".into(),
        })
        .await
        .unwrap()
        .unwrap();

        let attempt = last_attempt(&h);
        h.event_tx
            .send(DaemonEvent::Engine(EngineEvent::new(attempt, EngineEventKind::Playing)))
            .await
            .unwrap();
        h.event_tx
            .send(DaemonEvent::Engine(EngineEvent::new(
                attempt,
                EngineEventKind::Metadata(Some("Artist - Song".into())),
            )))
            .await
            .unwrap();

        let progress = request(&h.event_tx, Command::GetProgress).await.unwrap().unwrap();
        match progress {
            Broadcast::Progress {
                metadata_history, ..
            } => assert_eq!(metadata_history, vec!["FIP", "Artist - Song"]),
            other => panic!("unexpected reply: {:?}", other),
        }

        let mut statuses = Vec::new();
        while let Ok(msg) = h.broadcast_rx.try_recv() {
            if let BroadcastMessage::State(view) = msg {
                statuses.push(view.status);
            }
        }
        assert_eq!(
            statuses,
            vec![PlaybackStatus::Buffering, PlaybackStatus::Playing, PlaybackStatus::Playing]
        );
    }

    #[tokio::test]
    async fn test_sleep_timer_stops_playback() {
        let config = SessionConfig {
            sleep_timer_secs: 0,
            tick_interval_ms: 10,
            ..Default::default()
        };
        let mut h = start(config);
        request(&h.event_tx, Command::Play {
            station_id: "fip".into(),
        })
        .await
        .unwrap()
        .unwrap();
        request(&h.event_tx, Command::StartSleepTimer).await.unwrap().unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match h.broadcast_rx.recv().await {
                    Ok(BroadcastMessage::State(view)) if view.status == PlaybackStatus::Stopped => {
                        break view;
                    }
                    Ok(_) => continue,
                    Err(e) => panic!("broadcast closed: {}", e),
                }
            }
        })
        .await
        .expect("sleep timer never fired");
        assert!(stopped.sleep_remaining_secs.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_loop() {
        let h = start(SessionConfig::default());
        h.event_tx.send(DaemonEvent::Shutdown).await.unwrap();
        h.handle.await.unwrap().unwrap();
    }
}
