/// mpv IPC driver and the `PlaybackEngine` adapter built on it.
///
/// Architecture:
///
/// ```text
///   MpvEngine (sync, owned by the session)
///         │ try_send(EngineRequest)
///         ▼
///   engine_task ── owns MpvDriver + MpvHandle, spawns mpv on demand
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → MpvTranslator
///                                                                   └→ DaemonEvent::Engine
/// ```
///
/// Translated events are tagged with the attempt of the most recent load.
/// The attempt is marked before `loadfile` goes out, so the events mpv sends
/// right after acknowledging it already carry the new attempt.
use radio_core::{AttemptId, EngineEvent, EngineEventKind, PlaybackEngine, SessionError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::core::DaemonEvent;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_ICY_TITLE: u64 = 3;
/// Some mpv builds only expose `icy-title` at the top level.
pub const OBS_ICY_TITLE_DIRECT: u64 = 6;

/// No attempt acknowledged yet (or playback stopped).
const NO_ATTEMPT: u64 = 0;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Register observe_property for the properties the translator needs.
    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
            (OBS_ICY_TITLE_DIRECT, "icy-title"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: radio_core::platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    /// True once a spawned mpv has exited.
    pub fn process_exited(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = radio_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        info!("mpv: spawning {}", mpv_binary.display());
        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(radio_core::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Turns raw mpv events into canonical engine events.
#[derive(Debug, Default)]
pub struct MpvTranslator {
    core_idle: Option<bool>,
    paused: bool,
    last_title: Option<String>,
}

impl MpvTranslator {
    pub fn translate(&mut self, evt: &MpvEvent) -> Option<EngineEventKind> {
        if let Some((obs_id, data)) = evt.as_property_change() {
            return match obs_id {
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    if idle == self.core_idle {
                        return None;
                    }
                    self.core_idle = idle;
                    self.derive_status()
                }
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.paused {
                        return None;
                    }
                    self.paused = paused;
                    self.derive_status()
                }
                OBS_ICY_TITLE | OBS_ICY_TITLE_DIRECT => {
                    // Filter trivial values like "-" or " - "
                    let title = data.as_str().and_then(|t| {
                        let meaningful = t.trim().trim_matches('-').trim();
                        (!meaningful.is_empty()).then(|| t.trim().to_string())
                    });
                    if title == self.last_title {
                        return None;
                    }
                    self.last_title = title.clone();
                    Some(EngineEventKind::Metadata(title))
                }
                _ => None,
            };
        }

        match evt.event_name() {
            Some("start-file") => {
                self.core_idle = Some(true);
                self.last_title = None;
                Some(EngineEventKind::Buffering)
            }
            Some("end-file") => {
                let reason = evt
                    .raw
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                debug!("mpv: end-file reason={}", reason);
                self.core_idle = Some(true);
                match reason {
                    // a live stream never ends on its own
                    "eof" | "error" => Some(EngineEventKind::EndOfStream),
                    "quit" => Some(EngineEventKind::Error("mpv exited".to_string())),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn derive_status(&self) -> Option<EngineEventKind> {
        if self.paused {
            return Some(EngineEventKind::Paused);
        }
        match self.core_idle {
            Some(false) => Some(EngineEventKind::Playing),
            Some(true) => Some(EngineEventKind::Buffering),
            None => None,
        }
    }
}

// ── PlaybackEngine adapter ────────────────────────────────────────────────────

#[derive(Debug)]
enum EngineRequest {
    Load {
        attempt: AttemptId,
        url: String,
        content_type: Option<String>,
    },
    PlayWhenReady(bool),
    Stop,
}

/// Fire-and-forget [`PlaybackEngine`] backed by an mpv process.
pub struct MpvEngine {
    tx: mpsc::Sender<EngineRequest>,
}

impl MpvEngine {
    /// Spawn the engine task.  mpv itself is started lazily on the first load.
    pub fn spawn(volume: f32, core_tx: mpsc::Sender<DaemonEvent>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(engine_task(rx, MpvDriver::new(volume), core_tx));
        Self { tx }
    }

    fn submit(&self, req: EngineRequest) -> Result<(), SessionError> {
        self.tx.try_send(req).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::EngineUnavailable("engine request queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SessionError::EngineUnavailable("engine task gone".to_string())
            }
        })
    }
}

impl PlaybackEngine for MpvEngine {
    fn prepare(
        &mut self,
        attempt: AttemptId,
        stream_uri: &str,
        content_type: Option<&str>,
    ) -> Result<(), SessionError> {
        self.submit(EngineRequest::Load {
            attempt,
            url: stream_uri.to_string(),
            content_type: content_type.map(str::to_string),
        })
    }

    fn set_play_when_ready(&mut self, play: bool) -> Result<(), SessionError> {
        self.submit(EngineRequest::PlayWhenReady(play))
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.submit(EngineRequest::Stop)
    }
}

struct EngineTask {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    /// Attempt mpv is currently playing for; shared with the translator.
    active: Arc<AtomicU64>,
    core_tx: mpsc::Sender<DaemonEvent>,
}

async fn engine_task(
    mut rx: mpsc::Receiver<EngineRequest>,
    driver: MpvDriver,
    core_tx: mpsc::Sender<DaemonEvent>,
) {
    let mut task = EngineTask {
        driver,
        handle: None,
        active: Arc::new(AtomicU64::new(NO_ATTEMPT)),
        core_tx,
    };
    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(10));

    loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(req) => task.handle_request(req).await,
                None => break,
            },
            _ = heartbeat.tick() => task.check_liveness().await,
        }
    }

    info!("mpv engine: shutting down");
    if let Some(handle) = task.handle.take() {
        let _ = handle.stop().await;
    }
    task.driver.kill().await;
}

impl EngineTask {
    async fn handle_request(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Load {
                attempt,
                url,
                content_type,
            } => {
                debug!(
                    "mpv engine: load {:?} {} ({})",
                    attempt,
                    url,
                    content_type.as_deref().unwrap_or("unknown type")
                );
                self.active.store(attempt.0, Ordering::SeqCst);
                let result = match self.ensure_handle().await {
                    Ok(handle) => handle.load_stream(&url, self.driver.volume).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("mpv engine: failed to load '{}': {}", url, e);
                    self.active.store(NO_ATTEMPT, Ordering::SeqCst);
                    self.emit(attempt, EngineEventKind::Error(e.to_string()))
                        .await;
                }
            }
            EngineRequest::PlayWhenReady(play) => {
                if let Some(handle) = self.handle.as_ref() {
                    if let Err(e) = handle.set_pause(!play).await {
                        warn!("mpv engine: set pause failed: {}", e);
                    }
                }
            }
            EngineRequest::Stop => {
                self.active.store(NO_ATTEMPT, Ordering::SeqCst);
                if let Some(handle) = self.handle.as_ref() {
                    if let Err(e) = handle.stop().await {
                        warn!("mpv engine: stop failed: {}", e);
                    }
                }
            }
        }
    }

    async fn check_liveness(&mut self) {
        if self.handle.is_some() && self.driver.process_exited() {
            warn!("mpv engine: heartbeat: mpv process died");
            self.handle = None;
            let attempt = self.active.swap(NO_ATTEMPT, Ordering::SeqCst);
            if attempt != NO_ATTEMPT {
                self.emit(
                    AttemptId(attempt),
                    EngineEventKind::Error("mpv process died".to_string()),
                )
                .await;
            }
        }
    }

    async fn emit(&self, attempt: AttemptId, kind: EngineEventKind) {
        let _ = self
            .core_tx
            .send(DaemonEvent::Engine(EngineEvent::new(attempt, kind)))
            .await;
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && self.driver.process_exited() {
            warn!("mpv engine: mpv process died, dropping handle");
            self.handle = None;
        }
        if let Some(handle) = self.handle.as_ref() {
            return Ok(handle.clone());
        }

        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        tokio::spawn(forward_events(
            event_rx,
            self.active.clone(),
            self.core_tx.clone(),
        ));

        let handle = self.driver.spawn_and_connect(event_tx).await?;
        handle.observe_properties().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

/// Translate mpv events for one connection and tag them with the active
/// attempt.
async fn forward_events(
    mut rx: mpsc::Receiver<MpvEvent>,
    active: Arc<AtomicU64>,
    core_tx: mpsc::Sender<DaemonEvent>,
) {
    let mut translator = MpvTranslator::default();
    while let Some(evt) = rx.recv().await {
        let Some(kind) = translator.translate(&evt) else {
            continue;
        };
        let attempt = active.load(Ordering::SeqCst);
        if attempt == NO_ATTEMPT {
            continue;
        }
        let event = EngineEvent::new(AttemptId(attempt), kind);
        if core_tx.send(DaemonEvent::Engine(event)).await.is_err() {
            break;
        }
    }
    debug!("mpv engine: event forwarder exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": "property-change", "id": id, "data": data }),
        }
    }

    /// Acks every request; answers `loadfile` the way mpv does, with the
    /// start of the new file right behind the ack.
    async fn fake_mpv(stream: tokio::io::DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let req: Value = serde_json::from_str(&line).unwrap();
            let ack = json!({ "request_id": req["request_id"], "error": "success", "data": null });
            let mut out = format!("{}\n", ack);
            if req["command"][0] == "loadfile" {
                out.push_str(&format!("{}\n", json!({ "event": "start-file" })));
                out.push_str(&format!(
                    "{}\n",
                    json!({ "event": "property-change", "id": OBS_CORE_IDLE, "name": "core-idle", "data": false })
                ));
            }
            if write.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    fn named(name: &str, reason: Option<&str>) -> MpvEvent {
        let mut raw = json!({ "event": name });
        if let Some(r) = reason {
            raw["reason"] = json!(r);
        }
        MpvEvent { raw }
    }

    #[test]
    fn test_core_idle_drives_playing() {
        let mut t = MpvTranslator::default();
        assert_eq!(
            t.translate(&named("start-file", None)),
            Some(EngineEventKind::Buffering)
        );
        assert_eq!(
            t.translate(&prop(OBS_CORE_IDLE, json!(false))),
            Some(EngineEventKind::Playing)
        );
        // unchanged value produces nothing
        assert_eq!(t.translate(&prop(OBS_CORE_IDLE, json!(false))), None);
        assert_eq!(
            t.translate(&prop(OBS_CORE_IDLE, json!(true))),
            Some(EngineEventKind::Buffering)
        );
    }

    #[test]
    fn test_pause_wins_over_core_idle() {
        let mut t = MpvTranslator::default();
        t.translate(&prop(OBS_CORE_IDLE, json!(false)));
        assert_eq!(
            t.translate(&prop(OBS_PAUSE, json!(true))),
            Some(EngineEventKind::Paused)
        );
        assert_eq!(
            t.translate(&prop(OBS_PAUSE, json!(false))),
            Some(EngineEventKind::Playing)
        );
    }

    #[test]
    fn test_icy_title_dedup_and_filter() {
        let mut t = MpvTranslator::default();
        assert_eq!(
            t.translate(&prop(OBS_ICY_TITLE, json!("Artist - Song"))),
            Some(EngineEventKind::Metadata(Some("Artist - Song".into())))
        );
        // the same title reported through the second observer
        assert_eq!(
            t.translate(&prop(OBS_ICY_TITLE_DIRECT, json!("Artist - Song"))),
            None
        );
        assert_eq!(
            t.translate(&prop(OBS_ICY_TITLE, json!(" - "))),
            Some(EngineEventKind::Metadata(None))
        );
    }

    #[test]
    fn test_end_file_reasons() {
        let mut t = MpvTranslator::default();
        assert_eq!(
            t.translate(&named("end-file", Some("eof"))),
            Some(EngineEventKind::EndOfStream)
        );
        assert_eq!(
            t.translate(&named("end-file", Some("error"))),
            Some(EngineEventKind::EndOfStream)
        );
        assert_eq!(t.translate(&named("end-file", Some("stop"))), None);
        assert!(matches!(
            t.translate(&named("end-file", Some("quit"))),
            Some(EngineEventKind::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_events_right_after_load_carry_new_attempt() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (mpv_tx, mpv_rx) = mpsc::channel(64);
        let handle = start_io_tasks(client_read, client_write, mpv_tx);
        tokio::spawn(fake_mpv(server));

        let (core_tx, mut core_rx) = mpsc::channel(64);
        let mut task = EngineTask {
            driver: MpvDriver::new(0.5),
            handle: Some(handle),
            active: Arc::new(AtomicU64::new(NO_ATTEMPT)),
            core_tx: core_tx.clone(),
        };
        tokio::spawn(forward_events(mpv_rx, task.active.clone(), core_tx));

        task.handle_request(EngineRequest::Load {
            attempt: AttemptId(7),
            url: "http://radio.test/live".into(),
            content_type: None,
        })
        .await;

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let evt = tokio::time::timeout(std::time::Duration::from_secs(5), core_rx.recv())
                .await
                .expect("no engine event")
                .expect("core channel closed");
            if let DaemonEvent::Engine(e) = evt {
                seen.push(e);
            }
        }
        assert_eq!(
            seen,
            vec![
                EngineEvent::new(AttemptId(7), EngineEventKind::Buffering),
                EngineEvent::new(AttemptId(7), EngineEventKind::Playing),
            ]
        );
        assert_eq!(task.active.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_stop_clears_active_attempt() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (mpv_tx, _mpv_rx) = mpsc::channel(64);
        let handle = start_io_tasks(client_read, client_write, mpv_tx);
        tokio::spawn(fake_mpv(server));

        let (core_tx, _core_rx) = mpsc::channel(64);
        let mut task = EngineTask {
            driver: MpvDriver::new(0.5),
            handle: Some(handle),
            active: Arc::new(AtomicU64::new(3)),
            core_tx,
        };
        task.handle_request(EngineRequest::Stop).await;
        assert_eq!(task.active.load(Ordering::SeqCst), NO_ATTEMPT);
    }
}
