mod core;
mod http;
mod mpv;
mod sink;
mod socket;
mod stations;

use radio_core::config::Config;
use radio_core::protocol::Broadcast;
use radio_core::{JsonStateStore, SessionCoordinator, SessionView, StationList};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// Full session view after a state change.
    State(SessionView),
    /// Sleep timer ticks and session errors, sent as-is.
    Notice(Broadcast),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR go to clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = radio_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radio_daemon=debug,radio_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if let Err(e) = std::fs::write(&config.daemon.pid_file, std::process::id().to_string()) {
        warn!("Failed to write pid file {:?}: {}", config.daemon.pid_file, e);
    }

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let stations = StationList::new(stations::load_stations(&config).await);
    let engine = mpv::MpvEngine::spawn(config.mpv.default_volume, event_tx.clone());
    let store = JsonStateStore::new(
        config.daemon.state_file.clone(),
        config.daemon.history_file.clone(),
    );
    let sink = sink::BroadcastSink::new(broadcast_tx.clone());
    let session = SessionCoordinator::new(&config.session, stations, engine, store, sink);

    let daemon_core = core::DaemonCore::new(
        session,
        broadcast_tx.clone(),
        event_tx.clone(),
        config.session.tick_interval(),
    );

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        radio_core::platform::DAEMON_TCP_PORT,
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    let _ = std::fs::remove_file(&config.daemon.pid_file);
    Ok(())
}
