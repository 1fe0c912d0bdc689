use crate::core::{self, DaemonEvent};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use radio_core::protocol::{Broadcast, Command};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct StreamBody {
    uri: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { event_tx });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/progress", get(get_progress))
        .route("/api/play/:id", get(play_station).post(play_station))
        .route("/api/stream", post(play_stream))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/search", get(search).post(search))
        .route("/api/sleep", post(start_sleep).delete(cancel_sleep))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Forward `cmd` to the core and map the reply onto a status code.
async fn dispatch(state: &HttpState, cmd: Command) -> Response {
    match core::request(&state.event_tx, cmd).await {
        Some(Ok(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Some(Err(e)) => (StatusCode::CONFLICT, Json(Broadcast::error(&e))).into_response(),
        None => {
            error!("HTTP API: core loop unavailable");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn get_state(State(state): State<HttpState>) -> Response {
    dispatch(&state, Command::GetState).await
}

async fn get_progress(State(state): State<HttpState>) -> Response {
    dispatch(&state, Command::GetProgress).await
}

async fn play_station(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    info!("HTTP API: Play station {}", id);
    dispatch(&state, Command::Play { station_id: id }).await
}

async fn play_stream(State(state): State<HttpState>, Json(body): Json<StreamBody>) -> Response {
    info!("HTTP API: Play stream {}", body.uri);
    dispatch(&state, Command::PlayStream { uri: body.uri }).await
}

async fn stop(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn next_station(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Next station");
    dispatch(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Previous station");
    dispatch(&state, Command::Prev).await
}

async fn search(State(state): State<HttpState>, Query(params): Query<SearchParams>) -> Response {
    info!("HTTP API: Search '{}'", params.q);
    dispatch(&state, Command::Search { query: params.q }).await
}

async fn start_sleep(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Start sleep timer");
    dispatch(&state, Command::StartSleepTimer).await
}

async fn cancel_sleep(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Cancel sleep timer");
    dispatch(&state, Command::CancelSleepTimer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::SessionView;

    /// Answers every command like a core loop would, without a session.
    fn fake_core(reply: core::CommandReply) -> mpsc::Sender<DaemonEvent> {
        let (tx, mut rx) = mpsc::channel::<DaemonEvent>(8);
        tokio::spawn(async move {
            while let Some(evt) = rx.recv().await {
                if let DaemonEvent::ClientCommand {
                    reply: Some(reply_tx),
                    ..
                } = evt
                {
                    let _ = reply_tx.send(reply.clone());
                }
            }
        });
        tx
    }

    #[tokio::test]
    async fn test_dispatch_ok() {
        let state = HttpState {
            event_tx: fake_core(Ok(Broadcast::State {
                data: SessionView::default(),
            })),
        };
        let resp = dispatch(&state, Command::GetState).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dispatch_session_error_is_conflict() {
        let state = HttpState {
            event_tx: fake_core(Err(radio_core::SessionError::NoStationsAvailable)),
        };
        let resp = dispatch(&state, Command::Next).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_dispatch_without_core() {
        let (tx, rx) = mpsc::channel::<DaemonEvent>(1);
        drop(rx);
        let state = HttpState { event_tx: tx };
        let resp = dispatch(&state, Command::Stop).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
