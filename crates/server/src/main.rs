use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use broker::{Broker, BrokerSnapshot};
use chrono::Utc;
use driver::{
    CameraSwitcher, GimbalConnector, NoHardwareConnector, NoHardwareSwitcher, SimulatedConnector,
    SimulatedSwitcher,
};
use shared::{
    domain::{DeviceSummary, SessionId},
    error::{ApiError, ErrorCode},
    protocol::{ClientCommand, ServerEvent},
};
use storage::Storage;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

mod config;

use config::load_settings;

#[derive(Clone)]
struct AppState {
    broker: Arc<Broker>,
    events: broadcast::Sender<ServerEvent>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let storage = Storage::new(&settings.data_dir).await?;

    let connector: Arc<dyn GimbalConnector> = if settings.simulate_hardware {
        Arc::new(SimulatedConnector)
    } else {
        Arc::new(NoHardwareConnector)
    };
    let switcher: Arc<dyn CameraSwitcher> = if settings.simulate_hardware {
        Arc::new(SimulatedSwitcher::new())
    } else {
        Arc::new(NoHardwareSwitcher)
    };

    let (events, _) = broadcast::channel(256);
    let broker = Broker::new(events.clone(), connector, switcher, storage);
    if let Err(err) = broker.load_persisted().await {
        warn!(%err, "failed to load persisted configuration, starting fresh");
    }

    tokio::spawn(Arc::clone(&broker).run_motion_loop());
    tokio::spawn(Arc::clone(&broker).run_telemetry_loop());

    let state = AppState { broker, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, simulate = settings.simulate_hardware, "control broker listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/devices", get(api_devices))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.broker.status_snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "timestamp_ms": Utc::now().timestamp_millis(),
        "connected_real_devices": snapshot.connected_real_devices,
        "active_device_id": snapshot.active_device_id,
        "active_mode": snapshot.active_mode,
    }))
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<BrokerSnapshot> {
    Json(state.broker.status_snapshot().await)
}

async fn api_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSummary>> {
    Json(state.broker.status_snapshot().await.devices)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// One task per observer. Broadcast events and direct replies multiplex onto
/// the socket; inbound frames parse into typed commands for the broker.
async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let session_id = SessionId(Uuid::new_v4().to_string());
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<ServerEvent>();

    for event in state.broker.handle_connect(&session_id).await {
        let _ = direct_tx.send(event);
    }

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(event) => event,
                    None => break,
                },
                broadcasted = events_rx.recv() => match broadcasted {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "observer lagging, dropping events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientCommand>(&text) {
            Ok(command) => {
                for event in state.broker.handle_command(&session_id, command).await {
                    if direct_tx.send(event).is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                debug!(session = %session_id, %err, "dropping unparseable command");
                let _ = direct_tx.send(ServerEvent::Error(ApiError::new(
                    ErrorCode::Validation,
                    format!("unrecognized command: {err}"),
                )));
            }
        }
    }

    state.broker.handle_disconnect(&session_id).await;
    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
