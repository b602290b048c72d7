/**
 * API HTTP + WEBSOCKET - Interface navigateur du bridge
 *
 * ROUTES :
 * - GET /health              → "ok"
 * - GET /system/health       → compteurs (MQTT, batches, abonnés, drops)
 * - GET /api/tags            → noms de métriques connus, triés
 * - GET /api/tags/{*name}    → dernière valeur d'une métrique (les noms contiennent des '/')
 * - GET /api/nodes           → cycle de vie des nodes/devices
 * - GET /ws                  → snapshot complet puis flux `{name} = {value}`
 *
 * Le client WebSocket n'envoie rien d'utile : ses trames servent de keep-alive.
 * CORS ouvert pour les tests locaux depuis un navigateur.
 */

use crate::health::{BridgeHealth, HealthTracker};
use crate::hub::BroadcastSender;
use crate::models::ValueKind;
use crate::session::{LifecycleEntry, LifecycleTable};
use crate::state::Shared;
use crate::store::MetricStore;
use crate::subscribers::SubscriberRegistry;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MetricStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub lifecycle: Shared<LifecycleTable>,
    pub health_tracker: HealthTracker,
    pub broadcast: BroadcastSender,
}

#[derive(Debug, Serialize)]
pub struct TagView {
    pub name: String,
    pub value: serde_json::Value,
    pub kind: ValueKind,
    pub timestamp: Option<u64>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/tags", get(list_tags))
        .route("/api/tags/{*name}", get(get_tag))
        .route("/api/nodes", get(list_nodes))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<BridgeHealth> {
    Json(app.health_tracker.get_health(&app.store, &app.registry, &app.broadcast))
}

// GET /api/tags (liste)
async fn list_tags(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.store.names())
}

// GET /api/tags/{*name} (détail)
async fn get_tag(State(app): State<AppState>, Path(name): Path<String>) -> Response {
    match app.store.get(&name) {
        Some(record) => Json(TagView {
            value: record.value.to_json(),
            kind: record.kind(),
            timestamp: record.timestamp_millis,
            name,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "tag not found", "name": name })),
        )
            .into_response(),
    }
}

// GET /api/nodes
async fn list_nodes(State(app): State<AppState>) -> Json<Vec<LifecycleEntry>> {
    Json(app.lifecycle.lock().entries())
}

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// Une session WebSocket : une tâche d'écriture (file de l'abonné → socket)
/// et une lecture qui ne sert qu'à détecter la fermeture
async fn handle_socket(socket: WebSocket, app: AppState) {
    let (handle, mut rx) = app.registry.join(&app.store);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let id = handle.id;

    let mut writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if ws_tx.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Close(_) => break,
                _ => debug!(subscriber = %id, "keep-alive frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    app.registry.leave(&handle);
    info!(subscriber = %id, "websocket closed");
}
