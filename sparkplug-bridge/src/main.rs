/**
 * SPARKPLUG BRIDGE - Point d'entrée du service
 *
 * RÔLE : Orchestration des modules : config, transport MQTT, ingestion,
 * hub de diffusion, API HTTP/WebSocket.
 *
 * ARCHITECTURE : deux contextes reliés par une seule file bornée.
 * - Ingestion séquentielle (événements MQTT → store → hub)
 * - Service Axum (REST, WebSocket) + consommateur unique du hub
 */

use anyhow::Context;
use sparkplug_bridge::bridge::{Bridge, Ingestor};
use sparkplug_bridge::config::load_config;
use sparkplug_bridge::flatten::TemplateFlattener;
use sparkplug_bridge::health::HealthTracker;
use sparkplug_bridge::http::{self, AppState};
use sparkplug_bridge::session::{SessionController, SessionSettings};
use sparkplug_bridge::store::MetricStore;
use sparkplug_bridge::subscribers::SubscriberRegistry;
use sparkplug_bridge::{hub, mqtt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sparkplug_bridge=info")),
        )
        .init();

    let cfg = load_config().await.context("failed to load configuration")?;
    info!(
        group = %cfg.sparkplug.group_id,
        edge_node = %cfg.sparkplug.edge_node_id,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        "starting sparkplug bridge"
    );

    // état partagé entre ingestion et service HTTP
    let health_tracker = HealthTracker::new();
    let store = Arc::new(MetricStore::new(cfg.store.policy));
    let registry = Arc::new(SubscriberRegistry::new(cfg.broadcast.subscriber_queue));
    let (broadcast, hub) = hub::channel(cfg.broadcast.queue_capacity);
    hub.spawn(Arc::clone(&registry));

    // transport MQTT → événements typés
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg);
    let (events_tx, events_rx) = mpsc::channel(256);
    mqtt::spawn_transport(
        eventloop,
        events_tx,
        health_tracker.clone(),
        Duration::from_millis(cfg.mqtt.reconnect_delay_ms),
    );

    // ingestion séquentielle
    let session = Arc::new(SessionController::new(Arc::new(client), SessionSettings::from_config(&cfg)));
    let lifecycle = session.lifecycle();
    let ingestor = Ingestor::new(
        Arc::clone(&store),
        TemplateFlattener::new(cfg.templates.allow_list.clone()),
        broadcast.clone(),
        health_tracker.clone(),
    );
    tokio::spawn(Bridge::new(session, ingestor, health_tracker.clone()).run(events_rx));

    let app_state = AppState {
        store,
        registry,
        lifecycle,
        health_tracker,
        broadcast,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.addr))?;
    info!("listening on http://{}", cfg.http.addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
