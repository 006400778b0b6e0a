// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::application::connection_manager::ConnectionManager;
use crate::application::device_link::DeviceLink;
use crate::application::history_log::HistoryLog;
use crate::application::machine_service::MachineService;
use crate::application::polling_scheduler::PollingScheduler;
use crate::application::snapshot_store::SnapshotStore;
use crate::infrastructure::config::{load_monitor_config, LinkKind};
use crate::infrastructure::modbus_link::ModbusTcpLink;
use crate::infrastructure::simulated_link::SimulatedLink;
use crate::presentation::app_state::AppState;
use crate::presentation::routes::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "machine_monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = load_monitor_config()?;

    // Device link (infrastructure layer)
    let link: Arc<dyn DeviceLink> = match config.link.kind {
        LinkKind::Modbus => Arc::new(ModbusTcpLink::new(
            config.devices.unit_id,
            config.polling.io_timeout(),
        )),
        LinkKind::Simulated => {
            tracing::warn!("Using simulated devices, no field-bus traffic will be sent");
            Arc::new(SimulatedLink::drifting())
        }
    };

    // Acquisition core (application layer)
    let connections = Arc::new(ConnectionManager::new(
        link,
        config.polling.reconnect_cooldown(),
    ));
    let store = Arc::new(SnapshotStore::default());
    let history = Arc::new(HistoryLog::new(config.polling.history_limit));
    let scheduler = Arc::new(PollingScheduler::new(
        config.devices.clone(),
        config.polling.clone(),
        connections,
        store.clone(),
        history.clone(),
    ));

    scheduler.initialize().await?;
    let polling = scheduler.start();

    // Create application state
    let state = Arc::new(AppState {
        machine_service: MachineService::new(scheduler, store, history),
    });

    // Start server (presentation layer)
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Starting machine-monitor on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, draining poller");
    polling.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
