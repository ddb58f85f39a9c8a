pub mod api;
pub mod engine;
pub mod query;
pub mod registry;
pub mod request;
pub mod store;
pub mod utils;

use api::{routes, AppState, ServiceConfig};
use common::config::{Backend, Settings};
use common::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use store::{Datastore, MemoryStore, ParquetStore};
use tokio::net::TcpListener;
use tracing::info;

async fn open_store(settings: &Settings) -> Result<Arc<dyn Datastore>> {
    let store: Arc<dyn Datastore> = match settings.datastore.backend {
        Backend::Memory => {
            let fixtures = settings.datastore.fixtures.as_ref().ok_or_else(|| {
                Error::InvalidInput("memory backend requires [datastore.fixtures]".into())
            })?;
            Arc::new(MemoryStore::load(fixtures).await?)
        }
        Backend::Parquet => Arc::new(ParquetStore::connect(&settings.datastore).await),
    };
    Ok(store)
}

/// Flips the maintenance flag on every SIGUSR1.
#[cfg(unix)]
fn watch_maintenance_signal(config: Arc<ServiceConfig>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    let mut signals = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            let closed = config.toggle_closed();
            warn!(closed, "Maintenance mode toggled");
        }
    });
    Ok(())
}

/// Runs the catalog service until the listener fails.
pub async fn run_service(settings: Settings) -> Result<()> {
    let config = Arc::new(ServiceConfig::from_settings(&settings)?);
    let store = open_store(&settings).await?;

    #[cfg(unix)]
    watch_maintenance_signal(Arc::clone(&config))?;

    let state = AppState::new(Arc::clone(&config), store);
    let app = routes(state);

    let addr = format!("{}:{}", settings.service.host, settings.service.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        version = %config.version,
        closed = config.is_closed(),
        "WFCatalog listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
