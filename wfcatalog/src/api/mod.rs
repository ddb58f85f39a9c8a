pub mod error;
pub mod handlers;

use crate::engine::QueryEngine;
use crate::query::{exclusion_filter, Filter};
use crate::registry::TypeRegistry;
use crate::store::Datastore;
use axum::{routing::get, Router};
use common::config::{LimitSettings, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Process-wide configuration frozen at startup. Only the maintenance flag
/// changes afterwards.
#[derive(Debug)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    pub documentation_url: String,
    pub limits: LimitSettings,
    pub exclusion: Option<Filter>,
    closed: AtomicBool,
}

impl ServiceConfig {
    pub fn from_settings(settings: &Settings) -> common::Result<Self> {
        Ok(Self {
            name: settings.service.name.clone(),
            version: settings.service.version.clone(),
            documentation_url: settings.service.documentation_url.clone(),
            limits: settings.limits.clone(),
            exclusion: exclusion_filter(&settings.filter.exclude)?,
            closed: AtomicBool::new(settings.service.closed),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Flips the maintenance flag, returning the new state.
    pub fn toggle_closed(&self) -> bool {
        !self.closed.fetch_xor(true, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub registry: Arc<TypeRegistry>,
    pub store: Arc<dyn Datastore>,
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    pub fn new(config: Arc<ServiceConfig>, store: Arc<dyn Datastore>) -> Self {
        let registry = Arc::new(TypeRegistry::new());
        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.limits.max_response_bytes as usize,
        ));
        Self {
            config,
            registry,
            store,
            engine,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/query", get(handlers::query).post(handlers::query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
