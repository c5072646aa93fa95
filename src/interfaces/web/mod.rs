pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use super::bridge::Bridge;
use crate::core::automation::{Coordinator, DriverHost, TriggerDeps};
use crate::core::lifecycle::LifecycleComponent;

pub use router::build_api_router;

/// Everything the HTTP surface needs, cloned into each request.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) host: Arc<DriverHost>,
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) trigger: Arc<TriggerDeps>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

pub struct ApiServerConfig {
    pub coordinator: Arc<Coordinator>,
    pub host: Arc<DriverHost>,
    pub bridge: Arc<Bridge>,
    pub trigger: Arc<TriggerDeps>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                coordinator: config.coordinator,
                host: config.host,
                bridge: config.bridge,
                trigger: config.trigger,
                log_tx: config.log_tx,
                api_port: config.api_port,
            },
            api_host: config.api_host,
            handle: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &'static str {
        "api-server"
    }

    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Could not bind {}", addr))?;
        let app = router::build_api_router(self.state.clone());

        info!("API Server running at http://{addr}");
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
