use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::automation::Coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Starting,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    fn name(&self) -> &'static str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type SharedComponent = Arc<Mutex<dyn LifecycleComponent + Send + Sync>>;

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<SharedComponent>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Init,
            components: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attach(&mut self, component: SharedComponent) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Starting");
        self.state = LifecycleState::Starting;
        for comp in &self.components {
            let mut comp = comp.lock().await;
            comp.on_start().await?;
            info!(component = comp.name(), "Component started");
        }

        self.state = LifecycleState::Ready;
        info!("Lifecycle Phase: Ready");
        Ok(())
    }

    /// Shuts components down in reverse attach order. Failures are logged
    /// and do not stop the remaining components.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in self.components.iter().rev() {
            let mut comp = comp.lock().await;
            if let Err(e) = comp.on_shutdown().await {
                warn!(component = comp.name(), "Component shutdown error: {}", e);
            }
        }

        Ok(())
    }
}

/// Runs the Coordinator's periodic eviction of finished jobs.
pub struct CleanupSweep {
    coordinator: Arc<Coordinator>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupSweep {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            handle: None,
        }
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for CleanupSweep {
    fn name(&self) -> &'static str {
        "cleanup-sweep"
    }

    async fn on_start(&mut self) -> Result<()> {
        self.handle = Some(self.coordinator.spawn_cleanup());
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
