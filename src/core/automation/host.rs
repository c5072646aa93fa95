use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::browser::{PageCommand, TabChannel};
use super::driver::{DriverDeps, PageDriver};
use super::page::PageDom;
use super::types::TabId;

/// Hands out a `PageDom` bound to one tab.
pub trait PageFactory: Send + Sync {
    fn page_for(&self, tab: TabId) -> Arc<dyn PageDom>;
}

/// Keeps at most one live Page Driver per tab and routes Coordinator
/// commands to it.
pub struct DriverHost {
    drivers: Mutex<HashMap<TabId, Arc<PageDriver>>>,
    factory: Arc<dyn PageFactory>,
    deps: Arc<DriverDeps>,
}

impl DriverHost {
    pub fn new(factory: Arc<dyn PageFactory>, deps: Arc<DriverDeps>) -> Self {
        Self {
            drivers: Mutex::new(HashMap::new()),
            factory,
            deps,
        }
    }

    /// A page finished loading in `tab`. The previous driver for the tab is
    /// shut down; a new one is created when the page is part of the workflow.
    pub async fn page_loaded(&self, tab: TabId, url: &str) -> Option<Arc<PageDriver>> {
        let mut drivers = self.drivers.lock().await;
        if let Some(previous) = drivers.remove(&tab) {
            previous.shutdown();
        }
        if !self.deps.portal.is_known_host(url) {
            debug!(tab, "Page outside the workflow: {}", url);
            return None;
        }

        let driver = Arc::new(PageDriver::new(
            tab,
            self.factory.page_for(tab),
            Arc::clone(&self.deps),
        ));
        drivers.insert(tab, Arc::clone(&driver));
        drop(drivers);

        let loading = Arc::clone(&driver);
        tokio::spawn(async move { loading.on_load().await });
        Some(driver)
    }

    pub async fn tab_closed(&self, tab: TabId) {
        if let Some(driver) = self.drivers.lock().await.remove(&tab) {
            driver.shutdown();
        }
    }

    pub async fn driver(&self, tab: TabId) -> Option<Arc<PageDriver>> {
        self.drivers.lock().await.get(&tab).cloned()
    }
}

#[async_trait]
impl TabChannel for DriverHost {
    async fn send(&self, tab: TabId, command: PageCommand) -> Result<Value> {
        let driver = self
            .driver(tab)
            .await
            .ok_or_else(|| anyhow!("No page driver in tab {}", tab))?;
        Ok(driver.handle_command(command).await)
    }
}
