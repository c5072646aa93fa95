use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::open_store;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::lifecycle::{CleanupSweep, LifecycleManager};
use crate::core::terminal::{GuideSection, print_warn};
use crate::core::vault::{CredentialVault, SecretCipher};
use crate::interfaces::services::Services;
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging;

pub async fn run_server(config: AppConfig, data_dir: &Path, host: String, port: u16) -> Result<()> {
    let log_tx = logging::init(config.debug_mode);
    info!("Starting bidpilot host (data dir: {})", data_dir.display());

    let store = open_store(data_dir)?;
    let vault = Arc::new(CredentialVault::new(
        store.raw(),
        SecretCipher::for_this_machine()?,
        config.security.credentials_max_age_days,
    ));
    if vault.describe(SystemClock.now_ms()).await?.is_empty() {
        print_warn("No portal credentials saved yet; run `bidpilot credentials set`.");
    }
    let options = store.coordinator_options().await?;
    let services = Services::assemble(&config, store, vault, options)?;

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        coordinator: Arc::clone(&services.coordinator),
        host: Arc::clone(&services.host),
        bridge: Arc::clone(&services.bridge),
        trigger: Arc::clone(&services.trigger),
        log_tx,
        api_host: host.clone(),
        api_port: port,
    }))));
    lifecycle.attach(Arc::new(Mutex::new(CleanupSweep::new(Arc::clone(
        &services.coordinator,
    )))));
    lifecycle.start().await?;

    GuideSection::new("bidpilot host")
        .status("API", &format!("http://{}:{}/api", host, port))
        .status("Extension bridge", &format!("ws://{}:{}/bridge", host, port))
        .blank()
        .text(&format!(
            "Press {} to stop.",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down bidpilot host...");
    lifecycle.shutdown().await?;
    Ok(())
}
