use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::bridge::{Bridge, BridgeBrowser, BridgePages};
use crate::core::api::PlatformClient;
use crate::core::automation::browser::{BrowserTabs, MessageSender};
use crate::core::automation::{
    Coordinator, CoordinatorDeps, CoordinatorSender, DriverDeps, DriverHost, TriggerDeps,
};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::store::{CoordinatorOptions, SharedStore};
use crate::core::vault::CredentialVault;

/// The long-lived pieces of a running host, wired together.
pub struct Services {
    pub coordinator: Arc<Coordinator>,
    pub host: Arc<DriverHost>,
    pub bridge: Arc<Bridge>,
    pub trigger: Arc<TriggerDeps>,
}

impl Services {
    pub fn assemble(
        config: &AppConfig,
        store: SharedStore,
        vault: Arc<CredentialVault>,
        options: CoordinatorOptions,
    ) -> Result<Self> {
        let bridge = Bridge::new(Duration::from_millis(config.server.bridge_call_timeout_ms));
        let browser: Arc<dyn BrowserTabs> = Arc::new(BridgeBrowser::new(Arc::clone(&bridge)));
        let platform = Arc::new(PlatformClient::new(
            &config.portal.api_base,
            config.coordinator.http_timeout_secs,
        )?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let coordinator = Coordinator::new(CoordinatorDeps {
            browser: Arc::clone(&browser),
            vault: Arc::clone(&vault),
            store: store.clone(),
            documents: Arc::clone(&platform),
            reports: platform.clone(),
            clock: Arc::clone(&clock),
            limits: config.coordinator.clone(),
            portal: config.portal.clone(),
            options,
        });
        let sender: Arc<dyn MessageSender> =
            Arc::new(CoordinatorSender::new(Arc::clone(&coordinator)));

        let host = Arc::new(DriverHost::new(
            Arc::new(BridgePages::new(Arc::clone(&bridge))),
            Arc::new(DriverDeps {
                store: store.clone(),
                sender: Arc::clone(&sender),
                clock: Arc::clone(&clock),
                portal: config.portal.clone(),
                timings: config.driver.clone(),
                security: config.security.clone(),
            }),
        ));
        coordinator.attach_channel(host.clone());

        let trigger = Arc::new(TriggerDeps {
            store,
            vault,
            browser,
            data: platform,
            sender,
            clock,
            portal: config.portal.clone(),
            security: config.security.clone(),
            limits: config.coordinator.clone(),
        });

        Ok(Self {
            coordinator,
            host,
            bridge,
            trigger,
        })
    }
}
