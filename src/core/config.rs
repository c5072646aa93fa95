use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "bidpilot.toml";

/// Host configuration, read once at startup from `bidpilot.toml` in the data
/// directory. Every section falls back to built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub driver: DriverTimings,

    #[serde(default)]
    pub coordinator: CoordinatorLimits,

    #[serde(default)]
    pub security: SecurityPolicy,

    #[serde(default)]
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for a single bridge round-trip to the browser shim.
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_call_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_bridge_timeout_ms() -> u64 {
    15_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bridge_call_timeout_ms: default_bridge_timeout_ms(),
        }
    }
}

/// Hosts of the three coupled properties plus the business-data API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortalConfig {
    pub identity_host: String,
    pub portal_host: String,
    pub sso_host: String,
    pub target_host: String,
    pub api_base: String,
    pub probe_path: String,
    pub probe_selector: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            identity_host: "accounts.claveunica.gob.cl".to_string(),
            portal_host: "www.mercadopublico.cl".to_string(),
            sso_host: "heimdall.mercadopublico.cl".to_string(),
            target_host: "compra-agil.mercadopublico.cl".to_string(),
            api_base: "https://prime.pharmatender.cl/api/extension".to_string(),
            probe_path: "/Portal/Modules/Menu/Menu.aspx".to_string(),
            probe_selector: "#_LblOrganization".to_string(),
        }
    }
}

impl PortalConfig {
    pub fn home_url(&self) -> String {
        format!("https://{}/Home", self.portal_host)
    }

    pub fn probe_url(&self) -> String {
        format!("https://{}{}", self.portal_host, self.probe_path)
    }

    pub fn target_url(&self, business_id: &str) -> String {
        format!(
            "https://{}/resumen-cotizacion/{}",
            self.target_host, business_id
        )
    }

    /// Whether `url` belongs to one of the workflow's properties. Pages
    /// elsewhere never get a driver.
    pub fn is_known_host(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        [
            &self.identity_host,
            &self.portal_host,
            &self.sso_host,
            &self.target_host,
        ]
        .iter()
        .any(|known| host == known.to_ascii_lowercase())
    }
}

/// Page Driver pacing. All values in milliseconds unless noted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverTimings {
    pub start_settle_ms: u64,
    pub click_login_delay_ms: u64,
    pub federated_delay_ms: u64,
    pub fill_delay_ms: u64,
    pub organization_delay_ms: u64,
    pub char_delay_ms: u64,
    pub focus_settle_ms: u64,
    pub field_settle_ms: u64,
    pub tab_settle_ms: u64,
    pub pre_submit_ms: u64,
    pub submit_attempts: u32,
    pub submit_retry_ms: u64,
    pub submit_settle_ms: u64,
    pub element_poll_ms: u64,
    pub element_poll_attempts: u32,
    pub organization_poll_ms: u64,
    pub organization_poll_attempts: u32,
    pub scroll_settle_ms: u64,
    pub selection_settle_ms: u64,
    pub redirect_initial_ms: u64,
    pub redirect_poll_ms: u64,
    pub redirect_attempts: u32,
    pub redirect_dispatch_ms: u64,
}

impl Default for DriverTimings {
    fn default() -> Self {
        Self {
            start_settle_ms: 2_000,
            click_login_delay_ms: 3_000,
            federated_delay_ms: 5_000,
            fill_delay_ms: 3_000,
            organization_delay_ms: 4_000,
            char_delay_ms: 80,
            focus_settle_ms: 200,
            field_settle_ms: 500,
            tab_settle_ms: 300,
            pre_submit_ms: 1_000,
            submit_attempts: 5,
            submit_retry_ms: 800,
            submit_settle_ms: 3_000,
            element_poll_ms: 500,
            element_poll_attempts: 10,
            organization_poll_ms: 2_000,
            organization_poll_attempts: 10,
            scroll_settle_ms: 500,
            selection_settle_ms: 1_000,
            redirect_initial_ms: 2_000,
            redirect_poll_ms: 1_000,
            redirect_attempts: 30,
            redirect_dispatch_ms: 2_000,
        }
    }
}

impl DriverTimings {
    /// Same attempt counts, no waiting. Used by tests that drive fake pages.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            start_settle_ms: 0,
            click_login_delay_ms: 0,
            federated_delay_ms: 0,
            fill_delay_ms: 0,
            organization_delay_ms: 0,
            char_delay_ms: 0,
            focus_settle_ms: 0,
            field_settle_ms: 0,
            tab_settle_ms: 0,
            pre_submit_ms: 0,
            submit_retry_ms: 0,
            submit_settle_ms: 0,
            element_poll_ms: 0,
            organization_poll_ms: 0,
            scroll_settle_ms: 0,
            selection_settle_ms: 0,
            redirect_initial_ms: 0,
            redirect_poll_ms: 0,
            redirect_dispatch_ms: 0,
            redirect_attempts: 3,
            ..Self::default()
        }
    }
}

/// Coordinator thresholds. Durations in seconds unless the name says otherwise.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorLimits {
    pub stale_job_secs: u64,
    pub inactivity_secs: u64,
    pub inactivity_check_secs: u64,
    pub long_stop_secs: u64,
    pub cleanup_interval_secs: u64,
    pub retention_secs: u64,
    pub tab_load_poll_ms: u64,
    pub tab_load_timeout_ms: u64,
    pub registration_poll_ms: u64,
    pub registration_timeout_ms: u64,
    pub ping_poll_ms: u64,
    pub ping_attempts: u32,
    pub http_timeout_secs: u64,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self {
            stale_job_secs: 120,
            inactivity_secs: 180,
            inactivity_check_secs: 30,
            long_stop_secs: 30 * 60,
            cleanup_interval_secs: 10 * 60,
            retention_secs: 2 * 60 * 60,
            tab_load_poll_ms: 500,
            tab_load_timeout_ms: 20_000,
            registration_poll_ms: 250,
            registration_timeout_ms: 10_000,
            ping_poll_ms: 500,
            ping_attempts: 10,
            http_timeout_secs: 30,
        }
    }
}

impl CoordinatorLimits {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_secs)
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub record_freshness_secs: u64,
    pub token_window_minutes: u32,
    pub allowed_sources: Vec<String>,
    pub credentials_max_age_days: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            record_freshness_secs: 5 * 60,
            token_window_minutes: 5,
            allowed_sources: vec![
                "popup".to_string(),
                "smart_popup".to_string(),
                "debug_manual".to_string(),
            ],
            credentials_max_age_days: 7,
        }
    }
}

impl SecurityPolicy {
    pub fn is_allowed_source(&self, source: &str) -> bool {
        self.allowed_sources.iter().any(|s| s == source)
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using built-in defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let mut config: AppConfig = toml::from_str(&content)?;

        if config.security.allowed_sources.is_empty() {
            warn!("security.allowed_sources is empty; restoring the default allow-list");
            config.security.allowed_sources = SecurityPolicy::default().allowed_sources;
        }
        if config.driver.redirect_attempts == 0 {
            config.driver.redirect_attempts = 1;
        }

        info!(
            "Loaded config: server={}:{}, portal={}, debug_mode={}",
            config.server.host, config.server.port, config.portal.portal_host, config.debug_mode
        );
        Ok(config)
    }
}
