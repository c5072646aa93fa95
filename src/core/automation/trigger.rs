use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::browser::{BrowserTabs, MessageSender};
use super::messages::{Request, StartRequest};
use super::poll::{attempts_for, poll};
use super::types::{AuthorizationToken, AutomationRecord, OrganizationData, RecordStatus, TabId};
use crate::core::api::{ApiError, BusinessDataSource};
use crate::core::clock::Clock;
use crate::core::config::{CoordinatorLimits, PortalConfig, SecurityPolicy};
use crate::core::store::SharedStore;
use crate::core::vault::CredentialVault;

/// Record source written by the trigger surface.
pub const TRIGGER_SOURCE: &str = "smart_popup";

/// Where the new tab should start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Strategy {
    /// No business id: just log in.
    LoginOnly { entry_url: String },
    /// The portal session already knows the organization: go straight to the quote.
    DirectTarget {
        entry_url: String,
        organization_hint: String,
    },
    /// Full login chain, then navigate to the quote.
    FullChain { entry_url: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::LoginOnly { .. } => "login_only",
            Strategy::DirectTarget { .. } => "direct_target",
            Strategy::FullChain { .. } => "full_chain",
        }
    }

    pub fn entry_url(&self) -> &str {
        match self {
            Strategy::LoginOnly { entry_url }
            | Strategy::DirectTarget { entry_url, .. }
            | Strategy::FullChain { entry_url } => entry_url,
        }
    }

    pub fn organization_hint(&self) -> Option<&str> {
        match self {
            Strategy::DirectTarget {
                organization_hint, ..
            } => Some(organization_hint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default, alias = "licitacionId")]
    pub business_id: Option<String>,
    #[serde(default)]
    pub user_data: Value,
}

#[derive(Debug, Serialize)]
pub struct TriggerOutcome {
    pub strategy: Strategy,
    pub response: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Automation is disabled")]
    Disabled,

    #[error("No saved credentials; run `bidpilot credentials set` first")]
    NoCredentials,

    #[error("Could not load business data: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct TriggerDeps {
    pub store: SharedStore,
    pub vault: Arc<CredentialVault>,
    pub browser: Arc<dyn BrowserTabs>,
    pub data: Arc<dyn BusinessDataSource>,
    pub sender: Arc<dyn MessageSender>,
    pub clock: Arc<dyn Clock>,
    pub portal: PortalConfig,
    pub security: SecurityPolicy,
    pub limits: CoordinatorLimits,
}

/// Built per trigger request and dropped afterwards.
pub struct TriggerUi {
    deps: Arc<TriggerDeps>,
}

impl TriggerUi {
    pub fn new(deps: Arc<TriggerDeps>) -> Self {
        Self { deps }
    }

    pub async fn trigger(&self, request: TriggerRequest) -> Result<TriggerOutcome, TriggerError> {
        let deps = &self.deps;
        if !deps.store.extension_enabled().await {
            return Err(TriggerError::Disabled);
        }

        let business_id = request
            .business_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let stored = deps
            .vault
            .resolve(business_id.as_deref(), deps.clock.now_ms())
            .await?
            .ok_or(TriggerError::NoCredentials)?;

        let organization = match deps.data.organization_data().await {
            Ok(raw) => serde_json::from_value::<OrganizationData>(raw).ok(),
            Err(e) if business_id.is_some() => return Err(e.into()),
            Err(e) => {
                warn!("Organization data unavailable: {}", e);
                None
            }
        };
        let business_data = match business_id.as_deref() {
            Some(id) => deps.data.quote_data(id).await?,
            None => Value::Null,
        };

        let strategy = self.determine_strategy(business_id.as_deref()).await;
        info!(
            strategy = strategy.name(),
            business_id = ?business_id,
            "Triggering automation"
        );

        let organization = organization
            .filter(|org| org.unit_name.is_some())
            .or_else(|| strategy.organization_hint().map(OrganizationData::named));

        let now = deps.clock.now_ms();
        let record = AutomationRecord {
            credentials: stored.credentials,
            business_id: business_id.clone(),
            navigate_to_target: business_id.is_some(),
            organization,
            business_data: business_data.clone(),
            strategy: Some(strategy.name().to_string()),
            status: RecordStatus::Ready,
            source: TRIGGER_SOURCE.to_string(),
            timestamp: now,
        };
        deps.store.put_automation_record(&record).await?;

        let token = AuthorizationToken::new(
            business_id.clone(),
            now,
            deps.security.token_window_minutes,
        );
        deps.store.put_authorization(&token).await?;
        self.schedule_token_expiry(&token);

        let response = deps
            .sender
            .send(
                None,
                Request::StartAutomation(StartRequest {
                    business_id,
                    business_data,
                    user_data: request.user_data,
                    entry_url: Some(strategy.entry_url().to_string()),
                }),
            )
            .await?;

        Ok(TriggerOutcome { strategy, response })
    }

    pub async fn determine_strategy(&self, business_id: Option<&str>) -> Strategy {
        let portal = &self.deps.portal;
        let Some(id) = business_id else {
            return Strategy::LoginOnly {
                entry_url: portal.home_url(),
            };
        };
        match self.probe_organization().await {
            Some(organization_hint) => Strategy::DirectTarget {
                entry_url: portal.target_url(id),
                organization_hint,
            },
            None => Strategy::FullChain {
                entry_url: portal.home_url(),
            },
        }
    }

    /// Opens a hidden tab on the portal menu and reads the organization
    /// label. Never fails: any problem means "unknown".
    pub async fn probe_organization(&self) -> Option<String> {
        let browser = &self.deps.browser;
        let tab = match browser.open_tab(&self.deps.portal.probe_url(), false).await {
            Ok(tab) => tab,
            Err(e) => {
                debug!("Probe tab not opened: {}", e);
                return None;
            }
        };
        let found = self.read_probe(tab).await;
        if let Err(e) = browser.close_tab(tab).await {
            debug!(tab, "Probe tab not closed: {}", e);
        }
        found
    }

    async fn read_probe(&self, tab: TabId) -> Option<String> {
        let browser = self.deps.browser.as_ref();
        let interval = Duration::from_millis(self.deps.limits.tab_load_poll_ms);
        let attempts = attempts_for(
            Duration::from_millis(self.deps.limits.tab_load_timeout_ms),
            interval,
        );
        let loaded = poll(interval, attempts, move || async move {
            match browser.tab_info(tab).await {
                Ok(Some(info)) if !info.loading => Some(true),
                Ok(None) => Some(false),
                _ => None,
            }
        })
        .await;
        if loaded != Ok(true) {
            debug!(tab, "Probe page did not load");
            return None;
        }

        match browser.read_text(tab, &self.deps.portal.probe_selector).await {
            Ok(text) => text
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Err(e) => {
                debug!(tab, "Probe read failed: {}", e);
                None
            }
        }
    }

    fn schedule_token_expiry(&self, token: &AuthorizationToken) {
        let store = self.deps.store.clone();
        let timestamp = token.timestamp;
        let window = Duration::from_millis(token.window_ms().max(0) as u64);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            match store.clear_authorization_if(timestamp).await {
                Ok(true) => debug!("Authorization token expired"),
                Ok(false) => {}
                Err(e) => warn!("Could not expire authorization token: {}", e),
            }
        });
    }
}
