use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use super::browser::MessageSender;
use super::coordinator::Coordinator;
use super::types::{AutomationEvent, TabId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default, alias = "licitacionId")]
    pub business_id: Option<String>,
    #[serde(default, alias = "licitacionData")]
    pub business_data: Value,
    #[serde(default)]
    pub user_data: Value,
    /// Overrides the portal home as the first page to open.
    #[serde(default)]
    pub entry_url: Option<String>,
}

/// Every message the Coordinator answers, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    #[serde(alias = "startLicitacionAutomation")]
    StartAutomation(StartRequest),
    Ping,
    ContentScriptReady,
    GetAutomationData,
    GetAutomationStatus {
        #[serde(default)]
        automation_id: Option<String>,
    },
    StopAutomation {
        automation_id: String,
    },
    LogAutomationEvent {
        automation_id: String,
        event: AutomationEvent,
    },
    DownloadDocument {
        url: String,
    },
    GetConfiguration,
    UpdateConfiguration {
        config: Value,
    },
    TestCredentials {
        #[serde(default)]
        business_id: Option<String>,
    },
    CheckExtensionStatus,
}

const KNOWN_ACTIONS: &[&str] = &[
    "startAutomation",
    "startLicitacionAutomation",
    "ping",
    "contentScriptReady",
    "getAutomationData",
    "getAutomationStatus",
    "stopAutomation",
    "logAutomationEvent",
    "downloadDocument",
    "getConfiguration",
    "updateConfiguration",
    "testCredentials",
    "checkExtensionStatus",
];

pub fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

/// Entry point for raw JSON messages. Always answers, never errors.
pub async fn handle_raw(coordinator: &Arc<Coordinator>, from_tab: Option<TabId>, raw: Value) -> Value {
    let action = raw
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !KNOWN_ACTIONS.contains(&action.as_str()) {
        debug!("Rejecting message with action '{}'", action);
        return failure(format!("Unrecognized action: {}", action));
    }
    match serde_json::from_value::<Request>(raw) {
        Ok(request) => handle(coordinator, from_tab, request).await,
        Err(e) => failure(format!("Invalid '{}' payload: {}", action, e)),
    }
}

/// Routes a typed message to the Coordinator and shapes the reply.
pub async fn handle(coordinator: &Arc<Coordinator>, from_tab: Option<TabId>, request: Request) -> Value {
    match request {
        Request::StartAutomation(start) => match coordinator.start_automation(start).await {
            Ok(started) => json!({
                "success": true,
                "automationId": started.automation_id,
                "targetTabId": started.tab_id,
            }),
            Err(e) => {
                warn!("Start rejected: {}", e);
                failure(e)
            }
        },
        Request::Ping => json!({ "success": true, "ready": true }),
        Request::ContentScriptReady => match from_tab {
            Some(tab) => {
                coordinator.register_tab(tab).await;
                json!({ "success": true })
            }
            None => failure("contentScriptReady must come from a tab"),
        },
        Request::GetAutomationData => match from_tab {
            Some(tab) => match coordinator.automation_data(tab).await {
                Ok(Some(payload)) => {
                    let mut body = serde_json::to_value(payload).unwrap_or_default();
                    body["success"] = json!(true);
                    body
                }
                Ok(None) => failure("No automation is bound to this tab"),
                Err(e) => failure(e),
            },
            None => failure("getAutomationData must come from a tab"),
        },
        Request::GetAutomationStatus { automation_id } => {
            coordinator.status(automation_id.as_deref()).await
        }
        Request::StopAutomation { automation_id } => {
            match coordinator.stop_automation(&automation_id).await {
                Ok(()) => json!({ "success": true, "message": "Automation stopped" }),
                Err(e) => failure(e),
            }
        }
        Request::LogAutomationEvent {
            automation_id,
            event,
        } => {
            coordinator.log_event(&automation_id, event).await;
            json!({ "success": true })
        }
        Request::DownloadDocument { url } => coordinator.download_document(&url).await,
        Request::GetConfiguration => coordinator.configuration().await,
        Request::UpdateConfiguration { config } => {
            match coordinator.update_configuration(&config).await {
                Ok(updated) => updated,
                Err(e) => failure(e),
            }
        }
        Request::TestCredentials { business_id } => {
            coordinator.test_credentials(business_id.as_deref()).await
        }
        Request::CheckExtensionStatus => coordinator.extension_status().await,
    }
}

/// In-process `MessageSender` straight into the Coordinator.
pub struct CoordinatorSender {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorSender {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl MessageSender for CoordinatorSender {
    async fn send(&self, from_tab: Option<TabId>, request: Request) -> Result<Value> {
        Ok(handle(&self.coordinator, from_tab, request).await)
    }
}
