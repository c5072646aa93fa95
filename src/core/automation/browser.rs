use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::Request;
use super::types::{AutomationPayload, TabId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    /// `true` until the page reports load completion.
    #[serde(default)]
    pub loading: bool,
}

/// Tab-level browser operations used by the Coordinator and Trigger UI.
#[async_trait]
pub trait BrowserTabs: Send + Sync {
    async fn open_tab(&self, url: &str, active: bool) -> Result<TabId>;
    async fn close_tab(&self, tab: TabId) -> Result<()>;
    /// `None` once the tab no longer exists.
    async fn tab_info(&self, tab: TabId) -> Result<Option<TabInfo>>;
    /// Read-only text of the first element matching `selector`.
    async fn read_text(&self, tab: TabId, selector: &str) -> Result<Option<String>>;
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Commands the Coordinator sends to the Page Driver living in a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageCommand {
    Ping,
    Initiate { payload: AutomationPayload },
    Stop,
}

/// Coordinator → Page Driver delivery. Fails when no driver is listening.
#[async_trait]
pub trait TabChannel: Send + Sync {
    async fn send(&self, tab: TabId, command: PageCommand) -> Result<Value>;
}

/// Page Driver / Trigger UI → Coordinator delivery. `from_tab` plays the role
/// of the sender's tab identity.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, from_tab: Option<TabId>, request: Request) -> Result<Value>;
}
