use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Snapshot of one DOM element, as returned by a query. `handle` addresses
/// the live element in later calls for as long as the page stays loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Element {
    pub handle: String,
    pub tag: String,
    pub id: Option<String>,
    pub text: String,
    pub value: Option<String>,
    pub href: Option<String>,
    pub onclick: Option<String>,
    pub visible: bool,
    pub disabled: bool,
}

impl Element {
    pub fn text_lower(&self) -> String {
        self.text.trim().to_lowercase()
    }
}

/// Synthetic events a step may dispatch on an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomEvent {
    Input,
    Keyup,
    Change,
    Blur,
    Click,
    KeyDown(Key),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Key {
    Tab,
    Enter,
}

/// Colour family of the on-page status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusTone {
    Auth,
    Login,
    Organization,
    Success,
    Warning,
    Error,
}

/// The DOM of one loaded page. Every call may fail: the page can navigate
/// away at any point.
#[async_trait]
pub trait PageDom: Send + Sync {
    async fn url(&self) -> Result<String>;
    /// Identity of the loaded document. Changes with every cross-document
    /// navigation; fragment and history-API changes keep it.
    async fn document_id(&self) -> Result<String>;
    async fn query(&self, selector: &str) -> Result<Vec<Element>>;
    async fn focus(&self, handle: &str) -> Result<()>;
    async fn set_value(&self, handle: &str, value: &str) -> Result<()>;
    async fn set_checked(&self, handle: &str, checked: bool) -> Result<()>;
    async fn dispatch(&self, handle: &str, event: DomEvent) -> Result<()>;
    /// Native `click()`; errors when the element refuses it.
    async fn click(&self, handle: &str) -> Result<()>;
    async fn scroll_into_view(&self, handle: &str) -> Result<()>;
    async fn submit_form(&self, handle: &str) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn show_status(&self, text: &str, tone: StatusTone) -> Result<()>;
}
