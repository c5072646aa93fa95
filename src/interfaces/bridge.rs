//! WebSocket bridge to the browser extension shim.
//!
//! The shim forwards DOM and tab operations on our behalf and reports page
//! lifecycle events. Requests carry a numeric id; the shim answers each one
//! with `{"id", "ok"}` or `{"id", "error"}`.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::core::automation::browser::{BrowserTabs, TabInfo};
use crate::core::automation::page::{DomEvent, Element, PageDom, StatusTone};
use crate::core::automation::types::TabId;
use crate::core::automation::{Coordinator, DriverHost, PageFactory};

type Pending = HashMap<u64, oneshot::Sender<Result<Value, String>>>;

/// Shim → host frames.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Event(ShimEvent),
    Reply {
        id: u64,
        #[serde(default)]
        ok: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ShimEvent {
    PageLoaded { tab_id: TabId, url: String },
    TabRemoved { tab_id: TabId },
}

/// One logical connection to the shim. Reconnects replace the outbound
/// sender; calls made while disconnected fail immediately.
pub struct Bridge {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Bridge {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Sends `op` to the shim and waits for its answer.
    pub async fn call(&self, op: &str, tab: Option<TabId>, args: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({ "id": id, "op": op, "tabId": tab, "args": args }).to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = match self.outbound.lock().await.as_ref() {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.lock().await.remove(&id);
            bail!("Browser extension is not connected");
        }
        trace!(id, op, tab = ?tab, "Bridge call sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(anyhow!("{} failed: {}", op, message)),
            Ok(Err(_)) => Err(anyhow!("{} abandoned: extension disconnected", op)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(anyhow!(
                    "{} timed out after {} ms",
                    op,
                    self.timeout.as_millis()
                ))
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        op: &str,
        tab: Option<TabId>,
        args: Value,
    ) -> Result<T> {
        let value = self.call(op, tab, args).await?;
        serde_json::from_value(value).map_err(|e| anyhow!("Unexpected {} reply: {}", op, e))
    }

    async fn resolve(&self, id: u64, outcome: Result<Value, String>) {
        match self.pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(id, "Reply for an unknown or expired call"),
        }
    }

    async fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        if self.outbound.lock().await.replace(tx).is_some() {
            info!("Extension reconnected; replacing the previous bridge connection");
        }
    }

    /// Drops `mine` if it is still the live connection and fails every
    /// call in flight. A newer connection is left untouched.
    async fn detach(&self, mine: &mpsc::UnboundedSender<String>) {
        {
            let mut outbound = self.outbound.lock().await;
            match outbound.as_ref() {
                Some(current) if current.same_channel(mine) => {
                    outbound.take();
                }
                _ => return,
            }
        }
        let abandoned: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, tx) in abandoned {
            let _ = tx.send(Err("extension disconnected".to_string()));
        }
    }

    /// Pumps one WebSocket connection until it closes. Shim events run off
    /// the reader, one lane per tab, so handlers may call back into the
    /// bridge while events for a tab keep their arrival order.
    pub async fn serve(
        self: Arc<Self>,
        socket: WebSocket,
        host: Arc<DriverHost>,
        coordinator: Arc<Coordinator>,
    ) {
        let mut lanes = EventLanes::new(Arc::new(LiveEvents { host, coordinator }));
        let (mut sink, mut source) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.attach(tx.clone()).await;
        info!("Browser extension connected");

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!("Bridge write failed: {}", e);
                    break;
                }
            }
        });

        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<Inbound>(text.as_str()) {
                    Ok(Inbound::Reply { id, ok, error }) => {
                        let outcome = match error {
                            Some(message) => Err(message),
                            None => Ok(ok),
                        };
                        self.resolve(id, outcome).await;
                    }
                    Ok(Inbound::Event(event)) => lanes.push(event),
                    Err(e) => warn!("Unparseable bridge frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Bridge read failed: {}", e);
                    break;
                }
            }
        }

        writer.abort();
        self.detach(&tx).await;
        info!("Browser extension disconnected");
    }
}

impl ShimEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            ShimEvent::PageLoaded { tab_id, .. } | ShimEvent::TabRemoved { tab_id } => *tab_id,
        }
    }
}

#[async_trait]
trait ShimEventHandler: Send + Sync {
    async fn handle(&self, event: ShimEvent);
}

struct LiveEvents {
    host: Arc<DriverHost>,
    coordinator: Arc<Coordinator>,
}

#[async_trait]
impl ShimEventHandler for LiveEvents {
    async fn handle(&self, event: ShimEvent) {
        match event {
            ShimEvent::PageLoaded { tab_id, url } => {
                debug!(tab = tab_id, "Page loaded: {}", url);
                self.host.page_loaded(tab_id, &url).await;
            }
            ShimEvent::TabRemoved { tab_id } => {
                self.host.tab_closed(tab_id).await;
                self.coordinator.tab_removed(tab_id).await;
            }
        }
    }
}

/// One worker per tab. Events for a tab are handled strictly in arrival
/// order; different tabs proceed independently.
struct EventLanes {
    handler: Arc<dyn ShimEventHandler>,
    lanes: HashMap<TabId, mpsc::UnboundedSender<ShimEvent>>,
}

impl EventLanes {
    fn new(handler: Arc<dyn ShimEventHandler>) -> Self {
        Self {
            handler,
            lanes: HashMap::new(),
        }
    }

    fn push(&mut self, event: ShimEvent) {
        let tab = event.tab_id();
        let closing = matches!(event, ShimEvent::TabRemoved { .. });

        let lane = self
            .lanes
            .entry(tab)
            .or_insert_with(|| spawn_lane(Arc::clone(&self.handler)));
        if let Err(rejected) = lane.send(event) {
            warn!(tab, "Event lane stopped, starting a new one");
            let fresh = spawn_lane(Arc::clone(&self.handler));
            let _ = fresh.send(rejected.0);
            *lane = fresh;
        }

        // the worker drains what it has queued, then exits
        if closing {
            self.lanes.remove(&tab);
        }
    }
}

fn spawn_lane(handler: Arc<dyn ShimEventHandler>) -> mpsc::UnboundedSender<ShimEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ShimEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handler.handle(event).await;
        }
    });
    tx
}

/// Tab operations carried out by the shim.
pub struct BridgeBrowser {
    bridge: Arc<Bridge>,
}

impl BridgeBrowser {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl BrowserTabs for BridgeBrowser {
    async fn open_tab(&self, url: &str, active: bool) -> Result<TabId> {
        self.bridge
            .call_as("openTab", None, json!({ "url": url, "active": active }))
            .await
    }

    async fn close_tab(&self, tab: TabId) -> Result<()> {
        self.bridge.call("closeTab", Some(tab), json!({})).await?;
        Ok(())
    }

    async fn tab_info(&self, tab: TabId) -> Result<Option<TabInfo>> {
        self.bridge.call_as("tabInfo", Some(tab), json!({})).await
    }

    async fn read_text(&self, tab: TabId, selector: &str) -> Result<Option<String>> {
        self.bridge
            .call_as("readText", Some(tab), json!({ "selector": selector }))
            .await
    }

    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        self.bridge
            .call("notify", None, json!({ "title": title, "message": message }))
            .await?;
        Ok(())
    }
}

/// The DOM of one tab, reached through the shim.
pub struct BridgePage {
    bridge: Arc<Bridge>,
    tab: TabId,
}

impl BridgePage {
    async fn on(&self, op: &str, handle: &str, mut args: Value) -> Result<()> {
        args["handle"] = json!(handle);
        self.bridge.call(op, Some(self.tab), args).await?;
        Ok(())
    }
}

#[async_trait]
impl PageDom for BridgePage {
    async fn url(&self) -> Result<String> {
        self.bridge.call_as("url", Some(self.tab), json!({})).await
    }

    async fn document_id(&self) -> Result<String> {
        self.bridge
            .call_as("documentId", Some(self.tab), json!({}))
            .await
    }

    async fn query(&self, selector: &str) -> Result<Vec<Element>> {
        self.bridge
            .call_as("query", Some(self.tab), json!({ "selector": selector }))
            .await
    }

    async fn focus(&self, handle: &str) -> Result<()> {
        self.on("focus", handle, json!({})).await
    }

    async fn set_value(&self, handle: &str, value: &str) -> Result<()> {
        self.on("setValue", handle, json!({ "value": value })).await
    }

    async fn set_checked(&self, handle: &str, checked: bool) -> Result<()> {
        self.on("setChecked", handle, json!({ "checked": checked }))
            .await
    }

    async fn dispatch(&self, handle: &str, event: DomEvent) -> Result<()> {
        self.on("dispatch", handle, json!({ "event": event })).await
    }

    async fn click(&self, handle: &str) -> Result<()> {
        self.on("click", handle, json!({})).await
    }

    async fn scroll_into_view(&self, handle: &str) -> Result<()> {
        self.on("scrollIntoView", handle, json!({})).await
    }

    async fn submit_form(&self, handle: &str) -> Result<()> {
        self.on("submitForm", handle, json!({})).await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.bridge
            .call("navigate", Some(self.tab), json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn show_status(&self, text: &str, tone: StatusTone) -> Result<()> {
        self.bridge
            .call(
                "showStatus",
                Some(self.tab),
                json!({ "text": text, "tone": tone }),
            )
            .await?;
        Ok(())
    }
}

/// Hands each Page Driver a `BridgePage` for its tab.
pub struct BridgePages {
    bridge: Arc<Bridge>,
}

impl BridgePages {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

impl PageFactory for BridgePages {
    fn page_for(&self, tab: TabId) -> Arc<dyn PageDom> {
        Arc::new(BridgePage {
            bridge: Arc::clone(&self.bridge),
            tab,
        })
    }
}
