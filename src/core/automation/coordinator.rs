use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::browser::{BrowserTabs, PageCommand, TabChannel};
use super::messages::StartRequest;
use super::poll::{attempts_for, poll};
use super::reporting::{StatusRelay, report_for};
use super::types::{AutomationEvent, AutomationPayload, Job, JobStatus, TabId};
use crate::core::api::{BidStatusSink, PlatformClient};
use crate::core::clock::Clock;
use crate::core::config::{CoordinatorLimits, PortalConfig};
use crate::core::store::{CoordinatorOptions, SharedStore};
use crate::core::vault::CredentialVault;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("An automation for {0} is already running; wait for it to finish or close its tab")]
    AlreadyRunning(String),

    #[error("Could not open a tab: {0}")]
    TabOpen(String),

    #[error("Tab {0} was closed before the page loaded")]
    TabClosed(TabId),

    #[error("The page in tab {0} never became reachable")]
    DriverUnreachable(TabId),

    #[error("Unknown automation {0}")]
    UnknownJob(String),

    #[error("No page channel is attached")]
    NoChannel,
}

/// What a successful start hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub automation_id: String,
    pub tab_id: TabId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    Continue,
    Stop,
}

pub struct CoordinatorDeps {
    pub browser: Arc<dyn BrowserTabs>,
    pub vault: Arc<CredentialVault>,
    pub store: SharedStore,
    pub documents: Arc<PlatformClient>,
    pub reports: Arc<dyn BidStatusSink>,
    pub clock: Arc<dyn Clock>,
    pub limits: CoordinatorLimits,
    pub portal: PortalConfig,
    pub options: CoordinatorOptions,
}

/// Owns the job registry. The registry, not the shared store, is the
/// source of truth for whether a job is running.
pub struct Coordinator {
    jobs: Mutex<HashMap<String, Job>>,
    registered: Mutex<HashSet<TabId>>,
    browser: Arc<dyn BrowserTabs>,
    channel: OnceLock<Arc<dyn TabChannel>>,
    vault: Arc<CredentialVault>,
    store: SharedStore,
    documents: Arc<PlatformClient>,
    reports: StatusRelay,
    clock: Arc<dyn Clock>,
    limits: CoordinatorLimits,
    portal: PortalConfig,
    options: Mutex<CoordinatorOptions>,
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl Coordinator {
    pub fn new(deps: CoordinatorDeps) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            registered: Mutex::new(HashSet::new()),
            browser: deps.browser,
            channel: OnceLock::new(),
            vault: deps.vault,
            store: deps.store,
            documents: deps.documents,
            reports: StatusRelay::new(deps.reports),
            clock: deps.clock,
            limits: deps.limits,
            portal: deps.portal,
            options: Mutex::new(deps.options),
        })
    }

    /// Wires the Coordinator → Page Driver channel. Only the first call sticks.
    pub fn attach_channel(&self, channel: Arc<dyn TabChannel>) {
        if self.channel.set(channel).is_err() {
            warn!("Page channel already attached; ignoring");
        }
    }

    fn channel(&self) -> Result<Arc<dyn TabChannel>, CoordinatorError> {
        self.channel.get().cloned().ok_or(CoordinatorError::NoChannel)
    }

    // --- start ---

    pub async fn start_automation(
        self: &Arc<Self>,
        request: StartRequest,
    ) -> Result<Started, CoordinatorError> {
        let now = self.clock.now_ms();
        let automation_id = Uuid::new_v4().to_string();
        let entry_url = request
            .entry_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.portal.home_url());
        let credential_ref = self.credential_slot(request.business_id.as_deref(), now).await;

        let reclaimed_tab = {
            let mut jobs = self.jobs.lock().await;
            let mut reclaimed_tab = None;
            if let Some(business_id) = request.business_id.as_deref()
                && let Some(existing) = jobs
                    .values_mut()
                    .find(|job| job.is_running() && job.business_id.as_deref() == Some(business_id))
            {
                let age_ms = now - existing.started_at;
                if age_ms < self.limits.stale_after().as_millis() as i64 {
                    return Err(CoordinatorError::AlreadyRunning(business_id.to_string()));
                }
                warn!(
                    job = %existing.id,
                    age_secs = age_ms / 1000,
                    "Reclaiming stale automation for {}",
                    business_id
                );
                existing.finish(JobStatus::Cancelled, now, Some("reclaimed".to_string()));
                reclaimed_tab = existing.tab_id;
            }

            jobs.insert(
                automation_id.clone(),
                Job {
                    id: automation_id.clone(),
                    business_id: request.business_id.clone(),
                    tab_id: None,
                    credential_ref,
                    business_data: request.business_data.clone(),
                    user_data: request.user_data.clone(),
                    status: JobStatus::Running,
                    current_step: None,
                    progress: 0,
                    started_at: now,
                    ended_at: None,
                    last_activity_at: now,
                    error: None,
                    logs: Vec::new(),
                    entry_url: entry_url.clone(),
                },
            );
            reclaimed_tab
        };

        if let Some(tab) = reclaimed_tab {
            self.registered.lock().await.remove(&tab);
            if let Err(e) = self.browser.close_tab(tab).await {
                debug!(tab, "Could not close reclaimed tab: {}", e);
            }
        }

        info!(
            job = %automation_id,
            business_id = ?request.business_id,
            "Starting automation at {}",
            entry_url
        );
        self.spawn_watchdogs(&automation_id);

        match self.launch(&automation_id, &entry_url).await {
            Ok(tab_id) => Ok(Started {
                automation_id,
                tab_id,
            }),
            Err(e) => {
                error!(job = %automation_id, "Automation could not start: {}", e);
                self.finish_job(&automation_id, JobStatus::Error, Some(e.to_string()))
                    .await;
                self.notify("Automation failed", &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Opens the tab and hands the job to its Page Driver. On failure the tab
    /// stays open for inspection.
    async fn launch(&self, automation_id: &str, entry_url: &str) -> Result<TabId, CoordinatorError> {
        let tab = self
            .browser
            .open_tab(entry_url, true)
            .await
            .map_err(|e| CoordinatorError::TabOpen(e.to_string()))?;

        {
            let now = self.clock.now_ms();
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(automation_id) {
                job.tab_id = Some(tab);
                job.push_log(now, "info", format!("opened tab {}", tab));
            }
        }

        self.wait_for_load(tab).await?;
        self.wait_for_driver(tab).await?;

        let payload = self
            .payload_for(automation_id)
            .await
            .ok_or_else(|| CoordinatorError::UnknownJob(automation_id.to_string()))?;
        self.channel()?
            .send(tab, PageCommand::Initiate { payload })
            .await
            .map_err(|e| {
                warn!(tab, "Initiate delivery failed: {}", e);
                CoordinatorError::DriverUnreachable(tab)
            })?;

        self.touch(automation_id, "initiated").await;
        Ok(tab)
    }

    async fn wait_for_load(&self, tab: TabId) -> Result<(), CoordinatorError> {
        let browser = self.browser.as_ref();
        let interval = millis(self.limits.tab_load_poll_ms);
        let attempts = attempts_for(millis(self.limits.tab_load_timeout_ms), interval);
        let loaded = poll(interval, attempts, move || async move {
            match browser.tab_info(tab).await {
                Ok(Some(info)) if !info.loading => Some(true),
                Ok(None) => Some(false),
                _ => None,
            }
        })
        .await;

        match loaded {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoordinatorError::TabClosed(tab)),
            Err(_) => {
                // A slow page may still host a driver; the handshake decides.
                warn!(tab, "Tab still loading after timeout");
                Ok(())
            }
        }
    }

    /// Active registration first, then the ping handshake.
    async fn wait_for_driver(&self, tab: TabId) -> Result<(), CoordinatorError> {
        let registered = &self.registered;
        let interval = millis(self.limits.registration_poll_ms);
        let attempts = attempts_for(millis(self.limits.registration_timeout_ms), interval);
        let announced = poll(interval, attempts, move || async move {
            registered.lock().await.contains(&tab).then_some(())
        })
        .await;
        if announced.is_ok() {
            return Ok(());
        }

        debug!(tab, "No registration, falling back to ping");
        let channel = self.channel()?;
        let channel = channel.as_ref();
        poll(
            millis(self.limits.ping_poll_ms),
            self.limits.ping_attempts,
            move || async move {
                channel
                    .send(tab, PageCommand::Ping)
                    .await
                    .ok()
                    .filter(|reply| reply.get("ready").and_then(Value::as_bool) == Some(true))
                    .map(|_| ())
            },
        )
        .await
        .map_err(|_| CoordinatorError::DriverUnreachable(tab))
    }

    async fn payload_for(&self, automation_id: &str) -> Option<AutomationPayload> {
        let (business_id, business_data, user_data) = {
            let jobs = self.jobs.lock().await;
            let job = jobs.get(automation_id)?;
            (
                job.business_id.clone(),
                job.business_data.clone(),
                job.user_data.clone(),
            )
        };
        Some(
            self.build_payload(automation_id, business_id.as_deref(), business_data, user_data)
                .await,
        )
    }

    async fn build_payload(
        &self,
        automation_id: &str,
        business_id: Option<&str>,
        business_data: Value,
        user_data: Value,
    ) -> AutomationPayload {
        let credentials = match self.vault.resolve(business_id, self.clock.now_ms()).await {
            Ok(found) => found.map(|stored| stored.credentials),
            Err(e) => {
                warn!("Credential lookup failed: {}", e);
                None
            }
        };
        let config = serde_json::to_value(&*self.options.lock().await).unwrap_or_default();
        AutomationPayload {
            automation_id: Some(automation_id.to_string()),
            business_data,
            user_data,
            credentials,
            config,
        }
    }

    /// Store key of the slot `resolve` would read for this business id.
    async fn credential_slot(&self, business_id: Option<&str>, now: i64) -> Option<String> {
        match self.vault.resolve(business_id, now).await {
            Ok(found) => found.map(|stored| stored.scope.key()),
            Err(e) => {
                warn!("Credential lookup failed: {}", e);
                None
            }
        }
    }

    // --- watchdogs ---

    fn spawn_watchdogs(self: &Arc<Self>, automation_id: &str) {
        let this = Arc::clone(self);
        let id = automation_id.to_string();
        let every = Duration::from_secs(self.limits.inactivity_check_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.inactivity_tick(&id).await == Watch::Stop {
                    break;
                }
            }
            debug!(job = %id, "Inactivity watchdog stopped");
        });

        let this = Arc::clone(self);
        let id = automation_id.to_string();
        let ceiling = Duration::from_secs(self.limits.long_stop_secs);
        tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            this.long_stop_tick(&id).await;
        });
    }

    /// One inactivity check. Stops watching once the job left `running`.
    pub async fn inactivity_tick(&self, automation_id: &str) -> Watch {
        let now = self.clock.now_ms();
        let idle_limit_ms = self.limits.inactivity().as_millis() as i64;
        let idle_ms = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(automation_id) else {
                return Watch::Stop;
            };
            if !job.is_running() {
                return Watch::Stop;
            }
            let idle_ms = now - job.last_activity_at;
            if idle_ms <= idle_limit_ms {
                return Watch::Continue;
            }
            job.finish(
                JobStatus::TimedOut,
                now,
                Some(format!("No activity for {}s", idle_ms / 1000)),
            );
            idle_ms
        };
        warn!(job = %automation_id, idle_secs = idle_ms / 1000, "Automation timed out");
        self.notify(
            "Automation timed out",
            &format!("No progress for {} minutes", idle_ms / 60_000),
        )
        .await;
        Watch::Stop
    }

    pub async fn long_stop_tick(&self, automation_id: &str) {
        let now = self.clock.now_ms();
        let limit_mins = self.limits.long_stop_secs / 60;
        let timed_out = {
            let mut jobs = self.jobs.lock().await;
            jobs.get_mut(automation_id).is_some_and(|job| {
                job.finish(
                    JobStatus::TimedOut,
                    now,
                    Some(format!("Still running after {} minutes", limit_mins)),
                )
            })
        };
        if timed_out {
            warn!(job = %automation_id, "Automation hit the {} minute ceiling", limit_mins);
            self.notify(
                "Automation timed out",
                &format!("Stopped after {} minutes", limit_mins),
            )
            .await;
        }
    }

    // --- cleanup ---

    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let every = Duration::from_secs(self.limits.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = this.evict_expired().await;
                if evicted > 0 {
                    info!("Cleanup evicted {} finished automation(s)", evicted);
                }
            }
        })
    }

    /// Drops jobs that ended longer ago than the retention window.
    pub async fn evict_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let retention_ms = self.limits.retention().as_millis() as i64;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.ended_at {
            Some(ended) if job.status.is_terminal() => now - ended <= retention_ms,
            _ => true,
        });
        before - jobs.len()
    }

    // --- tab lifecycle ---

    pub async fn register_tab(&self, tab: TabId) {
        self.registered.lock().await.insert(tab);
        let now = self.clock.now_ms();
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs
            .values_mut()
            .find(|job| job.is_running() && job.tab_id == Some(tab))
        {
            job.last_activity_at = now;
        }
        debug!(tab, "Page driver registered");
    }

    /// Cancels the running job bound to `tab`. Returns how many jobs changed.
    pub async fn tab_removed(&self, tab: TabId) -> usize {
        self.registered.lock().await.remove(&tab);
        let now = self.clock.now_ms();
        let mut jobs = self.jobs.lock().await;
        let mut cancelled = 0;
        for job in jobs
            .values_mut()
            .filter(|job| job.is_running() && job.tab_id == Some(tab))
        {
            if job.finish(JobStatus::Cancelled, now, Some("Tab closed".to_string())) {
                info!(job = %job.id, tab, "Tab closed, automation cancelled");
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Payload of the running job bound to `tab`, for a freshly loaded page.
    pub async fn automation_data(&self, tab: TabId) -> anyhow::Result<Option<AutomationPayload>> {
        let found = {
            let jobs = self.jobs.lock().await;
            jobs.values()
                .find(|job| job.is_running() && job.tab_id == Some(tab))
                .map(|job| {
                    (
                        job.id.clone(),
                        job.business_id.clone(),
                        job.business_data.clone(),
                        job.user_data.clone(),
                    )
                })
        };
        let Some((id, business_id, business_data, user_data)) = found else {
            return Ok(None);
        };
        self.touch(&id, "page loaded").await;
        Ok(Some(
            self.build_payload(&id, business_id.as_deref(), business_data, user_data)
                .await,
        ))
    }

    // --- job control ---

    pub async fn stop_automation(&self, automation_id: &str) -> Result<(), CoordinatorError> {
        let tab = {
            let jobs = self.jobs.lock().await;
            jobs.get(automation_id)
                .ok_or_else(|| CoordinatorError::UnknownJob(automation_id.to_string()))?
                .tab_id
        };

        if let Some(tab) = tab
            && let Some(channel) = self.channel.get()
            && let Err(e) = channel.send(tab, PageCommand::Stop).await
        {
            debug!(tab, "Stop not delivered: {}", e);
        }

        self.finish_job(automation_id, JobStatus::Stopped, Some("Stopped by user".to_string()))
            .await;
        info!(job = %automation_id, "Automation stopped");
        Ok(())
    }

    /// Applies a Page Driver event. Unknown ids are ignored. Events that
    /// change a job with a business id are also reported to the platform.
    pub async fn log_event(&self, automation_id: &str, event: AutomationEvent) {
        let now = self.clock.now_ms();
        let (notice, report) = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(automation_id) else {
                debug!(job = %automation_id, "Event for unknown automation");
                return;
            };
            job.last_activity_at = now;
            job.push_log(now, event.kind(), event.summary());
            let (applied, notice) = match &event {
                AutomationEvent::Progress { step, progress, .. } => {
                    let running = job.is_running();
                    if running {
                        job.current_step = Some(step.clone());
                        job.progress = *progress;
                    }
                    (running, None)
                }
                AutomationEvent::Completed { message } => {
                    let finished = job.finish(JobStatus::Completed, now, None);
                    if finished {
                        job.progress = 100;
                    }
                    let text = message
                        .clone()
                        .unwrap_or_else(|| "The workflow finished".to_string());
                    (finished, finished.then_some(("Automation completed", text)))
                }
                AutomationEvent::Error { error } => {
                    let finished = job.finish(JobStatus::Error, now, Some(error.clone()));
                    (finished, finished.then(|| ("Automation failed", error.clone())))
                }
                AutomationEvent::Warning { .. } | AutomationEvent::Info { .. } => (false, None),
            };
            let report = if applied {
                report_for(job, &event, now)
            } else {
                None
            };
            (notice, report)
        };
        if let Some(report) = report {
            self.reports.submit(report);
        }
        if let Some((title, message)) = notice {
            self.notify(title, &message).await;
        }
    }

    async fn finish_job(&self, automation_id: &str, to: JobStatus, error: Option<String>) -> bool {
        let now = self.clock.now_ms();
        let mut jobs = self.jobs.lock().await;
        jobs.get_mut(automation_id)
            .is_some_and(|job| job.finish(to, now, error))
    }

    async fn touch(&self, automation_id: &str, note: &str) {
        let now = self.clock.now_ms();
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(automation_id) {
            job.last_activity_at = now;
            job.push_log(now, "info", note);
        }
    }

    // --- queries ---

    pub async fn job(&self, automation_id: &str) -> Option<Job> {
        self.jobs.lock().await.get(automation_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.is_running())
            .count()
    }

    pub async fn status(&self, automation_id: Option<&str>) -> Value {
        match automation_id {
            Some(id) => match self.job(id).await {
                Some(job) => json!({ "success": true, "automation": job }),
                None => json!({ "success": false, "error": format!("Unknown automation {}", id) }),
            },
            None => {
                let jobs = self.jobs.lock().await;
                let mut all: Vec<&Job> = jobs.values().collect();
                all.sort_by_key(|job| job.started_at);
                let active = all.iter().filter(|job| job.is_running()).count();
                json!({ "success": true, "automations": all, "activeCount": active })
            }
        }
    }

    pub async fn download_document(&self, url: &str) -> Value {
        match self.documents.download_document(url).await {
            Ok(data) => json!({ "success": true, "data": data }),
            Err(e) => {
                warn!("Document download failed: {}", e);
                json!({ "success": false, "error": e.to_string(), "status": e.status() })
            }
        }
    }

    // --- configuration ---

    pub async fn configuration(&self) -> Value {
        let options = self.options.lock().await.clone();
        json!({ "success": true, "config": options })
    }

    pub async fn update_configuration(&self, patch: &Value) -> anyhow::Result<Value> {
        let updated = {
            let mut options = self.options.lock().await;
            options.merge(patch);
            options.clone()
        };
        self.store.put_coordinator_options(&updated).await?;
        info!(?updated, "Configuration updated");
        Ok(json!({ "success": true, "config": updated }))
    }

    pub async fn test_credentials(&self, business_id: Option<&str>) -> Value {
        match self.vault.resolve(business_id, self.clock.now_ms()).await {
            Ok(Some(stored)) => json!({
                "success": true,
                "hasCredentials": true,
                "username": stored.credentials.username,
                "savedAt": stored.saved_at,
            }),
            Ok(None) => json!({ "success": true, "hasCredentials": false }),
            Err(e) => json!({ "success": false, "error": e.to_string() }),
        }
    }

    pub async fn extension_status(&self) -> Value {
        json!({
            "success": true,
            "enabled": self.store.extension_enabled().await,
            "activeCount": self.active_count().await,
        })
    }

    async fn notify(&self, title: &str, message: &str) {
        if !self.options.lock().await.notifications {
            return;
        }
        if let Err(e) = self.browser.notify(title, message).await {
            debug!("Notification not shown: {}", e);
        }
    }
}
