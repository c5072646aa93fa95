use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::browser::{MessageSender, PageCommand};
use super::gate::{self, GateDenied};
use super::locate::{
    CONFIRM_BUTTON, FEDERATED_BUTTON, FIRST_FORM, LOGIN_BUTTON, LOGIN_ERROR, Locator,
    ORGANIZATION_RADIOS, PASSWORD_INPUT, SUBMIT_BUTTON, USERNAME_INPUT, locate,
};
use super::messages::Request;
use super::organization::{OrganizationError, resolve_organization};
use super::page::{DomEvent, Element, Key, PageDom, StatusTone};
use super::poll::poll;
use super::steps::{classify, is_expected_redirect};
use super::types::{
    AutomationEvent, AutomationPayload, AutomationRecord, Credentials, RecordStatus, Step, TabId,
};
use crate::core::clock::Clock;
use crate::core::config::{DriverTimings, PortalConfig, SecurityPolicy};
use crate::core::store::{DebugEntry, SharedStore};

/// Hard failures of a step. Authorization denials are not errors; see
/// `GateDenied`.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("{0} did not respond to activation")]
    Unresponsive(String),

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error(transparent)]
    Organization(#[from] OrganizationError),

    #[error("page call failed: {0}")]
    Page(#[from] anyhow::Error),

    /// The driver was shut down, or its document was replaced, mid-step.
    #[error("page driver detached from its page")]
    Detached,
}

/// How a redirect wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redirect {
    /// The URL matched within the same document.
    Matched,
    /// A new document replaced ours; its own driver takes over.
    Left,
    /// Nothing happened within the wait.
    Missed,
}

/// What a step left behind.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// Wait for the URL to move away from `from` to one of `patterns`.
    AwaitRedirect {
        from: String,
        patterns: &'static [&'static str],
    },
    /// A full navigation was requested; the next page gets its own driver.
    Navigated,
    /// The workflow finished on this page.
    Done,
}

/// Shared by every Page Driver the host creates.
pub struct DriverDeps {
    pub store: SharedStore,
    pub sender: Arc<dyn MessageSender>,
    pub clock: Arc<dyn Clock>,
    pub portal: PortalConfig,
    pub timings: DriverTimings,
    pub security: SecurityPolicy,
}

#[derive(Default)]
struct JobContext {
    automation_id: Option<String>,
    credentials: Option<Credentials>,
    debug_mode: bool,
}

/// Clears the running flag when the dispatch loop exits, however it exits.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the workflow on one loaded document. Lives exactly as long as that
/// document; the next navigation gets a fresh instance with no memory of
/// this one. Same-document URL changes re-enter dispatch on this instance.
pub struct PageDriver {
    tab_id: TabId,
    page: Arc<dyn PageDom>,
    deps: Arc<DriverDeps>,
    running: AtomicBool,
    settled: AtomicBool,
    stopped: AtomicBool,
    context: Mutex<JobContext>,
}

impl PageDriver {
    pub fn new(tab_id: TabId, page: Arc<dyn PageDom>, deps: Arc<DriverDeps>) -> Self {
        Self {
            tab_id,
            page,
            deps,
            running: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            context: Mutex::new(JobContext::default()),
        }
    }

    /// Called by the host when the page is torn down or replaced.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Page-load entry point: register with the Coordinator, pick up any
    /// job payload bound to this tab, then act on a fresh record if one
    /// is waiting.
    pub async fn on_load(self: &Arc<Self>) {
        if let Err(e) = self
            .deps
            .sender
            .send(Some(self.tab_id), Request::ContentScriptReady)
            .await
        {
            debug!(tab = self.tab_id, "Registration failed: {}", e);
        }

        match self
            .deps
            .sender
            .send(Some(self.tab_id), Request::GetAutomationData)
            .await
        {
            Ok(reply) if reply.get("success").and_then(Value::as_bool) == Some(true) => {
                match serde_json::from_value::<AutomationPayload>(reply) {
                    Ok(payload) => self.adopt(payload).await,
                    Err(e) => debug!(tab = self.tab_id, "Unusable automation data: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => debug!(tab = self.tab_id, "No automation data: {}", e),
        }

        let now = self.deps.clock.now_ms();
        let record = match self.deps.store.automation_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(tab = self.tab_id, "Could not read automation record: {}", e);
                return;
            }
        };

        let freshness_ms = self.deps.security.record_freshness_secs as i64 * 1000;
        if !record.status.is_actionable() || record.age_ms(now) >= freshness_ms {
            debug!(
                tab = self.tab_id,
                status = ?record.status,
                age_ms = record.age_ms(now),
                "Ignoring automation record"
            );
            return;
        }

        if record.status == RecordStatus::Ready
            && let Err(e) = self
                .deps
                .store
                .set_record_status(RecordStatus::Processing)
                .await
        {
            warn!("Could not mark record as processing: {}", e);
        }

        self.show_status("Automation starting...", StatusTone::Auth)
            .await;
        self.spawn_run(self.deps.timings.start_settle_ms);
    }

    /// Commands from the Coordinator over the tab channel.
    pub async fn handle_command(self: &Arc<Self>, command: PageCommand) -> Value {
        match command {
            PageCommand::Ping => json!({ "success": true, "ready": !self.is_stopped() }),
            PageCommand::Initiate { payload } => {
                self.adopt(payload).await;
                self.spawn_run(self.deps.timings.start_settle_ms);
                json!({ "success": true })
            }
            PageCommand::Stop => {
                self.shutdown();
                self.show_status("Automation stopped", StatusTone::Warning)
                    .await;
                json!({ "success": true })
            }
        }
    }

    async fn adopt(&self, payload: AutomationPayload) {
        let mut context = self.context.lock().await;
        if payload.automation_id.is_some() {
            context.automation_id = payload.automation_id;
        }
        if let Some(creds) = payload.credentials.filter(Credentials::is_complete) {
            context.credentials = Some(creds);
        }
        if let Some(debug_mode) = payload.config.get("debug_mode").and_then(Value::as_bool) {
            context.debug_mode = debug_mode;
        }
    }

    fn spawn_run(self: &Arc<Self>, delay_ms: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.pause(delay_ms).await;
            this.run().await;
        });
    }

    /// The dispatch loop. Guarded so it never re-enters for the same page;
    /// a matching redirect loops back to classification.
    pub async fn run(&self) {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!(tab = self.tab_id, "Dispatch already running");
            return;
        };
        if self.settled.load(Ordering::SeqCst) || self.is_stopped() {
            return;
        }

        let document = match self.page.document_id().await {
            Ok(document) => document,
            Err(e) => {
                warn!(tab = self.tab_id, "Page went away: {}", e);
                self.settled.store(true, Ordering::SeqCst);
                return;
            }
        };

        loop {
            if self.settled.load(Ordering::SeqCst) || self.is_stopped() {
                return;
            }

            let now = self.deps.clock.now_ms();
            let record = match gate::check(&self.deps.store, &self.deps.security, now).await {
                Ok(record) => record,
                Err(denied) => {
                    self.deny(denied).await;
                    break;
                }
            };

            let url = match self.page.url().await {
                Ok(url) => url,
                Err(e) => {
                    warn!(tab = self.tab_id, "Page went away: {}", e);
                    break;
                }
            };
            let step = classify(&url, &self.deps.portal);
            self.begin_step(step, &url).await;

            match self.execute(step, &record, url).await {
                Ok(Outcome::AwaitRedirect { from, patterns }) => {
                    match self.await_redirect(&document, &from, patterns).await {
                        Redirect::Matched => {
                            debug!(tab = self.tab_id, step = step.as_str(), "Redirect observed");
                            self.pause(self.deps.timings.redirect_dispatch_ms).await;
                            continue;
                        }
                        Redirect::Left => {
                            debug!(
                                tab = self.tab_id,
                                step = step.as_str(),
                                "Document replaced, leaving the next page to its own driver"
                            );
                            self.shutdown();
                        }
                        Redirect::Missed => {
                            debug!(tab = self.tab_id, step = step.as_str(), "No redirect, giving up");
                        }
                    }
                    break;
                }
                Ok(Outcome::Navigated) | Ok(Outcome::Done) => break,
                Err(StepError::Detached) => {
                    debug!(tab = self.tab_id, step = step.as_str(), "Detached mid-step");
                    break;
                }
                Err(e) => {
                    self.fail(step, &e).await;
                    break;
                }
            }
        }
        self.settled.store(true, Ordering::SeqCst);
    }

    async fn execute(
        &self,
        step: Step,
        record: &AutomationRecord,
        from: String,
    ) -> Result<Outcome, StepError> {
        let t = &self.deps.timings;
        match step {
            Step::ClickLogin => {
                self.click_through(t.click_login_delay_ms, LOGIN_BUTTON, "login button")
                    .await?;
                Ok(Outcome::AwaitRedirect {
                    from,
                    patterns: step.redirect_patterns(),
                })
            }
            Step::ClickFederatedLogin => {
                self.click_through(t.federated_delay_ms, FEDERATED_BUTTON, "federated login")
                    .await?;
                Ok(Outcome::AwaitRedirect {
                    from,
                    patterns: step.redirect_patterns(),
                })
            }
            Step::FillCredentials => {
                let credentials = self.credentials_for(record).await;
                self.fill_credentials(&credentials).await?;
                Ok(Outcome::AwaitRedirect {
                    from,
                    patterns: step.redirect_patterns(),
                })
            }
            Step::SelectOrganization => {
                self.select_organization(record).await?;
                Ok(Outcome::AwaitRedirect {
                    from,
                    patterns: step.redirect_patterns(),
                })
            }
            Step::Finalize => self.finalize(record).await,
            Step::SuccessTerminal => {
                self.complete().await;
                Ok(Outcome::Done)
            }
            Step::RedirectToHome => {
                let home = self.deps.portal.home_url();
                info!(tab = self.tab_id, "Off the workflow, returning to {}", home);
                self.live()?;
                self.page.navigate(&home).await?;
                Ok(Outcome::Navigated)
            }
        }
    }

    async fn credentials_for(&self, record: &AutomationRecord) -> Credentials {
        self.context
            .lock()
            .await
            .credentials
            .clone()
            .unwrap_or_else(|| record.credentials.clone())
    }

    // --- steps ---

    async fn click_through(
        &self,
        delay_ms: u64,
        locators: &'static [Locator],
        what: &str,
    ) -> Result<(), StepError> {
        self.pause(delay_ms).await;
        let (strategy, element) = self.wait_for(locators, what).await?;
        debug!(tab = self.tab_id, strategy, "Found {}", what);
        self.activate(&element, what).await
    }

    async fn fill_credentials(&self, credentials: &Credentials) -> Result<(), StepError> {
        let t = &self.deps.timings;
        self.pause(t.fill_delay_ms).await;

        let page = self.page.as_ref();
        let (username, password) = poll(
            Duration::from_millis(t.element_poll_ms),
            t.element_poll_attempts,
            move || async move {
                let (_, user) = locate(page, &[USERNAME_INPUT]).await.ok().flatten()?;
                let (_, pass) = locate(page, &[PASSWORD_INPUT]).await.ok().flatten()?;
                Some((user, pass))
            },
        )
        .await
        .map_err(|_| StepError::ElementNotFound("username and password inputs".into()))?;

        self.type_like_human(&username, &credentials.username)
            .await?;
        self.live()?;
        page.dispatch(&username.handle, DomEvent::KeyDown(Key::Tab))
            .await?;
        self.pause(t.tab_settle_ms).await;

        self.type_like_human(&password, &credentials.password)
            .await?;
        self.live()?;
        page.dispatch(&password.handle, DomEvent::KeyDown(Key::Tab))
            .await?;
        self.pause(t.tab_settle_ms).await;

        self.pause(t.pre_submit_ms).await;
        self.submit(&password).await?;
        self.pause(t.submit_settle_ms).await;

        if let Some((_, banner)) = locate(page, &[LOGIN_ERROR]).await? {
            let text = banner.text.trim();
            let reason = if text.is_empty() {
                "the identity provider rejected the credentials".to_string()
            } else {
                text.to_string()
            };
            return Err(StepError::LoginRejected(reason));
        }
        Ok(())
    }

    /// Types `text` one character at a time, firing the events a real
    /// keyboard would so that framework-bound inputs see every change.
    async fn type_like_human(&self, field: &Element, text: &str) -> Result<(), StepError> {
        let t = &self.deps.timings;
        let handle = field.handle.as_str();
        self.live()?;
        self.page.focus(handle).await?;
        self.pause(t.focus_settle_ms).await;
        self.live()?;
        self.page.set_value(handle, "").await?;

        let mut typed = String::with_capacity(text.len());
        for ch in text.chars() {
            self.live()?;
            typed.push(ch);
            self.page.set_value(handle, &typed).await?;
            self.page.dispatch(handle, DomEvent::Input).await?;
            self.page.dispatch(handle, DomEvent::Keyup).await?;
            self.pause(t.char_delay_ms).await;
        }

        self.live()?;
        self.page.dispatch(handle, DomEvent::Change).await?;
        self.page.dispatch(handle, DomEvent::Blur).await?;
        self.pause(t.field_settle_ms).await;
        Ok(())
    }

    async fn submit(&self, password: &Element) -> Result<(), StepError> {
        let t = &self.deps.timings;
        for attempt in 1..=t.submit_attempts {
            self.live()?;
            if let Some((strategy, button)) = locate(self.page.as_ref(), SUBMIT_BUTTON).await? {
                debug!(tab = self.tab_id, strategy, attempt, "Submitting login form");
                return self.activate(&button, "submit button").await;
            }
            // a disabled button usually re-validates on fresh input events
            self.page
                .dispatch(&password.handle, DomEvent::Input)
                .await?;
            self.page
                .dispatch(&password.handle, DomEvent::Change)
                .await?;
            self.pause(t.submit_retry_ms).await;
        }

        let forms = self.page.query(FIRST_FORM).await?;
        let Some(form) = forms.first() else {
            return Err(StepError::ElementNotFound(
                "submit button or login form".into(),
            ));
        };
        warn!(tab = self.tab_id, "No submit button, submitting the form directly");
        self.live()?;
        self.page.submit_form(&form.handle).await?;
        Ok(())
    }

    async fn select_organization(&self, record: &AutomationRecord) -> Result<(), StepError> {
        let t = &self.deps.timings;
        self.pause(t.organization_delay_ms).await;

        let term = record
            .organization
            .as_ref()
            .and_then(|org| org.unit_name.clone())
            .unwrap_or_default();

        let page = self.page.as_ref();
        let radios = poll(
            Duration::from_millis(t.organization_poll_ms),
            t.organization_poll_attempts,
            move || async move {
                page.query(ORGANIZATION_RADIOS)
                    .await
                    .ok()
                    .filter(|radios| !radios.is_empty())
            },
        )
        .await
        .map_err(|_| StepError::ElementNotFound("organization options".into()))?;

        let mut labels = Vec::with_capacity(radios.len());
        let mut label_elements = Vec::with_capacity(radios.len());
        for radio in &radios {
            let label = self.label_for(radio).await;
            let text = label
                .as_ref()
                .map(|l| l.text.trim().to_string())
                .filter(|text| !text.is_empty())
                .or_else(|| radio.value.clone())
                .unwrap_or_default();
            labels.push(text);
            label_elements.push(label);
        }

        let choice = resolve_organization(&labels, &term)?;
        info!(
            tab = self.tab_id,
            label = %choice.label,
            matches = choice.match_count,
            "Selecting organization"
        );
        if let Some(warning) = &choice.warning {
            warn!(tab = self.tab_id, "{}", warning);
            self.report(AutomationEvent::Warning {
                message: warning.clone(),
            })
            .await;
            self.show_status(warning, StatusTone::Warning).await;
        }

        let radio = &radios[choice.index];
        self.live()?;
        page.set_checked(&radio.handle, true).await?;
        page.dispatch(&radio.handle, DomEvent::Change).await?;
        page.dispatch(&radio.handle, DomEvent::Click).await?;
        if let Some(label) = &label_elements[choice.index]
            && let Err(e) = page.click(&label.handle).await
        {
            debug!(tab = self.tab_id, "Label click ignored: {}", e);
        }
        self.pause(t.selection_settle_ms).await;

        let (strategy, confirm) = self.wait_for(CONFIRM_BUTTON, "confirmation button").await?;
        debug!(tab = self.tab_id, strategy, "Confirming organization");
        self.activate(&confirm, "confirmation button").await
    }

    async fn label_for(&self, radio: &Element) -> Option<Element> {
        let id = radio.id.as_deref().filter(|id| !id.is_empty())?;
        let selector = format!(r#"label[for="{}"]"#, id);
        match self.page.query(&selector).await {
            Ok(labels) => labels.into_iter().next(),
            Err(e) => {
                debug!(tab = self.tab_id, "Label lookup failed: {}", e);
                None
            }
        }
    }

    async fn finalize(&self, record: &AutomationRecord) -> Result<Outcome, StepError> {
        if record.navigate_to_target
            && let Some(id) = record.business_id.as_deref()
        {
            let target = self.deps.portal.target_url(id);
            info!(tab = self.tab_id, "Logged in, opening {}", target);
            self.show_status("Opening the quote...", StatusTone::Success)
                .await;
            self.live()?;
            self.page.navigate(&target).await?;
            return Ok(Outcome::Navigated);
        }
        self.complete().await;
        Ok(Outcome::Done)
    }

    // --- shared helpers ---

    async fn wait_for(
        &self,
        locators: &'static [Locator],
        what: &str,
    ) -> Result<(&'static str, Element), StepError> {
        let t = &self.deps.timings;
        let page = self.page.as_ref();
        poll(
            Duration::from_millis(t.element_poll_ms),
            t.element_poll_attempts,
            move || async move { locate(page, locators).await.ok().flatten() },
        )
        .await
        .map_err(|_| StepError::ElementNotFound(what.to_string()))
    }

    /// Native click, then a synthetic click event, then following the link.
    async fn activate(&self, element: &Element, what: &str) -> Result<(), StepError> {
        self.live()?;
        let handle = element.handle.as_str();
        if let Err(e) = self.page.scroll_into_view(handle).await {
            debug!(tab = self.tab_id, "Scroll failed: {}", e);
        }
        self.pause(self.deps.timings.scroll_settle_ms).await;

        self.live()?;
        match self.page.click(handle).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!(tab = self.tab_id, "Native click on {} failed: {}", what, e),
        }
        match self.page.dispatch(handle, DomEvent::Click).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!(tab = self.tab_id, "Synthetic click on {} failed: {}", what, e),
        }
        if let Some(href) = element
            .href
            .as_deref()
            .filter(|href| !href.is_empty() && !href.starts_with("javascript:"))
        {
            self.page.navigate(href).await?;
            return Ok(());
        }
        Err(StepError::Unresponsive(what.to_string()))
    }

    /// Waits for the URL to leave `from` for one of `patterns` while
    /// `document` stays loaded. A replaced document ends the wait: the new
    /// page belongs to a new driver.
    async fn await_redirect(&self, document: &str, from: &str, patterns: &[&str]) -> Redirect {
        let t = &self.deps.timings;
        self.pause(t.redirect_initial_ms).await;

        let page = self.page.as_ref();
        let stopped = &self.stopped;
        poll(
            Duration::from_millis(t.redirect_poll_ms),
            t.redirect_attempts,
            move || async move {
                if stopped.load(Ordering::SeqCst) {
                    return Some(Redirect::Left);
                }
                match page.document_id().await {
                    Ok(current) if current != document => return Some(Redirect::Left),
                    Ok(_) => {}
                    // mid-navigation; the next attempt tells
                    Err(_) => return None,
                }
                match page.url().await {
                    Ok(current) if is_expected_redirect(from, &current, patterns) => {
                        Some(Redirect::Matched)
                    }
                    _ => None,
                }
            },
        )
        .await
        .unwrap_or(Redirect::Missed)
    }

    fn live(&self) -> Result<(), StepError> {
        if self.is_stopped() {
            Err(StepError::Detached)
        } else {
            Ok(())
        }
    }

    async fn pause(&self, ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn begin_step(&self, step: Step, url: &str) {
        info!(tab = self.tab_id, step = step.as_str(), "Running step");
        let (text, tone) = step_status(step);
        self.show_status(text, tone).await;
        self.debug_entry(Some(step), Some(url), format!("step {}", step.as_str()))
            .await;
        self.report(AutomationEvent::Progress {
            step: step.as_str().to_string(),
            progress: step.progress(),
            message: None,
        })
        .await;
    }

    async fn complete(&self) {
        info!(tab = self.tab_id, "Automation completed");
        let store = &self.deps.store;
        if let Err(e) = store.set_record_status(RecordStatus::Completed).await {
            warn!("Could not mark record completed: {}", e);
        }
        if let Err(e) = store.clear_automation_record().await {
            warn!("Could not clear automation record: {}", e);
        }
        self.show_status("Automation completed", StatusTone::Success)
            .await;
        self.report(AutomationEvent::Completed {
            message: Some("Workflow reached its final page".to_string()),
        })
        .await;
    }

    async fn fail(&self, step: Step, err: &StepError) {
        error!(tab = self.tab_id, step = step.as_str(), "Step failed: {}", err);
        if let Err(e) = self.deps.store.set_record_status(RecordStatus::Failed).await {
            warn!("Could not mark record failed: {}", e);
        }
        self.show_status(&format!("Automation failed: {}", err), StatusTone::Error)
            .await;
        let url = self.page.url().await.ok();
        self.debug_entry(Some(step), url.as_deref(), format!("failed: {}", err))
            .await;
        self.report(AutomationEvent::Error {
            error: err.to_string(),
        })
        .await;
    }

    async fn deny(&self, denied: GateDenied) {
        info!(tab = self.tab_id, "Automation not authorized: {}", denied);
        self.show_status(
            &format!("Automation paused: {}", denied),
            StatusTone::Warning,
        )
        .await;
        self.debug_entry(None, None, format!("denied: {}", denied))
            .await;
    }

    async fn show_status(&self, text: &str, tone: StatusTone) {
        if let Err(e) = self.page.show_status(text, tone).await {
            debug!(tab = self.tab_id, "Status indicator unavailable: {}", e);
        }
    }

    async fn debug_entry(&self, step: Option<Step>, url: Option<&str>, message: String) {
        let entry = DebugEntry {
            timestamp: self.deps.clock.now_ms(),
            tab_id: Some(self.tab_id),
            step: step.map(|s| s.as_str().to_string()),
            url: url.map(str::to_string),
            message,
        };
        if self.context.lock().await.debug_mode {
            debug!(tab = self.tab_id, "{}", entry.message);
        }
        if let Err(e) = self.deps.store.append_debug(entry).await {
            debug!("Debug log write failed: {}", e);
        }
    }

    /// Relays an event to the Coordinator when this page belongs to a job.
    async fn report(&self, event: AutomationEvent) {
        let Some(automation_id) = self.context.lock().await.automation_id.clone() else {
            return;
        };
        let request = Request::LogAutomationEvent {
            automation_id,
            event,
        };
        if let Err(e) = self.deps.sender.send(Some(self.tab_id), request).await {
            warn!(tab = self.tab_id, "Progress relay failed: {}", e);
        }
    }
}

fn step_status(step: Step) -> (&'static str, StatusTone) {
    match step {
        Step::ClickLogin => ("Opening the login page...", StatusTone::Login),
        Step::ClickFederatedLogin => ("Choosing ClaveÚnica...", StatusTone::Login),
        Step::FillCredentials => ("Entering credentials...", StatusTone::Auth),
        Step::SelectOrganization => ("Selecting organization...", StatusTone::Organization),
        Step::Finalize => ("Login complete", StatusTone::Success),
        Step::SuccessTerminal => ("Quote page reached", StatusTone::Success),
        Step::RedirectToHome => ("Returning to the portal...", StatusTone::Login),
    }
}
