use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TabId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Error,
    Cancelled,
    TimedOut,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobLogEntry {
    pub timestamp: i64,
    pub kind: String,
    pub message: String,
}

/// One end-to-end automation run, owned by the Coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub business_id: Option<String>,
    pub tab_id: Option<TabId>,
    /// Store key of the credential slot in use, if any held credentials;
    /// never the secret itself.
    pub credential_ref: Option<String>,
    pub business_data: Value,
    pub user_data: Value,
    pub status: JobStatus,
    pub current_step: Option<String>,
    pub progress: u8,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub last_activity_at: i64,
    pub error: Option<String>,
    pub logs: Vec<JobLogEntry>,
    pub entry_url: String,
}

impl Job {
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn push_log(&mut self, now: i64, kind: &str, message: impl Into<String>) {
        self.logs.push(JobLogEntry {
            timestamp: now,
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    /// Moves the job to `to` if the transition is legal. Returns false when
    /// the job already left `running`.
    pub fn finish(&mut self, to: JobStatus, now: i64, error: Option<String>) -> bool {
        if !super::can_transition(self.status, to) {
            return false;
        }
        self.status = to;
        self.ended_at = Some(now);
        self.last_activity_at = now;
        if error.is_some() {
            self.error = error;
        }
        self.push_log(now, to.as_str(), self.error.clone().unwrap_or_default());
        true
    }
}

/// Page Driver → Coordinator progress report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    Progress {
        step: String,
        #[serde(default)]
        progress: u8,
        #[serde(default)]
        message: Option<String>,
    },
    Completed {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        error: String,
    },
    Warning {
        message: String,
    },
    Info {
        message: String,
    },
}

impl AutomationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationEvent::Progress { .. } => "progress",
            AutomationEvent::Completed { .. } => "completed",
            AutomationEvent::Error { .. } => "error",
            AutomationEvent::Warning { .. } => "warning",
            AutomationEvent::Info { .. } => "info",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            AutomationEvent::Progress {
                step,
                progress,
                message,
            } => match message {
                Some(m) => format!("{} ({}%): {}", step, progress, m),
                None => format!("{} ({}%)", step, progress),
            },
            AutomationEvent::Completed { message } => {
                message.clone().unwrap_or_else(|| "completed".to_string())
            }
            AutomationEvent::Error { error } => error.clone(),
            AutomationEvent::Warning { message } | AutomationEvent::Info { message } => {
                message.clone()
            }
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ready,
    Processing,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_actionable(&self) -> bool {
        matches!(self, RecordStatus::Ready | RecordStatus::Processing)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrganizationData {
    #[serde(default, alias = "nombre_unidad")]
    pub unit_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl OrganizationData {
    pub fn named(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: Some(unit_name.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// The cross-page handoff persisted under `automation.record`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRecord {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub navigate_to_target: bool,
    #[serde(default)]
    pub organization: Option<OrganizationData>,
    #[serde(default)]
    pub business_data: Value,
    #[serde(default)]
    pub strategy: Option<String>,
    pub status: RecordStatus,
    #[serde(default)]
    pub source: String,
    pub timestamp: i64,
}

impl AutomationRecord {
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.timestamp
    }
}

/// Short-lived proof that a human pressed start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationToken {
    #[serde(default)]
    pub business_id: Option<String>,
    pub timestamp: i64,
    #[serde(default = "default_token_window")]
    pub expires_in_minutes: u32,
}

fn default_token_window() -> u32 {
    5
}

impl AuthorizationToken {
    pub fn new(business_id: Option<String>, now: i64, expires_in_minutes: u32) -> Self {
        Self {
            business_id,
            timestamp: now,
            expires_in_minutes,
        }
    }

    pub fn window_ms(&self) -> i64 {
        i64::from(self.expires_in_minutes) * 60_000
    }

    pub fn is_live(&self, now: i64) -> bool {
        now - self.timestamp <= self.window_ms()
    }
}

/// Payload delivered to a Page Driver with `Initiate`, and returned by
/// `getAutomationData`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationPayload {
    #[serde(default)]
    pub automation_id: Option<String>,
    #[serde(rename = "licitacionData", default)]
    pub business_data: Value,
    #[serde(default)]
    pub user_data: Value,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub config: Value,
}

/// One stage of the login / organization / submission workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FillCredentials,
    ClickLogin,
    ClickFederatedLogin,
    SelectOrganization,
    Finalize,
    SuccessTerminal,
    RedirectToHome,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::FillCredentials => "fill_credentials",
            Step::ClickLogin => "click_login",
            Step::ClickFederatedLogin => "click_federated_login",
            Step::SelectOrganization => "select_organization",
            Step::Finalize => "finalize",
            Step::SuccessTerminal => "success_terminal",
            Step::RedirectToHome => "redirect_to_home",
        }
    }

    /// Rough position in the chain, reported as job progress.
    pub fn progress(&self) -> u8 {
        match self {
            Step::RedirectToHome => 5,
            Step::ClickLogin => 15,
            Step::ClickFederatedLogin => 30,
            Step::FillCredentials => 50,
            Step::SelectOrganization => 70,
            Step::Finalize => 90,
            Step::SuccessTerminal => 100,
        }
    }

    /// URL fragments that count as the expected navigation after this step.
    pub fn redirect_patterns(&self) -> &'static [&'static str] {
        match self {
            Step::ClickLogin => &["heimdall"],
            Step::ClickFederatedLogin => &["claveunica"],
            Step::FillCredentials => &["mercadopublico.cl"],
            Step::SelectOrganization => &["Portal", "Home"],
            _ => &[],
        }
    }
}
