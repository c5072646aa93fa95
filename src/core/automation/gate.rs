use anyhow::Result;

use super::types::{AuthorizationToken, AutomationRecord, RecordStatus};
use crate::core::config::SecurityPolicy;
use crate::core::store::{SharedStore, TokenRead};

/// Why a Page Driver refused to act. Never retried: it means the run was not
/// a legitimate trigger, not that something broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateDenied {
    #[error("automation is disabled")]
    Disabled,
    #[error("no authorization token")]
    NoToken,
    #[error("authorization token expired")]
    TokenExpired,
    #[error("authorization token is for {token:?}, record is for {record:?}")]
    TokenMismatch {
        token: Option<String>,
        record: Option<String>,
    },
    #[error("no automation record")]
    NoRecord,
    #[error("automation record is {age_secs}s old")]
    StaleRecord { age_secs: i64 },
    #[error("automation record is already {0:?}")]
    RecordClosed(RecordStatus),
    #[error("untrusted record source \"{0}\"")]
    UntrustedSource(String),
    #[error("automation record carries no credentials")]
    NoCredentials,
}

/// Everything the gate looks at, read fresh before each dispatch.
pub struct GateInputs {
    pub enabled: bool,
    pub token: TokenRead,
    pub record: Option<AutomationRecord>,
    pub now: i64,
}

/// Pure decision. On success returns the record the driver may act on.
pub fn evaluate(
    inputs: GateInputs,
    policy: &SecurityPolicy,
) -> Result<AutomationRecord, GateDenied> {
    if !inputs.enabled {
        return Err(GateDenied::Disabled);
    }

    let token: AuthorizationToken = match inputs.token {
        TokenRead::Live(token) => token,
        TokenRead::Expired => return Err(GateDenied::TokenExpired),
        TokenRead::Missing => return Err(GateDenied::NoToken),
    };
    if !token.is_live(inputs.now) {
        return Err(GateDenied::TokenExpired);
    }

    let record = inputs.record.ok_or(GateDenied::NoRecord)?;

    let age_ms = record.age_ms(inputs.now);
    if age_ms >= policy.record_freshness_secs as i64 * 1000 {
        return Err(GateDenied::StaleRecord {
            age_secs: age_ms / 1000,
        });
    }
    if !record.status.is_actionable() {
        return Err(GateDenied::RecordClosed(record.status));
    }
    if token.business_id != record.business_id {
        return Err(GateDenied::TokenMismatch {
            token: token.business_id,
            record: record.business_id,
        });
    }
    if !policy.is_allowed_source(&record.source) {
        return Err(GateDenied::UntrustedSource(record.source));
    }
    if !record.credentials.is_complete() {
        return Err(GateDenied::NoCredentials);
    }
    Ok(record)
}

/// Reads the three inputs from the store and evaluates them. A store error
/// while reading the token or record denies rather than propagates.
pub async fn check(
    store: &SharedStore,
    policy: &SecurityPolicy,
    now: i64,
) -> Result<AutomationRecord, GateDenied> {
    let enabled = store.extension_enabled().await;
    let token = read_or_deny(store.read_authorization(now).await, GateDenied::NoToken)?;
    let record = read_or_deny(store.automation_record().await, GateDenied::NoRecord)?;
    evaluate(
        GateInputs {
            enabled,
            token,
            record,
            now,
        },
        policy,
    )
}

fn read_or_deny<T>(read: Result<T>, denial: GateDenied) -> Result<T, GateDenied> {
    read.map_err(|e| {
        tracing::warn!("Gate input unreadable: {}", e);
        denial
    })
}
