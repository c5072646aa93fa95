use super::fakes::{T0, memory_store, record};
use crate::core::automation::gate::{GateDenied, GateInputs, check, evaluate};
use crate::core::automation::types::{AuthorizationToken, Credentials, RecordStatus};
use crate::core::config::SecurityPolicy;
use crate::core::store::{KvStore, TokenRead};
use std::sync::atomic::Ordering;

const MINUTE: i64 = 60_000;

fn live_token() -> TokenRead {
    TokenRead::Live(AuthorizationToken::new(Some("ABC-123".into()), T0, 5))
}

fn inputs() -> GateInputs {
    GateInputs {
        enabled: true,
        token: live_token(),
        record: Some(record(T0)),
        now: T0 + MINUTE,
    }
}

#[test]
fn legitimate_trigger_passes() {
    let passed = evaluate(inputs(), &SecurityPolicy::default()).unwrap();
    assert_eq!(passed.business_id.as_deref(), Some("ABC-123"));
}

#[test]
fn disabled_extension_denies_first() {
    let denied = evaluate(
        GateInputs {
            enabled: false,
            token: TokenRead::Missing,
            ..inputs()
        },
        &SecurityPolicy::default(),
    );
    assert_eq!(denied, Err(GateDenied::Disabled));
}

#[test]
fn missing_or_expired_token_denies() {
    let policy = SecurityPolicy::default();
    let missing = evaluate(
        GateInputs {
            token: TokenRead::Missing,
            ..inputs()
        },
        &policy,
    );
    assert_eq!(missing, Err(GateDenied::NoToken));

    let stale = evaluate(
        GateInputs {
            now: T0 + 6 * MINUTE,
            ..inputs()
        },
        &policy,
    );
    assert_eq!(stale, Err(GateDenied::TokenExpired));
}

#[test]
fn stale_record_is_never_acted_on() {
    let policy = SecurityPolicy::default();
    for status in [RecordStatus::Ready, RecordStatus::Processing] {
        let mut old = record(T0 - 5 * MINUTE);
        old.status = status;
        let denied = evaluate(
            GateInputs {
                record: Some(old),
                now: T0,
                token: live_token(),
                enabled: true,
            },
            &policy,
        );
        assert_eq!(denied, Err(GateDenied::StaleRecord { age_secs: 300 }));
    }
}

#[test]
fn closed_record_is_refused() {
    let mut done = record(T0);
    done.status = RecordStatus::Completed;
    let denied = evaluate(
        GateInputs {
            record: Some(done),
            ..inputs()
        },
        &SecurityPolicy::default(),
    );
    assert_eq!(denied, Err(GateDenied::RecordClosed(RecordStatus::Completed)));
}

#[test]
fn untrusted_source_is_refused_even_with_credentials() {
    let mut forged = record(T0);
    forged.source = "content_script".into();
    let denied = evaluate(
        GateInputs {
            record: Some(forged),
            ..inputs()
        },
        &SecurityPolicy::default(),
    );
    assert_eq!(
        denied,
        Err(GateDenied::UntrustedSource("content_script".into()))
    );
}

#[test]
fn token_for_another_business_is_refused() {
    let denied = evaluate(
        GateInputs {
            token: TokenRead::Live(AuthorizationToken::new(Some("XYZ".into()), T0, 5)),
            ..inputs()
        },
        &SecurityPolicy::default(),
    );
    assert!(matches!(denied, Err(GateDenied::TokenMismatch { .. })));
}

#[test]
fn empty_credentials_are_refused() {
    let mut empty = record(T0);
    empty.credentials = Credentials::new("12.345.678-9", "");
    let denied = evaluate(
        GateInputs {
            record: Some(empty),
            ..inputs()
        },
        &SecurityPolicy::default(),
    );
    assert_eq!(denied, Err(GateDenied::NoCredentials));
}

#[tokio::test]
async fn store_check_deletes_the_expired_token() {
    let (kv, store) = memory_store();
    super::fakes::authorize(&store, &record(T0)).await;

    let denied = check(&store, &SecurityPolicy::default(), T0 + 6 * MINUTE).await;
    assert_eq!(denied, Err(GateDenied::TokenExpired));
    assert!(
        kv.get(crate::core::store::AUTHORIZATION_KEY)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn unreadable_store_denies() {
    let (kv, store) = memory_store();
    super::fakes::authorize(&store, &record(T0)).await;
    kv.fail_reads.store(true, Ordering::SeqCst);
    let denied = check(&store, &SecurityPolicy::default(), T0).await;
    assert_eq!(denied, Err(GateDenied::Disabled));
}
