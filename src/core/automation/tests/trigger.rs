use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::fakes::{
    FakeBrowser, FakeData, FakeSender, T0, TimerClock, memory_store, save_default_credentials,
    vault,
};
use crate::core::api::ApiError;
use crate::core::automation::messages::Request;
use crate::core::automation::trigger::{Strategy, TriggerError};
use crate::core::automation::types::RecordStatus;
use crate::core::automation::{TriggerDeps, TriggerRequest, TriggerUi};
use crate::core::config::{CoordinatorLimits, PortalConfig, SecurityPolicy};
use crate::core::store::{SharedStore, TokenRead};

struct Rig {
    ui: TriggerUi,
    store: SharedStore,
    browser: Arc<FakeBrowser>,
    data: Arc<FakeData>,
    sender: Arc<FakeSender>,
}

async fn rig(with_credentials: bool) -> Rig {
    let (_kv, store) = memory_store();
    let vault = vault(&store);
    if with_credentials {
        save_default_credentials(&vault, T0).await;
    }
    let browser = Arc::new(FakeBrowser::default());
    let data = Arc::new(FakeData::default());
    let sender = Arc::new(FakeSender::default());
    let ui = TriggerUi::new(Arc::new(TriggerDeps {
        store: store.clone(),
        vault,
        browser: browser.clone(),
        data: data.clone(),
        sender: sender.clone(),
        clock: TimerClock::new(T0),
        portal: PortalConfig::default(),
        security: SecurityPolicy::default(),
        limits: CoordinatorLimits::default(),
    }));
    Rig {
        ui,
        store,
        browser,
        data,
        sender,
    }
}

fn for_business(id: &str) -> TriggerRequest {
    TriggerRequest {
        business_id: Some(id.to_string()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn disabled_extension_refuses() {
    let rig = rig(true).await;
    rig.store.set_extension_enabled(false).await.unwrap();
    let err = rig.ui.trigger(TriggerRequest::default()).await.unwrap_err();
    assert!(matches!(err, TriggerError::Disabled));
    assert!(rig.sender.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_refuse() {
    let rig = rig(false).await;
    let err = rig.ui.trigger(for_business("ABC-123")).await.unwrap_err();
    assert!(matches!(err, TriggerError::NoCredentials));
    assert!(rig.store.automation_record().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn login_only_skips_the_probe() {
    let rig = rig(true).await;
    let outcome = rig.ui.trigger(TriggerRequest::default()).await.unwrap();

    assert_eq!(
        outcome.strategy,
        Strategy::LoginOnly {
            entry_url: "https://www.mercadopublico.cl/Home".into()
        }
    );
    assert!(rig.browser.opened().is_empty());

    let record = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(record.source, "smart_popup");
    assert_eq!(record.status, RecordStatus::Ready);
    assert!(!record.navigate_to_target);
    assert_eq!(record.credentials.username, "12.345.678-9");

    match rig.store.read_authorization(T0).await.unwrap() {
        TokenRead::Live(token) => assert_eq!(token.business_id, None),
        other => panic!("expected a live token, got {:?}", other),
    }
    match rig.sender.sent().first() {
        Some(Request::StartAutomation(start)) => {
            assert_eq!(start.business_id, None);
            assert_eq!(
                start.entry_url.as_deref(),
                Some("https://www.mercadopublico.cl/Home")
            );
        }
        other => panic!("expected a start request, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn known_organization_goes_straight_to_the_quote() {
    let rig = rig(true).await;
    rig.browser.with_text("#_LblOrganization", "  Farmacia Central Norte ");

    let outcome = rig.ui.trigger(for_business("ABC-123")).await.unwrap();

    assert_eq!(
        outcome.strategy,
        Strategy::DirectTarget {
            entry_url: "https://compra-agil.mercadopublico.cl/resumen-cotizacion/ABC-123".into(),
            organization_hint: "Farmacia Central Norte".into(),
        }
    );
    // the probe tab is hidden and always closed
    assert_eq!(
        rig.browser.opened(),
        vec![(
            "https://www.mercadopublico.cl/Portal/Modules/Menu/Menu.aspx".to_string(),
            false
        )]
    );
    assert_eq!(rig.browser.closed(), vec![1]);

    let record = rig.store.automation_record().await.unwrap().unwrap();
    assert!(record.navigate_to_target);
    assert_eq!(record.strategy.as_deref(), Some("direct_target"));
    assert_eq!(record.business_data["codigo"], "ABC-123");
    // API data wins over the probe hint
    assert_eq!(
        record.organization.unwrap().unit_name.as_deref(),
        Some("Farmacia Central")
    );
}

#[tokio::test(start_paused = true)]
async fn empty_probe_falls_back_to_the_full_chain() {
    let rig = rig(true).await;
    *rig.data.organization.lock().unwrap() = Ok(json!({}));

    let outcome = rig.ui.trigger(for_business("ABC-123")).await.unwrap();

    assert!(matches!(outcome.strategy, Strategy::FullChain { .. }));
    assert_eq!(rig.browser.closed(), vec![1]);
    let record = rig.store.automation_record().await.unwrap().unwrap();
    assert!(record.organization.is_none());
}

#[tokio::test(start_paused = true)]
async fn probe_failure_is_not_fatal() {
    let rig = rig(true).await;
    rig.browser
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = rig.ui.trigger(for_business("ABC-123")).await.unwrap();
    assert!(matches!(outcome.strategy, Strategy::FullChain { .. }));
}

#[tokio::test(start_paused = true)]
async fn api_failure_with_a_business_id_aborts() {
    let rig = rig(true).await;
    *rig.data.quote.lock().unwrap() = Err(ApiError::CsrfExpired {
        message: "Page Expired".into(),
    });

    let err = rig.ui.trigger(for_business("ABC-123")).await.unwrap_err();
    assert!(err.to_string().contains("CSRF token expired"));
    assert!(rig.sender.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn token_is_removed_when_its_window_elapses() {
    let rig = rig(true).await;
    rig.ui.trigger(TriggerRequest::default()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    assert!(matches!(
        rig.store.read_authorization(T0).await.unwrap(),
        TokenRead::Live(_)
    ));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(
        rig.store.read_authorization(T0).await.unwrap(),
        TokenRead::Missing
    );
}
