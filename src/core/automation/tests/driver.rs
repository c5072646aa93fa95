use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::fakes::{
    FakePage, FakeSender, PageCall, T0, authorize, el, input, labelled, memory_store, record,
};
use crate::core::automation::browser::PageCommand;
use crate::core::automation::messages::Request;
use crate::core::automation::page::{DomEvent, PageDom, StatusTone};
use crate::core::automation::types::{
    AutomationEvent, AutomationPayload, Credentials, RecordStatus, TabId,
};
use crate::core::automation::{DriverDeps, DriverHost, PageDriver, PageFactory};
use crate::core::clock::ManualClock;
use crate::core::config::{DriverTimings, PortalConfig, SecurityPolicy};
use crate::core::store::SharedStore;

const LOGIN_PAGE: &str = "https://accounts.claveunica.gob.cl/accounts/login/";
const MINUTE: i64 = 60_000;

struct Rig {
    page: Arc<FakePage>,
    sender: Arc<FakeSender>,
    store: SharedStore,
    driver: Arc<PageDriver>,
}

fn rig(page: Arc<FakePage>, store: SharedStore, now: i64) -> Rig {
    rig_with(page, store, now, DriverTimings::instant())
}

fn rig_with(page: Arc<FakePage>, store: SharedStore, now: i64, timings: DriverTimings) -> Rig {
    let sender = Arc::new(FakeSender::default());
    let deps = Arc::new(DriverDeps {
        store: store.clone(),
        sender: sender.clone(),
        clock: Arc::new(ManualClock::new(now)),
        portal: PortalConfig::default(),
        timings,
        security: SecurityPolicy::default(),
    });
    let driver = Arc::new(PageDriver::new(7, page.clone(), deps));
    Rig {
        page,
        sender,
        store,
        driver,
    }
}

async fn authorized_rig(page: Arc<FakePage>) -> Rig {
    let (_kv, store) = memory_store();
    authorize(&store, &record(T0)).await;
    rig(page, store, T0 + 1_000)
}

fn login_form(page: &FakePage) {
    page.with("#uname", vec![input("u", "uname")])
        .with("#pword", vec![input("p", "pword")]);
}

fn relayed(sender: &FakeSender) -> Vec<AutomationEvent> {
    sender
        .sent()
        .into_iter()
        .filter_map(|request| match request {
            Request::LogAutomationEvent { event, .. } => Some(event),
            _ => None,
        })
        .collect()
}

/// Lets spawned driver tasks run to completion under paused time.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn typing_fires_one_input_event_per_character() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    page.with("#login-submit", vec![labelled("s", "Ingresar")]);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    assert_eq!(rig.page.value_of("u").as_deref(), Some("12.345.678-9"));
    assert_eq!(rig.page.dispatched("u", DomEvent::Input), 12);
    assert_eq!(rig.page.value_of("p").as_deref(), Some("hunter2"));
    assert_eq!(rig.page.dispatched("p", DomEvent::Input), 7);
    assert!(rig.page.calls().contains(&PageCall::Click("s".into())));

    let prefixes: Vec<String> = rig
        .page
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            PageCall::SetValue(handle, value) if handle == "u" => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(prefixes.first().map(String::as_str), Some(""));
    assert_eq!(prefixes.get(3).map(String::as_str), Some("12."));
}

#[tokio::test(start_paused = true)]
async fn expired_token_means_no_dom_mutation() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    let (_kv, store) = memory_store();
    authorize(&store, &record(T0)).await;
    let rig = rig(page, store, T0 + 6 * MINUTE);

    rig.driver.run().await;

    assert!(rig.page.calls().is_empty());
    let statuses = rig.page.statuses();
    let (text, tone) = statuses.last().unwrap();
    assert_eq!(*tone, StatusTone::Warning);
    assert!(text.contains("expired"));
    let log = rig.store.debug_log().await.unwrap();
    assert!(log.iter().any(|entry| entry.message.starts_with("denied")));
}

#[tokio::test(start_paused = true)]
async fn rejected_login_fails_the_job_with_the_page_message() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    page.with("#login-submit", vec![labelled("s", "Ingresar")])
        .with(
            ".gob-response-error, .error",
            vec![labelled("e", " RUN o clave incorrecta ")],
        );
    let rig = authorized_rig(page).await;

    let reply = rig
        .driver
        .handle_command(PageCommand::Initiate {
            payload: AutomationPayload {
                automation_id: Some("job-1".into()),
                credentials: Some(Credentials::new("11.111.111-1", "pw")),
                ..Default::default()
            },
        })
        .await;
    assert_eq!(reply["success"], true);
    settle().await;

    assert_eq!(rig.page.value_of("u").as_deref(), Some("11.111.111-1"));
    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);

    let events = relayed(&rig.sender);
    assert!(matches!(
        events.first(),
        Some(AutomationEvent::Progress { step, .. }) if step == "fill_credentials"
    ));
    match events.last() {
        Some(AutomationEvent::Error { error }) => {
            assert!(error.contains("RUN o clave incorrecta"))
        }
        other => panic!("expected an error event, got {:?}", other),
    }
    assert_eq!(rig.page.statuses().last().unwrap().1, StatusTone::Error);
}

#[tokio::test(start_paused = true)]
async fn ambiguous_organization_picks_the_longest_and_warns() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home#access_token=t&token_type=Bearer");
    page.with(
        r#"input[type="radio"][name="grupoOrg"]"#,
        vec![input("r1", "org1"), input("r2", "org2")],
    )
    .with(r#"label[for="org1"]"#, vec![labelled("l1", "Farmacia Central")])
    .with(
        r#"label[for="org2"]"#,
        vec![labelled("l2", "Farmacia Central Norte")],
    )
    .with(
        r#"a.btn.btn-pri[onclick*="SeleccionarPorOrganizacionSSO"]"#,
        vec![el("c")],
    )
    .on_click_go("c", "https://www.mercadopublico.cl/Portal/Modules/Menu/Menu.aspx");
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    let calls = rig.page.calls();
    assert!(calls.contains(&PageCall::SetChecked("r2".into(), true)));
    assert!(!calls.contains(&PageCall::SetChecked("r1".into(), true)));
    assert!(calls.contains(&PageCall::Click("l2".into())));
    // the confirmation loads the portal, which is the next driver's page
    assert_eq!(calls.last(), Some(&PageCall::Click("c".into())));
    assert!(!calls.iter().any(|call| matches!(call, PageCall::Navigate(_))));
    assert!(
        rig.page
            .statuses()
            .iter()
            .any(|(text, tone)| *tone == StatusTone::Warning && text.contains("2 organizations"))
    );
}

#[tokio::test(start_paused = true)]
async fn organization_without_match_is_a_hard_failure() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home#token_type=Bearer");
    let mut radio = input("r1", "org1");
    radio.id = None;
    radio.value = Some("Hospital Sur".into());
    page.with(r#"input[type="radio"][name="grupoOrg"]"#, vec![radio]);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    let (text, _) = rig.page.statuses().last().cloned().unwrap();
    assert!(text.contains("Hospital Sur"));
}

#[tokio::test(start_paused = true)]
async fn on_load_picks_up_a_ready_record_and_completes_on_target() {
    let page = FakePage::at("https://compra-agil.mercadopublico.cl/resumen-cotizacion/ABC-123");
    let (_kv, store) = memory_store();
    let mut ready = record(T0);
    ready.status = RecordStatus::Ready;
    authorize(&store, &ready).await;
    let rig = rig(page, store, T0 + 1_000);
    *rig.sender.automation_data.lock().unwrap() =
        Some(json!({"success": true, "automationId": "job-1"}));

    rig.driver.on_load().await;
    settle().await;

    let sent = rig.sender.sent();
    assert_eq!(sent[0], Request::ContentScriptReady);
    assert_eq!(sent[1], Request::GetAutomationData);
    assert!(rig.store.automation_record().await.unwrap().is_none());
    assert!(matches!(
        relayed(&rig.sender).last(),
        Some(AutomationEvent::Completed { .. })
    ));
    assert!(
        sent.iter().any(|r| matches!(
            r,
            Request::LogAutomationEvent { automation_id, .. } if automation_id == "job-1"
        ))
    );
    assert_eq!(rig.page.statuses().last().unwrap().1, StatusTone::Success);
}

#[tokio::test(start_paused = true)]
async fn stale_record_is_ignored_on_load() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    let (_kv, store) = memory_store();
    let mut ready = record(T0);
    ready.status = RecordStatus::Ready;
    authorize(&store, &ready).await;
    let rig = rig(page, store, T0 + 6 * MINUTE);

    rig.driver.on_load().await;
    settle().await;

    assert!(rig.page.calls().is_empty());
    assert!(rig.page.statuses().is_empty());
    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn missing_submit_button_falls_back_to_the_form() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    page.with("form", vec![el("f")]);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    assert!(rig.page.calls().contains(&PageCall::SubmitForm("f".into())));
    // seven typed characters plus one nudge per failed submit attempt
    assert_eq!(rig.page.dispatched("p", DomEvent::Input), 7 + 5);
}

#[tokio::test(start_paused = true)]
async fn no_button_and_no_form_is_element_not_found() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    let (text, _) = rig.page.statuses().last().cloned().unwrap();
    assert!(text.contains("element not found"));
}

#[tokio::test(start_paused = true)]
async fn portal_page_opens_the_quote() {
    let page = FakePage::at("https://www.mercadopublico.cl/Portal/Modules/Menu/Menu.aspx");
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    assert_eq!(
        rig.page.calls(),
        vec![PageCall::Navigate(
            "https://compra-agil.mercadopublico.cl/resumen-cotizacion/ABC-123".into()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn same_document_redirects_re_enter_dispatch() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar Sesión")])
        .on_click_route("b", "https://heimdall.mercadopublico.cl/realms/login")
        .with("#zocial-oidc", vec![el("z")])
        .on_click_route("z", LOGIN_PAGE);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    let clicks: Vec<PageCall> = rig
        .page
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PageCall::Click(_)))
        .collect();
    assert_eq!(
        clicks,
        vec![PageCall::Click("b".into()), PageCall::Click("z".into())]
    );
    // the credential form never renders
    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn a_new_document_ends_the_driver() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar Sesión")])
        .on_click_go("b", "https://heimdall.mercadopublico.cl/realms/login")
        .with("#zocial-oidc", vec![el("z")]);
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    let clicks: Vec<PageCall> = rig
        .page
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PageCall::Click(_)))
        .collect();
    assert_eq!(clicks, vec![PageCall::Click("b".into())]);
    assert!(rig.driver.is_stopped());
    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Processing);

    let pong = rig.driver.handle_command(PageCommand::Ping).await;
    assert_eq!(pong["ready"], false);
}

/// Hands every tab the same scripted page, the way one browser tab outlives
/// the documents loaded into it.
struct OneTab(Arc<FakePage>);

impl PageFactory for OneTab {
    fn page_for(&self, _tab: TabId) -> Arc<dyn PageDom> {
        self.0.clone()
    }
}

#[tokio::test(start_paused = true)]
async fn slow_page_loads_never_repeat_a_step() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar Sesión")])
        .on_click_go("b", "https://heimdall.mercadopublico.cl/realms/login")
        .with("#zocial-oidc", vec![el("z")]);
    let (_kv, store) = memory_store();
    authorize(&store, &record(T0)).await;
    let host = DriverHost::new(
        Arc::new(OneTab(page.clone())),
        Arc::new(DriverDeps {
            store: store.clone(),
            sender: Arc::new(FakeSender::default()),
            clock: Arc::new(ManualClock::new(T0 + 1_000)),
            portal: PortalConfig::default(),
            timings: DriverTimings::default(),
            security: SecurityPolicy::default(),
        }),
    );

    let first = host
        .page_loaded(7, "https://www.mercadopublico.cl/Home")
        .await
        .unwrap();
    // the heimdall page takes far longer to report than a redirect wait
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(first.is_stopped());
    host.page_loaded(7, "https://heimdall.mercadopublico.cl/realms/login")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    let count = |handle: &str| {
        page.calls()
            .iter()
            .filter(|call| **call == PageCall::Click(handle.into()))
            .count()
    };
    assert_eq!(count("b"), 1);
    assert_eq!(count("z"), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_step_stops_typing() {
    let page = FakePage::at(LOGIN_PAGE);
    login_form(&page);
    page.with("#login-submit", vec![labelled("s", "Ingresar")]);
    let (_kv, store) = memory_store();
    authorize(&store, &record(T0)).await;
    let mut timings = DriverTimings::instant();
    timings.char_delay_ms = 100;
    let rig = rig_with(page, store, T0 + 1_000, timings);

    let driver = rig.driver.clone();
    let running = tokio::spawn(async move { driver.run().await });
    tokio::time::sleep(Duration::from_millis(350)).await;
    rig.driver.shutdown();
    running.await.unwrap();

    let typed = rig.page.value_of("u").unwrap_or_default();
    assert!(typed.len() < "12.345.678-9".len(), "typed {:?}", typed);
    assert!(rig.page.value_of("p").is_none());
    assert!(!rig.page.calls().contains(&PageCall::Click("s".into())));
    // detaching is not a failure
    let stored = rig.store.automation_record().await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn dispatch_never_runs_twice_for_one_page() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar sesión")]);
    let rig = authorized_rig(page).await;

    tokio::join!(rig.driver.run(), rig.driver.run());
    rig.driver.run().await;

    assert_eq!(
        rig.page
            .calls()
            .iter()
            .filter(|call| **call == PageCall::Click("b".into()))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn refused_click_falls_back_to_a_synthetic_event() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar sesión")])
        .refuse_click("b");
    let rig = authorized_rig(page).await;

    rig.driver.run().await;

    assert_eq!(rig.page.dispatched("b", DomEvent::Click), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_and_ping_commands() {
    let page = FakePage::at("https://www.mercadopublico.cl/Home");
    page.with("button, a", vec![labelled("b", "Iniciar sesión")]);
    let rig = authorized_rig(page).await;

    let pong = rig.driver.handle_command(PageCommand::Ping).await;
    assert_eq!(pong["ready"], true);

    rig.driver.handle_command(PageCommand::Stop).await;
    assert!(rig.driver.is_stopped());
    rig.driver.run().await;
    assert!(rig.page.calls().is_empty());
}
