use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header, request::Parts},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::handlers::{automations, bridge, messages, trigger};
use super::{AppState, auth};

fn build_localhost_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _: &Parts| {
                origin.to_str().is_ok_and(auth::is_trusted_origin)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(messages::post_message))
        .route("/api/trigger", post(trigger::post_trigger))
        .route("/api/automations", get(automations::list_automations))
        .route("/api/automations/{id}", get(automations::get_automation))
        .route("/api/status", get(automations::extension_status))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route("/bridge", get(bridge::bridge_socket))
        .layer(middleware::from_fn(auth::require_trusted_origin))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::core::store::{CoordinatorOptions, MemoryStore, SharedStore};
    use crate::core::vault::{CredentialVault, SecretCipher};
    use crate::interfaces::services::Services;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        let store = SharedStore::new(Arc::new(MemoryStore::default()));
        let cipher = SecretCipher::from_key(&[7u8; 32]).unwrap();
        let vault = Arc::new(CredentialVault::new(store.raw(), cipher, 7));
        let mut config = AppConfig::default();
        config.server.bridge_call_timeout_ms = 100;
        config.portal.api_base = "http://127.0.0.1:9/api".to_string();

        let services =
            Services::assemble(&config, store, vault, CoordinatorOptions::default()).unwrap();
        let (log_tx, _) = tokio::sync::broadcast::channel(16);

        AppState {
            coordinator: services.coordinator,
            host: services.host,
            bridge: services.bridge,
            trigger: services.trigger,
            log_tx,
            api_port: 17890,
        }
    }

    async fn send(
        app: Router,
        method: Method,
        path: &str,
        body: Body,
        origin: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(origin) = origin {
            req = req.header("origin", origin);
        }
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, headers, json)
    }

    async fn post_json(app: Router, path: &str, json: serde_json::Value) -> serde_json::Value {
        let body = Body::from(serde_json::to_string(&json).unwrap());
        send(app, Method::POST, path, body, None).await.2
    }

    #[tokio::test]
    async fn message_endpoint_answers_ping() {
        let app = build_api_router(test_state());
        let json = post_json(app, "/api/message", serde_json::json!({"action": "ping"})).await;
        assert_eq!(json, serde_json::json!({"success": true, "ready": true}));
    }

    #[tokio::test]
    async fn message_endpoint_always_answers() {
        let state = test_state();

        let (status, _, json) = send(
            build_api_router(state.clone()),
            Method::POST,
            "/api/message",
            Body::from("not json"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid JSON"));

        let json = post_json(
            build_api_router(state),
            "/api/message",
            serde_json::json!({"action": "launchRockets"}),
        )
        .await;
        assert_eq!(json["error"], "Unrecognized action: launchRockets");
    }

    #[tokio::test]
    async fn page_messages_carry_their_tab() {
        let state = test_state();
        let json = post_json(
            build_api_router(state.clone()),
            "/api/message?tabId=12",
            serde_json::json!({"action": "contentScriptReady"}),
        )
        .await;
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn automations_list_starts_empty() {
        let app = build_api_router(test_state());
        let (status, headers, json) =
            send(app, Method::GET, "/api/automations", Body::empty(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["activeCount"], 0);
        assert_eq!(json["automations"].as_array().unwrap().len(), 0);
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn unknown_automation_is_reported() {
        let app = build_api_router(test_state());
        let (_, _, json) =
            send(app, Method::GET, "/api/automations/nope", Body::empty(), None).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unknown automation nope");
    }

    #[tokio::test]
    async fn status_reports_a_missing_bridge() {
        let app = build_api_router(test_state());
        let (_, _, json) = send(app, Method::GET, "/api/status", Body::empty(), None).await;
        assert_eq!(json["enabled"], true);
        assert_eq!(json["bridgeConnected"], false);
    }

    #[tokio::test]
    async fn foreign_origins_are_refused() {
        let state = test_state();
        let (status, _, json) = send(
            build_api_router(state.clone()),
            Method::POST,
            "/api/trigger",
            Body::empty(),
            Some("https://evil.example"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["success"], false);

        let (status, headers, _) = send(
            build_api_router(state),
            Method::GET,
            "/api/automations",
            Body::empty(),
            Some("chrome-extension://abcdef"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "chrome-extension://abcdef"
        );
    }

    #[tokio::test]
    async fn trigger_without_credentials_is_refused() {
        let app = build_api_router(test_state());
        let json = post_json(app, "/api/trigger", serde_json::json!({})).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("credentials"));
    }

    #[tokio::test]
    async fn start_fails_cleanly_without_the_extension() {
        let app = build_api_router(test_state());
        let json = post_json(
            app,
            "/api/message",
            serde_json::json!({"action": "startAutomation", "businessId": "ABC-123"}),
        )
        .await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("Could not open a tab"));
    }
}
