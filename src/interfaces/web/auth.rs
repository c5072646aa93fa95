use axum::{
    Json,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Requests without an `Origin` (CLI, native tools) and requests from the
/// extension or a loopback page pass. Any other web origin is refused, since
/// browsers send simple POSTs and WebSocket upgrades cross-origin.
pub async fn require_trusted_origin(req: Request<Body>, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match origin {
        Some(origin) if !is_trusted_origin(&origin) => {
            tracing::warn!("Refusing request from origin {}", origin);
            (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "success": false,
                    "error": format!("Origin {} is not allowed", origin)
                })),
            )
                .into_response()
        }
        _ => next.run(req).await,
    }
}

pub(crate) fn is_trusted_origin(origin: &str) -> bool {
    if origin.starts_with("chrome-extension://") || origin.starts_with("moz-extension://") {
        return true;
    }
    match url::Url::parse(origin) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && matches!(
                    url.host_str(),
                    Some("127.0.0.1") | Some("localhost") | Some("[::1]")
                )
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_trusted_origin;

    #[test]
    fn extension_and_loopback_origins_are_trusted() {
        assert!(is_trusted_origin("chrome-extension://abcdefghijklmnop"));
        assert!(is_trusted_origin("moz-extension://1234"));
        assert!(is_trusted_origin("http://127.0.0.1:17890"));
        assert!(is_trusted_origin("http://localhost:3000"));
        assert!(is_trusted_origin("http://[::1]:17890"));
    }

    #[test]
    fn other_origins_are_not() {
        assert!(!is_trusted_origin("https://evil.example"));
        assert!(!is_trusted_origin("https://www.mercadopublico.cl"));
        assert!(!is_trusted_origin("http://localhost.evil.example"));
        assert!(!is_trusted_origin("null"));
    }
}
