use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;

use super::super::AppState;

/// The extension shim connects here once and keeps the socket open.
pub async fn bridge_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let bridge = Arc::clone(&state.bridge);
    let host = Arc::clone(&state.host);
    let coordinator = Arc::clone(&state.coordinator);
    ws.on_upgrade(move |socket| bridge.serve(socket, host, coordinator))
}
