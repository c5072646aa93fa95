use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::Value;

use super::super::AppState;
use crate::core::automation::messages::{failure, handle_raw};
use crate::core::automation::types::TabId;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    /// Tab the message originates from, when the sender is a page.
    pub tab_id: Option<TabId>,
}

/// Accepts any message action. Always answers with a JSON envelope, even for
/// bodies that are not JSON at all.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Json<Value> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => return Json(failure(format!("Invalid JSON: {}", e))),
    };
    Json(handle_raw(&state.coordinator, query.tab_id, raw).await)
}
