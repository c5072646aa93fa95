use axum::{
    Json,
    body::Bytes,
    extract::State,
};
use serde_json::{Value, json};
use tracing::warn;

use super::super::AppState;
use crate::core::automation::{TriggerRequest, TriggerUi};

pub async fn post_trigger(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let request: TriggerRequest = if body.is_empty() {
        TriggerRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Json(json!({ "success": false, "error": format!("Invalid JSON: {}", e) }));
            }
        }
    };

    match TriggerUi::new(state.trigger.clone()).trigger(request).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "strategy": outcome.strategy,
            "response": outcome.response,
        })),
        Err(e) => {
            warn!("Trigger refused: {}", e);
            Json(json!({ "success": false, "error": e.to_string() }))
        }
    }
}
