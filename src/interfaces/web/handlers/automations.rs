use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

use super::super::AppState;

pub async fn list_automations(State(state): State<AppState>) -> Json<Value> {
    Json(state.coordinator.status(None).await)
}

pub async fn get_automation(
    Path(automation_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    Json(state.coordinator.status(Some(&automation_id)).await)
}

pub async fn extension_status(State(state): State<AppState>) -> Json<Value> {
    let mut status = state.coordinator.extension_status().await;
    status["bridgeConnected"] = Value::Bool(state.bridge.is_connected().await);
    Json(status)
}
