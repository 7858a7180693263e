//! 缓存读写接口

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use lumen_cache::MAX_TTL;
use lumen_errors::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PutEntryRequest {
    pub value: Value,
    /// 缺省使用命名空间的 TTL，0 表示不过期
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub namespace: String,
    pub key: String,
    pub value: Value,
}

/// 只接受配置里登记过的命名空间
fn ensure_known_namespace(state: &AppState, namespace: &str) -> Result<(), ApiError> {
    if state.runtime.coordinator.namespaces().contains(namespace) {
        Ok(())
    } else {
        Err(AppError::not_found(format!("Unknown cache namespace {}", namespace)).into())
    }
}

fn entry_ttl(ttl_secs: Option<u64>) -> Result<Option<Duration>, ApiError> {
    match ttl_secs {
        Some(secs) if secs > MAX_TTL.as_secs() => Err(AppError::validation(format!(
            "ttl_secs must not exceed {}",
            MAX_TTL.as_secs()
        ))
        .into()),
        other => Ok(other.map(Duration::from_secs)),
    }
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<EntryResponse>, ApiError> {
    ensure_known_namespace(&state, &namespace)?;
    let value = state
        .runtime
        .coordinator
        .get_json::<Value>(&key, &namespace)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No cache entry {}:{}", namespace, key)))?;

    Ok(Json(EntryResponse {
        namespace,
        key,
        value,
    }))
}

pub async fn put_entry(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    Json(body): Json<PutEntryRequest>,
) -> Result<StatusCode, ApiError> {
    ensure_known_namespace(&state, &namespace)?;
    let ttl = entry_ttl(body.ttl_secs)?;
    state
        .runtime
        .coordinator
        .set_json(&key, &body.value, ttl, &namespace)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    ensure_known_namespace(&state, &namespace)?;
    state.runtime.coordinator.delete(&key, &namespace).await?;
    Ok(StatusCode::NO_CONTENT)
}
