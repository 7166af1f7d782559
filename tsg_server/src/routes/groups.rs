//! Service group routes. Every write drives the orchestrator first and only
//! touches the store once Nomad has accepted the change.

use crate::error::ApiError;
use crate::extract::Session;
use crate::routes::ListParams;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tsg_core::ServiceGroup;
use uuid::Uuid;

const MAX_GROUP_NAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub group_name: String,
    pub template_id: Uuid,
    pub capacity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/tsg", get(list_groups).post(create_group))
        .route(
            "/tsg/{name}",
            get(get_group).put(update_group).delete(delete_group),
        )
}

/// Group names end up in Nomad job ids and URLs.
fn validate_group_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_GROUP_NAME_LEN
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::InvalidInput(format!(
            "group_name must be 1-{MAX_GROUP_NAME_LEN} characters of [A-Za-z0-9_-] starting with a letter or digit: {name:?}"
        )));
    }
    Ok(())
}

/// Capacity is bounded by the store column; check it before any Nomad call.
fn validate_capacity(capacity: u32) -> Result<(), ApiError> {
    if capacity > ServiceGroup::MAX_CAPACITY {
        return Err(ApiError::InvalidInput(format!(
            "capacity must be at most {}: {capacity}",
            ServiceGroup::MAX_CAPACITY
        )));
    }
    Ok(())
}

async fn load_group(
    state: &AppState,
    session: &tsg_core::AuthSession,
    name: &str,
) -> Result<ServiceGroup, ApiError> {
    state
        .store
        .get_group(session.account_id, name)
        .await?
        .ok_or_else(|| ApiError::Core(tsg_core::Error::NotFound(format!("service group {name}"))))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_groups(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ServiceGroup>>, ApiError> {
    let groups = state
        .store
        .list_groups(session.account_id, params.query())
        .await?;
    Ok(Json(groups))
}

#[tracing::instrument(level = "info", skip_all)]
async fn create_group(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ServiceGroup>), ApiError> {
    let name = req.group_name.trim();
    validate_group_name(name)?;
    validate_capacity(req.capacity)?;

    if state
        .store
        .get_group(session.account_id, name)
        .await?
        .is_some()
    {
        return Err(ApiError::Core(tsg_core::Error::Conflict(format!(
            "service group {name} already exists"
        ))));
    }

    let now = Utc::now();
    let group = ServiceGroup {
        group_id: Uuid::new_v4(),
        account_id: session.account_id,
        group_name: name.to_string(),
        template_id: req.template_id,
        capacity: req.capacity,
        created_at: now,
        updated_at: now,
    };

    state.orchestrator.submit(&session, &group).await?;
    state.store.insert_group(&group).await?;
    tracing::info!(group = %group.group_name, capacity = group.capacity, "service group created");

    Ok((StatusCode::CREATED, Json(group)))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_group(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ServiceGroup>, ApiError> {
    Ok(Json(load_group(&state, &session, &name).await?))
}

#[tracing::instrument(level = "info", skip_all)]
async fn update_group(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<ServiceGroup>, ApiError> {
    if let Some(capacity) = req.capacity {
        validate_capacity(capacity)?;
    }

    let mut group = load_group(&state, &session, &name).await?;
    if let Some(template_id) = req.template_id {
        group.template_id = template_id;
    }
    if let Some(capacity) = req.capacity {
        group.capacity = capacity;
    }
    group.updated_at = Utc::now();

    state.orchestrator.update(&session, &group).await?;
    state.store.upsert_group(&group).await?;
    tracing::info!(group = %group.group_name, capacity = group.capacity, "service group updated");

    Ok(Json(group))
}

#[tracing::instrument(level = "info", skip_all)]
async fn delete_group(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let group = load_group(&state, &session, &name).await?;

    state.orchestrator.delete(&session, &group).await?;
    state
        .store
        .delete_group(session.account_id, &group.group_name)
        .await?;
    tracing::info!(group = %group.group_name, "service group deleted");

    Ok(StatusCode::NO_CONTENT)
}
