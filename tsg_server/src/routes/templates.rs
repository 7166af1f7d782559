use crate::error::ApiError;
use crate::extract::Session;
use crate::routes::ListParams;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tsg_core::InstanceTemplate;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub package: String,
    pub image_id: String,
    #[serde(default)]
    pub firewall_enabled: bool,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{template_id}",
            get(get_template).delete(delete_template),
        )
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_templates(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<InstanceTemplate>>, ApiError> {
    let templates = state
        .store
        .list_templates(session.account_id, params.query())
        .await?;
    Ok(Json(templates))
}

#[tracing::instrument(level = "info", skip_all)]
async fn create_template(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<InstanceTemplate>), ApiError> {
    for (field, value) in [
        ("name", &req.name),
        ("package", &req.package),
        ("image_id", &req.image_id),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::InvalidInput(format!("{field} is required")));
        }
    }
    if req.networks.iter().any(|n| n.trim().is_empty()) {
        return Err(ApiError::InvalidInput("networks must not contain empty ids".into()));
    }

    let template = InstanceTemplate {
        template_id: Uuid::new_v4(),
        account_id: session.account_id,
        name: req.name.trim().to_string(),
        package: req.package.trim().to_string(),
        image_id: req.image_id.trim().to_string(),
        firewall_enabled: req.firewall_enabled,
        networks: req.networks,
        user_data: req.user_data.filter(|s| !s.is_empty()),
        tags: req.tags,
        metadata: req.metadata,
        created_at: chrono::Utc::now(),
    };
    state.store.upsert_template(&template).await?;

    Ok((StatusCode::CREATED, Json(template)))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_template(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<InstanceTemplate>, ApiError> {
    let template = state
        .store
        .get_template(session.account_id, template_id)
        .await?
        .ok_or_else(|| ApiError::Core(tsg_core::Error::NotFound(format!("template {template_id}"))))?;
    Ok(Json(template))
}

#[tracing::instrument(level = "info", skip_all)]
async fn delete_template(
    Session(session): Session,
    Extension(state): Extension<Arc<AppState>>,
    Path(template_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_template(session.account_id, template_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
