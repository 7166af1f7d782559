use axum::Router;
use axum::middleware;
use axum::routing::get;

pub mod groups;
pub mod health;
pub mod templates;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new().nest(
        "/v1",
        Router::new()
            .route("/health", get(health::get_health))
            .merge(groups::router())
            .merge(templates::router())
            .layer(middleware::from_fn(crate::middleware::authenticate)),
    )
}

#[derive(Debug, serde::Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn query(&self) -> tsg_core::ListQuery {
        let defaults = tsg_core::ListQuery::default();
        tsg_core::ListQuery {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
        }
    }
}
