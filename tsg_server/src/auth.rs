use axum::http::HeaderMap;
use std::sync::Arc;

/// Decides whether a request may reach the API.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn is_authenticated(&self, headers: &HeaderMap) -> bool;
}

/// Stock authenticator: lets every request through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

#[async_trait::async_trait]
impl Authenticator for PermitAll {
    async fn is_authenticated(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Request extension carrying the active authenticator.
#[derive(Clone)]
pub struct AuthenticatorExt(pub Arc<dyn Authenticator>);
