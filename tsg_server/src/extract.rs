use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::future;
use std::str::FromStr;
use tsg_core::config::TritonConfig;
use tsg_core::{AccountId, AuthSession};

/// Datacenter and CloudAPI URL used when a request does not name its own.
#[derive(Debug, Clone)]
pub struct SessionDefaults(pub TritonConfig);

/// The caller's session, built from `x-account-id` plus optional
/// `x-triton-datacenter` / `x-triton-url` overrides.
#[derive(Debug, Clone)]
pub struct Session(pub AuthSession);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    #[tracing::instrument(level = "debug", name = "extract.session", skip_all)]
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let parts: &Parts = parts;
        let res = (|| {
            let raw = parts
                .headers
                .get("x-account-id")
                .ok_or(ApiError::MissingAccountId)?
                .to_str()
                .map_err(|e| ApiError::InvalidAccountId(e.to_string()))?;
            let account_id = AccountId::from_str(raw.trim())
                .map_err(|e| ApiError::InvalidAccountId(e.to_string()))?;

            let defaults = parts
                .extensions
                .get::<SessionDefaults>()
                .ok_or_else(|| ApiError::InvalidInput("session defaults not configured".into()))?;

            let datacenter = header(parts, "x-triton-datacenter")
                .map(str::to_string)
                .unwrap_or_else(|| defaults.0.datacenter.clone());
            let triton_url = header(parts, "x-triton-url")
                .map(str::to_string)
                .unwrap_or_else(|| defaults.0.url.clone());

            Ok(Self(AuthSession {
                account_id,
                datacenter,
                triton_url,
            }))
        })();
        future::ready(res)
    }
}
