//! Nomad jobs API: the only part of Nomad the agent talks to.

use crate::config::NomadConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};

/// A job in Nomad's canonical JSON form, as returned by the parse endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct NomadJob {
    id: String,
    spec: serde_json::Value,
}

impl NomadJob {
    pub fn from_value(spec: serde_json::Value) -> Result<Self> {
        let id = spec
            .get("ID")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("nomad job is missing an ID".to_string()))?
            .to_string();
        Ok(Self { id, spec })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &serde_json::Value {
        &self.spec
    }
}

/// Evaluation created by a register/deregister/force call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResponse {
    #[serde(rename = "EvalID", default)]
    pub eval_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValidateResponse {
    #[serde(rename = "Error", default)]
    error: Option<String>,
    #[serde(rename = "ValidationErrors", default)]
    validation_errors: Option<Vec<String>>,
}

#[async_trait]
pub trait JobsApi: Send + Sync {
    /// Turn HCL job text into a canonical job.
    async fn parse(&self, hcl: &str) -> Result<NomadJob>;
    async fn validate(&self, job: &NomadJob) -> Result<()>;
    async fn register(&self, job: &NomadJob) -> Result<EvalResponse>;
    async fn deregister(&self, job_id: &str, purge: bool) -> Result<EvalResponse>;
    /// Launch one instance of a periodic job now, outside its schedule.
    async fn periodic_force(&self, job_id: &str) -> Result<EvalResponse>;
}

#[derive(Clone)]
pub struct HttpNomadClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
    namespace: Option<String>,
    region: Option<String>,
}

impl HttpNomadClient {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub fn new(cfg: &NomadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::backend("build nomad http client", e))?;

        Ok(Self {
            base_url: cfg.address.trim_end_matches('/').to_string(),
            client,
            token: cfg.token.clone(),
            namespace: cfg.namespace.clone(),
            region: cfg.region.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(
                "X-Nomad-Token",
                HeaderValue::from_str(token)
                    .map_err(|e| Error::InvalidInput(format!("invalid nomad token: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut req = self.client.request(method, url).headers(self.headers()?);
        if let Some(ns) = &self.namespace {
            req = req.query(&[("namespace", ns)]);
        }
        if let Some(region) = &self.region {
            req = req.query(&[("region", region)]);
        }
        Ok(req)
    }

    #[tracing::instrument(level = "debug", skip(req))]
    async fn send<T: serde::de::DeserializeOwned>(what: &str, req: RequestBuilder) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::backend(format!("nomad {what} request"), e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::BackendMessage(format!(
                "nomad returned {status}: {}",
                text.trim()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::backend(format!("parse nomad {what} response"), e))
    }

    /// Address of the current cluster leader; used as a reachability check.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn leader(&self) -> Result<String> {
        let req = self.request(Method::GET, "/v1/status/leader")?;
        Self::send("leader", req).await
    }
}

#[async_trait]
impl JobsApi for HttpNomadClient {
    #[tracing::instrument(level = "debug", skip(self, hcl))]
    async fn parse(&self, hcl: &str) -> Result<NomadJob> {
        let req = self
            .request(Method::POST, "/v1/jobs/parse")?
            .json(&serde_json::json!({
                "JobHCL": hcl,
                "Canonicalize": true,
            }));
        let spec: serde_json::Value = Self::send("parse", req).await?;
        NomadJob::from_value(spec)
    }

    #[tracing::instrument(level = "debug", skip(self, job), fields(job_id = job.id()))]
    async fn validate(&self, job: &NomadJob) -> Result<()> {
        let req = self
            .request(Method::POST, "/v1/validate/job")?
            .json(&serde_json::json!({ "Job": job.spec() }));
        let resp: ValidateResponse = Self::send("validate", req).await?;

        if let Some(errors) = resp.validation_errors.filter(|e| !e.is_empty()) {
            return Err(Error::InvalidInput(errors.join("; ")));
        }
        if let Some(err) = resp.error.filter(|e| !e.trim().is_empty()) {
            return Err(Error::InvalidInput(err));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, job), fields(job_id = job.id()))]
    async fn register(&self, job: &NomadJob) -> Result<EvalResponse> {
        let req = self
            .request(Method::POST, "/v1/jobs")?
            .json(&serde_json::json!({ "Job": job.spec() }));
        Self::send("register", req).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn deregister(&self, job_id: &str, purge: bool) -> Result<EvalResponse> {
        let req = self
            .request(Method::DELETE, &format!("/v1/job/{job_id}"))?
            .query(&[("purge", purge)]);
        Self::send("deregister", req).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn periodic_force(&self, job_id: &str) -> Result<EvalResponse> {
        let req = self.request(Method::POST, &format!("/v1/job/{job_id}/periodic/force"))?;
        Self::send("periodic force", req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(address: &str, token: Option<&str>) -> NomadConfig {
        NomadConfig {
            address: address.to_string(),
            token: token.map(str::to_string),
            namespace: None,
            region: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn job() -> NomadJob {
        NomadJob::from_value(serde_json::json!({ "ID": "web_123", "Type": "batch" })).unwrap()
    }

    #[test]
    fn trims_trailing_slash() {
        let c = HttpNomadClient::new(&config("http://localhost:4646/", None)).unwrap();
        assert_eq!(c.base_url(), "http://localhost:4646");
    }

    #[test]
    fn job_requires_an_id() {
        assert!(NomadJob::from_value(serde_json::json!({ "Type": "batch" })).is_err());
        assert_eq!(job().id(), "web_123");
    }

    #[tokio::test]
    async fn parse_posts_hcl_and_reads_the_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs/parse"))
            .and(body_partial_json(serde_json::json!({ "Canonicalize": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ID": "web_123", "Name": "web_123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), None)).unwrap();
        let parsed = client.parse("job \"web_123\" {}").await.unwrap();
        assert_eq!(parsed.id(), "web_123");
    }

    #[tokio::test]
    async fn register_sends_token_and_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs"))
            .and(header("X-Nomad-Token", "s3cret"))
            .and(body_partial_json(serde_json::json!({ "Job": { "ID": "web_123" } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "EvalID": "e1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), Some("s3cret"))).unwrap();
        let eval = client.register(&job()).await.unwrap();
        assert_eq!(eval.eval_id, "e1");
    }

    #[tokio::test]
    async fn validate_surfaces_validation_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/validate/job"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "DriverConfigValidated": true,
                "ValidationErrors": ["missing datacenters"],
                "Error": "1 error occurred"
            })))
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), None)).unwrap();
        let err = client.validate(&job()).await.unwrap_err();
        assert!(err.to_string().contains("missing datacenters"));
    }

    #[tokio::test]
    async fn deregister_purges_and_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/job/web_123"))
            .and(query_param("purge", "true"))
            .respond_with(ResponseTemplate::new(500).set_body_string("no leader"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), None)).unwrap();
        let err = client.deregister("web_123", true).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "backend error: nomad returned 500 Internal Server Error: no leader"
        );
    }

    #[tokio::test]
    async fn periodic_force_hits_job_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/job/web_123/periodic/force"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "EvalID": "e2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), None)).unwrap();
        assert_eq!(client.periodic_force("web_123").await.unwrap().eval_id, "e2");
    }

    #[tokio::test]
    async fn validate_fails_on_error_without_validation_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/validate/job"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "DriverConfigValidated": false,
                "ValidationErrors": [],
                "Error": "task group scale has no tasks"
            })))
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), None)).unwrap();
        let err = client.validate(&job()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("task group scale has no tasks"));
    }

    #[tokio::test]
    async fn namespace_and_region_are_sent_on_every_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs"))
            .and(query_param("namespace", "tsg"))
            .and(query_param("region", "west"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "EvalID": "e3" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/job/web_123"))
            .and(query_param("purge", "true"))
            .and(query_param("namespace", "tsg"))
            .and(query_param("region", "west"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "EvalID": "e4" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(&server.uri(), None);
        cfg.namespace = Some("tsg".into());
        cfg.region = Some("west".into());
        let client = HttpNomadClient::new(&cfg).unwrap();

        assert_eq!(client.register(&job()).await.unwrap().eval_id, "e3");
        assert_eq!(client.deregister("web_123", true).await.unwrap().eval_id, "e4");
    }

    #[tokio::test]
    async fn leader_returns_the_leader_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .and(header("X-Nomad-Token", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!("10.0.0.5:4647")))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpNomadClient::new(&config(&server.uri(), Some("s3cret"))).unwrap();
        assert_eq!(client.leader().await.unwrap(), "10.0.0.5:4647");
    }
}
