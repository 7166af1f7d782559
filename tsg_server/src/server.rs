use crate::auth::{Authenticator, AuthenticatorExt};
use crate::extract::SessionDefaults;
use crate::middleware::log_requests;
use crate::routes;
use axum::routing::get;
use axum::{Extension, Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tsg_core::config::{HttpServerConfig, TritonConfig};
use tsg_core::{Orchestrator, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(
    state: AppState,
    authenticator: Arc<dyn Authenticator>,
    defaults: TritonConfig,
) -> Router {
    let request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::router())
        .route("/health", get(routes::health::get_health))
        .layer(Extension(Arc::new(state)))
        .layer(Extension(AuthenticatorExt(authenticator)))
        .layer(Extension(SessionDefaults(defaults)))
        .layer(middleware::from_fn(log_requests))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// A running HTTP listener that can be drained on demand.
pub struct HttpServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    task: JoinHandle<std::io::Result<()>>,
}

impl HttpServer {
    #[tracing::instrument(level = "info", skip_all, fields(addr = %cfg.addr))]
    pub async fn start(cfg: &HttpServerConfig, app: Router) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tracing::info!(%local_addr, "http server listening");
        Ok(Self {
            local_addr,
            shutdown,
            shutdown_timeout: cfg.shutdown_timeout,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests, up to the
    /// configured timeout.
    #[tracing::instrument(level = "info", skip_all, fields(addr = %self.local_addr))]
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        match tokio::time::timeout(self.shutdown_timeout, &mut self.task).await {
            Ok(joined) => {
                joined??;
                tracing::info!("http server stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "http server did not drain in time; aborting"
                );
                self.task.abort();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermitAll;
    use crate::test_support::{RecordingJobs, TestApp, test_app};
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderMap, Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tsg_core::AccountId;

    struct DenyAll;

    #[async_trait::async_trait]
    impl Authenticator for DenyAll {
        async fn is_authenticated(&self, _headers: &HeaderMap) -> bool {
            false
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        account: Option<AccountId>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(account) = account {
            req = req.header("x-account-id", account.to_string());
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }

    async fn create_template(t: &TestApp) -> String {
        let (status, _, body) = send(
            &t.app,
            Method::POST,
            "/v1/templates",
            Some(t.account_id),
            Some(json!({
                "name": "web",
                "package": "g4-highcpu-1G",
                "image_id": "img-1",
                "networks": ["net-a"],
                "tags": {"role": "web"},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["template_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_served_with_and_without_prefix() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;

        for uri in ["/health", "/v1/health"] {
            let (status, headers, body) = send(&t.app, Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["status"], "ok");
            assert!(headers.contains_key("x-request-id"));
        }
    }

    #[tokio::test]
    async fn api_requires_account_header() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;

        let (status, _, body) = send(&t.app, Method::GET, "/v1/tsg", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing x-account-id header");
    }

    #[tokio::test]
    async fn rejecting_authenticator_blocks_api_but_not_root_health() {
        let t = test_app(RecordingJobs::default(), Arc::new(DenyAll)).await;

        let (status, _, _) = send(&t.app, Method::GET, "/v1/tsg", Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(&t.app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn group_lifecycle_drives_nomad_in_order() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;

        let (status, _, body) = send(
            &t.app,
            Method::POST,
            "/v1/tsg",
            Some(t.account_id),
            Some(json!({"group_name": "web", "template_id": template_id, "capacity": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["capacity"], 3);
        assert_eq!(
            t.jobs.ops(),
            ["parse", "validate", "register", "periodic_force"]
        );

        let (status, _, body) = send(
            &t.app,
            Method::PUT,
            "/v1/tsg/web",
            Some(t.account_id),
            Some(json!({"capacity": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capacity"], 5);
        assert_eq!(
            t.jobs.ops()[4..],
            ["parse", "deregister", "validate", "register", "periodic_force"]
        );

        let (status, _, _) =
            send(&t.app, Method::DELETE, "/v1/tsg/web", Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            t.jobs.ops()[9..],
            [
                "parse",
                "deregister",
                "validate",
                "register",
                "periodic_force",
                "deregister"
            ]
        );

        let (status, _, _) = send(&t.app, Method::GET, "/v1/tsg/web", Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn triton_headers_override_session_defaults() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;

        let req = Request::builder()
            .method(Method::POST)
            .uri("/v1/tsg")
            .header("x-account-id", t.account_id.to_string())
            .header("x-triton-datacenter", "eu-ams-1")
            .header("x-triton-url", "https://eu-ams-1.api.example.com")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"group_name": "web", "template_id": template_id, "capacity": 2}).to_string(),
            ))
            .unwrap();
        let resp = t.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let hcl = &t.jobs.parsed_hcl()[0];
        assert!(hcl.contains(r#"datacenters = ["eu-ams-1"]"#), "{hcl}");
        assert!(hcl.contains(r#""-U", "https://eu-ams-1.api.example.com","#), "{hcl}");
        assert!(!hcl.contains("us-sw-1"));
    }

    #[tokio::test]
    async fn session_defaults_apply_without_override_headers() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;

        let (status, _, _) = send(
            &t.app,
            Method::POST,
            "/v1/tsg",
            Some(t.account_id),
            Some(json!({"group_name": "web", "template_id": template_id, "capacity": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let hcl = &t.jobs.parsed_hcl()[0];
        assert!(hcl.contains(r#"datacenters = ["us-sw-1"]"#), "{hcl}");
        assert!(hcl.contains(r#""-U", "https://us-sw-1.api.joyent.com","#), "{hcl}");
    }

    #[tokio::test]
    async fn oversized_capacity_is_rejected_before_nomad() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;

        let (status, _, body) = send(
            &t.app,
            Method::POST,
            "/v1/tsg",
            Some(t.account_id),
            Some(json!({"group_name": "web", "template_id": template_id, "capacity": 3_000_000_000u64})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("capacity"));
        assert!(t.jobs.ops().is_empty());
        assert!(t.store.get_group(t.account_id, "web").await.unwrap().is_none());

        let (status, _, _) = send(
            &t.app,
            Method::POST,
            "/v1/tsg",
            Some(t.account_id),
            Some(json!({"group_name": "web", "template_id": template_id, "capacity": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let submitted = t.jobs.ops().len();

        let (status, _, _) = send(
            &t.app,
            Method::PUT,
            "/v1/tsg/web",
            Some(t.account_id),
            Some(json!({"capacity": 3_000_000_000u64})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(t.jobs.ops().len(), submitted);
        let stored = t.store.get_group(t.account_id, "web").await.unwrap().unwrap();
        assert_eq!(stored.capacity, 1);
    }

    #[tokio::test]
    async fn failed_submit_is_not_persisted() {
        let t = test_app(RecordingJobs::failing_on("register"), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;

        let (status, _, body) = send(
            &t.app,
            Method::POST,
            "/v1/tsg",
            Some(t.account_id),
            Some(json!({"group_name": "web", "template_id": template_id, "capacity": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("unable to register job with nomad")
        );
        assert!(t.store.get_group(t.account_id, "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_group_name_conflicts() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;
        let req = json!({"group_name": "web", "template_id": template_id, "capacity": 1});

        let (status, _, _) =
            send(&t.app, Method::POST, "/v1/tsg", Some(t.account_id), Some(req.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, _) =
            send(&t.app, Method::POST, "/v1/tsg", Some(t.account_id), Some(req)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(t.jobs.ops().len(), 4);
    }

    #[tokio::test]
    async fn templates_are_scoped_to_the_account() {
        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let template_id = create_template(&t).await;
        let uri = format!("/v1/templates/{template_id}");

        let (status, _, body) = send(&t.app, Method::GET, &uri, Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tags"]["role"], "web");

        let stranger = AccountId(uuid::Uuid::new_v4());
        let (status, _, _) = send(&t.app, Method::GET, &uri, Some(stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, body) =
            send(&t.app, Method::GET, "/v1/templates", Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _, _) = send(&t.app, Method::DELETE, &uri, Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = send(&t.app, Method::GET, &uri, Some(t.account_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn http_server_serves_until_stopped() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let t = test_app(RecordingJobs::default(), Arc::new(PermitAll)).await;
        let cfg = HttpServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            shutdown_timeout: Duration::from_secs(2),
        };
        let srv = HttpServer::start(&cfg, t.app).await.unwrap();
        let addr = srv.local_addr();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");

        srv.stop().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
