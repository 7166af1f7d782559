use crate::auth::{Authenticator, PermitAll};
use crate::server::{AppState, HttpServer, router};
use crate::shutdown;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tsg_core::store::PostgresStore;
use tsg_core::{AgentConfig, HttpNomadClient, JobsApi, Orchestrator};

pub const PROGNAME: &str = "tsg";

/// Owns the agent's long-lived dependencies and their start/stop order:
/// database pool, then HTTP server; on shutdown the server first, then the pool.
pub struct Agent {
    config: AgentConfig,
    authenticator: Arc<dyn Authenticator>,
    jobs: Option<Arc<dyn JobsApi>>,
    pool: Option<PgPool>,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        tracing::debug!("agent: initializing agent");
        Self {
            config,
            authenticator: Arc::new(PermitAll),
            jobs: None,
            pool: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an existing pool instead of connecting on `run`.
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Use a specific jobs API instead of the HTTP Nomad client from config.
    pub fn with_jobs_api(mut self, jobs: Arc<dyn JobsApi>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Run until `parent` is cancelled or the process receives SIGINT/SIGTERM.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&mut self, parent: &CancellationToken) -> anyhow::Result<()> {
        tracing::info!("agent: running {PROGNAME} agent");

        self.shutdown = parent.child_token();
        let _signals = shutdown::install_signal_handler(self.shutdown.clone())?;

        let pool = self.ensure_db_pool().await?;
        let store = Arc::new(PostgresStore::new(pool));
        let jobs: Arc<dyn JobsApi> = match &self.jobs {
            Some(jobs) => jobs.clone(),
            None => Arc::new(HttpNomadClient::new(&self.config.nomad)?),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            jobs,
            self.config.tsg_cli_version.clone(),
        )?);

        let app = router(
            AppState::new(store, orchestrator),
            self.authenticator.clone(),
            self.config.triton.clone(),
        );
        let srv = HttpServer::start(&self.config.http, app).await?;

        self.shutdown.cancelled().await;
        srv.stop().await
    }

    /// Close the pool and cancel anything still waiting on the agent.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn stop(&mut self) {
        tracing::info!("agent: shutting down {PROGNAME} agent");

        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.shutdown.cancel();
    }

    async fn ensure_db_pool(&mut self) -> anyhow::Result<PgPool> {
        if let Some(pool) = &self.pool {
            return Ok(pool.clone());
        }

        let cfg = &self.config.postgres;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| tsg_core::Error::backend("connect postgres", e))?;
        tracing::debug!(max_connections = cfg.max_connections, "agent: database pool ready");

        self.pool = Some(pool.clone());
        Ok(pool)
    }
}
