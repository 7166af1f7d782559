use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub addr: SocketAddr,
    /// Upper bound on draining in-flight requests once shutdown starts.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NomadConfig {
    pub address: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub region: Option<String>,
    pub timeout: Duration,
}

/// Defaults used to build a session when a request does not override them.
#[derive(Debug, Clone)]
pub struct TritonConfig {
    pub datacenter: String,
    pub url: String,
}

/// Everything the agent needs to boot.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub http: HttpServerConfig,
    pub postgres: PostgresConfig,
    pub nomad: NomadConfig,
    pub triton: TritonConfig,
    /// Release of tsg-cli that scaling jobs download and run.
    pub tsg_cli_version: String,
}

impl AgentConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let millis = |key: &str, default: u64| {
            non_empty(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let http_addr = non_empty("TSG_HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let http_addr: SocketAddr = http_addr
            .parse()
            .map_err(|e| Error::InvalidInput(format!("TSG_HTTP_ADDR is invalid: {e}")))?;

        let pg_url = non_empty("TSG_DATABASE_URL")
            .or_else(|| non_empty("DATABASE_URL"))
            .ok_or_else(|| {
                Error::InvalidInput("TSG_DATABASE_URL or DATABASE_URL is required".to_string())
            })?;
        let pg_max_connections = non_empty("TSG_DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let cfg = Self {
            http: HttpServerConfig {
                addr: http_addr,
                shutdown_timeout: Duration::from_millis(millis(
                    "TSG_HTTP_SHUTDOWN_TIMEOUT_MS",
                    10_000,
                )),
            },
            postgres: PostgresConfig {
                url: pg_url,
                max_connections: pg_max_connections,
                acquire_timeout: Duration::from_millis(millis(
                    "TSG_DATABASE_ACQUIRE_TIMEOUT_MS",
                    5_000,
                )),
            },
            nomad: NomadConfig {
                address: non_empty("NOMAD_ADDR")
                    .unwrap_or_else(|| "http://127.0.0.1:4646".to_string()),
                token: non_empty("NOMAD_TOKEN"),
                namespace: non_empty("NOMAD_NAMESPACE"),
                region: non_empty("NOMAD_REGION"),
                timeout: Duration::from_millis(millis("NOMAD_TIMEOUT_MS", 10_000)),
            },
            triton: TritonConfig {
                datacenter: non_empty("TSG_DATACENTER").unwrap_or_else(|| "us-east-1".to_string()),
                url: non_empty("TSG_TRITON_URL")
                    .unwrap_or_else(|| "https://us-east-1.api.joyent.com".to_string()),
            },
            tsg_cli_version: non_empty("TSG_CLI_VERSION").unwrap_or_else(|| "0.1.0".to_string()),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.postgres.url.trim().is_empty() {
            return Err(Error::InvalidInput("postgres.url is empty".to_string()));
        }
        if self.postgres.max_connections == 0 {
            return Err(Error::InvalidInput(
                "postgres.max_connections must be > 0".to_string(),
            ));
        }
        if self.postgres.acquire_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "postgres.acquire_timeout must be > 0".to_string(),
            ));
        }

        if self.nomad.address.trim().is_empty() {
            return Err(Error::InvalidInput("nomad.address is empty".to_string()));
        }
        if !self.nomad.address.starts_with("http://") && !self.nomad.address.starts_with("https://")
        {
            return Err(Error::InvalidInput(format!(
                "nomad.address must be an http(s) url: {}",
                self.nomad.address
            )));
        }
        if self.nomad.timeout.is_zero() {
            return Err(Error::InvalidInput("nomad.timeout must be > 0".to_string()));
        }

        if self.triton.datacenter.trim().is_empty() {
            return Err(Error::InvalidInput("triton.datacenter is empty".to_string()));
        }
        if self.triton.url.trim().is_empty() {
            return Err(Error::InvalidInput("triton.url is empty".to_string()));
        }

        // Interpolated straight into the artifact URL.
        if self.tsg_cli_version.trim().is_empty()
            || !self
                .tsg_cli_version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
        {
            return Err(Error::InvalidInput(format!(
                "tsg_cli_version is invalid: {:?}",
                self.tsg_cli_version
            )));
        }

        Ok(())
    }
}
