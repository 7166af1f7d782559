use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tsg_core::AgentConfig;

#[derive(Debug, Parser)]
#[command(name = "tsg", version, about = "Triton service groups agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the agent: HTTP API plus Nomad orchestration (default if no subcommand given).
    Agent {
        /// Listen address override (else TSG_HTTP_ADDR).
        #[arg(long)]
        http_addr: Option<SocketAddr>,

        /// Nomad API address override (else NOMAD_ADDR).
        #[arg(long)]
        nomad_addr: Option<String>,
    },

    /// Apply database migrations.
    Migrate {
        /// Postgres URL override (else TSG_DATABASE_URL / DATABASE_URL).
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Print the effective configuration (redacted secrets).
    Config,

    /// Check that Postgres and Nomad are reachable.
    Check,
}

impl Commands {
    pub fn default_agent() -> Self {
        Commands::Agent {
            http_addr: None,
            nomad_addr: None,
        }
    }
}

pub fn redact(s: &str) -> String {
    if s.len() <= 8 {
        return "***".to_string();
    }
    match (s.get(..4), s.get(s.len() - 4..)) {
        (Some(head), Some(tail)) => format!("{head}***{tail}"),
        _ => "***".to_string(),
    }
}

/// JSON view of the config with credentials masked.
pub fn config_json(cfg: &AgentConfig) -> serde_json::Value {
    serde_json::json!({
        "http": {
            "addr": cfg.http.addr.to_string(),
            "shutdown_timeout_ms": cfg.http.shutdown_timeout.as_millis() as u64,
        },
        "postgres": {
            "url": redact(&cfg.postgres.url),
            "max_connections": cfg.postgres.max_connections,
            "acquire_timeout_ms": cfg.postgres.acquire_timeout.as_millis() as u64,
        },
        "nomad": {
            "address": cfg.nomad.address,
            "token": cfg.nomad.token.as_deref().map(|_| "<set>"),
            "namespace": cfg.nomad.namespace,
            "region": cfg.nomad.region,
            "timeout_ms": cfg.nomad.timeout.as_millis() as u64,
        },
        "triton": {
            "datacenter": cfg.triton.datacenter,
            "url": cfg.triton.url,
        },
        "tsg_cli_version": cfg.tsg_cli_version,
    })
}
