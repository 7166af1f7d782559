use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tsg_core::AgentConfig;
use tsg_core::config::PostgresConfig;
use tsg_core::store::PostgresStore;
use tsg_server::agent::Agent;
use tsg_server::cli::{Cli, Commands, config_json};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tsg_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(Commands::default_agent) {
        Commands::Agent {
            http_addr,
            nomad_addr,
        } => {
            let mut cfg = AgentConfig::from_env()?;
            if let Some(addr) = http_addr {
                cfg.http.addr = addr;
            }
            if let Some(addr) = nomad_addr {
                cfg.nomad.address = addr;
            }
            cfg.validate()?;

            let mut agent = Agent::new(cfg);
            let token = CancellationToken::new();
            let res = agent.run(&token).await;
            agent.stop().await;
            res?;
        }
        Commands::Migrate { database_url } => {
            let cfg = match database_url {
                Some(url) => PostgresConfig {
                    url,
                    max_connections: 2,
                    acquire_timeout: Duration::from_secs(10),
                },
                None => AgentConfig::from_env()?.postgres,
            };
            let store = PostgresStore::connect(&cfg).await?;
            store.migrate().await?;
            tracing::info!("database migrations applied");
        }
        Commands::Config => {
            let cfg = AgentConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config_json(&cfg))?);
        }
        Commands::Check => {
            let cfg = AgentConfig::from_env()?;

            match sqlx::PgPool::connect(&cfg.postgres.url).await {
                Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => println!("postgres: ok"),
                    Err(e) => println!("postgres: error ({e})"),
                },
                Err(e) => println!("postgres: error ({e})"),
            }

            match tsg_core::HttpNomadClient::new(&cfg.nomad) {
                Ok(client) => match client.leader().await {
                    Ok(leader) => println!("nomad: ok (leader {leader})"),
                    Err(e) => println!("nomad: error ({e})"),
                },
                Err(e) => println!("nomad: error ({e})"),
            }
        }
    }

    Ok(())
}
