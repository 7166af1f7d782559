//! Triton service groups core: models, storage and Nomad job orchestration.

pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod orchestrator;
pub mod store;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use models::{
    Account, AccountId, AuthSession, InstanceTemplate, ListQuery, ServiceGroup, TritonCredential,
};
pub use orchestrator::{HttpNomadClient, JobsApi, Orchestrator};
pub use store::Store;
