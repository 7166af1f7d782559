pub mod engine;
pub mod jobspec;
pub mod nomad;

pub use engine::Orchestrator;
pub use jobspec::{JobRenderer, OrchestratorJob};
pub use nomad::{EvalResponse, HttpNomadClient, JobsApi, NomadJob};
