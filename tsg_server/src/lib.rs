#![forbid(unsafe_code)]

pub mod agent;
pub mod auth;
pub mod cli;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod shutdown;

#[cfg(test)]
mod test_support;
