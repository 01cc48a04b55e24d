//! Deterministic simulation harness for veilchat testing.
//!
//! - [`SimEnv`]: seeded randomness and tokio's pausable clock
//! - [`SimServer`]: in-memory key directory, history service and realtime bus
//!   with fault injection
//! - [`fixtures`]: pre-generated keypairs shared across tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod fixtures;
pub mod sim_env;
pub mod sim_server;

pub use sim_env::SimEnv;
pub use sim_server::SimServer;
