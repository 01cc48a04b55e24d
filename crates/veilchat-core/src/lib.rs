//! Veilchat Core
//!
//! Everything the messaging client needs below the conversation layer:
//!
//! - [`env::Environment`]: time and randomness, swappable for simulation
//! - [`services`]: contracts of the key directory, history service and
//!   realtime bus
//! - [`vault::KeyVault`]: PIN-guarded ownership of the user's keypair
//! - [`config::ClientConfig`]: tunables loaded from TOML

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod services;
pub mod system_env;
pub mod vault;

pub use config::{ClientConfig, ConfigError};
pub use env::{EnvRng, Environment};
pub use error::{ServiceError, VaultError};
pub use services::{Collaborators, HistoryService, KeyDirectory, RealtimeBus};
pub use system_env::SystemEnv;
pub use vault::{KeyVault, SetupIntent, VaultState};
