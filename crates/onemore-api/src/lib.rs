//! SQLite-backed implementation of the remote store, with an in-process
//! change feed and anonymous bearer-token identities.

pub mod auth;
pub mod backend;
pub mod config;
mod convert;

pub use backend::LocalBackend;
pub use config::BackendConfig;
