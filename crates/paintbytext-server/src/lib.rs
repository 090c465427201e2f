//! HTTP proxy between edit clients and the hosted image model.
//!
//! Exposes `POST /api/predictions` and `GET /api/predictions/{id}` and keeps
//! the provider credential on the server side.

pub mod config;
pub mod error;
pub mod provider;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::ProxyError;
pub use provider::{PredictionProvider, ReplicateClient};
pub use server::run_server;
pub use state::AppState;
