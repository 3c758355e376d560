//! nginx fleet control plane: a node registry, a management SSH key and the
//! orchestration that pushes nginx configuration and certificates to nodes,
//! exposed over an axum HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod remote;
pub mod services;
pub mod store;
pub mod tls;
pub mod types;

pub use config::FleetConfig;
pub use error::{AggregateError, FleetError};
