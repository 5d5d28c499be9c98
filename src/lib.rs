//! Service topology tracking and application-level incident correlation.
//!
//! The store keeps services, dependencies and applications per tenant. The
//! processor watches per-service alert state and opens one incident per
//! application when several of its services are impacted at once.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod processing;
pub mod state;
pub mod topology;

pub use error::{AppError, Result};
