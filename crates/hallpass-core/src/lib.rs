//! Core library for the community site's admin session handling.
//!
//! Keeps the client's view of the admin login consistent with stored
//! credentials, and provides the API client that the session guard watches
//! for rejected credentials.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, LoginError};
pub use auth::{AuthState, RouteDecision, RouteGuard, SessionGuard, SessionScope};
pub use config::Config;
