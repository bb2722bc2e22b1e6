//! REST client module for the community site's admin API.
//!
//! This module provides the `ApiClient` used for login and for the contacts
//! endpoints, plus the interceptor seam the session guard hooks into.
//!
//! The API uses bearer token authentication; tokens come from the
//! `/admin/login` endpoint.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod login;

pub use client::ApiClient;
pub use error::{ApiError, LoginError};
pub use interceptor::{ResponseInterceptor, UnauthorizedInterceptor};
