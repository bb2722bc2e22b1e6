//! Data models for the admin API.
//!
//! Only contact messages are modelled here; news and events are managed
//! elsewhere.

pub mod contact;

pub use contact::{ContactMessage, ContactSubmission, ContactValidationError};
