//! Authentication module for the admin back-office session.
//!
//! This module provides:
//! - `token`: client-side inspection of bearer tokens (decode, expiry)
//! - `SessionStore`: durable key/value storage shared between guards
//! - `SessionGuard`: the login state machine, with a periodic expiry sweep,
//!   cross-guard storage sync and a 401 interceptor
//! - `RouteGuard`: allow/deny decisions for admin views
//!
//! Stored tokens are re-checked every 5 minutes by default.

pub mod navigation;
pub mod route;
pub mod session;
pub mod storage;
pub mod token;

pub use navigation::{AdminRoutes, MemoryNavigator, Navigation, NavigationMode, Navigator};
pub use route::{RouteDecision, RouteGuard};
pub use session::{AuthState, Clock, SessionGuard, SessionScope, DEFAULT_SWEEP_INTERVAL};
pub use storage::{FileStore, MemoryStore, SessionStore, StorageEvent, MARKER_KEY, TOKEN_KEY};
pub use token::Claims;
