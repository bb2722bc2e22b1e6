//! Access control for admin views.

use std::sync::Arc;

use tracing::debug;

use super::navigation::NavigationMode;
use super::session::{AuthState, SessionGuard};

/// What a protected view should do right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Initial validation still running; show a placeholder and decide later
    Placeholder,
    /// Not logged in; the navigator has already been sent here
    Redirect { to: String },
    Render,
}

/// Guards a protected view. Call `check` when the view mounts and again
/// whenever the session state changes.
#[derive(Clone)]
pub struct RouteGuard {
    session: Arc<SessionGuard>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionGuard>) -> Self {
        Self { session }
    }

    /// Re-derive the session from storage and decide.
    ///
    /// A stored token that has expired is logged out here even if the
    /// periodic sweep has not caught it yet. Redirects replace the current
    /// history entry.
    pub fn check(&self) -> RouteDecision {
        if self.session.is_loading() {
            return RouteDecision::Placeholder;
        }

        if self.session.token_expired() {
            debug!("Stale token on protected view, logging out");
            self.session.logout();
        } else {
            self.session.validate();
        }

        match self.session.state() {
            AuthState::Authenticated => RouteDecision::Render,
            AuthState::Loading | AuthState::Unauthenticated => {
                let to = self.session.routes().login_path().to_string();
                self.session.navigator().navigate(&to, NavigationMode::Replace);
                RouteDecision::Redirect { to }
            }
        }
    }
}
