//! Terminal stand-in for the admin UI's router.

use std::sync::{Mutex, PoisonError};

use hallpass_core::auth::{AdminRoutes, NavigationMode, Navigator};
use tracing::info;

/// Tracks the "view" a command runs in and tells the user when the session
/// sends them back to the login view.
pub struct TerminalNavigator {
    current: Mutex<String>,
    routes: AdminRoutes,
}

impl TerminalNavigator {
    pub fn new(initial_path: &str, routes: AdminRoutes) -> Self {
        Self {
            current: Mutex::new(initial_path.to_string()),
            routes,
        }
    }
}

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn navigate(&self, path: &str, mode: NavigationMode) {
        info!(path, ?mode, "Navigating");
        if mode == NavigationMode::Reload && self.routes.is_login(path) {
            eprintln!("Your session has ended. Run `hallpass login` to sign in again.");
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
    }
}
