//! View navigation seam used for redirects after logout.

use std::sync::{Mutex, PoisonError};

/// How a navigation replaces the current view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// Replace the current history entry
    Replace,
    /// Full navigation, discarding in-memory view state
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub path: String,
    pub mode: NavigationMode,
}

/// Whatever presents views to the admin: a router, a terminal, a test double.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, path: &str, mode: NavigationMode);
}

/// Route layout of the admin area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRoutes {
    prefix: String,
    login_path: String,
}

impl AdminRoutes {
    pub fn new(prefix: &str, login_path: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            prefix: if prefix.is_empty() { "/".to_string() } else { prefix.to_string() },
            login_path: login_path.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Whether a path (query and fragment ignored) falls under the admin area.
    /// `/admin` and `/admin/news` match, `/administrators` does not.
    pub fn contains(&self, path: &str) -> bool {
        let path = strip_query(path);
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn is_login(&self, path: &str) -> bool {
        strip_query(path).trim_end_matches('/') == self.login_path.trim_end_matches('/')
    }
}

impl Default for AdminRoutes {
    fn default() -> Self {
        Self::new("/admin", "/admin/login")
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Navigator that only records where it was sent.
pub struct MemoryNavigator {
    current: Mutex<String>,
    history: Mutex<Vec<Navigation>>,
}

impl MemoryNavigator {
    pub fn new(initial_path: &str) -> Self {
        Self {
            current: Mutex::new(initial_path.to_string()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every navigation so far, oldest first
    pub fn history(&self) -> Vec<Navigation> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count of navigations to `path` made with `mode`
    pub fn count(&self, path: &str, mode: NavigationMode) -> usize {
        self.history()
            .iter()
            .filter(|n| n.path == path && n.mode == mode)
            .count()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn navigate(&self, path: &str, mode: NavigationMode) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Navigation {
                path: path.to_string(),
                mode,
            });
    }
}
