//! Response interceptors registered on an `ApiClient`.
//!
//! An interceptor sees the request URL and response status of every call
//! that produced a response. It runs before the response is handed back to
//! the caller and cannot alter it.

use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::StatusCode;
use url::Url;

pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, url: &Url, status: StatusCode);
}

type UnauthorizedHandler = Box<dyn Fn(&Url) + Send + Sync>;

/// Runs a handler when a request under the API base comes back 401.
///
/// Disarming turns the interceptor into a pass-through for every client
/// clone that still holds it.
pub struct UnauthorizedInterceptor {
    api_base: Url,
    on_unauthorized: UnauthorizedHandler,
    armed: AtomicBool,
}

impl UnauthorizedInterceptor {
    pub fn new(api_base: Url, on_unauthorized: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        Self {
            api_base,
            on_unauthorized: Box::new(on_unauthorized),
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl ResponseInterceptor for UnauthorizedInterceptor {
    fn on_response(&self, url: &Url, status: StatusCode) {
        if status == StatusCode::UNAUTHORIZED
            && self.is_armed()
            && targets_base(url, &self.api_base)
        {
            (self.on_unauthorized)(url);
        }
    }
}

/// Same origin as `base`, and a path at or below the base path.
pub fn targets_base(url: &Url, base: &Url) -> bool {
    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port_or_known_default() != base.port_or_known_default()
    {
        return false;
    }

    let base_path = base.path().trim_end_matches('/');
    if base_path.is_empty() {
        return true;
    }
    match url.path().strip_prefix(base_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_targets_base() {
        let base = url("http://localhost:5000/api/");
        assert!(targets_base(&url("http://localhost:5000/api/contacts"), &base));
        assert!(targets_base(&url("http://localhost:5000/api"), &base));
        assert!(targets_base(&url("http://localhost:5000/api/admin/login?x=1"), &base));

        assert!(!targets_base(&url("http://localhost:5000/apix/contacts"), &base));
        assert!(!targets_base(&url("http://localhost:5000/static/app.js"), &base));
        assert!(!targets_base(&url("http://localhost:5001/api/contacts"), &base));
        assert!(!targets_base(&url("https://localhost:5000/api/contacts"), &base));
        assert!(!targets_base(&url("http://cdn.example.org/api/contacts"), &base));
    }

    #[test]
    fn test_root_base_matches_whole_origin() {
        let base = url("https://api.example.org");
        assert!(targets_base(&url("https://api.example.org/contacts"), &base));
        assert!(targets_base(&url("https://api.example.org:443/x"), &base));
        assert!(!targets_base(&url("https://example.org/contacts"), &base));
    }

    #[test]
    fn test_only_401_under_base_triggers_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let interceptor = UnauthorizedInterceptor::new(url("http://localhost:5000/api/"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        interceptor.on_response(&url("http://localhost:5000/api/contacts"), StatusCode::OK);
        interceptor.on_response(&url("http://localhost:5000/api/contacts"), StatusCode::FORBIDDEN);
        interceptor.on_response(&url("http://elsewhere.org/api/contacts"), StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        interceptor.on_response(&url("http://localhost:5000/api/contacts"), StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        interceptor.disarm();
        interceptor.on_response(&url("http://localhost:5000/api/contacts"), StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!interceptor.is_armed());
    }
}
