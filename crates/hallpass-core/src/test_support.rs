//! Helpers shared by unit tests across modules.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::auth::{AdminRoutes, MemoryNavigator, MemoryStore, Navigator, SessionGuard, SessionStore};

/// Build an unsigned token carrying the given payload
pub fn token_with_payload(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

/// Token whose `exp` lies `seconds` from now (negative for the past)
pub fn token_expiring_in(seconds: i64) -> String {
    token_with_payload(&json!({
        "exp": Utc::now().timestamp() + seconds,
        "email": "admin@example.org",
    }))
}

/// A guard over fresh in-memory collaborators, not yet started.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<MemoryNavigator>,
    pub guard: SessionGuard,
}

pub fn fixture(api_base: &str, current_path: &str) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    fixture_with_store(api_base, current_path, store)
}

pub fn fixture_with_store(api_base: &str, current_path: &str, store: Arc<MemoryStore>) -> Fixture {
    let navigator = Arc::new(MemoryNavigator::new(current_path));
    let api = ApiClient::new(api_base, std::time::Duration::from_secs(5))
        .expect("test API client should build");
    let guard = SessionGuard::new(
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&navigator) as Arc<dyn Navigator>,
        AdminRoutes::default(),
        api,
    );
    Fixture {
        store,
        navigator,
        guard,
    }
}
