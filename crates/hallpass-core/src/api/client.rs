//! API client for the community site's admin REST API.
//!
//! This module provides the `ApiClient` struct for logging in and for the
//! contact-message endpoints. Every request goes through `execute`, which
//! is where a registered `ResponseInterceptor` sees the outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::storage::{SessionStore, TOKEN_KEY};
use crate::models::{ContactMessage, ContactSubmission};

use super::error::{ApiError, LoginError};
use super::interceptor::ResponseInterceptor;
use super::login::{parse_login_response, LoginRequest};

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint, relative to the API base
const LOGIN_ENDPOINT: &str = "admin/login";

/// Contact messages collection, relative to the API base
const CONTACTS_ENDPOINT: &str = "contacts";

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Response wrapper used by the contacts endpoints
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("Response is missing data".to_string()))
    }
}

/// API client for the admin back-office.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token_source: Option<Arc<dyn SessionStore>>,
    interceptor: Option<Arc<dyn ResponseInterceptor>>,
}

impl ApiClient {
    /// Create a client for the API rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token_source: None,
            interceptor: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Clone that reads the bearer token from `store` on every request,
    /// sharing the connection pool.
    pub fn with_token_source(&self, store: Arc<dyn SessionStore>) -> Self {
        Self {
            token_source: Some(store),
            ..self.clone()
        }
    }

    /// Clone whose responses are shown to `interceptor` before being returned.
    pub fn with_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        Self {
            interceptor: Some(interceptor),
            ..self.clone()
        }
    }

    /// Resolve a path relative to the API base
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn contact_url(&self, id: &str, action: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.endpoint(CONTACTS_ENDPOINT)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ApiError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segments.push(id);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    fn bearer_token(&self) -> Option<String> {
        let store = self.token_source.as_ref()?;
        match store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Could not read token for request");
                None
            }
        }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match self.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request through the interceptor chain.
    ///
    /// Interceptors run for every response, whatever its status, before the
    /// response is returned. Transport errors skip them and propagate as-is.
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let url = request.url().clone();
        let method = request.method().clone();

        let response = self.client.execute(request).await?;
        debug!(%method, %url, status = %response.status(), "API response");

        if let Some(ref interceptor) = self.interceptor {
            interceptor.on_response(&url, response.status());
        }
        Ok(response)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let request = self.request(Method::GET, url.clone()).build()?;
            let response = self.execute(request).await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(%url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let response = Self::check_response(response).await?;
            return response.json().await.map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
            });
        }
    }

    /// Send a mutation and check the acknowledgement.
    /// An empty body (e.g. 204) counts as success.
    async fn send_ack(&self, method: Method, url: Url, body: Option<&Value>) -> Result<(), ApiError> {
        let mut builder = self.request(method, url.clone());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.execute(builder.build()?).await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(());
        }
        let envelope: Envelope<Value> = serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })?;
        if envelope.success {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ))
        }
    }

    // ===== Authentication =====

    /// Exchange admin credentials for a bearer token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<String, LoginError> {
        let response = match self.send_login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Login request failed");
                return Err(LoginError::Network(e.to_string()));
            }
        };

        let http_ok = response.status().is_success();
        let body: Value = response.json().await.unwrap_or_else(|e| {
            debug!(error = %e, "Login response body was not JSON");
            Value::Null
        });

        let result = parse_login_response(http_ok, &body);
        match result {
            Ok(_) => info!(email, "Login accepted"),
            Err(ref e) => warn!(email, error = %e, "Login rejected"),
        }
        result
    }

    async fn send_login(&self, email: &str, password: &str) -> Result<Response, ApiError> {
        let url = self.endpoint(LOGIN_ENDPOINT)?;
        let request = self
            .request(Method::POST, url)
            .json(&LoginRequest { email, password })
            .build()?;
        self.execute(request).await
    }

    // ===== Contact Messages =====

    /// Submit the public contact form
    pub async fn submit_contact(&self, submission: &ContactSubmission) -> Result<(), ApiError> {
        let url = self.endpoint(CONTACTS_ENDPOINT)?;
        let body = serde_json::to_value(submission)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode contact form: {}", e)))?;
        self.send_ack(Method::POST, url, Some(&body)).await
    }

    /// Fetch every contact message (admin only)
    pub async fn list_contacts(&self) -> Result<Vec<ContactMessage>, ApiError> {
        let url = self.endpoint(CONTACTS_ENDPOINT)?;
        let envelope: Envelope<Vec<ContactMessage>> = self.get(url).await?;
        envelope.into_data()
    }

    pub async fn mark_contact_read(&self, id: &str) -> Result<(), ApiError> {
        let url = self.contact_url(id, Some("read"))?;
        self.send_ack(Method::PATCH, url, None).await
    }

    pub async fn delete_contact(&self, id: &str) -> Result<(), ApiError> {
        let url = self.contact_url(id, None)?;
        self.send_ack(Method::DELETE, url, None).await
    }
}

/// Parse the base URL and give it a trailing slash so relative joins keep
/// its path.
fn normalize_base(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())
        .with_context(|| format!("Invalid API base URL: {}", base_url))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("API base URL cannot have relative paths: {}", base_url);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
