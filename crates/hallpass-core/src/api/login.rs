//! Login response handling.
//!
//! Different deployments of the admin API have named the token field
//! differently, so extraction walks a fixed list of field locations.

use serde::Serialize;
use serde_json::Value;

use super::error::LoginError;

/// Message shown when the server rejects a login without saying why
pub const DEFAULT_LOGIN_FAILURE: &str = "Invalid email or password";

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Where a bearer token may appear in a login response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    /// `token`
    Token,
    /// `accessToken`
    AccessToken,
    /// `access_token`
    AccessTokenSnake,
    /// `data.token`
    DataToken,
}

/// Extraction order; the first non-empty match wins.
pub const TOKEN_FIELDS: [TokenField; 4] = [
    TokenField::Token,
    TokenField::AccessToken,
    TokenField::AccessTokenSnake,
    TokenField::DataToken,
];

impl TokenField {
    fn path(self) -> &'static [&'static str] {
        match self {
            TokenField::Token => &["token"],
            TokenField::AccessToken => &["accessToken"],
            TokenField::AccessTokenSnake => &["access_token"],
            TokenField::DataToken => &["data", "token"],
        }
    }

    pub fn extract(self, body: &Value) -> Option<&str> {
        let mut node = body;
        for key in self.path() {
            node = node.get(key)?;
        }
        node.as_str().filter(|token| !token.is_empty())
    }
}

pub fn extract_token(body: &Value) -> Option<&str> {
    TOKEN_FIELDS.iter().find_map(|field| field.extract(body))
}

/// Turn a login response into a token.
///
/// Success requires a 2xx status and `"success": true`; anything else is a
/// rejection carrying the server's `message` when it sent one.
pub(crate) fn parse_login_response(http_ok: bool, body: &Value) -> Result<String, LoginError> {
    let accepted = http_ok && body.get("success").and_then(Value::as_bool) == Some(true);
    if !accepted {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_LOGIN_FAILURE);
        return Err(LoginError::Rejected(message.to_string()));
    }

    extract_token(body)
        .map(str::to_string)
        .ok_or(LoginError::MissingToken)
}
