use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum length of a contact message, after trimming
const MIN_MESSAGE_LENGTH: usize = 10;

/// Message left through the public contact form, as the admin sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMessage {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ContactMessage {
    pub fn subject_display(&self) -> &str {
        self.subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("(no subject)")
    }
}

/// Contact form contents as submitted by a visitor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    #[error("Name is required")]
    MissingName,

    #[error("Email is required")]
    MissingEmail,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Message must be at least {0} characters")]
    MessageTooShort(usize),
}

impl ContactSubmission {
    /// Check every field, reporting all problems at once so a form can
    /// flag each of them.
    pub fn validate(&self) -> Result<(), Vec<ContactValidationError>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ContactValidationError::MissingName);
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.push(ContactValidationError::MissingEmail);
        } else if !is_valid_email(email) {
            errors.push(ContactValidationError::InvalidEmail);
        }

        if self.message.trim().chars().count() < MIN_MESSAGE_LENGTH {
            errors.push(ContactValidationError::MessageTooShort(MIN_MESSAGE_LENGTH));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Copy with surrounding whitespace removed and a blank subject dropped
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            subject: self
                .subject
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            message: self.message.trim().to_string(),
        }
    }
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
