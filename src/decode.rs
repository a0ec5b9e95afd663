//! Response classification: turns a status code and body into either the
//! operation's typed value or a [`DepError`].
//!
//! | Status | Outcome |
//! |--------|---------|
//! | 2xx, body decodes | `Ok(T)` |
//! | 2xx, body does not decode | `Protocol` |
//! | matches an expiry rule | `Auth` |
//! | 404 | `NotFound` |
//! | other 4xx | `Validation` |
//! | 5xx | `Server` |
//! | anything else | `Unknown` |
//!
//! Batch endpoints report per-device outcomes inside a 2xx body; those are
//! successful values and are never turned into errors here.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::ExpiryRule;
use crate::error::{DepError, Result};

/// Decodes a response for configuration `name`.
///
/// An empty 2xx body is decoded as JSON `null`, so operations whose response
/// type is `()` or `Option<_>` succeed on `204 No Content`.
pub fn decode<T: DeserializeOwned>(
    name: &str,
    status: StatusCode,
    body: &[u8],
    expiry_rules: &[ExpiryRule],
) -> Result<T> {
    if status.is_success() {
        let payload: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            body
        };
        return serde_json::from_slice(payload).map_err(|e| DepError::Protocol {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
            source: Arc::new(e),
        });
    }

    let text = String::from_utf8_lossy(body).into_owned();
    if expiry_rules.iter().any(|rule| rule.matches(status, &text)) {
        return Err(DepError::Auth {
            name: name.to_string(),
            status: Some(status),
            message: text,
        });
    }
    Err(error_for_status(status, text))
}

/// Maps a non-success, non-expiry response to its error variant.
pub fn error_for_status(status: StatusCode, body: String) -> DepError {
    if status == StatusCode::NOT_FOUND {
        DepError::NotFound {
            status,
            code: error_code(&body),
            body,
        }
    } else if status.is_client_error() {
        DepError::Validation {
            status,
            code: error_code(&body),
            body,
        }
    } else if status.is_server_error() {
        DepError::Server { status, body }
    } else {
        DepError::Unknown { status, body }
    }
}

/// Extracts Apple's error code from a response body.
///
/// The DEP API usually answers with a bare code (`INVALID_PROFILE`), some
/// servers wrap it in JSON quotes, and a few return an object with a `code`
/// or `error` field. Anything else yields `None`; the raw body is always
/// kept on the error regardless.
pub fn error_code(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidate = match &value {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Object(map) => map
                .get("code")
                .or_else(|| map.get("error"))
                .and_then(serde_json::Value::as_str),
            _ => None,
        };
        return candidate.filter(|c| is_code(c)).map(str::to_owned);
    }

    is_code(trimmed).then(|| trimmed.to_string())
}

fn is_code(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
