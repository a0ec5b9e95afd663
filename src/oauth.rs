//! OAuth 1.0a request signing for the DEP session handshake.
//!
//! The DEP API hands out session tokens from `GET /session`, which must carry
//! an OAuth 1.0a `Authorization` header signed with HMAC-SHA1 using the
//! server token material downloaded from Apple Business/School Manager.
//! Only the handshake is OAuth-signed; every other call authenticates with
//! the resulting session token.
//!
//! Signing follows RFC 5849 §3.4: parameters are percent-encoded with the
//! RFC 3986 unreserved set, sorted, joined into the signature base string,
//! and signed with `enc(consumer_secret)&enc(access_secret)`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Realm Apple expects in the DEP `Authorization` header.
const REALM: &str = "ADM";

const SIGNATURE_METHOD: &str = "HMAC-SHA1";

const OAUTH_VERSION: &str = "1.0";

const NONCE_LEN: usize = 32;

/// Long-lived OAuth 1.0a token material for one DEP configuration.
///
/// Field names match the JSON Apple produces when the server token file is
/// decrypted, so a stored token file deserializes directly.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// OAuth consumer key (`CK_...`).
    pub consumer_key: String,
    /// OAuth consumer secret (`CS_...`).
    pub consumer_secret: String,
    /// OAuth access token (`AT_...`).
    pub access_token: String,
    /// OAuth access token secret (`AS_...`).
    pub access_secret: String,
    /// When Apple says the access token expires. Informational only; the
    /// client never acts on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expiry: Option<String>,
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &self.access_token)
            .field("access_secret", &"<redacted>")
            .field("access_token_expiry", &self.access_token_expiry)
            .finish()
    }
}

/// Per-request OAuth values that must be unique for each signature.
#[derive(Debug, Clone)]
pub struct Nonce {
    /// Random string, unique per request.
    pub nonce: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Nonce {
    /// Generates a fresh nonce stamped with the current time.
    pub fn generate() -> Self {
        let nonce = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Nonce { nonce, timestamp }
    }
}

/// Builds the `Authorization` header value for a request.
///
/// `url` must not contain a query string; query or form parameters that
/// take part in the signature go in `extra_params`.
pub fn authorization_header(
    creds: &Credentials,
    method: &Method,
    url: &str,
    extra_params: &[(&str, &str)],
    nonce: &Nonce,
) -> Result<String, InvalidLength> {
    let timestamp = nonce.timestamp.to_string();
    let oauth_params = [
        ("oauth_consumer_key", creds.consumer_key.as_str()),
        ("oauth_nonce", nonce.nonce.as_str()),
        ("oauth_signature_method", SIGNATURE_METHOD),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", creds.access_token.as_str()),
        ("oauth_version", OAUTH_VERSION),
    ];

    let mut all_params: Vec<(&str, &str)> = oauth_params.to_vec();
    all_params.extend_from_slice(extra_params);

    let base = signature_base_string(method, url, &all_params);
    let signature = sign(&creds.consumer_secret, &creds.access_secret, &base)?;

    let mut header = format!("OAuth realm=\"{REALM}\"");
    for (key, value) in oauth_params {
        header.push_str(&format!(", {key}=\"{}\"", encode(value)));
    }
    header.push_str(&format!(", oauth_signature=\"{}\"", encode(&signature)));
    Ok(header)
}

/// RFC 3986 percent-encoding as required by RFC 5849 §3.6.
fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Builds the RFC 5849 §3.4.1 signature base string.
fn signature_base_string(method: &Method, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> =
        params.iter().map(|(k, v)| (encode(k), encode(v))).collect();
    encoded.sort();

    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.as_str(),
        encode(url),
        encode(&normalized)
    )
}

fn sign(consumer_secret: &str, token_secret: &str, base: &str) -> Result<String, InvalidLength> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key.as_bytes())?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
