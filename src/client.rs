//! Authenticated, multi-tenant HTTP client for the DEP API.
//!
//! `DepClient` pairs a `reqwest::Client` with a [`SessionManager`] and the
//! resolved [`ClientConfig`]. Every request names the configuration it runs
//! under; the client resolves that name's base URL, makes sure a session
//! token exists, and sends the operation with the method and path from the
//! configured endpoint table. Verbs are sent exactly as configured, so a
//! compatibility quirk such as assign-profile's `PUT` stays a config value.
//!
//! Expiry handling:
//! - A response matching one of the configured expiry rules invalidates the
//!   token that was sent, authenticates again, and reissues the request
//!   exactly once.
//! - A second expiry signal is returned as `DepError::Auth`. There is no
//!   third attempt.
//! - Nothing else is retried: transport failures, 4xx and 5xx responses all
//!   reach the caller on the first occurrence.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::config::{ClientConfig, Endpoint, Operation};
use crate::decode;
use crate::error::{DepError, Result};
use crate::session::{
    PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER, SESSION_HEADER, SessionManager, SessionToken,
};
use crate::store::CredentialStore;

/// Content type the DEP API documents for request bodies.
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF8";

/// Builds the shared `reqwest::Client` from configuration.
fn build_http_client(config: &ClientConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .build()?)
}

/// One completed HTTP exchange.
struct Attempt {
    token: SessionToken,
    status: StatusCode,
    body: Bytes,
}

/// Authenticated client for the DEP API, shared across configuration names.
///
/// Cloning is cheap: clones share the connection pool and session cache.
#[derive(Clone)]
pub struct DepClient {
    http: Client,
    config: Arc<ClientConfig>,
    sessions: SessionManager,
}

impl DepClient {
    /// Creates a client with its own HTTP connection pool.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = build_http_client(&config)?;
        Ok(Self::with_http_client(config, store, http))
    }

    /// Creates a client around an existing `reqwest::Client`, for callers
    /// that manage TLS, proxies or timeouts themselves.
    pub fn with_http_client(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: Client,
    ) -> Self {
        let config = Arc::new(config);
        let sessions = SessionManager::new(http.clone(), Arc::clone(&config), store);
        DepClient {
            http,
            config,
            sessions,
        }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The session manager backing this client.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Runs a logical operation for configuration `name` and decodes the
    /// response into `T`.
    ///
    /// `body` is serialized as JSON when present; operations that define no
    /// body pass `None` and nothing is sent.
    pub async fn execute<B, T>(
        &self,
        name: &str,
        op: Operation,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let endpoint = self.config.endpoints.get(op);
        self.execute_endpoint(name, &endpoint, query, body).await
    }

    /// Same as [`execute`](Self::execute) for an explicit method and path,
    /// for endpoints the operation table does not cover.
    pub async fn execute_endpoint<B, T>(
        &self,
        name: &str,
        endpoint: &Endpoint,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| DepError::Encode(Arc::new(e)))?
            .map(Bytes::from);

        let (status, response) = self.execute_raw(name, endpoint, query, payload).await?;
        decode::decode(name, status, &response, &self.config.expiry_rules)
    }

    /// Sends a request and returns the final status and raw body.
    ///
    /// The returned response is never an expiry signal: those are either
    /// recovered from with one re-authentication or turned into
    /// `DepError::Auth`.
    pub async fn execute_raw(
        &self,
        name: &str,
        endpoint: &Endpoint,
        query: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> Result<(StatusCode, Bytes)> {
        let url = format!("{}{}", self.config.base_url(name), endpoint.path);

        let first = self.attempt(name, endpoint, &url, query, body.clone()).await?;
        if !self.is_expired(&first) {
            return Ok((first.status, first.body));
        }

        debug!(
            config = %name,
            status = %first.status,
            "DEP session expired; re-authenticating once"
        );
        self.sessions.invalidate_token(name, &first.token).await?;

        let retry = self.attempt(name, endpoint, &url, query, body).await?;
        if self.is_expired(&retry) {
            self.sessions.invalidate_token(name, &retry.token).await?;
            return Err(DepError::Auth {
                name: name.to_string(),
                status: Some(retry.status),
                message: String::from_utf8_lossy(&retry.body).into_owned(),
            });
        }
        Ok((retry.status, retry.body))
    }

    fn is_expired(&self, attempt: &Attempt) -> bool {
        self.config
            .is_expiry_signal(attempt.status, &String::from_utf8_lossy(&attempt.body))
    }

    /// Ensures a session, sends one request, and adopts any rotated token.
    async fn attempt(
        &self,
        name: &str,
        endpoint: &Endpoint,
        url: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> Result<Attempt> {
        let token = self.sessions.ensure_session(name).await?;

        debug!(
            config = %name,
            method = %endpoint.method,
            path = %endpoint.path,
            "sending DEP request"
        );
        let response = self
            .build_request(endpoint, url, &token, query, body)
            .send()
            .await?;

        let status = response.status();
        let rotated = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(SessionToken::new);
        let body = response.bytes().await?;

        let attempt = Attempt {
            token,
            status,
            body,
        };
        if let Some(fresh) = rotated {
            if !self.is_expired(&attempt) {
                self.sessions.rotate(name, &attempt.token, fresh).await?;
            }
        }
        Ok(attempt)
    }

    /// Builds an authenticated request with an optional JSON body.
    fn build_request(
        &self,
        endpoint: &Endpoint,
        url: &str,
        token: &SessionToken,
        query: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(endpoint.method.clone(), url)
            .header(SESSION_HEADER, token.as_str())
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(payload) = body {
            req = req
                .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(payload);
        }
        req
    }
}
