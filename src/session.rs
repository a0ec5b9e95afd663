//! Per-configuration session tokens.
//!
//! `SessionManager` answers one question for the request executor: "give me
//! a usable session token for name X". It owns the token cache and performs
//! the `GET /session` handshake when no token is cached.
//!
//! Token lifecycle:
//! - Lazy: nothing happens until the first call for a name.
//! - Reactive expiry: the DEP API never says how long a token lives, so a
//!   cached token is used until the server rejects it. Rejection is detected
//!   by the executor, which then calls [`SessionManager::invalidate_token`].
//! - Rotation: the server may return a replacement token in the
//!   `X-ADM-Auth-Session` response header. [`SessionManager::rotate`] swaps
//!   it in only if the cache still holds the token that was sent.
//!
//! Concurrency:
//! - The cache and the in-flight map are `DashMap`s keyed by name. There is
//!   no lock spanning names, so a slow handshake for one tenant never delays
//!   another.
//! - Concurrent callers for the same uncached name share a single in-flight
//!   handshake. The handshake runs on its own task; a caller that is
//!   cancelled while waiting does not cancel it, and every remaining waiter
//!   receives its result.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::{Client, Method, header};
use serde::Deserialize;
use tokio::sync::{Notify, OnceCell};
use tracing::{Instrument, debug, debug_span, trace, warn};

use crate::config::ClientConfig;
use crate::decode;
use crate::error::{DepError, Result};
use crate::oauth::{self, Nonce};
use crate::store::CredentialStore;

/// Path of the DEP session handshake endpoint.
const SESSION_PATH: &str = "/session";

/// Header carrying the session token on requests and rotated tokens on
/// responses.
pub const SESSION_HEADER: &str = "X-ADM-Auth-Session";

/// Header selecting the DEP API protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "X-Server-Protocol-Version";

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "3";

/// A short-lived DEP session token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a raw token value.
    pub fn new(value: impl Into<String>) -> Self {
        SessionToken(value.into())
    }

    /// The raw token value, as sent in the session header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell tokens apart in test output without leaking them.
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "SessionToken({prefix}…)")
    }
}

/// Body of a successful `GET /session` response.
#[derive(Deserialize)]
struct SessionResponse {
    auth_session_token: String,
}

// ── In-flight handshake tracking ───────────────────────────────────────

type HandshakeResult = Result<SessionToken>;

/// Result slot shared by every caller waiting on one handshake.
struct InFlight {
    result: OnceCell<HandshakeResult>,
    notify: Notify,
}

impl InFlight {
    fn new() -> Self {
        InFlight {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: HandshakeResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> HandshakeResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            // Register interest before re-checking so a result published
            // between the two checks still wakes us.
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Owned by the handshake task. If the task goes away without reporting
/// (a panic, or its runtime shutting down) the waiters get an error instead
/// of waiting forever.
struct HandshakeGuard {
    inner: Arc<Inner>,
    name: String,
    state: Arc<InFlight>,
    armed: bool,
}

impl HandshakeGuard {
    fn complete(mut self, result: HandshakeResult) {
        self.armed = false;
        self.inner.finish(&self.name, &self.state, result);
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(config = %self.name, "DEP session handshake aborted before completing");
        let err = DepError::Auth {
            name: self.name.clone(),
            status: None,
            message: "session handshake was aborted before completing".to_string(),
        };
        self.inner.finish(&self.name, &self.state, Err(err));
    }
}

// ── SessionManager ─────────────────────────────────────────────────────

struct Inner {
    http: Client,
    config: Arc<ClientConfig>,
    store: Arc<dyn CredentialStore>,
    tokens: DashMap<String, SessionToken>,
    in_flight: DashMap<String, Arc<InFlight>>,
    /// Last token the server rejected per name. A store that has not yet
    /// caught up with an invalidation must not hand it back.
    rejected: DashMap<String, SessionToken>,
    handshakes: AtomicUsize,
}

/// Owns the session-token cache for every configuration name.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a manager that performs handshakes with `http`, resolves
    /// server URLs through `config`, and loads credentials from `store`.
    pub fn new(http: Client, config: Arc<ClientConfig>, store: Arc<dyn CredentialStore>) -> Self {
        SessionManager {
            inner: Arc::new(Inner {
                http,
                config,
                store,
                tokens: DashMap::new(),
                in_flight: DashMap::new(),
                rejected: DashMap::new(),
                handshakes: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the cached token for `name` without any I/O.
    pub fn cached(&self, name: &str) -> Option<SessionToken> {
        self.inner.tokens.get(name).map(|t| t.value().clone())
    }

    /// Number of `GET /session` handshakes sent by this manager.
    pub fn handshake_count(&self) -> usize {
        self.inner.handshakes.load(Ordering::SeqCst)
    }

    /// Returns a session token for `name`, authenticating if none is cached.
    ///
    /// # Errors
    ///
    /// - `DepError::ConfigNotFound`: empty name, or no credentials stored.
    /// - `DepError::Store`: the credential store failed.
    /// - `DepError::Auth`: the handshake was rejected (4xx).
    /// - `DepError::Transport`: the handshake never got a response.
    /// - `DepError::Server` / `Protocol` / `Unknown`: the handshake response
    ///   was unusable.
    pub async fn ensure_session(&self, name: &str) -> Result<SessionToken> {
        if name.is_empty() {
            return Err(DepError::ConfigNotFound {
                name: String::new(),
            });
        }
        if let Some(token) = self.cached(name) {
            return Ok(token);
        }

        let (state, is_leader) = self.inner.join_or_start(name);
        if is_leader {
            // A handshake that finished between our cache miss and claiming
            // the in-flight slot has already populated the cache.
            if let Some(token) = self.cached(name) {
                self.inner.finish(name, &state, Ok(token));
            } else {
                let guard = HandshakeGuard {
                    inner: Arc::clone(&self.inner),
                    name: name.to_string(),
                    state: Arc::clone(&state),
                    armed: true,
                };
                let span = debug_span!("dep_session", config = %name);
                tokio::spawn(
                    async move {
                        let result = guard.inner.establish(&guard.name).await;
                        guard.complete(result);
                    }
                    .instrument(span),
                );
            }
        } else {
            trace!(config = %name, "joining in-flight DEP handshake");
        }

        state.wait().await
    }

    /// Drops the cached token for `name` unconditionally, along with any
    /// persisted copy. The next [`ensure_session`](Self::ensure_session)
    /// re-authenticates.
    pub async fn invalidate(&self, name: &str) -> Result<()> {
        if let Some((_, stale)) = self.inner.tokens.remove(name) {
            self.inner.rejected.insert(name.to_string(), stale);
        }
        self.inner.store.remove_session(name).await
    }

    /// Drops the cached token for `name` only if it is still `stale`.
    ///
    /// Used after the server rejects `stale`: if another request already
    /// replaced it with a fresh token, the fresh one is kept.
    pub async fn invalidate_token(&self, name: &str, stale: &SessionToken) -> Result<()> {
        let removed = self
            .inner
            .tokens
            .remove_if(name, |_, current| current == stale)
            .is_some();
        self.inner.rejected.insert(name.to_string(), stale.clone());
        debug!(config = %name, removed, "DEP session token rejected by server");

        self.inner.store.remove_session_if(name, stale).await?;
        Ok(())
    }

    /// Adopts a token the server rotated in, if the cache still holds the
    /// token that was sent. Returns `true` if the cache was updated.
    pub async fn rotate(&self, name: &str, sent: &SessionToken, fresh: SessionToken) -> Result<bool> {
        if sent == &fresh {
            return Ok(false);
        }
        let swapped = match self.inner.tokens.get_mut(name) {
            Some(mut current) if current.value() == sent => {
                *current = fresh.clone();
                true
            }
            _ => false,
        };
        if swapped {
            trace!(config = %name, "DEP session token rotated by server");
            self.inner.store.put_session(name, &fresh).await?;
        }
        Ok(swapped)
    }
}

impl Inner {
    /// Returns the in-flight slot for `name` and whether the caller created
    /// it (and therefore must start the handshake).
    fn join_or_start(&self, name: &str) -> (Arc<InFlight>, bool) {
        match self.in_flight.entry(name.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let state = Arc::new(InFlight::new());
                entry.insert(Arc::clone(&state));
                (state, true)
            }
        }
    }

    /// Publishes a handshake result: caches the token first, then retires
    /// the in-flight slot, then wakes the waiters.
    fn finish(&self, name: &str, state: &Arc<InFlight>, result: HandshakeResult) {
        if let Ok(token) = &result {
            self.tokens.insert(name.to_string(), token.clone());
        }
        self.in_flight
            .remove_if(name, |_, current| Arc::ptr_eq(current, state));
        state.set_result(result);
    }

    /// Reuses a persisted session or performs a fresh handshake.
    async fn establish(&self, name: &str) -> Result<SessionToken> {
        if let Some(stored) = self.store.session(name).await? {
            let rejected = self
                .rejected
                .get(name)
                .is_some_and(|r| r.value() == &stored);
            if !rejected {
                debug!(config = %name, "reusing persisted DEP session");
                return Ok(stored);
            }
        }

        let creds = self
            .store
            .credentials(name)
            .await?
            .ok_or_else(|| DepError::ConfigNotFound {
                name: name.to_string(),
            })?;

        let url = format!("{}{}", self.config.base_url(name), SESSION_PATH);
        let authorization =
            oauth::authorization_header(&creds, &Method::GET, &url, &[], &Nonce::generate())
                .map_err(|e| DepError::Auth {
                    name: name.to_string(),
                    status: None,
                    message: format!("failed to sign session request: {e}"),
                })?;

        self.handshakes.fetch_add(1, Ordering::SeqCst);
        debug!(config = %name, %url, "starting DEP session handshake");

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, authorization)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        // Any 4xx here means the OAuth material itself was refused.
        if status.is_client_error() {
            return Err(DepError::Auth {
                name: name.to_string(),
                status: Some(status),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let session: SessionResponse = decode::decode(name, status, &body, &[])?;
        if session.auth_session_token.is_empty() {
            return Err(DepError::Auth {
                name: name.to_string(),
                status: Some(status),
                message: "session response carried an empty token".to_string(),
            });
        }

        let token = SessionToken::new(session.auth_session_token);
        self.store.put_session(name, &token).await?;
        self.rejected.remove(name);
        debug!(config = %name, "DEP session established");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::oauth::Credentials;
    use crate::store::MemoryStore;

    fn manager_with(store: MemoryStore) -> SessionManager {
        SessionManager::new(
            Client::new(),
            Arc::new(ClientConfig::default().with_server("acme", "http://127.0.0.1:9")),
            Arc::new(store),
        )
    }

    fn creds() -> Credentials {
        Credentials {
            consumer_key: "CK".to_string(),
            consumer_secret: "CS".to_string(),
            access_token: "AT".to_string(),
            access_secret: "AS".to_string(),
            access_token_expiry: None,
        }
    }

    #[test]
    fn token_debug_does_not_leak_full_value() {
        let token = SessionToken::new("1413412341234123412");
        assert_eq!(format!("{token:?}"), "SessionToken(1413…)");
    }

    #[tokio::test]
    async fn empty_name_is_config_not_found() {
        let manager = manager_with(MemoryStore::new());
        let err = manager.ensure_session("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(manager.handshake_count(), 0);
    }

    #[tokio::test]
    async fn unknown_name_is_config_not_found_without_handshake() {
        let manager = manager_with(MemoryStore::new());
        let err = manager.ensure_session("globex").await.unwrap_err();
        assert!(matches!(err, DepError::ConfigNotFound { ref name } if name == "globex"));
        assert_eq!(manager.handshake_count(), 0);
    }

    #[tokio::test]
    async fn persisted_session_is_reused_without_handshake() {
        let store = MemoryStore::new().with_credentials("acme", creds());
        store
            .put_session("acme", &SessionToken::new("persisted"))
            .await
            .unwrap();
        let manager = manager_with(store);

        let token = manager.ensure_session("acme").await.unwrap();
        assert_eq!(token.as_str(), "persisted");
        assert_eq!(manager.cached("acme"), Some(token));
        assert_eq!(manager.handshake_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_token_keeps_a_newer_token() {
        let store = MemoryStore::new().with_credentials("acme", creds());
        store
            .put_session("acme", &SessionToken::new("fresh"))
            .await
            .unwrap();
        let manager = manager_with(store);
        manager.ensure_session("acme").await.unwrap();

        manager
            .invalidate_token("acme", &SessionToken::new("stale"))
            .await
            .unwrap();
        assert_eq!(manager.cached("acme"), Some(SessionToken::new("fresh")));

        manager
            .invalidate_token("acme", &SessionToken::new("fresh"))
            .await
            .unwrap();
        assert_eq!(manager.cached("acme"), None);
    }

    #[tokio::test]
    async fn invalidate_drops_cache_and_persisted_copy() {
        let store = Arc::new(MemoryStore::new().with_credentials("acme", creds()));
        store
            .put_session("acme", &SessionToken::new("tok"))
            .await
            .unwrap();
        let manager = SessionManager::new(
            Client::new(),
            Arc::new(ClientConfig::default()),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
        );
        manager.ensure_session("acme").await.unwrap();

        manager.invalidate("acme").await.unwrap();
        assert!(manager.cached("acme").is_none());
        assert!(store.session("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_only_replaces_the_token_that_was_sent() {
        let store = MemoryStore::new().with_credentials("acme", creds());
        store
            .put_session("acme", &SessionToken::new("t1"))
            .await
            .unwrap();
        let manager = manager_with(store);
        manager.ensure_session("acme").await.unwrap();

        let swapped = manager
            .rotate("acme", &SessionToken::new("other"), SessionToken::new("t2"))
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(manager.cached("acme"), Some(SessionToken::new("t1")));

        let swapped = manager
            .rotate("acme", &SessionToken::new("t1"), SessionToken::new("t2"))
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(manager.cached("acme"), Some(SessionToken::new("t2")));
    }

    #[tokio::test]
    async fn dropped_handshake_task_fails_waiters_and_frees_the_slot() {
        let manager = manager_with(MemoryStore::new().with_credentials("acme", creds()));
        let (state, is_leader) = manager.inner.join_or_start("acme");
        assert!(is_leader);

        // What a runtime shutdown does to a pending handshake task.
        drop(HandshakeGuard {
            inner: Arc::clone(&manager.inner),
            name: "acme".to_string(),
            state: Arc::clone(&state),
            armed: true,
        });

        let err = state.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!manager.inner.in_flight.contains_key("acme"));
        assert!(manager.cached("acme").is_none());
    }

    #[tokio::test]
    async fn invalidate_token_keeps_a_fresher_persisted_session() {
        let store = Arc::new(MemoryStore::new().with_credentials("acme", creds()));
        let manager = SessionManager::new(
            Client::new(),
            Arc::new(ClientConfig::default()),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
        );
        store
            .put_session("acme", &SessionToken::new("fresh"))
            .await
            .unwrap();

        manager
            .invalidate_token("acme", &SessionToken::new("stale"))
            .await
            .unwrap();
        assert_eq!(
            store.session("acme").await.unwrap(),
            Some(SessionToken::new("fresh"))
        );
    }

    #[tokio::test]
    async fn in_flight_wait_returns_published_result() {
        let state = Arc::new(InFlight::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait().await })
        };
        tokio::task::yield_now().await;
        state.set_result(Ok(SessionToken::new("abc")));
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.as_str(), "abc");
        // Late arrivals see the stored result immediately.
        assert_eq!(state.wait().await.unwrap().as_str(), "abc");
    }
}
