//! Credential storage behind a swappable key-value contract.
//!
//! The client only needs a few things from storage, all keyed by
//! configuration name: the long-lived OAuth [`Credentials`], and get / put /
//! remove (plain or compare-and-remove) of the last known [`SessionToken`]. Any backend that is
//! linearizable per key satisfies the contract.
//!
//! Two backends ship with the crate:
//! - [`MemoryStore`]: process-local, for embedding and tests.
//! - [`FileStore`]: one JSON document per name in a directory, so session
//!   tokens survive process restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{DepError, Result};
use crate::oauth::Credentials;
use crate::session::SessionToken;

/// Storage contract consumed by the session manager.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the OAuth credentials for `name`, or `None` if the name is
    /// not configured.
    async fn credentials(&self, name: &str) -> Result<Option<Credentials>>;

    /// Returns the last stored session token for `name`, if any.
    async fn session(&self, name: &str) -> Result<Option<SessionToken>>;

    /// Stores a newly obtained session token for `name`.
    async fn put_session(&self, name: &str, token: &SessionToken) -> Result<()>;

    /// Forgets the stored session token for `name`. Removing a token that
    /// does not exist is not an error.
    async fn remove_session(&self, name: &str) -> Result<()>;

    /// Forgets the stored session token for `name` only if it is still
    /// `expected`. Returns `true` if a token was removed.
    ///
    /// The default implementation reads then removes. Backends that can do
    /// the comparison and the removal atomically should override it, so a
    /// fresh token stored in between is never lost.
    async fn remove_session_if(&self, name: &str, expected: &SessionToken) -> Result<bool> {
        if self.session(name).await?.as_ref() == Some(expected) {
            self.remove_session(name).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

// ── MemoryStore ────────────────────────────────────────────────────────

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: DashMap<String, Credentials>,
    sessions: DashMap<String, SessionToken>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`MemoryStore::insert_credentials`].
    pub fn with_credentials(self, name: impl Into<String>, creds: Credentials) -> Self {
        self.insert_credentials(name, creds);
        self
    }

    /// Adds or replaces the credentials for `name`.
    pub fn insert_credentials(&self, name: impl Into<String>, creds: Credentials) {
        self.credentials.insert(name.into(), creds);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn credentials(&self, name: &str) -> Result<Option<Credentials>> {
        Ok(self.credentials.get(name).map(|c| c.value().clone()))
    }

    async fn session(&self, name: &str) -> Result<Option<SessionToken>> {
        Ok(self.sessions.get(name).map(|t| t.value().clone()))
    }

    async fn put_session(&self, name: &str, token: &SessionToken) -> Result<()> {
        self.sessions.insert(name.to_string(), token.clone());
        Ok(())
    }

    async fn remove_session(&self, name: &str) -> Result<()> {
        self.sessions.remove(name);
        Ok(())
    }

    async fn remove_session_if(&self, name: &str, expected: &SessionToken) -> Result<bool> {
        Ok(self
            .sessions
            .remove_if(name, |_, current| current == expected)
            .is_some())
    }
}

// ── FileStore ──────────────────────────────────────────────────────────

/// On-disk document for one configuration name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<String>,
}

/// Directory-backed credential store: `<dir>/<name>.json`.
///
/// Read-modify-write cycles are serialized per name; different names never
/// wait on each other. Writes go through a temporary file and a rename so a
/// crash never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore {
            dir: dir.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Root directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes (or replaces) the credentials for `name`, keeping any stored
    /// session token.
    pub async fn put_credentials(&self, name: &str, creds: &Credentials) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let path = self.entry_path(name)?;
        let session = self.read_entry(&path).await?.and_then(|e| e.session);
        let entry = StoredEntry {
            credentials: creds.clone(),
            session,
        };
        self.write_entry(&path, &entry).await
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains('\0')
        {
            return Err(DepError::Store {
                message: format!("configuration name {name:?} cannot be used as a file name"),
                source: None,
            });
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<StoredEntry>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DepError::store(
                    format!("failed to read {}", path.display()),
                    e,
                ));
            }
        };
        let entry = serde_json::from_str(&contents).map_err(|e| {
            DepError::store(format!("failed to parse {}", path.display()), e)
        })?;
        Ok(Some(entry))
    }

    async fn write_entry(&self, path: &Path, entry: &StoredEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            DepError::store(format!("failed to create {}", self.dir.display()), e)
        })?;

        let contents = serde_json::to_vec_pretty(entry)
            .map_err(|e| DepError::store("failed to serialize store entry", e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| DepError::store(format!("failed to write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| DepError::store(format!("failed to replace {}", path.display()), e))
    }

    async fn update_session(&self, name: &str, session: Option<String>) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let path = self.entry_path(name)?;
        let Some(mut entry) = self.read_entry(&path).await? else {
            // Nothing to attach a session to.
            return match session {
                Some(_) => Err(DepError::ConfigNotFound {
                    name: name.to_string(),
                }),
                None => Ok(()),
            };
        };
        if entry.session == session {
            return Ok(());
        }
        entry.session = session;
        self.write_entry(&path, &entry).await
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn credentials(&self, name: &str) -> Result<Option<Credentials>> {
        let path = self.entry_path(name)?;
        Ok(self.read_entry(&path).await?.map(|e| e.credentials))
    }

    async fn session(&self, name: &str) -> Result<Option<SessionToken>> {
        let path = self.entry_path(name)?;
        Ok(self
            .read_entry(&path)
            .await?
            .and_then(|e| e.session)
            .map(SessionToken::new))
    }

    async fn put_session(&self, name: &str, token: &SessionToken) -> Result<()> {
        self.update_session(name, Some(token.as_str().to_string()))
            .await
    }

    async fn remove_session(&self, name: &str) -> Result<()> {
        self.update_session(name, None).await
    }

    async fn remove_session_if(&self, name: &str, expected: &SessionToken) -> Result<bool> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let path = self.entry_path(name)?;
        let Some(mut entry) = self.read_entry(&path).await? else {
            return Ok(false);
        };
        if entry.session.as_deref() != Some(expected.as_str()) {
            return Ok(false);
        }
        entry.session = None;
        self.write_entry(&path, &entry).await?;
        Ok(true)
    }
}
