//! Async Rust client library for the Apple Device Enrollment Program (DEP) API.
//!
//! Provides per-tenant session management with a single in-flight handshake
//! per configuration name, an authenticated HTTP client that re-authenticates
//! once when the server reports an expired session, and typed wrappers for
//! the profile, account and device endpoints.
//!
//! # Modules
//!
//! - [`account`]: Account (MDM server) details.
//! - [`client`]: Authenticated request executor (`DepClient`).
//! - [`config`]: Per-name server URLs, operation table, expiry rules.
//! - [`decode`]: Response classification into values or `DepError`s.
//! - [`devices`]: Device listing, sync and detail lookups.
//! - [`error`]: Typed error hierarchy (`DepError`) for all library operations.
//! - [`oauth`]: OAuth 1.0a signing for the session handshake.
//! - [`profile`]: Profile definition, fetch, assignment and removal.
//! - [`session`]: Session token cache and handshake coordination.
//! - [`store`]: Credential storage trait with memory and file backends.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use dep_client::client::DepClient;
//! use dep_client::config::ClientConfig;
//! use dep_client::profile::assign_profile;
//! use dep_client::store::FileStore;
//!
//! let store = Arc::new(FileStore::new("/var/lib/dep"));
//! let client = DepClient::new(ClientConfig::default(), store)?;
//! let serials = vec!["C02XXXXXXXXX".to_string()];
//! let resp = assign_profile(&client, "acme", "88F7E1E0C1A7", &serials).await?;
//! for serial in resp.failed_devices() {
//!     eprintln!("{serial}: {}", resp.devices[serial]);
//! }
//! ```

#![warn(missing_docs)]

pub mod account;
pub mod client;
pub mod config;
pub mod decode;
pub mod devices;
pub mod error;
pub mod oauth;
pub mod profile;
pub mod session;
pub mod store;

pub use client::DepClient;
pub use config::{ClientConfig, Operation};
pub use error::{DepError, ErrorKind, Result};
pub use session::{SessionManager, SessionToken};
pub use store::{CredentialStore, FileStore, MemoryStore};
