//! Client configuration: per-name server URLs, the operation table, and the
//! rules that identify an expired session.
//!
//! Everything here is plain data so that deployment quirks are handled by
//! editing configuration rather than code. The notable case is
//! [`Operation::AssignProfile`]: it has historically been an HTTP `PUT`
//! (and the `depsim` simulator still requires that), although current Apple
//! documentation lists `POST`. The default table keeps `PUT`; a deployment
//! talking to a server that wants `POST` overrides it:
//!
//! ```toml
//! [endpoints.assign_profile]
//! method = "POST"
//! path = "/profile/devices"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;

/// Production DEP API host.
pub const DEFAULT_BASE_URL: &str = "https://mdmenrollment.apple.com";

/// Default overall request timeout. Device listing pages can be large.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors raised while loading or validating a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or has the wrong shape.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An `[endpoints.<name>]` table named an operation that does not exist.
    #[error("unknown operation {0:?} in [endpoints]")]
    UnknownOperation(String),

    /// An endpoint override used something that is not an HTTP method.
    #[error("invalid HTTP method {method:?} for operation {operation}")]
    InvalidMethod {
        /// Operation being overridden.
        operation: String,
        /// The rejected method string.
        method: String,
    },

    /// An expiry rule named a status outside 4xx. Only client errors can
    /// signal an expired session; 5xx failures are never retried.
    #[error("expiry rule status {0} is not a 4xx status")]
    InvalidExpiryStatus(u16),
}

// ── Operations ─────────────────────────────────────────────────────────

/// Every logical DEP operation the client knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Retrieve the account (MDM server) details.
    AccountDetail,
    /// Define a new enrollment profile.
    DefineProfile,
    /// Fetch a previously defined profile by UUID.
    FetchProfile,
    /// Assign a profile to a list of serial numbers.
    AssignProfile,
    /// Remove ("unassign") any profile from a list of serial numbers.
    RemoveProfile,
    /// Page through every device assigned to the MDM server.
    FetchDevices,
    /// Page through device changes since a cursor.
    SyncDevices,
    /// Retrieve details for specific serial numbers.
    DeviceDetails,
}

impl Operation {
    /// All operations, in table order.
    pub const ALL: [Operation; 8] = [
        Operation::AccountDetail,
        Operation::DefineProfile,
        Operation::FetchProfile,
        Operation::AssignProfile,
        Operation::RemoveProfile,
        Operation::FetchDevices,
        Operation::SyncDevices,
        Operation::DeviceDetails,
    ];

    /// Name used for this operation in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Operation::AccountDetail => "account_detail",
            Operation::DefineProfile => "define_profile",
            Operation::FetchProfile => "fetch_profile",
            Operation::AssignProfile => "assign_profile",
            Operation::RemoveProfile => "remove_profile",
            Operation::FetchDevices => "fetch_devices",
            Operation::SyncDevices => "sync_devices",
            Operation::DeviceDetails => "device_details",
        }
    }

    /// Looks up an operation by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// The method and path the client uses unless configuration overrides it.
    pub fn default_endpoint(self) -> Endpoint {
        let (method, path) = match self {
            Operation::AccountDetail => (Method::GET, "/account"),
            Operation::DefineProfile => (Method::POST, "/profile"),
            Operation::FetchProfile => (Method::GET, "/profile"),
            // PUT for compatibility with older servers; see module docs.
            Operation::AssignProfile => (Method::PUT, "/profile/devices"),
            Operation::RemoveProfile => (Method::DELETE, "/profile/devices"),
            Operation::FetchDevices => (Method::POST, "/server/devices"),
            Operation::SyncDevices => (Method::POST, "/devices/sync"),
            Operation::DeviceDetails => (Method::POST, "/devices"),
        };
        Endpoint::new(method, path)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An HTTP method and path pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Verb sent on the wire. Never rewritten by the client.
    pub method: Method,
    /// Path relative to the server base URL, with a leading slash.
    pub path: String,
}

impl Endpoint {
    /// Creates an endpoint from a method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Endpoint {
            method,
            path: path.into(),
        }
    }
}

/// The method/path table consulted by the request executor.
///
/// Operations without an override fall back to
/// [`Operation::default_endpoint`].
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    overrides: HashMap<Operation, Endpoint>,
}

impl EndpointTable {
    /// Returns the endpoint for `op`.
    pub fn get(&self, op: Operation) -> Endpoint {
        self.overrides
            .get(&op)
            .cloned()
            .unwrap_or_else(|| op.default_endpoint())
    }

    /// Overrides the endpoint for `op`.
    pub fn set(&mut self, op: Operation, endpoint: Endpoint) {
        self.overrides.insert(op, endpoint);
    }
}

// ── Expiry detection ───────────────────────────────────────────────────

/// One rule identifying a response as "your session token has expired".
///
/// A response matches when its status equals `status` and, if
/// `body_contains` is set, its body contains that text. Only 4xx statuses
/// can match; a rule for any other status never fires.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpiryRule {
    /// HTTP status code of the expiry signal.
    pub status: u16,
    /// Optional marker that must appear in the response body.
    #[serde(default)]
    pub body_contains: Option<String>,
}

impl ExpiryRule {
    /// Matches every response with the given status.
    pub fn status(status: u16) -> Self {
        ExpiryRule {
            status,
            body_contains: None,
        }
    }

    /// Matches responses with the given status whose body contains `marker`.
    pub fn status_with_body(status: u16, marker: impl Into<String>) -> Self {
        ExpiryRule {
            status,
            body_contains: Some(marker.into()),
        }
    }

    /// Returns `true` if the response matches this rule.
    pub fn matches(&self, status: StatusCode, body: &str) -> bool {
        if !status.is_client_error() || status.as_u16() != self.status {
            return false;
        }
        match &self.body_contains {
            Some(marker) => body.contains(marker.as_str()),
            None => true,
        }
    }
}

/// Apple documents `401 UNAUTHORIZED` for an expired session token and
/// `403 FORBIDDEN` for an invalid one. Other 403 bodies (for example
/// `T_C_NOT_SIGNED`) are account problems and must not trigger re-auth.
pub fn default_expiry_rules() -> Vec<ExpiryRule> {
    vec![
        ExpiryRule::status(401),
        ExpiryRule::status_with_body(403, "FORBIDDEN"),
    ]
}

// ── Client configuration ───────────────────────────────────────────────

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL used for names without a server override.
    pub default_base_url: String,
    /// `User-Agent` header sent on every request.
    pub user_agent: String,
    /// Overall per-request timeout.
    pub timeout: Duration,
    /// Per-name base URL overrides.
    pub servers: HashMap<String, String>,
    /// Operation method/path table.
    pub endpoints: EndpointTable,
    /// Responses treated as session expiry.
    pub expiry_rules: Vec<ExpiryRule>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            default_base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: default_user_agent(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            servers: HashMap::new(),
            endpoints: EndpointTable::default(),
            expiry_rules: default_expiry_rules(),
        }
    }
}

fn default_user_agent() -> String {
    format!("dep-client/{}", env!("CARGO_PKG_VERSION"))
}

/// On-disk shape of the configuration file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    default_base_url: Option<String>,
    user_agent: Option<String>,
    timeout_secs: Option<u64>,
    servers: HashMap<String, RawServer>,
    endpoints: HashMap<String, RawEndpoint>,
    expiry_rules: Option<Vec<ExpiryRule>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServer {
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    method: Option<String>,
    path: Option<String>,
}

impl ClientConfig {
    /// Parses a TOML configuration document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input)?;
        let mut config = ClientConfig::default();

        if let Some(url) = raw.default_base_url {
            config.default_base_url = url;
        }
        if let Some(agent) = raw.user_agent {
            config.user_agent = agent;
        }
        if let Some(secs) = raw.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(rules) = raw.expiry_rules {
            if let Some(bad) = rules.iter().find(|r| !(400..500).contains(&r.status)) {
                return Err(ConfigError::InvalidExpiryStatus(bad.status));
            }
            config.expiry_rules = rules;
        }
        for (name, server) in raw.servers {
            config.servers.insert(name, server.base_url);
        }
        for (op_name, raw_endpoint) in raw.endpoints {
            let op = Operation::from_name(&op_name)
                .ok_or_else(|| ConfigError::UnknownOperation(op_name.clone()))?;
            let default = op.default_endpoint();
            let method = match raw_endpoint.method {
                Some(m) => parse_method(op, &m)?,
                None => default.method,
            };
            let path = raw_endpoint.path.unwrap_or(default.path);
            config.endpoints.set(op, Endpoint::new(method, path));
        }

        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Points configuration `name` at `base_url`.
    pub fn with_server(mut self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.servers.insert(name.into(), base_url.into());
        self
    }

    /// Overrides the endpoint for one operation.
    pub fn with_endpoint(mut self, op: Operation, endpoint: Endpoint) -> Self {
        self.endpoints.set(op, endpoint);
        self
    }

    /// Replaces the expiry rules.
    pub fn with_expiry_rules(mut self, rules: Vec<ExpiryRule>) -> Self {
        self.expiry_rules = rules;
        self
    }

    /// Base URL for configuration `name`, without a trailing slash.
    pub fn base_url(&self, name: &str) -> &str {
        self.servers
            .get(name)
            .map(String::as_str)
            .unwrap_or(self.default_base_url.as_str())
            .trim_end_matches('/')
    }

    /// Returns `true` if the response is a session-expiry signal.
    pub fn is_expiry_signal(&self, status: StatusCode, body: &str) -> bool {
        self.expiry_rules.iter().any(|rule| rule.matches(status, body))
    }
}

fn parse_method(op: Operation, method: &str) -> Result<Method, ConfigError> {
    let upper = method.trim().to_ascii_uppercase();
    match upper.as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" => {
            Method::from_bytes(upper.as_bytes()).map_err(|_| ConfigError::InvalidMethod {
                operation: op.to_string(),
                method: method.to_string(),
            })
        }
        _ => Err(ConfigError::InvalidMethod {
            operation: op.to_string(),
            method: method.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_profile_defaults_to_put() {
        let table = EndpointTable::default();
        let ep = table.get(Operation::AssignProfile);
        assert_eq!(ep.method, Method::PUT);
        assert_eq!(ep.path, "/profile/devices");
    }

    #[test]
    fn remove_profile_defaults_to_delete() {
        let ep = EndpointTable::default().get(Operation::RemoveProfile);
        assert_eq!(ep.method, Method::DELETE);
        assert_eq!(ep.path, "/profile/devices");
    }

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("reboot_everything"), None);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.default_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.expiry_rules, default_expiry_rules());
        assert!(config.user_agent.starts_with("dep-client/"));
    }

    #[test]
    fn full_document_is_applied() {
        let config = ClientConfig::from_toml_str(
            r#"
            default_base_url = "https://dep.example.com/"
            user_agent = "acme-mdm/2"
            timeout_secs = 5

            [servers.acme]
            base_url = "http://localhost:9001/"

            [endpoints.assign_profile]
            method = "post"

            [[expiry_rules]]
            status = 401
            body_contains = "UNAUTHORIZED"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url("acme"), "http://localhost:9001");
        assert_eq!(config.base_url("other"), "https://dep.example.com");
        assert_eq!(config.user_agent, "acme-mdm/2");
        assert_eq!(config.timeout, Duration::from_secs(5));

        let ep = config.endpoints.get(Operation::AssignProfile);
        assert_eq!(ep.method, Method::POST);
        assert_eq!(ep.path, "/profile/devices", "path falls back to default");

        assert_eq!(
            config.expiry_rules,
            vec![ExpiryRule::status_with_body(401, "UNAUTHORIZED")]
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = ClientConfig::from_toml_str(
            r#"
            [endpoints.wipe_all]
            method = "DELETE"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOperation(ref n) if n == "wipe_all"));
    }

    #[test]
    fn bogus_method_is_rejected() {
        let err = ClientConfig::from_toml_str(
            r#"
            [endpoints.assign_profile]
            method = "YEET"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMethod { .. }));
    }

    #[test]
    fn non_client_error_expiry_status_is_rejected() {
        for status in [200, 302, 503] {
            let err = ClientConfig::from_toml_str(&format!(
                "[[expiry_rules]]\nstatus = {status}\n"
            ))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidExpiryStatus(s) if s == status),
                "status {status}: {err}"
            );
        }
    }

    #[test]
    fn server_error_rule_never_matches() {
        let rule = ExpiryRule::status(503);
        assert!(!rule.matches(StatusCode::SERVICE_UNAVAILABLE, ""));
        assert!(!ExpiryRule::status(200).matches(StatusCode::OK, "{}"));
        assert!(ExpiryRule::status(419).matches(StatusCode::from_u16(419).unwrap(), ""));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        assert!(ClientConfig::from_toml_str("retries = 3").is_err());
    }

    #[test]
    fn default_rules_distinguish_forbidden_from_terms_not_signed() {
        let config = ClientConfig::default();
        assert!(config.is_expiry_signal(StatusCode::UNAUTHORIZED, "UNAUTHORIZED"));
        assert!(config.is_expiry_signal(StatusCode::FORBIDDEN, "FORBIDDEN"));
        assert!(!config.is_expiry_signal(StatusCode::FORBIDDEN, "T_C_NOT_SIGNED"));
        assert!(!config.is_expiry_signal(StatusCode::BAD_REQUEST, "UNAUTHORIZED"));
    }
}
