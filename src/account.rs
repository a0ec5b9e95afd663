//! Account (MDM server) details.
//!
//! `GET /account` describes the MDM server the session belongs to and the
//! organization that owns it. It is the cheapest authenticated call in the
//! API, which makes it a good connectivity check for a configuration name.

use serde::{Deserialize, Serialize};

use crate::client::DepClient;
use crate::config::Operation;

/// Account details as returned by the DEP API.
///
/// Every field is optional: Apple omits fields that do not apply to the
/// organization type, and unknown fields are ignored.
///
/// Reference: <https://developer.apple.com/documentation/devicemanagement/accountdetail>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountDetail {
    /// Name of the MDM server in Apple Business/School Manager.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Unique identifier of the MDM server.
    #[serde(default)]
    pub server_uuid: Option<String>,
    /// Apple ID of the administrator who generated the server token.
    #[serde(default)]
    pub admin_id: Option<String>,
    /// Deprecated by Apple; still returned by some accounts.
    #[serde(default)]
    pub facilitator_id: Option<String>,
    /// Organization name.
    #[serde(default)]
    pub org_name: Option<String>,
    /// Organization contact email.
    #[serde(default)]
    pub org_email: Option<String>,
    /// Organization contact phone number.
    #[serde(default)]
    pub org_phone: Option<String>,
    /// Organization postal address.
    #[serde(default)]
    pub org_address: Option<String>,
    /// `edu` or `org`.
    #[serde(default)]
    pub org_type: Option<String>,
    /// `v1` (Apple School Manager) or `v2` (Apple Business Manager).
    #[serde(default)]
    pub org_version: Option<String>,
    /// Organization identifier.
    #[serde(default)]
    pub org_id: Option<String>,
    /// Hash of the organization identifier.
    #[serde(default)]
    pub org_id_hash: Option<String>,
    /// Per-endpoint limits the server advertises.
    #[serde(default)]
    pub urls: Vec<AccountUrl>,
}

/// One endpoint entry in [`AccountDetail::urls`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountUrl {
    /// Endpoint path, e.g. `/server/devices`.
    #[serde(default)]
    pub uri: String,
    /// Methods the endpoint accepts.
    #[serde(default)]
    pub http_method: Vec<String>,
    /// Page size limits, for paged endpoints.
    #[serde(default)]
    pub limit: Option<UrlLimit>,
}

/// Page size limits for a paged endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlLimit {
    /// Page size used when the request does not set one.
    #[serde(default)]
    pub default: u32,
    /// Largest page size the server accepts.
    #[serde(default)]
    pub maximum: u32,
}

/// Fetches the account details for configuration `name`.
///
/// # Errors
///
/// See [`DepClient::execute`]. This call has no request body and no
/// domain-level 4xx responses beyond authentication failures.
pub async fn account_detail(client: &DepClient, name: &str) -> crate::error::Result<AccountDetail> {
    client
        .execute::<(), _>(name, Operation::AccountDetail, &[], None)
        .await
}
