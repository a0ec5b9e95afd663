//! Enrollment profile operations.
//!
//! This module covers the "Profiles" endpoint family of the DEP API:
//!
//! - [`define_profile`]: create a profile on Apple's servers.
//! - [`fetch_profile`]: read back a defined profile by UUID.
//! - [`assign_profile`]: assign a profile to a list of serial numbers.
//! - [`remove_profile`]: unassign whatever profile a set of devices has.
//!
//! Assign and remove are batch operations. The server answers `200` even
//! when some devices fail, with a per-serial status map such as
//! `{"S1": "SUCCESS", "S2": "NOT_ACCESSIBLE"}`. Those maps are returned to
//! the caller as-is; a partially failed batch is not an error.
//!
//! ## Verbs
//!
//! Assign defaults to `PUT /profile/devices`, and remove is a
//! `DELETE /profile/devices` that carries a JSON body. Both come from the
//! client's endpoint table (see [`crate::config`]), so a deployment can
//! switch assign to `POST` without code changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::client::DepClient;
use crate::config::Operation;

/// Per-device status reported by batch profile operations.
pub const DEVICE_SUCCESS: &str = "SUCCESS";

// ── Profile ────────────────────────────────────────────────────────────

/// An enrollment profile as defined with, and returned by, the DEP API.
///
/// Reference: <https://developer.apple.com/documentation/devicemanagement/profile>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Human-readable profile name shown during Setup Assistant.
    #[serde(default)]
    pub profile_name: String,

    /// MDM enrollment URL devices contact after activation.
    #[serde(default)]
    pub url: String,

    /// Allow the device to pair with a host computer.
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_pairing: bool,

    /// Put the device into supervised mode.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_supervised: bool,

    /// Enable Shared iPad.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_multi_user: bool,

    /// Prevent the user from skipping MDM enrollment.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_mandatory: bool,

    /// Hold Setup Assistant until the MDM server releases the device.
    #[serde(default, skip_serializing_if = "is_false")]
    pub await_device_configured: bool,

    /// Whether the user may remove the MDM profile. Apple treats a missing
    /// value as `true`, so it is always sent.
    #[serde(default = "default_true")]
    pub is_mdm_removable: bool,

    /// Contact details shown to the user when enrollment fails.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub support_phone_number: String,

    /// tvOS only: advance through Setup Assistant without input.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_advance_setup: bool,

    /// See [`Profile::support_phone_number`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub support_email_address: String,

    /// Opaque string the MDM server can use to identify the organization.
    #[serde(default)]
    pub org_magic: String,

    /// DER certificates (base64) the device trusts for the enrollment URL.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchor_certs: Vec<String>,

    /// DER certificates (base64) of hosts allowed to pair with the device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supervising_host_certs: Vec<String>,

    /// Department or location name shown during setup.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub department: String,

    /// Serial numbers to assign the profile to as part of defining it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,

    /// ISO 639-1 language code preselected in Setup Assistant.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,

    /// ISO 3166-1 region code preselected in Setup Assistant.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    /// URL for web-based authentication before enrollment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configuration_web_url: String,

    /// Setup Assistant panes to skip.
    ///
    /// Reference: <https://developer.apple.com/documentation/devicemanagement/skipkeys>
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_setup_items: Vec<String>,

    /// Only present on profiles fetched back from Apple.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_uuid: String,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            profile_name: String::new(),
            url: String::new(),
            allow_pairing: false,
            is_supervised: false,
            is_multi_user: false,
            is_mandatory: false,
            await_device_configured: false,
            is_mdm_removable: true,
            support_phone_number: String::new(),
            auto_advance_setup: false,
            support_email_address: String::new(),
            org_magic: String::new(),
            anchor_certs: Vec::new(),
            supervising_host_certs: Vec::new(),
            department: String::new(),
            devices: Vec::new(),
            language: String::new(),
            region: String::new(),
            configuration_web_url: String::new(),
            skip_setup_items: Vec::new(),
            profile_uuid: String::new(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}

// ── Request / response types ───────────────────────────────────────────

/// Body of the assign-profile request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignProfileRequest {
    /// Profile to assign.
    pub profile_uuid: String,
    /// Serial numbers to assign it to.
    pub devices: Vec<String>,
}

/// Body of the remove-profile request.
///
/// Apple documents an optional `profile_uuid` here, but the server ignores
/// it, so it is not sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveProfileRequest {
    /// Serial numbers to clear.
    pub devices: Vec<String>,
}

/// Result of assigning a profile: per-serial status codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResponse {
    /// The profile that was assigned.
    pub profile_uuid: String,
    /// Status per serial number (`SUCCESS`, `NOT_ACCESSIBLE`, `FAILED`).
    #[serde(default)]
    pub devices: HashMap<String, String>,
}

impl ProfileResponse {
    /// Serial numbers whose status is not `SUCCESS`, sorted.
    pub fn failed_devices(&self) -> Vec<&str> {
        failed(&self.devices)
    }
}

/// Result of defining a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineProfileResponse {
    /// UUID Apple assigned to the new profile.
    pub profile_uuid: String,
    /// Serial numbers from [`Profile::devices`] the profile was assigned to.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Result of removing profiles: per-serial status codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearProfileResponse {
    /// Status per serial number.
    #[serde(default)]
    pub devices: HashMap<String, String>,
}

impl ClearProfileResponse {
    /// Serial numbers whose status is not `SUCCESS`, sorted.
    pub fn failed_devices(&self) -> Vec<&str> {
        failed(&self.devices)
    }
}

fn failed(devices: &HashMap<String, String>) -> Vec<&str> {
    let mut serials: Vec<&str> = devices
        .iter()
        .filter(|(_, status)| status.as_str() != DEVICE_SUCCESS)
        .map(|(serial, _)| serial.as_str())
        .collect();
    serials.sort_unstable();
    serials
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// Defines a new profile for configuration `name`.
///
/// # Errors
///
/// - `DepError::Validation`: Apple rejected the profile (for example
///   `INVALID_PROFILE` or `MALFORMED_REQUEST_BODY`).
/// - `DepError::Auth` / `ConfigNotFound` / `Transport`: see
///   [`DepClient::execute`].
pub async fn define_profile(
    client: &DepClient,
    name: &str,
    profile: &Profile,
) -> crate::error::Result<DefineProfileResponse> {
    client
        .execute(name, Operation::DefineProfile, &[], Some(profile))
        .await
}

/// Fetches a previously defined profile.
///
/// # Errors
///
/// - `DepError::NotFound` / `Validation`: unknown or malformed UUID.
pub async fn fetch_profile(
    client: &DepClient,
    name: &str,
    profile_uuid: &str,
) -> crate::error::Result<Profile> {
    client
        .execute::<(), _>(
            name,
            Operation::FetchProfile,
            &[("profile_uuid", profile_uuid)],
            None,
        )
        .await
}

/// Assigns `profile_uuid` to every serial in `serials`.
///
/// A `200` with some devices reporting `NOT_ACCESSIBLE` or
/// `FAILED` is a successful result; inspect
/// [`ProfileResponse::failed_devices`].
pub async fn assign_profile(
    client: &DepClient,
    name: &str,
    profile_uuid: &str,
    serials: &[String],
) -> crate::error::Result<ProfileResponse> {
    let req = AssignProfileRequest {
        profile_uuid: profile_uuid.to_string(),
        devices: serials.to_vec(),
    };
    client
        .execute(name, Operation::AssignProfile, &[], Some(&req))
        .await
}

/// Removes any assigned profile from the given serial numbers.
pub async fn remove_profile(
    client: &DepClient,
    name: &str,
    serials: &[String],
) -> crate::error::Result<ClearProfileResponse> {
    let req = RemoveProfileRequest {
        devices: serials.to_vec(),
    };
    client
        .execute(name, Operation::RemoveProfile, &[], Some(&req))
        .await
}
