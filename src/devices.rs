//! Device listing, sync and detail lookups.
//!
//! - [`fetch_devices`] pages through every device assigned to the MDM
//!   server. Start without a cursor and keep passing the returned cursor
//!   until `more_to_follow` is `false`.
//! - [`sync_devices`] pages through changes (`added`, `modified`,
//!   `deleted`) since a cursor obtained from a previous fetch or sync.
//! - [`device_details`] looks up specific serial numbers.
//!
//! Cursors are opaque and expire on Apple's side after a few days; an
//! expired one surfaces as `DepError::Validation` with code
//! `EXPIRED_CURSOR` (or `CURSOR_INVALID`), which callers handle by starting
//! over with a fresh fetch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::client::DepClient;
use crate::config::Operation;

/// A device record as returned by the list, sync and details endpoints.
///
/// Reference: <https://developer.apple.com/documentation/devicemanagement/device>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Hardware serial number. Always present.
    pub serial_number: String,
    /// Marketing model name, e.g. `"MacBook Pro"`.
    #[serde(default)]
    pub model: Option<String>,
    /// Model description with configuration details.
    #[serde(default)]
    pub description: Option<String>,
    /// Case color.
    #[serde(default)]
    pub color: Option<String>,
    /// Asset tag recorded in Apple Business/School Manager.
    #[serde(default)]
    pub asset_tag: Option<String>,
    /// `empty`, `assigned`, `pushed` or `removed`.
    #[serde(default)]
    pub profile_status: Option<String>,
    /// UUID of the assigned profile, if any.
    #[serde(default)]
    pub profile_uuid: Option<String>,
    /// Timestamp of the last profile assignment.
    #[serde(default)]
    pub profile_assign_time: Option<String>,
    /// Timestamp of the last time the device fetched its profile.
    #[serde(default)]
    pub profile_push_time: Option<String>,
    /// Timestamp of assignment to this MDM server.
    #[serde(default)]
    pub device_assigned_date: Option<String>,
    /// Who assigned the device to this MDM server.
    #[serde(default)]
    pub device_assigned_by: Option<String>,
    /// `iOS`, `OSX` or `tvOS`.
    #[serde(default)]
    pub os: Option<String>,
    /// `iPad`, `iPhone`, `iPod`, `Mac` or `AppleTV`.
    #[serde(default)]
    pub device_family: Option<String>,
    /// Sync only: `added`, `modified` or `deleted`.
    #[serde(default)]
    pub op_type: Option<String>,
    /// Sync only: when the change happened.
    #[serde(default)]
    pub op_date: Option<String>,
    /// Details only: `SUCCESS` or `NOT_FOUND` for this serial.
    #[serde(default)]
    pub response_status: Option<String>,
}

/// Body for [`fetch_devices`] and [`sync_devices`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceListRequest {
    /// Cursor from a previous page. Required for sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Page size. The server default applies when unset; the maximum is
    /// advertised in [`crate::account::AccountDetail::urls`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One page of a device listing or sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceListResponse {
    /// Devices on this page.
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Cursor for the next page (or the next sync).
    #[serde(default)]
    pub cursor: String,
    /// Server timestamp up to which this page is complete.
    #[serde(default)]
    pub fetched_until: Option<String>,
    /// Whether another page is available with `cursor`.
    #[serde(default)]
    pub more_to_follow: bool,
}

/// Body for [`device_details`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetailsRequest {
    /// Serial numbers to look up.
    pub devices: Vec<String>,
}

/// Result of [`device_details`], keyed by serial number.
///
/// Serials unknown to the server still appear, with
/// `response_status = "NOT_FOUND"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetailsResponse {
    /// Device record per requested serial number.
    #[serde(default)]
    pub devices: HashMap<String, Device>,
}

/// Fetches one page of devices assigned to the MDM server.
///
/// # Errors
///
/// - `DepError::Validation`: `INVALID_CURSOR`, `EXHAUSTED_CURSOR` or
///   `EXPIRED_CURSOR`.
/// - Everything [`DepClient::execute`] can return.
pub async fn fetch_devices(
    client: &DepClient,
    name: &str,
    request: &DeviceListRequest,
) -> crate::error::Result<DeviceListResponse> {
    client
        .execute(name, Operation::FetchDevices, &[], Some(request))
        .await
}

/// Fetches one page of device changes since `request.cursor`.
pub async fn sync_devices(
    client: &DepClient,
    name: &str,
    request: &DeviceListRequest,
) -> crate::error::Result<DeviceListResponse> {
    client
        .execute(name, Operation::SyncDevices, &[], Some(request))
        .await
}

/// Looks up details for specific serial numbers.
pub async fn device_details(
    client: &DepClient,
    name: &str,
    serials: &[String],
) -> crate::error::Result<DeviceDetailsResponse> {
    let req = DeviceDetailsRequest {
        devices: serials.to_vec(),
    };
    client
        .execute(name, Operation::DeviceDetails, &[], Some(&req))
        .await
}
