//! Authentication and license protocol types.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// User login info from `getUserLogin`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserLoginInfo {
    /// Logged-in username.
    pub username: String,
    /// OS user id the login belongs to.
    #[serde(rename = "currentOSUId")]
    pub current_os_uid: Option<String>,
    /// Login time.
    #[serde(rename = "lastLoginTime")]
    pub last_login_time: Option<String>,
}

/// Result of `hasAccessRight` / `requestAccess`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRight {
    #[serde(rename = "accessGranted", default)]
    pub access_granted: bool,
    #[serde(default)]
    pub message: String,
}

/// Result of `authorize`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResult {
    #[serde(rename = "cortexToken")]
    pub cortex_token: String,
}

/// Result of `getLicenseInfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseInfoResult {
    pub license: Option<LicenseInfo>,
    #[serde(rename = "isOnline", default)]
    pub is_online: bool,
}

/// The license the app is running under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(rename = "licenseId", default)]
    pub license_id: String,
    #[serde(rename = "licenseName", default)]
    pub license_name: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(rename = "validFrom", default)]
    pub valid_from: Option<DateTime<FixedOffset>>,
    #[serde(rename = "validTo", default)]
    pub valid_to: Option<DateTime<FixedOffset>>,
    #[serde(rename = "softLimitTime", default)]
    pub soft_limit_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "hardLimitTime", default)]
    pub hard_limit_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "totalDebit", default)]
    pub total_debit: Option<i64>,
    #[serde(rename = "sessionCount", default)]
    pub session_count: Option<i64>,
    /// Forward-compatible storage for additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Usability of a license at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseStatus {
    Valid,
    /// Past the soft limit: still usable, the user should renew.
    SoftLimited,
    HardLimited,
    Expired,
    /// No license id was reported.
    Missing,
}

impl LicenseInfo {
    /// Evaluate the validity windows against `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> LicenseStatus {
        if self.license_id.is_empty() {
            return LicenseStatus::Missing;
        }
        if self.valid_to.is_some_and(|t| now > t) {
            return LicenseStatus::Expired;
        }
        if self.hard_limit_time.is_some_and(|t| now > t) {
            return LicenseStatus::HardLimited;
        }
        if self.soft_limit_time.is_some_and(|t| now > t) {
            return LicenseStatus::SoftLimited;
        }
        LicenseStatus::Valid
    }
}
