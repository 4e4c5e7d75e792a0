//! Shared data models for rails, provider status and identity verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Rails ---

/// Raw lifecycle status of a single payment rail, as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RailStatus {
    Pending,
    Enabled,
    RequiresInformation,
    RequiresExtraInformation,
    Failed,
    Rejected,
    /// Any status this client does not know about yet.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RailProvider {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RailMethod {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// One (provider, method, status) triple. Owned by the backend; the client
/// only ever holds a read-only snapshot of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RailRecord {
    pub id: String,
    pub provider: RailProvider,
    pub method: RailMethod,
    pub status: RailStatus,
}

impl RailRecord {
    pub fn new(
        id: impl Into<String>,
        provider_code: impl Into<String>,
        method_code: impl Into<String>,
        status: RailStatus,
    ) -> Self {
        Self {
            id: id.into(),
            provider: RailProvider {
                code: provider_code.into(),
                name: None,
            },
            method: RailMethod {
                code: method_code.into(),
                country: None,
                currency: None,
            },
            status,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.method.country = Some(country.into());
        self
    }
}

/// Response body of the authoritative rails fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RailsResponse {
    #[serde(default)]
    pub rails: Vec<RailRecord>,
}

/// Status shown to the user for a whole provider group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderDisplayStatus {
    SettingUp,
    RequiresFollowup,
    Enabled,
    Failed,
}

impl From<RailStatus> for ProviderDisplayStatus {
    fn from(status: RailStatus) -> Self {
        match status {
            RailStatus::Enabled => ProviderDisplayStatus::Enabled,
            RailStatus::RequiresInformation | RailStatus::RequiresExtraInformation => {
                ProviderDisplayStatus::RequiresFollowup
            }
            RailStatus::Failed | RailStatus::Rejected => ProviderDisplayStatus::Failed,
            RailStatus::Pending | RailStatus::Unknown => ProviderDisplayStatus::SettingUp,
        }
    }
}

/// Derived per-provider view. Never persisted, always rebuilt from rails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider_code: String,
    pub display_name: String,
    pub status: ProviderDisplayStatus,
    pub rails: Vec<RailRecord>,
}

// --- Identity verification ---

/// Verification status as reported by the identity provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    NotStarted,
    Pending,
    ActionRequired,
    Approved,
    Rejected,
    Failed,
    #[serde(other)]
    Unknown,
}

impl KycStatus {
    /// Whether the provider has reached a state that needs no further polling.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            KycStatus::ActionRequired
                | KycStatus::Approved
                | KycStatus::Rejected
                | KycStatus::Failed
        )
    }
}

/// Which verification template to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionIntent {
    Standard,
    Latam,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateKycRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_intent: Option<RegionIntent>,
}

/// Result of asking the backend to start (or resume) verification.
///
/// No token is returned when the applicant is already approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateKycResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KycStatus>,
}

/// Authoritative verification state for the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KycStatusSnapshot {
    pub status: KycStatus,
    #[serde(default)]
    pub reject_labels: Vec<String>,
}

// --- Bridge terms of service ---

/// Hosted terms page the user must accept before bank rails activate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TosLinkResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TosConfirmResponse {
    pub accepted: bool,
}

// --- Push payloads ---

/// Payload of `kyc_status_update`. Treated as a hint only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KycStatusUpdate {
    pub status: KycStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_labels: Option<Vec<String>>,
}

/// Payload of `rail_status_update`. Treated as a hint only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RailStatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rail_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RailStatus>,
}

// --- History ---

/// A transaction history entry. Pushed entries are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub uuid: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_rail_status_is_tolerated() {
        let rail: RailRecord = serde_json::from_str(
            r#"{"id":"r1","provider":{"code":"BRIDGE"},"method":{"code":"ACH","country":"US"},"status":"SUSPENDED"}"#,
        )
        .unwrap();
        assert_eq!(rail.status, RailStatus::Unknown);
        assert_eq!(ProviderDisplayStatus::from(rail.status), ProviderDisplayStatus::SettingUp);
    }

    #[test]
    fn rail_status_display_table() {
        use ProviderDisplayStatus as D;
        assert_eq!(D::from(RailStatus::Enabled), D::Enabled);
        assert_eq!(D::from(RailStatus::RequiresInformation), D::RequiresFollowup);
        assert_eq!(D::from(RailStatus::RequiresExtraInformation), D::RequiresFollowup);
        assert_eq!(D::from(RailStatus::Failed), D::Failed);
        assert_eq!(D::from(RailStatus::Rejected), D::Failed);
        assert_eq!(D::from(RailStatus::Pending), D::SettingUp);
    }

    #[test]
    fn history_entry_keeps_unknown_fields() {
        let entry: HistoryEntry = serde_json::from_str(
            r#"{"uuid":"tx-1","type":"SEND","status":"COMPLETED","timestamp":"2025-01-01T00:00:00Z","amount":"10","chain":"base"}"#,
        )
        .unwrap();
        assert_eq!(entry.entry_type, "SEND");
        assert_eq!(entry.extra.get("chain").and_then(|v| v.as_str()), Some("base"));
    }

    #[test]
    fn tos_bodies_default_when_fields_are_missing() {
        let link: TosLinkResponse = serde_json::from_str(r#"{"tosLink":"https://tos.test/a"}"#).unwrap();
        assert_eq!(link.tos_link.as_deref(), Some("https://tos.test/a"));
        let confirm: TosConfirmResponse = serde_json::from_str("{}").unwrap();
        assert!(!confirm.accepted);
    }

    #[test]
    fn settled_kyc_statuses() {
        assert!(!KycStatus::NotStarted.is_settled());
        assert!(!KycStatus::Pending.is_settled());
        assert!(KycStatus::Approved.is_settled());
        assert!(KycStatus::Rejected.is_settled());
        assert!(KycStatus::ActionRequired.is_settled());
    }
}
