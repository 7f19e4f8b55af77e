use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::OperationKind;

pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const PROFILE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const OFFLINE_FLAG_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Remote,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub profile: UserProfile,
    pub source: IdentitySource,
    pub issued_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn offline_synthesized(&self) -> bool {
        self.source == IdentitySource::Synthesized
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityInfo {
    pub username: String,
    pub available: bool,
    /// True when no backend answered and availability was assumed.
    pub assumed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Identity(SessionCredential),
    Availability(AvailabilityInfo),
}

impl OperationOutcome {
    pub fn offline_synthesized(&self) -> bool {
        match self {
            OperationOutcome::Identity(credential) => credential.offline_synthesized(),
            OperationOutcome::Availability(_) => false,
        }
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        match self {
            OperationOutcome::Identity(credential) => Some(credential),
            OperationOutcome::Availability(_) => None,
        }
    }

    pub fn availability(&self) -> Option<&AvailabilityInfo> {
        match self {
            OperationOutcome::Availability(info) => Some(info),
            OperationOutcome::Identity(_) => None,
        }
    }

    /// Shape handed to callers. Tokens are included; callers decide what to display.
    pub fn to_json(&self, kind: OperationKind) -> Value {
        match self {
            OperationOutcome::Identity(credential) => json!({
                "operation": kind.as_str(),
                "token": credential.token,
                "refreshToken": credential.refresh_token,
                "user": credential.profile,
                "source": credential.source,
                "offlineSynthesized": credential.offline_synthesized(),
            }),
            OperationOutcome::Availability(info) => json!({
                "operation": kind.as_str(),
                "username": info.username,
                "available": info.available,
                "assumed": info.assumed,
                "offlineSynthesized": false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(source: IdentitySource) -> SessionCredential {
        SessionCredential {
            token: "T".to_string(),
            refresh_token: None,
            profile: UserProfile {
                username: "a".to_string(),
                email: "a@b.com".to_string(),
                country: "Unknown".to_string(),
                age: None,
            },
            source,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn outcome_json_flags_synthesized_identity() {
        let outcome = OperationOutcome::Identity(credential(IdentitySource::Synthesized));
        let value = outcome.to_json(OperationKind::CreateAccount);
        assert_eq!(value["offlineSynthesized"], json!(true));
        assert_eq!(value["source"], json!("synthesized"));
        assert_eq!(value["user"]["username"], json!("a"));
    }

    #[test]
    fn lifetimes_are_ordered_short_to_long() {
        assert!(TOKEN_TTL < REFRESH_TOKEN_TTL);
        assert!(REFRESH_TOKEN_TTL < PROFILE_TTL);
        assert!(OFFLINE_FLAG_TTL < TOKEN_TTL);
    }
}
