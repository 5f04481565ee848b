use serde::{Deserialize, Serialize};

pub const ACCESS_GRANTED: &str = "Access granted";
pub const ACCESS_DENIED: &str = "Access denied";
pub const USER_NOT_FOUND: &str = "User not found";

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub username: String,
    pub encoding: Vec<f32>,
    pub dim: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

impl IdentityRecord {
    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            username: self.username.clone(),
            dim: self.dim,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public view of a record; the encoding itself never leaves the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IdentitySummary {
    pub username: String,
    pub dim: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutcome {
    pub username: String,
    pub message: String,
    pub outcome: UpsertOutcome,
    pub dim: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub similarity: Option<f64>,
}

impl VerificationResult {
    pub fn decided(similarity: f64, verified: bool) -> Self {
        Self {
            verified,
            confidence: Some(format_confidence(similarity)),
            message: Some(if verified { ACCESS_GRANTED } else { ACCESS_DENIED }.to_string()),
            error: None,
            similarity: Some(similarity),
        }
    }

    pub fn user_not_found() -> Self {
        Self {
            verified: false,
            confidence: None,
            message: Some(USER_NOT_FOUND.to_string()),
            error: None,
            similarity: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            confidence: None,
            message: None,
            error: Some(reason.into()),
            similarity: None,
        }
    }
}

pub fn format_confidence(similarity: f64) -> String {
    format!("{:.2}%", similarity * 100.0)
}
