use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};

/// A vendor credential pair under which one or more cameras are registered.
/// Immutable after configuration load.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub app_key: String,
    pub app_secret: Secret<String>,
    /// Default snapshot quality tier for cameras without an override.
    pub default_quality: Option<u8>,
}

/// A physical device identified by serial number and channel index,
/// belonging to exactly one account.
#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub serial: String,
    pub channel: u16,
    pub quality: Option<u8>,
    pub account_id: String,
}

/// Last-known bearer token and API domain for one account. No expiry is
/// tracked locally; validity is only ever disproven by an upstream rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub account_id: String,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "areaDomain")]
    pub area_domain: String,
}

/// Classification of a single capture attempt's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Success { pic_url: String },
    /// Socket-level failure: the request never produced an upstream code.
    NetworkError { detail: String },
    /// Upstream condition worth a backoff retry.
    Transient { code: String, msg: String },
    /// The quality tier was rejected; retried once with the parameter omitted.
    InvalidQuality { msg: String },
    /// Token rejected upstream. Never retried by the engine; the orchestrator
    /// answers with an account-wide refresh.
    TokenInvalid { msg: String },
    /// Any other non-success code, or a retryable one after budget exhaustion.
    Terminal { code: String, msg: String },
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Success { .. })
    }
}

/// Terminal result of one camera's capture sequence, consumed immediately by
/// the publisher.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub camera: Camera,
    pub outcome: CaptureOutcome,
    /// Quality actually sent on the terminal attempt (None after fallback).
    pub quality_used: Option<u8>,
    /// API domain the capture was issued against.
    pub area_domain: String,
}

/// JSON payload emitted for each successful capture.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEvent {
    pub name: String,
    pub serial: String,
    pub channel: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    pub pic_url: String,
    /// Single UTC timestamp shared by the whole batch.
    pub captured_at: DateTime<Utc>,
    pub area_domain: String,
    pub code: String,
    pub account_id: String,
}
