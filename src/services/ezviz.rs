//! EZVIZ Open API client for token issuance and device capture.
//!
//! Both endpoints take form-encoded bodies and answer with a
//! `{code, msg, data}` envelope whose `code` is a string, `"200"` on success.

use crate::models::{CaptureOutcome, CredentialRecord};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const CODE_SUCCESS: &str = "200";
/// Access token missing, invalid or expired.
pub const CODE_TOKEN_INVALID: &str = "10002";
/// Invalid request parameter; what the capture endpoint answers to a quality
/// tier the device does not accept.
pub const CODE_INVALID_QUALITY: &str = "10001";
/// Device network exception, device response timeout, server data exception.
pub const TRANSIENT_CODES: [&str; 3] = ["20006", "20008", "49999"];

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token endpoint unreachable: {0}")]
    Connection(String),

    #[error("token request rejected ({code}): {msg}")]
    Rejected { code: String, msg: String },
}

/// A freshly issued bearer token and the API domain it is valid for.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub area_domain: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenData {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "areaDomain")]
    area_domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureData {
    #[serde(rename = "picUrl")]
    pic_url: String,
}

/// Remote EZVIZ endpoints, behind a trait so the broker, engine and
/// orchestrator can be exercised against fakes.
#[async_trait]
pub trait EzvizApi: Send + Sync {
    async fn request_token(
        &self,
        app_key: &str,
        app_secret: &Secret<String>,
    ) -> Result<TokenGrant, TokenError>;

    /// One capture request. Socket-level failures come back as
    /// `CaptureOutcome::NetworkError`, never as `Err`, so a single response
    /// classification drives the whole retry loop.
    async fn capture(
        &self,
        credentials: &CredentialRecord,
        serial: &str,
        channel: u16,
        quality: Option<u8>,
    ) -> CaptureOutcome;
}

pub struct EzvizClient {
    client: Client,
    token_domain: String,
}

impl EzvizClient {
    pub fn new(token_domain: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token_domain,
        })
    }
}

#[async_trait]
impl EzvizApi for EzvizClient {
    async fn request_token(
        &self,
        app_key: &str,
        app_secret: &Secret<String>,
    ) -> Result<TokenGrant, TokenError> {
        let url = format!("{}/api/lapp/token/get", self.token_domain);
        let form = [
            ("appKey", app_key),
            ("appSecret", app_secret.expose_secret().as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Connection(e.to_string()))?;

        let envelope: ApiEnvelope<TokenData> = response
            .json()
            .await
            .map_err(|e| TokenError::Connection(format!("unreadable token response: {}", e)))?;

        if envelope.code != CODE_SUCCESS {
            return Err(TokenError::Rejected {
                code: envelope.code,
                msg: envelope.msg.unwrap_or_default(),
            });
        }

        let data = envelope.data.ok_or_else(|| TokenError::Rejected {
            code: CODE_SUCCESS.to_string(),
            msg: "success envelope without token data".to_string(),
        })?;

        Ok(TokenGrant {
            access_token: data.access_token,
            area_domain: data
                .area_domain
                .unwrap_or_else(|| self.token_domain.clone()),
        })
    }

    async fn capture(
        &self,
        credentials: &CredentialRecord,
        serial: &str,
        channel: u16,
        quality: Option<u8>,
    ) -> CaptureOutcome {
        let url = format!("{}/api/lapp/device/capture", credentials.area_domain);
        let channel = channel.to_string();
        let mut form = vec![
            ("accessToken", credentials.access_token.as_str()),
            ("deviceSerial", serial),
            ("channelNo", channel.as_str()),
        ];
        let quality_value = quality.map(|q| q.to_string());
        if let Some(q) = &quality_value {
            form.push(("quality", q.as_str()));
        }

        debug!(serial, channel = %channel, quality = ?quality, "issuing capture request");

        let response = match self.client.post(&url).form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                return CaptureOutcome::NetworkError {
                    detail: e.to_string(),
                };
            }
        };

        let envelope: ApiEnvelope<CaptureData> = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                return CaptureOutcome::NetworkError {
                    detail: format!("unreadable capture response: {}", e),
                };
            }
        };

        classify(envelope)
    }
}

/// Maps one capture envelope onto the outcome tag set that drives the retry
/// engine and the orchestrator's refresh policy.
fn classify(envelope: ApiEnvelope<CaptureData>) -> CaptureOutcome {
    let ApiEnvelope { code, msg, data } = envelope;
    let msg = msg.unwrap_or_default();

    if code == CODE_SUCCESS {
        return match data {
            Some(data) => CaptureOutcome::Success {
                pic_url: data.pic_url,
            },
            None => CaptureOutcome::Terminal {
                code,
                msg: "success envelope without picture data".to_string(),
            },
        };
    }
    if code == CODE_TOKEN_INVALID {
        return CaptureOutcome::TokenInvalid { msg };
    }
    if code == CODE_INVALID_QUALITY {
        return CaptureOutcome::InvalidQuality { msg };
    }
    if TRANSIENT_CODES.contains(&code.as_str()) {
        return CaptureOutcome::Transient { code, msg };
    }
    CaptureOutcome::Terminal { code, msg }
}
