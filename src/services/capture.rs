//! Capture retry engine.
//!
//! One camera's capture sequence is an explicit loop over the classified
//! outcome of each attempt, so the maximum number of requests is bounded by
//! the retry budget rather than by recursion depth.

use crate::models::{Camera, CaptureOutcome, CaptureResult, CredentialRecord};
use crate::services::ezviz::EzvizApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Retry tuning for one capture sequence.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retry attempts allowed after the initial request.
    pub max_retries: u32,
    /// Backoff before the first transient retry; doubles on each one after.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

pub struct CaptureEngine {
    api: Arc<dyn EzvizApi>,
    policy: RetryPolicy,
}

impl CaptureEngine {
    pub fn new(api: Arc<dyn EzvizApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// Runs one camera's capture sequence to a terminal result.
    ///
    /// Transient outcomes (socket failures and the transient upstream codes)
    /// retry with doubling backoff. An invalid-quality rejection retries once
    /// with the quality parameter omitted and the backoff value unchanged.
    /// A token-invalid code is returned terminal so the orchestrator can
    /// refresh the account; the engine never retries it.
    pub async fn capture_with_retry(
        &self,
        camera: &Camera,
        credentials: &CredentialRecord,
        quality: Option<u8>,
    ) -> CaptureResult {
        let mut quality = quality;
        let mut retries_remaining = self.policy.max_retries;
        let mut backoff = self.policy.initial_backoff;
        let mut attempt: u32 = 1;

        loop {
            let outcome = self
                .api
                .capture(credentials, &camera.serial, camera.channel, quality)
                .await;

            match &outcome {
                CaptureOutcome::NetworkError { .. } | CaptureOutcome::Transient { .. }
                    if retries_remaining > 0 =>
                {
                    warn!(
                        camera = %camera.name,
                        serial = %camera.serial,
                        attempt,
                        retries_remaining,
                        backoff_secs = backoff.as_secs(),
                        outcome = ?outcome,
                        "transient capture failure, retrying after backoff"
                    );
                    sleep(backoff).await;
                    retries_remaining -= 1;
                    backoff *= 2;
                }
                CaptureOutcome::InvalidQuality { .. }
                    if quality.is_some() && retries_remaining > 0 =>
                {
                    // Immediate retry with the parameter dropped; the current
                    // backoff value carries over untouched.
                    warn!(
                        camera = %camera.name,
                        serial = %camera.serial,
                        quality = quality.unwrap_or_default(),
                        "quality tier rejected, retrying without the quality parameter"
                    );
                    quality = None;
                    retries_remaining -= 1;
                }
                _ => {
                    if outcome.is_success() && attempt > 1 {
                        info!(
                            camera = %camera.name,
                            serial = %camera.serial,
                            attempt,
                            "capture succeeded after retry"
                        );
                    }
                    return CaptureResult {
                        camera: camera.clone(),
                        outcome,
                        quality_used: quality,
                        area_domain: credentials.area_domain.clone(),
                    };
                }
            }
            attempt += 1;
        }
    }
}
