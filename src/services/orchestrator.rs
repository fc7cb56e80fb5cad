//! Drives one batch pass: per-account token acquisition, camera capture and
//! the refresh-then-replay recovery policy.

use crate::models::{Account, Camera, CaptureOutcome, CaptureResult, CredentialRecord};
use crate::services::capture::CaptureEngine;
use crate::services::credentials::{CredentialBroker, CredentialError};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct Orchestrator {
    broker: CredentialBroker,
    engine: CaptureEngine,
}

impl Orchestrator {
    pub fn new(broker: CredentialBroker, engine: CaptureEngine) -> Self {
        Self { broker, engine }
    }

    /// Runs every account independently, in account-id order; a failure in
    /// one account never affects another. Returns the terminal results of
    /// all cameras that were attempted.
    pub async fn run(
        &self,
        accounts: &BTreeMap<String, Account>,
        cameras: &[Camera],
    ) -> Vec<CaptureResult> {
        let mut results = Vec::new();

        for (id, account) in accounts {
            let account_cameras: Vec<&Camera> =
                cameras.iter().filter(|c| &c.account_id == id).collect();
            if account_cameras.is_empty() {
                continue;
            }

            info!(account = %id, cameras = account_cameras.len(), "processing account");
            match self.run_account(account, &account_cameras).await {
                Ok(mut account_results) => results.append(&mut account_results),
                Err(e) => {
                    warn!(account = %id, error = %e, "skipping account cameras for this run");
                }
            }
        }

        results
    }

    /// One account's cameras in configured order. A token-invalid outcome
    /// stops the first pass, triggers exactly one credential refresh, and
    /// replays every camera of the account with the new token. The replay's
    /// results replace the first pass wholesale, so each camera ends the run
    /// with exactly one terminal result and one publication at most.
    async fn run_account(
        &self,
        account: &Account,
        cameras: &[&Camera],
    ) -> Result<Vec<CaptureResult>, CredentialError> {
        let credentials = self.broker.obtain(account).await?;

        let (first_pass, token_invalid) = self.run_pass(account, cameras, &credentials).await;
        if !token_invalid {
            return Ok(first_pass);
        }

        info!(account = %account.id, "token rejected upstream, refreshing credentials");
        match self.broker.refresh(account).await {
            Ok(refreshed) => {
                info!(account = %account.id, "replaying all of the account's cameras with the new token");
                let (replay, still_invalid) = self.run_pass(account, cameras, &refreshed).await;
                if still_invalid {
                    warn!(
                        account = %account.id,
                        "token rejected again after refresh, abandoning the account's remaining cameras"
                    );
                }
                Ok(replay)
            }
            Err(e) => {
                warn!(
                    account = %account.id,
                    error = %e,
                    "credential refresh failed, abandoning the account's remaining cameras"
                );
                // First-pass results that already reached a terminal outcome
                // are kept.
                Ok(first_pass)
            }
        }
    }

    /// One ordered pass over the account's cameras. Stops at the first
    /// token-invalid outcome; cameras not yet attempted stay unattempted.
    async fn run_pass(
        &self,
        account: &Account,
        cameras: &[&Camera],
        credentials: &CredentialRecord,
    ) -> (Vec<CaptureResult>, bool) {
        let mut results = Vec::new();

        for camera in cameras {
            let quality = camera.quality.or(account.default_quality);
            let result = self
                .engine
                .capture_with_retry(camera, credentials, quality)
                .await;
            let token_invalid = matches!(result.outcome, CaptureOutcome::TokenInvalid { .. });
            results.push(result);
            if token_invalid {
                return (results, true);
            }
        }

        (results, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::capture::RetryPolicy;
    use crate::services::credentials::CredentialStore;
    use crate::services::ezviz::{EzvizApi, TokenError, TokenGrant};
    use async_trait::async_trait;
    use secrecy::Secret;
    use std::sync::{Arc, Mutex};

    /// Fake API: token issuance hands out "t1", "t2", ... per account key,
    /// rejecting keys listed as bad; captures answer from a per-token rule.
    struct FakeApi {
        bad_keys: Vec<String>,
        issued: Mutex<u32>,
        /// Tokens whose captures answer token-invalid.
        stale_tokens: Mutex<Vec<String>>,
        capture_calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                bad_keys: Vec::new(),
                issued: Mutex::new(0),
                stale_tokens: Mutex::new(Vec::new()),
                capture_calls: Mutex::new(Vec::new()),
            }
        }

        fn rejecting_key(mut self, key: &str) -> Self {
            self.bad_keys.push(key.to_string());
            self
        }

        fn with_stale_token(self, token: &str) -> Self {
            self.stale_tokens.lock().unwrap().push(token.to_string());
            self
        }

        fn capture_calls(&self) -> Vec<(String, String)> {
            self.capture_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EzvizApi for FakeApi {
        async fn request_token(
            &self,
            app_key: &str,
            _app_secret: &Secret<String>,
        ) -> Result<TokenGrant, TokenError> {
            if self.bad_keys.iter().any(|k| k == app_key) {
                return Err(TokenError::Rejected {
                    code: "10005".to_string(),
                    msg: "appKey abnormal".to_string(),
                });
            }
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            Ok(TokenGrant {
                access_token: format!("t{}", issued),
                area_domain: "https://isgp.ezvizlife.com".to_string(),
            })
        }

        async fn capture(
            &self,
            credentials: &CredentialRecord,
            serial: &str,
            _channel: u16,
            _quality: Option<u8>,
        ) -> CaptureOutcome {
            self.capture_calls
                .lock()
                .unwrap()
                .push((credentials.access_token.clone(), serial.to_string()));
            if self
                .stale_tokens
                .lock()
                .unwrap()
                .contains(&credentials.access_token)
            {
                CaptureOutcome::TokenInvalid {
                    msg: "accessToken expired".to_string(),
                }
            } else {
                CaptureOutcome::Success {
                    pic_url: format!("https://pic/{}.jpg", serial),
                }
            }
        }
    }

    fn account(id: &str, key: &str) -> Account {
        Account {
            id: id.to_string(),
            app_key: key.to_string(),
            app_secret: Secret::new("secret".to_string()),
            default_quality: None,
        }
    }

    fn camera(serial: &str, account_id: &str) -> Camera {
        Camera {
            name: format!("cam {}", serial),
            serial: serial.to_string(),
            channel: 1,
            quality: None,
            account_id: account_id.to_string(),
        }
    }

    fn orchestrator(api: Arc<dyn EzvizApi>) -> Orchestrator {
        let store =
            CredentialStore::new(format!("target/test-orchestrator-{}", uuid::Uuid::new_v4()));
        let broker = CredentialBroker::new(api.clone(), store);
        let engine = CaptureEngine::new(api, RetryPolicy::default());
        Orchestrator::new(broker, engine)
    }

    fn accounts(list: Vec<Account>) -> BTreeMap<String, Account> {
        list.into_iter().map(|a| (a.id.clone(), a)).collect()
    }

    #[tokio::test]
    async fn every_camera_gets_exactly_one_terminal_result() {
        let api = Arc::new(FakeApi::new());
        let orchestrator = orchestrator(api.clone());

        let accounts = accounts(vec![account("x", "key-x")]);
        let cameras = vec![camera("A", "x"), camera("B", "x"), camera("C", "x")];

        let results = orchestrator.run(&accounts, &cameras).await;

        assert_eq!(results.len(), 3);
        let mut serials: Vec<&str> =
            results.iter().map(|r| r.camera.serial.as_str()).collect();
        serials.sort_unstable();
        assert_eq!(serials, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn token_invalid_triggers_one_refresh_and_a_full_account_replay() {
        // First issued token t1 is stale; A fails on it before B is tried.
        let api = Arc::new(FakeApi::new().with_stale_token("t1"));
        let orchestrator = orchestrator(api.clone());

        let accounts = accounts(vec![account("x", "key-x")]);
        let cameras = vec![camera("A", "x"), camera("B", "x")];

        let results = orchestrator.run(&accounts, &cameras).await;

        // Both cameras end with a success from the replay, B included even
        // though it was never attempted in the first pass.
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome.is_success()));

        let calls = api.capture_calls();
        assert_eq!(
            calls,
            vec![
                ("t1".to_string(), "A".to_string()),
                ("t2".to_string(), "A".to_string()),
                ("t2".to_string(), "B".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn replay_reissues_cameras_that_already_succeeded() {
        // A succeeds on t1, then the token expires before B. The replay
        // redoes both, A's first-pass success included.
        let api = Arc::new(FlipApi::new());
        let orchestrator = orchestrator(api.clone());

        let accounts = accounts(vec![account("x", "key-x")]);
        let cameras = vec![camera("A", "x"), camera("B", "x")];

        let results = orchestrator.run(&accounts, &cameras).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome.is_success()));

        let a_calls = api
            .capture_calls()
            .into_iter()
            .filter(|(_, serial)| serial == "A")
            .count();
        assert_eq!(a_calls, 2);
    }

    /// Token t1 serves camera A successfully, then expires before B.
    struct FlipApi {
        issued: Mutex<u32>,
        t1_calls: Mutex<u32>,
        capture_calls: Mutex<Vec<(String, String)>>,
    }

    impl FlipApi {
        fn new() -> Self {
            Self {
                issued: Mutex::new(0),
                t1_calls: Mutex::new(0),
                capture_calls: Mutex::new(Vec::new()),
            }
        }

        fn capture_calls(&self) -> Vec<(String, String)> {
            self.capture_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EzvizApi for FlipApi {
        async fn request_token(
            &self,
            _app_key: &str,
            _app_secret: &Secret<String>,
        ) -> Result<TokenGrant, TokenError> {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            Ok(TokenGrant {
                access_token: format!("t{}", issued),
                area_domain: "https://isgp.ezvizlife.com".to_string(),
            })
        }

        async fn capture(
            &self,
            credentials: &CredentialRecord,
            serial: &str,
            _channel: u16,
            _quality: Option<u8>,
        ) -> CaptureOutcome {
            self.capture_calls
                .lock()
                .unwrap()
                .push((credentials.access_token.clone(), serial.to_string()));
            if credentials.access_token == "t1" {
                let mut t1_calls = self.t1_calls.lock().unwrap();
                *t1_calls += 1;
                if *t1_calls > 1 {
                    return CaptureOutcome::TokenInvalid {
                        msg: "accessToken expired".to_string(),
                    };
                }
            }
            CaptureOutcome::Success {
                pic_url: format!("https://pic/{}.jpg", serial),
            }
        }
    }

    #[tokio::test]
    async fn failed_account_never_blocks_another_account() {
        let api = Arc::new(FakeApi::new().rejecting_key("key-x"));
        let orchestrator = orchestrator(api.clone());

        let accounts = accounts(vec![account("x", "key-x"), account("y", "key-y")]);
        let cameras = vec![camera("A", "x"), camera("B", "y")];

        let results = orchestrator.run(&accounts, &cameras).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].camera.serial, "B");
        assert!(results[0].outcome.is_success());
    }

    #[tokio::test]
    async fn refresh_failure_keeps_first_pass_results() {
        // t1 is stale and the refresh itself is rejected: the token-invalid
        // result from the first pass is all the account produces.
        let api = Arc::new(OneShotTokenApi::new());
        let orchestrator = orchestrator(api.clone());

        let accounts = accounts(vec![account("x", "key-x")]);
        let cameras = vec![camera("A", "x"), camera("B", "x")];

        let results = orchestrator.run(&accounts, &cameras).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].camera.serial, "A");
        assert!(matches!(
            results[0].outcome,
            CaptureOutcome::TokenInvalid { .. }
        ));
    }

    /// Issues one stale token, then rejects all further token requests.
    struct OneShotTokenApi {
        issued: Mutex<u32>,
    }

    impl OneShotTokenApi {
        fn new() -> Self {
            Self {
                issued: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl EzvizApi for OneShotTokenApi {
        async fn request_token(
            &self,
            _app_key: &str,
            _app_secret: &Secret<String>,
        ) -> Result<TokenGrant, TokenError> {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            if *issued > 1 {
                return Err(TokenError::Connection("token endpoint down".to_string()));
            }
            Ok(TokenGrant {
                access_token: "t1".to_string(),
                area_domain: "https://isgp.ezvizlife.com".to_string(),
            })
        }

        async fn capture(
            &self,
            _credentials: &CredentialRecord,
            _serial: &str,
            _channel: u16,
            _quality: Option<u8>,
        ) -> CaptureOutcome {
            CaptureOutcome::TokenInvalid {
                msg: "accessToken expired".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn camera_quality_override_beats_account_default() {
        let api = Arc::new(QualityRecordingApi::new());
        let orchestrator = orchestrator(api.clone());

        let mut acct = account("x", "key-x");
        acct.default_quality = Some(3);
        let accounts = accounts(vec![acct]);
        let cameras = vec![
            Camera {
                quality: Some(1),
                ..camera("A", "x")
            },
            camera("B", "x"),
        ];

        orchestrator.run(&accounts, &cameras).await;

        assert_eq!(api.qualities(), vec![Some(1), Some(3)]);
    }

    struct QualityRecordingApi {
        qualities: Mutex<Vec<Option<u8>>>,
    }

    impl QualityRecordingApi {
        fn new() -> Self {
            Self {
                qualities: Mutex::new(Vec::new()),
            }
        }

        fn qualities(&self) -> Vec<Option<u8>> {
            self.qualities.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EzvizApi for QualityRecordingApi {
        async fn request_token(
            &self,
            _app_key: &str,
            _app_secret: &Secret<String>,
        ) -> Result<TokenGrant, TokenError> {
            Ok(TokenGrant {
                access_token: "t1".to_string(),
                area_domain: "https://isgp.ezvizlife.com".to_string(),
            })
        }

        async fn capture(
            &self,
            _credentials: &CredentialRecord,
            serial: &str,
            _channel: u16,
            quality: Option<u8>,
        ) -> CaptureOutcome {
            self.qualities.lock().unwrap().push(quality);
            CaptureOutcome::Success {
                pic_url: format!("https://pic/{}.jpg", serial),
            }
        }
    }
}
