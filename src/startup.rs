//! Application wiring and the single batch pass.

use crate::config::Config;
use crate::error::JobError;
use crate::models::{Account, Camera, CredentialRecord};
use crate::services::{
    CaptureEngine, CredentialBroker, CredentialStore, EzvizApi, EzvizClient, MessageSink,
    MqttSink, Orchestrator, ResultPublisher, RetryPolicy, build_accounts, build_cameras,
    registry::LEGACY_ACCOUNT_ID,
};
use anyhow::anyhow;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Container for one run of the job. Built from configuration, runs a single
/// pass over all accounts and cameras, then exits.
pub struct Application {
    accounts: BTreeMap<String, Account>,
    cameras: Vec<Camera>,
    orchestrator: Orchestrator,
    publisher: ResultPublisher,
    sink: Arc<dyn MessageSink>,
}

impl Application {
    pub fn build(config: Config) -> Result<Self, JobError> {
        let accounts = build_accounts(&config);
        let cameras = build_cameras(&config, &accounts);

        // The only fatal condition: nothing at all to do.
        if accounts.is_empty() {
            return Err(JobError::Configuration(anyhow!(
                "no usable accounts configured"
            )));
        }
        if cameras.is_empty() {
            return Err(JobError::Configuration(anyhow!(
                "no usable cameras configured"
            )));
        }

        let api: Arc<dyn EzvizApi> = Arc::new(EzvizClient::new(
            config.api_domain.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )?);

        let broker = CredentialBroker::new(api.clone(), CredentialStore::new(&config.cache_dir));
        if let Some(token) = &config.token {
            // A token supplied in the legacy options acts as the initial
            // cached credential for the legacy account.
            if accounts.contains_key(LEGACY_ACCOUNT_ID) {
                broker.seed(&CredentialRecord {
                    account_id: LEGACY_ACCOUNT_ID.to_string(),
                    access_token: token.clone(),
                    area_domain: config.api_domain.clone(),
                });
            }
        }

        let engine = CaptureEngine::new(
            api,
            RetryPolicy {
                max_retries: config.retry.max_retries,
                initial_backoff: Duration::from_secs(config.retry.backoff_secs),
            },
        );
        let orchestrator = Orchestrator::new(broker, engine);

        let sink: Arc<dyn MessageSink> = Arc::new(MqttSink::connect(&config.mqtt));
        let publisher = ResultPublisher::new(
            sink.clone(),
            config.mqtt.namespace.clone(),
            config.mqtt.retain,
            Utc::now(),
        );

        Ok(Self {
            accounts,
            cameras,
            orchestrator,
            publisher,
            sink,
        })
    }

    /// One pass over every account and camera, then sink shutdown.
    pub async fn run_once(self) -> Result<(), JobError> {
        info!(
            accounts = self.accounts.len(),
            cameras = self.cameras.len(),
            "starting snapshot batch"
        );

        let results = self.orchestrator.run(&self.accounts, &self.cameras).await;
        for result in &results {
            self.publisher.publish_result(result).await;
        }

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "sink shutdown failed");
        }

        info!(results = results.len(), "snapshot batch complete");
        Ok(())
    }
}
