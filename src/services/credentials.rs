//! Per-account credential cache and broker.

use crate::models::{Account, CredentialRecord};
use crate::services::ezviz::{EzvizApi, TokenError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token service failure for account '{account}': {source}")]
    Token {
        account: String,
        #[source]
        source: TokenError,
    },

    #[error("credential cache write for account '{account}': {source}")]
    Store {
        account: String,
        #[source]
        source: std::io::Error,
    },
}

/// Durable one-file-per-account storage of the last known token. Writes are
/// whole-record overwrites; concurrent runs against the same directory must
/// be serialized by the external scheduler.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{account_id}.json"))
    }

    /// Returns the stored record, or `None` for anything unreadable: a
    /// missing or corrupt file just means the token gets fetched again.
    pub fn load(&self, account_id: &str) -> Option<CredentialRecord> {
        let path = self.record_path(account_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CredentialRecord>(&raw) {
            Ok(record) if record.account_id == account_id => Some(record),
            Ok(record) => {
                warn!(
                    account = account_id,
                    found = %record.account_id,
                    path = %path.display(),
                    "cached record belongs to a different account, ignoring it"
                );
                None
            }
            Err(e) => {
                warn!(
                    account = account_id,
                    path = %path.display(),
                    error = %e,
                    "cached record is unreadable, a fresh token will be requested"
                );
                None
            }
        }
    }

    pub fn save(&self, record: &CredentialRecord) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_vec_pretty(record).map_err(std::io::Error::from)?;
        std::fs::write(self.record_path(&record.account_id), raw)
    }
}

/// Obtains and renews account tokens. Cache hits are returned without any
/// expiry check; validity is only ever disproven by the capture API.
pub struct CredentialBroker {
    api: Arc<dyn EzvizApi>,
    store: CredentialStore,
}

impl CredentialBroker {
    pub fn new(api: Arc<dyn EzvizApi>, store: CredentialStore) -> Self {
        Self { api, store }
    }

    /// Seeds the cache with a pre-supplied record unless one already exists.
    pub fn seed(&self, record: &CredentialRecord) {
        if self.store.load(&record.account_id).is_some() {
            return;
        }
        if let Err(e) = self.store.save(record) {
            warn!(
                account = %record.account_id,
                error = %e,
                "failed to seed credential cache"
            );
        }
    }

    /// Returns a usable credential record for the account: the cached one
    /// when it holds a non-empty token, otherwise a freshly fetched one.
    pub async fn obtain(&self, account: &Account) -> Result<CredentialRecord, CredentialError> {
        if let Some(record) = self.store.load(&account.id) {
            if !record.access_token.is_empty() {
                debug!(account = %account.id, "using cached access token");
                return Ok(record);
            }
        }
        self.refresh(account).await
    }

    /// Unconditionally fetches a new token, bypassing the cache, and
    /// persists it on success.
    pub async fn refresh(&self, account: &Account) -> Result<CredentialRecord, CredentialError> {
        let grant = self
            .api
            .request_token(&account.app_key, &account.app_secret)
            .await
            .map_err(|source| CredentialError::Token {
                account: account.id.clone(),
                source,
            })?;

        let record = CredentialRecord {
            account_id: account.id.clone(),
            access_token: grant.access_token,
            area_domain: grant.area_domain,
        };
        self.store
            .save(&record)
            .map_err(|source| CredentialError::Store {
                account: account.id.clone(),
                source,
            })?;

        info!(account = %account.id, domain = %record.area_domain, "access token acquired and cached");
        Ok(record)
    }
}
