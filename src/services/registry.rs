//! Builds the validated account and camera sets from raw configuration.
//!
//! Invalid entries are dropped with a diagnostic, never fatally: one
//! misconfigured camera must not stop the rest of the batch.

use crate::config::Config;
use crate::models::{Account, Camera};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use tracing::warn;

/// Synthesized id for the account described by the legacy flat
/// `app_key`/`app_secret` fields.
pub const LEGACY_ACCOUNT_ID: &str = "default";

/// Maps account id to account. The legacy flat fields are inserted first, so
/// an explicit list entry with the same id wins.
pub fn build_accounts(config: &Config) -> BTreeMap<String, Account> {
    let mut accounts = BTreeMap::new();

    if config.app_key.is_some() || config.app_secret.is_some() {
        match (&config.app_key, &config.app_secret) {
            (Some(key), Some(secret))
                if !key.is_empty() && !secret.expose_secret().is_empty() =>
            {
                accounts.insert(
                    LEGACY_ACCOUNT_ID.to_string(),
                    Account {
                        id: LEGACY_ACCOUNT_ID.to_string(),
                        app_key: key.clone(),
                        app_secret: secret.clone(),
                        default_quality: config.quality,
                    },
                );
            }
            _ => warn!("legacy account is missing app_key or app_secret, dropping it"),
        }
    }

    for entry in &config.accounts {
        let (Some(id), Some(key), Some(secret)) = (&entry.id, &entry.app_key, &entry.app_secret)
        else {
            warn!(
                id = entry.id.as_deref().unwrap_or("<unset>"),
                "account entry is missing id, app_key or app_secret, dropping it"
            );
            continue;
        };
        if id.is_empty() || key.is_empty() || secret.expose_secret().is_empty() {
            warn!(id = %id, "account entry has empty credentials, dropping it");
            continue;
        }
        accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                app_key: key.clone(),
                app_secret: secret.clone(),
                default_quality: entry.quality.or(config.quality),
            },
        );
    }

    accounts
}

/// Cameras with a serial and a resolvable account, in configured order.
/// A camera without an explicit account reference attaches to the legacy
/// account when one exists.
pub fn build_cameras(config: &Config, accounts: &BTreeMap<String, Account>) -> Vec<Camera> {
    let mut cameras = Vec::new();

    for entry in &config.cameras {
        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| "unnamed camera".to_string());

        let Some(serial) = entry.serial.clone().filter(|s| !s.is_empty()) else {
            warn!(camera = %name, "camera has no serial number, skipping it");
            continue;
        };

        let account_id = match &entry.account {
            Some(id) if accounts.contains_key(id) => id.clone(),
            Some(id) => {
                warn!(camera = %name, account = %id, "camera references an unknown account, skipping it");
                continue;
            }
            None if accounts.contains_key(LEGACY_ACCOUNT_ID) => LEGACY_ACCOUNT_ID.to_string(),
            None => {
                warn!(
                    camera = %name,
                    "camera has no account reference and no legacy account is configured, skipping it"
                );
                continue;
            }
        };

        cameras.push(Camera {
            name,
            serial,
            channel: entry.channel.unwrap_or(1),
            quality: entry.quality,
            account_id,
        });
    }

    cameras
}
