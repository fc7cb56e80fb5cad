use crate::error::JobError;
use secrecy::Secret;
use serde::Deserialize;

/// Raw job configuration. Accounts can be given either through the legacy
/// flat fields (`app_key`/`app_secret`/`token`, single-account installs) or
/// through the explicit `accounts` list; both shapes may coexist.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app_key: Option<String>,
    pub app_secret: Option<Secret<String>>,
    /// Pre-supplied access token for the legacy account, used to seed the
    /// credential cache.
    pub token: Option<String>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    /// Global default snapshot quality tier.
    pub quality: Option<u8>,
    #[serde(default)]
    pub retry: RetryConfig,
    pub mqtt: MqttConfig,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Domain used for token requests and as the capture fallback when the
    /// token response carries no area domain.
    #[serde(default = "default_api_domain")]
    pub api_domain: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: Option<String>,
    pub app_key: Option<String>,
    pub app_secret: Option<Secret<String>>,
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub channel: Option<u16>,
    pub quality: Option<u8>,
    /// Account id; omitted cameras attach to the legacy account.
    pub account: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retry attempts allowed after the initial request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on every transient retry.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    /// Leading topic segment: events go to `<namespace>/snapshot/<slug>`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_cache_dir() -> String {
    "/data/credentials".to_string()
}

fn default_api_domain() -> String {
    "https://open.ezvizlife.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_namespace() -> String {
    "ezviz".to_string()
}

fn default_client_id() -> String {
    "snapshot-service".to_string()
}

impl Config {
    /// Loads from an optional `configuration` file plus `EZVIZ__*`
    /// environment overrides.
    pub fn load() -> Result<Self, JobError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("EZVIZ").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
