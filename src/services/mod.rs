pub mod capture;
pub mod credentials;
pub mod ezviz;
pub mod orchestrator;
pub mod publisher;
pub mod registry;

pub use capture::{CaptureEngine, RetryPolicy};
pub use credentials::{CredentialBroker, CredentialError, CredentialStore};
pub use ezviz::{EzvizApi, EzvizClient, TokenError, TokenGrant};
pub use orchestrator::Orchestrator;
pub use publisher::{MessageSink, MockSink, MqttSink, ResultPublisher, SinkError, slugify};
pub use registry::{LEGACY_ACCOUNT_ID, build_accounts, build_cameras};
