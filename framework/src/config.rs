use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use config::ConfigError;

use crate::mail::TlsMode;

/// Load any deserializable struct from environment variables.
///
/// Keys are matched case-insensitively against field names, so `EMAIL_APP_PASSWORD`
/// fills `app_password` when loaded with the `EMAIL` prefix.
pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
    /// Same as the env loaders, but reads from `vars` instead of the process environment.
    fn from_vars(prefix: Option<&str>, vars: HashMap<String, String>) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }

    fn from_vars(prefix: Option<&str>, vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = match prefix {
            Some(prefix) => config::Environment::with_prefix(prefix),
            None => config::Environment::default(),
        };
        config::Config::builder()
            .add_source(env.source(Some(vars)))
            .build()?
            .try_deserialize()
    }
}

pub const MAIL_ENV_PREFIX: &str = "EMAIL";

/// SMTP account and connection settings, read from `EMAIL_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    /// Authenticated account address; also the fixed sender address.
    pub user: String,

    /// Account (app) password.
    pub app_password: String,

    /// Well-known provider name such as `gmail`. Ignored when `host` is set.
    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Implicit TLS (SMTPS) when true, STARTTLS when false.
    #[serde(default)]
    pub secure: Option<bool>,

    /// Explicit TLS mode, takes precedence over `secure`.
    #[serde(default)]
    pub tls: Option<TlsMode>,

    /// Display name used for the sender mailbox.
    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Milliseconds allowed to open the TCP/TLS connection.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Milliseconds allowed for the server greeting.
    #[serde(default = "default_greeting_timeout")]
    pub greeting_timeout: u64,

    /// Milliseconds of socket inactivity before an operation fails.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout: u64,
}

fn default_from_name() -> String {
    "Mailgate".to_string()
}

fn default_connection_timeout() -> u64 {
    10_000
}

fn default_greeting_timeout() -> u64 {
    5_000
}

fn default_socket_timeout() -> u64 {
    10_000
}

impl MailSettings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(MAIL_ENV_PREFIX)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connection: Duration::from_millis(self.connection_timeout),
            greeting: Duration::from_millis(self.greeting_timeout),
            socket: Duration::from_millis(self.socket_timeout),
        }
    }
}

/// Limits applied to one SMTP session.
///
/// None of them caps the session as a whole: a relay that keeps answering
/// within `socket` may take as long as it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Opening the TCP connection, plus the TLS handshake for implicit TLS.
    pub connection: Duration,
    /// Wait for the server greeting once connected.
    pub greeting: Duration,
    /// Longest wait for any single read or write after the greeting.
    pub socket: Duration,
}

/// Where uploaded attachments live while a request is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Disk,
}

/// HTTP server settings, read from unprefixed variables (`PORT`, `UPLOAD_STORAGE`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub upload_storage: StorageKind,

    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    3000
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

impl ServerSettings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            port: default_port(),
            upload_storage: StorageKind::default(),
            upload_dir: default_upload_dir(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
