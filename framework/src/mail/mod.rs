//! Outbound message model and the mail transport capability.
//!
//! The [`Mailer`] trait is the seam between request handling and the SMTP relay.
//! [`SmtpMailer`] implements it on top of [lettre](https://lettre.rs); tests
//! substitute their own implementation.
//!
//! # Environment Variables
//!
//! [`SmtpMailer::from_settings`] consumes a [`MailSettings`](crate::config::MailSettings),
//! normally loaded from:
//!
//! | Variable | Required | Description |
//! |----------|----------|-------------|
//! | `EMAIL_USER` | Yes | Account address, also used as the sender |
//! | `EMAIL_APP_PASSWORD` | Yes | Account (app) password |
//! | `EMAIL_SERVICE` | No | Well-known provider, e.g. `gmail` (default when no host) |
//! | `EMAIL_HOST` | No | Explicit SMTP host, overrides `EMAIL_SERVICE` |
//! | `EMAIL_PORT` | No | Port (default: 465 for implicit TLS, else 587) |
//! | `EMAIL_SECURE` | No | `true` for implicit TLS, `false` for STARTTLS |
//! | `EMAIL_TLS` | No | `tls`, `starttls` or `none`; overrides `EMAIL_SECURE` |
//! | `EMAIL_FROM_NAME` | No | Sender display name |
//! | `EMAIL_CONNECTION_TIMEOUT` | No | Milliseconds (default: 10000) |
//! | `EMAIL_GREETING_TIMEOUT` | No | Milliseconds (default: 5000) |
//! | `EMAIL_SOCKET_TIMEOUT` | No | Milliseconds (default: 10000) |

mod mailer;
mod message;
mod service;
mod session;

pub use mailer::{Mailer, SmtpMailer};
pub use message::{BodyMode, OutboundMessage, Sender};
pub use service::{Endpoint, TlsMode};

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Returned by a [`Mailer`] once the relay accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    /// Transport-defined identifier, opaque to callers.
    pub message_id: String,
}

/// Result of handing one message to the transport.
pub type DispatchOutcome = Result<DispatchReceipt, crate::Error>;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("missing required config: {0}")]
    MissingConfig(String),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("failed to read attachment {name}: {source}")]
    Attachment {
        name: String,
        source: std::io::Error,
    },

    #[error("connection to SMTP server failed: {0}")]
    Connection(String),

    #[error("SMTP server rejected the message: {0}")]
    Rejected(String),

    #[error("SMTP operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}
