use std::borrow::Cow;
use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::assemble::FormError;
use crate::attachments::AttachmentError;
use crate::mail::MailError;

/// Every way a send or verify request can fail.
///
/// Converting into a response is the outermost boundary: the full error is
/// logged and the caller gets `{ "success": false, "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("too many attachments: at most {max} files are allowed")]
    TooManyAttachments { max: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("connection to SMTP server failed: {0}")]
    TransportConnection(String),

    #[error("SMTP server rejected the message: {0}")]
    TransportRejected(String),

    #[error("SMTP operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Internal Server Error: {0:?}")]
    Internal(#[from] anyhow::Error),
}

crate::anyhow_from!(std::io::Error);
crate::anyhow_from!(tokio::task::JoinError);

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Failures are not distinguished by status code.
    pub fn http_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// The text returned to the caller. Unexpected faults are not echoed back.
    pub fn http_message(&self) -> String {
        match self {
            Error::Internal(_) => "an internal server error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<MailError> for Error {
    fn from(err: MailError) -> Self {
        match err {
            MailError::InvalidAddress(_) => Error::InvalidRequest(err.to_string().into()),
            MailError::Connection(reason) => Error::TransportConnection(reason),
            MailError::MissingConfig(_) => Error::TransportConnection(err.to_string()),
            MailError::Rejected(reason) => Error::TransportRejected(reason),
            MailError::Timeout(after) => Error::Timeout(after),
            MailError::Build(_) | MailError::Attachment { .. } => Error::Internal(err.into()),
        }
    }
}

impl From<FormError> for Error {
    fn from(err: FormError) -> Self {
        Error::InvalidRequest(err.to_string().into())
    }
}

impl From<AttachmentError> for Error {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::TooMany { max } => Error::TooManyAttachments { max },
            AttachmentError::Read { .. } => Error::InvalidRequest(err.to_string().into()),
            AttachmentError::Io(io) => io.into(),
        }
    }
}

impl From<MultipartError> for Error {
    fn from(err: MultipartError) -> Self {
        Error::InvalidRequest(err.body_text().into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!("Error Status {}: {}", self.http_code(), self);

        let body = Json(json!({
            "success": false,
            "message": self.http_message(),
        }));
        (self.http_code(), body).into_response()
    }
}
