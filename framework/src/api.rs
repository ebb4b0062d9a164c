//! HTTP endpoints: send, verify and health.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::assemble::{EmailFields, MessageAssembler};
use crate::attachments::{AttachmentCollector, StoragePolicy, UploadedPart};
use crate::config::{MailSettings, ServerSettings};
use crate::error::{Error, Result};
use crate::mail::{DispatchOutcome, MailError, Mailer, OutboundMessage, Sender, SmtpMailer};

/// Form field that carries file parts.
pub const ATTACHMENT_FIELD: &str = "attachments";

type JsonResult<T> = Result<Json<T>>;

/// Shared, immutable per-process state handed to every handler.
#[derive(Clone)]
pub struct Context {
    pub mailer: Arc<dyn Mailer>,
    pub assembler: Arc<MessageAssembler>,
    pub attachments: Arc<AttachmentCollector>,
    pub body_limit: usize,
}

impl Context {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        assembler: MessageAssembler,
        attachments: AttachmentCollector,
    ) -> Self {
        Context {
            mailer,
            assembler: Arc::new(assembler),
            attachments: Arc::new(attachments),
            body_limit: ServerSettings::default().max_body_bytes,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Wire up the SMTP mailer, fixed sender and upload policy from settings.
    pub fn from_settings(mail: &MailSettings, server: &ServerSettings) -> Result<Self, MailError> {
        let mailer = SmtpMailer::from_settings(mail)?;
        let assembler = MessageAssembler::new(Sender::new(&mail.from_name, &mail.user));
        let attachments = AttachmentCollector::new(StoragePolicy::from(server));
        Ok(Context::new(Arc::new(mailer), assembler, attachments)
            .with_body_limit(server.max_body_bytes))
    }
}

/// Routes at the root, plus the same send/verify routes under `/api`.
pub fn router(ctx: Context) -> Router {
    let mail_routes = Router::new()
        .route("/send-email", post(send_email))
        .route("/verify", get(verify));

    Router::new()
        .merge(mail_routes.clone())
        .nest("/api", mail_routes)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(ctx.body_limit))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn send_email(
    State(ctx): State<Context>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> JsonResult<SendResponse> {
    let multipart = multipart.map_err(|e| Error::InvalidRequest(e.body_text().into()))?;

    let (fields, attachments) = collect_form(&ctx.attachments, multipart).await?;
    tracing::info!(
        to = ?fields.to,
        subject = ?fields.subject,
        email_type = ?fields.email_type,
        file_count = attachments.len(),
        "received email request"
    );

    let message = ctx.assembler.assemble(fields, attachments)?;

    // Detached so a client disconnect does not abort a dispatch already in flight.
    let mailer = ctx.mailer.clone();
    let receipt = tokio::spawn(async move { dispatch(mailer.as_ref(), message).await }).await??;
    tracing::info!(message_id = %receipt.message_id, "email sent");

    Ok(Json(SendResponse {
        success: true,
        message: "Email sent successfully!".to_string(),
        message_id: receipt.message_id,
    }))
}

async fn verify(State(ctx): State<Context>) -> JsonResult<VerifyResponse> {
    tracing::info!("verifying SMTP configuration");
    ctx.mailer.verify().await?;
    tracing::info!("SMTP verification successful");

    Ok(Json(VerifyResponse {
        success: true,
        message: "SMTP configuration is valid!".to_string(),
    }))
}

/// Send `message` once, then release its attachments whatever the outcome.
pub async fn dispatch(mailer: &dyn Mailer, message: OutboundMessage) -> DispatchOutcome {
    let result = mailer.send(&message).await;
    message.discard_attachments().await;
    result.map_err(Error::from)
}

/// Read every multipart field: text fields into [`EmailFields`], files into the collector.
async fn collect_form(
    collector: &AttachmentCollector,
    mut multipart: Multipart,
) -> Result<(EmailFields, Vec<UploadedPart>)> {
    let mut fields = EmailFields::default();
    let mut uploads = collector.start();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();

        match field.file_name().map(str::to_owned) {
            Some(file_name) => {
                if name != ATTACHMENT_FIELD {
                    return Err(Error::InvalidRequest(
                        format!("unexpected file field `{name}`").into(),
                    ));
                }
                // An empty file input still submits a part, with an empty filename.
                if file_name.is_empty() {
                    continue;
                }
                let content_type = field.content_type().map(str::to_owned);
                uploads.store(file_name, content_type, field).await?;
            }
            None => {
                let value = field.text().await?;
                if !fields.set(&name, value) {
                    tracing::debug!(field = %name, "ignoring unknown form field");
                }
            }
        }
    }

    Ok((fields, uploads.finish()))
}
