//! Mailer trait and SMTP implementation.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::Error as SmtpError;
use lettre::{Address, Message};
use uuid::Uuid;

use super::session::{idle_timeout, Connector};
use super::{BodyMode, DispatchReceipt, MailError, OutboundMessage};
use crate::attachments::UploadedPart;
use crate::config::MailSettings;

/// Capability to deliver messages through an outbound relay.
///
/// Implemented by [`SmtpMailer`]; substitute your own implementation in tests.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Hand one message to the relay. No retries.
    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt, MailError>;

    /// Connect and authenticate without sending anything.
    async fn verify(&self) -> Result<(), MailError>;
}

/// SMTP-based mailer using lettre, one session per operation.
#[derive(Clone)]
pub struct SmtpMailer {
    connector: Connector,
}

impl SmtpMailer {
    pub fn from_settings(settings: &MailSettings) -> Result<Self, MailError> {
        let endpoint = settings.endpoint()?;
        tracing::debug!(host = %endpoint.host, port = endpoint.port, tls = ?endpoint.tls, "configured SMTP transport");

        let credentials = Credentials::new(settings.user.clone(), settings.app_password.clone());
        Ok(SmtpMailer {
            connector: Connector::new(endpoint, credentials, settings.timeouts())?,
        })
    }

    /// Failure during MAIL, RCPT or DATA.
    fn transaction_error(&self, err: SmtpError) -> MailError {
        if let Some(limit) = idle_timeout(&err) {
            MailError::Timeout(limit)
        } else if err.is_timeout() {
            MailError::Timeout(self.connector.timeouts().socket)
        } else if err.is_permanent() || err.is_transient() {
            MailError::Rejected(err.to_string())
        } else {
            MailError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt, MailError> {
        let message_id = new_message_id(&message.from.address);
        let email = build_message(message, &message_id).await?;

        let mut conn = self.connector.open().await?;
        conn.send(email.envelope(), &email.formatted())
            .await
            .map_err(|e| self.transaction_error(e))?;
        // Already accepted; a failed QUIT changes nothing.
        if let Err(err) = conn.quit().await {
            tracing::debug!("QUIT after send failed: {err}");
        }

        Ok(DispatchReceipt { message_id })
    }

    async fn verify(&self) -> Result<(), MailError> {
        let mut conn = self.connector.open().await?;
        let alive = conn.test_connected().await;
        let _ = conn.quit().await;
        if alive {
            Ok(())
        } else {
            Err(MailError::Connection("SMTP server did not accept NOOP".into()))
        }
    }
}

fn new_message_id(sender: &str) -> String {
    let domain = sender
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{}>", Uuid::new_v4(), domain)
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

/// The uploaded content type when it parses, otherwise a guess from the filename.
fn attachment_mime(part: &UploadedPart) -> String {
    part.content_type
        .as_deref()
        .filter(|ct| ContentType::parse(ct).is_ok())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            mime_guess::from_path(&part.original_name)
                .first_or_octet_stream()
                .essence_str()
                .to_owned()
        })
}

enum Content {
    Single(SinglePart),
    Multi(MultiPart),
}

/// Build a lettre Message from our OutboundMessage.
async fn build_message(email: &OutboundMessage, message_id: &str) -> Result<Message, MailError> {
    let from_address: Address = email
        .from
        .address
        .parse()
        .map_err(|_| MailError::InvalidAddress(email.from.address.clone()))?;

    let mut builder = Message::builder()
        .from(Mailbox::new(Some(email.from.name.clone()), from_address))
        .subject(email.subject.clone())
        .message_id(Some(message_id.to_string()));

    for to in &email.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in email.cc.iter().flatten() {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in email.bcc.iter().flatten() {
        builder = builder.bcc(mailbox(bcc)?);
    }

    let content = match email.body_mode {
        BodyMode::Html => {
            let html = email.html_body.clone().unwrap_or_default();
            match &email.plain_body {
                Some(text) => Content::Multi(MultiPart::alternative_plain_html(text.clone(), html)),
                None => Content::Single(SinglePart::html(html)),
            }
        }
        BodyMode::Plain => Content::Single(SinglePart::plain(
            email.plain_body.clone().unwrap_or_default(),
        )),
    };

    let built = if email.attachments.is_empty() {
        match content {
            Content::Single(part) => builder.singlepart(part),
            Content::Multi(parts) => builder.multipart(parts),
        }
    } else {
        let mut mixed = match content {
            Content::Single(part) => MultiPart::mixed().singlepart(part),
            Content::Multi(parts) => MultiPart::mixed().multipart(parts),
        };
        for part in &email.attachments {
            let data = part.read().await.map_err(|source| MailError::Attachment {
                name: part.original_name.clone(),
                source,
            })?;
            let content_type = ContentType::parse(&attachment_mime(part))
                .map_err(|e| MailError::Build(e.to_string()))?;
            mixed = mixed.singlepart(Attachment::new(part.original_name.clone()).body(data, content_type));
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| MailError::Build(e.to_string()))
}
