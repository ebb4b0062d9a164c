//! Normalized outbound message.

use crate::attachments::UploadedPart;

/// Whether the primary content is plain text or HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Plain,
    Html,
}

impl BodyMode {
    /// `Html` only for the exact literal `"html"`; anything else, including absence, is `Plain`.
    pub fn from_email_type(email_type: Option<&str>) -> Self {
        match email_type {
            Some("html") => BodyMode::Html,
            _ => BodyMode::Plain,
        }
    }
}

/// The fixed sender identity. Never taken from request input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: String,
    pub address: String,
}

impl Sender {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Sender {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// A message ready for dispatch.
///
/// Built by [`MessageAssembler`](crate::assemble::MessageAssembler), which upholds:
/// `to` is non-empty, `html_body` is set whenever `body_mode` is `Html`,
/// and `cc`/`bcc` are `None` rather than empty.
#[derive(Debug)]
pub struct OutboundMessage {
    pub from: Sender,
    pub to: Vec<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub subject: String,
    pub body_mode: BodyMode,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<UploadedPart>,
}

impl OutboundMessage {
    /// Delete any disk-backed attachment files. Called once dispatch has finished,
    /// whatever its result.
    pub async fn discard_attachments(self) {
        for part in self.attachments {
            part.discard().await;
        }
    }
}
