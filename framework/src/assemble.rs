//! Turns raw form fields into an [`OutboundMessage`].

use crate::attachments::UploadedPart;
use crate::mail::{BodyMode, OutboundMessage, Sender};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("field `{0}` does not contain any address")]
    NoAddresses(&'static str),
}

/// Untyped text fields of a send request, exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailFields {
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: Option<String>,
    pub email_type: Option<String>,
    pub message: Option<String>,
    pub html_message: Option<String>,
}

impl EmailFields {
    /// Record a form field by its wire name. Returns false for names this form
    /// does not know about.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "to" => &mut self.to,
            "cc" => &mut self.cc,
            "bcc" => &mut self.bcc,
            "subject" => &mut self.subject,
            "emailType" => &mut self.email_type,
            "message" => &mut self.message,
            "htmlMessage" => &mut self.html_message,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Builds outbound messages with a fixed sender.
#[derive(Debug, Clone)]
pub struct MessageAssembler {
    sender: Sender,
}

impl MessageAssembler {
    pub fn new(sender: Sender) -> Self {
        MessageAssembler { sender }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Validate `fields` and combine them with `attachments`.
    ///
    /// Address syntax is not checked here; the transport rejects malformed
    /// addresses when it builds the wire message.
    pub fn assemble(
        &self,
        fields: EmailFields,
        attachments: Vec<UploadedPart>,
    ) -> Result<OutboundMessage, FormError> {
        let to = fields.to.ok_or(FormError::Missing("to"))?;
        let to = split_addresses(&to);
        if to.is_empty() {
            return Err(FormError::NoAddresses("to"));
        }

        let subject = fields
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or(FormError::Missing("subject"))?;

        let body_mode = BodyMode::from_email_type(fields.email_type.as_deref());
        let (plain_body, html_body) = match body_mode {
            BodyMode::Html => {
                let html = fields
                    .html_message
                    .filter(|h| !h.trim().is_empty())
                    .ok_or(FormError::Missing("htmlMessage"))?;
                (fields.message, Some(html))
            }
            BodyMode::Plain => {
                let text = fields.message.ok_or(FormError::Missing("message"))?;
                (Some(text), None)
            }
        };

        Ok(OutboundMessage {
            from: self.sender.clone(),
            to,
            cc: optional_addresses(fields.cc),
            bcc: optional_addresses(fields.bcc),
            subject,
            body_mode,
            plain_body,
            html_body,
            attachments,
        })
    }
}

fn optional_addresses(field: Option<String>) -> Option<Vec<String>> {
    field
        .map(|value| split_addresses(&value))
        .filter(|addresses| !addresses.is_empty())
}

/// Split a comma separated address list, leaving commas inside quoted display
/// names alone.
pub fn split_addresses(list: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in list.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' | ';' if !quoted => {
                addresses.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    addresses.push(current);

    addresses
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}
