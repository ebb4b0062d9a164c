//! Resolution of the SMTP endpoint from settings.

use serde::Deserialize;

use super::MailError;
use crate::config::MailSettings;

const DEFAULT_SERVICE: &str = "gmail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Implicit TLS from the first byte (SMTPS).
    Tls,
    /// Plain connection upgraded with STARTTLS.
    Starttls,
    /// Unencrypted; only for local relays.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
}

/// Host, port and TLS mode of a named provider.
fn well_known(service: &str) -> Option<(&'static str, u16, TlsMode)> {
    let entry = match service.to_ascii_lowercase().as_str() {
        "gmail" | "googlemail" => ("smtp.gmail.com", 465, TlsMode::Tls),
        "outlook" | "hotmail" | "outlook365" | "office365" => {
            ("smtp.office365.com", 587, TlsMode::Starttls)
        }
        "yahoo" => ("smtp.mail.yahoo.com", 465, TlsMode::Tls),
        "icloud" => ("smtp.mail.me.com", 587, TlsMode::Starttls),
        "zoho" => ("smtp.zoho.com", 465, TlsMode::Tls),
        "sendgrid" => ("smtp.sendgrid.net", 587, TlsMode::Starttls),
        "mailgun" => ("smtp.mailgun.org", 465, TlsMode::Tls),
        "fastmail" => ("smtp.fastmail.com", 465, TlsMode::Tls),
        _ => return None,
    };
    Some(entry)
}

impl MailSettings {
    /// Explicit `host` wins over `service`; with neither, gmail is assumed.
    pub fn endpoint(&self) -> Result<Endpoint, MailError> {
        let explicit_tls = self.tls.or(self.secure.map(|secure| {
            if secure {
                TlsMode::Tls
            } else {
                TlsMode::Starttls
            }
        }));

        if let Some(host) = self.host.as_deref().filter(|h| !h.trim().is_empty()) {
            let tls = explicit_tls.unwrap_or(match self.port {
                Some(465) => TlsMode::Tls,
                _ => TlsMode::Starttls,
            });
            let port = self.port.unwrap_or(match tls {
                TlsMode::Tls => 465,
                TlsMode::Starttls | TlsMode::None => 587,
            });
            return Ok(Endpoint {
                host: host.trim().to_string(),
                port,
                tls,
            });
        }

        let service = self.service.as_deref().unwrap_or(DEFAULT_SERVICE);
        let (host, port, tls) = well_known(service)
            .ok_or_else(|| MailError::MissingConfig(format!("unknown email service `{service}`")))?;

        Ok(Endpoint {
            host: host.to_string(),
            port: self.port.unwrap_or(port),
            tls: explicit_tls.unwrap_or(tls),
        })
    }
}
