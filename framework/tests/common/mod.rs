#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use mailgate::assemble::MessageAssembler;
use mailgate::attachments::{AttachmentCollector, StoragePolicy};
use mailgate::mail::{BodyMode, DispatchReceipt, MailError, Mailer, OutboundMessage, Sender};
use mailgate::{router, Context};
use serde_json::Value;
use tower::ServiceExt;

/// How the test mailer answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Accept,
    Reject(String),
    Unreachable(String),
}

/// What a send call observed, captured while the message was still alive.
#[derive(Debug, Clone)]
pub struct Sent {
    pub to: Vec<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub subject: String,
    pub body_mode: BodyMode,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    pub attachment_names: Vec<String>,
    pub attachment_data: Vec<Vec<u8>>,
    pub attachment_paths: Vec<PathBuf>,
}

pub struct RecordingMailer {
    behavior: Behavior,
    sent: Mutex<Vec<Sent>>,
    verifications: AtomicUsize,
}

impl RecordingMailer {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(RecordingMailer {
            behavior,
            sent: Mutex::new(Vec::new()),
            verifications: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt, MailError> {
        let mut attachment_data = Vec::new();
        for part in &message.attachments {
            attachment_data.push(part.read().await.expect("attachment readable during send"));
        }
        let record = Sent {
            to: message.to.clone(),
            cc: message.cc.clone(),
            bcc: message.bcc.clone(),
            subject: message.subject.clone(),
            body_mode: message.body_mode,
            plain_body: message.plain_body.clone(),
            html_body: message.html_body.clone(),
            attachment_names: message.attachments.iter().map(|a| a.original_name.clone()).collect(),
            attachment_data,
            attachment_paths: message
                .attachments
                .iter()
                .filter_map(|a| a.path().map(|p| p.to_path_buf()))
                .collect(),
        };

        let count = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(record);
            sent.len()
        };

        match &self.behavior {
            Behavior::Accept => Ok(DispatchReceipt {
                message_id: format!("<test-{count}@example.com>"),
            }),
            Behavior::Reject(reason) => Err(MailError::Rejected(reason.clone())),
            Behavior::Unreachable(reason) => Err(MailError::Connection(reason.clone())),
        }
    }

    async fn verify(&self) -> Result<(), MailError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Unreachable(reason) => Err(MailError::Connection(reason.clone())),
            _ => Ok(()),
        }
    }
}

pub fn app(mailer: Arc<RecordingMailer>, policy: StoragePolicy) -> Router {
    let ctx = Context::new(
        mailer,
        MessageAssembler::new(Sender::new("Mailgate Web", "me@example.com")),
        AttachmentCollector::new(policy),
    );
    router(ctx)
}

const BOUNDARY: &str = "mailgate-test-boundary";

/// Hand-assembled multipart/form-data body.
#[derive(Default)]
pub struct Form {
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Form::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn request(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
