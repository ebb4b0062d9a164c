mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{app, call, get, Behavior, Form, RecordingMailer};
use mailgate::attachments::StoragePolicy;
use mailgate::mail::BodyMode;

fn basic_form() -> Form {
    Form::new()
        .text("to", "a@example.com")
        .text("subject", "Greetings")
}

#[tokio::test]
async fn plain_request_sends_message_verbatim() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("emailType", "plain")
        .text("message", "Hello there,\nsee you soon.")
        .text("htmlMessage", "<p>not used</p>");

    let (status, body) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Email sent successfully!");
    assert_eq!(body["messageId"], "<test-1@example.com>");

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["a@example.com"]);
    assert_eq!(sent[0].subject, "Greetings");
    assert_eq!(sent[0].body_mode, BodyMode::Plain);
    assert_eq!(sent[0].plain_body.as_deref(), Some("Hello there,\nsee you soon."));
    assert_eq!(sent[0].html_body, None);
}

#[tokio::test]
async fn html_request_keeps_plain_fallback() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("emailType", "html")
        .text("message", "")
        .text("htmlMessage", "<h1>Welcome</h1>");

    let (status, _) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::OK);

    let sent = &mailer.sent()[0];
    assert_eq!(sent.body_mode, BodyMode::Html);
    assert_eq!(sent.html_body.as_deref(), Some("<h1>Welcome</h1>"));
    assert_eq!(sent.plain_body.as_deref(), Some(""));
}

#[tokio::test]
async fn empty_cc_is_omitted_and_bcc_is_split() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("cc", "")
        .text("bcc", "x@example.com, y@example.com")
        .text("message", "hi");

    let (status, _) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::OK);

    let sent = &mailer.sent()[0];
    assert_eq!(sent.cc, None);
    assert_eq!(
        sent.bcc,
        Some(vec!["x@example.com".to_string(), "y@example.com".to_string()])
    );
}

#[tokio::test]
async fn attachments_reach_the_transport() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("message", "see attached")
        .file("attachments", "a.txt", b"first")
        .file("attachments", "b.bin", &[0, 159, 146, 150]);

    let (status, _) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::OK);

    let sent = &mailer.sent()[0];
    assert_eq!(sent.attachment_names, vec!["a.txt", "b.bin"]);
    assert_eq!(sent.attachment_data, vec![b"first".to_vec(), vec![0, 159, 146, 150]]);
    assert!(sent.attachment_paths.is_empty());
}

#[tokio::test]
async fn empty_file_input_is_skipped() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("message", "no files")
        .file("attachments", "", b"");

    let (status, _) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(mailer.sent()[0].attachment_names.is_empty());
}

#[tokio::test]
async fn six_attachments_fail_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let mailer = RecordingMailer::new(Behavior::Accept);
    let mut form = basic_form().text("message", "too much");
    for i in 0..6 {
        form = form.file("attachments", &format!("{i}.txt"), b"data");
    }
    let policy = StoragePolicy::Disk {
        dir: dir.path().to_path_buf(),
    };

    let (status, body) = call(app(mailer.clone(), policy), form.request("/send-email")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "too many attachments: at most 5 files are allowed");
    assert!(mailer.sent().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn transport_failure_returns_reason_and_cleans_disk() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("uploads");
    let mailer = RecordingMailer::new(Behavior::Reject("550 mailbox unavailable".into()));
    let form = basic_form()
        .text("message", "hi")
        .file("attachments", "report.pdf", b"%PDF-1.4")
        .file("attachments", "photo.png", b"png");
    let policy = StoragePolicy::Disk { dir: dir.clone() };

    let (status, body) = call(app(mailer.clone(), policy), form.request("/send-email")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "SMTP server rejected the message: 550 mailbox unavailable"
    );
    assert!(body.get("messageId").is_none());

    let sent = &mailer.sent()[0];
    assert_eq!(sent.attachment_paths.len(), 2);
    assert_eq!(sent.attachment_data[0], b"%PDF-1.4");
    for path in &sent.attachment_paths {
        assert!(path.starts_with(&dir));
        assert!(!path.exists());
    }
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
}

#[tokio::test]
async fn successful_send_cleans_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("message", "hi")
        .file("attachments", "a.txt", b"a");
    let policy = StoragePolicy::Disk {
        dir: dir.path().to_path_buf(),
    };

    let (status, _) = call(app(mailer.clone(), policy), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mailer.sent()[0].attachment_paths.len(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn identical_requests_send_twice() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let router = app(mailer.clone(), StoragePolicy::Memory);

    let (_, first) = call(router.clone(), basic_form().text("message", "same").request("/send-email")).await;
    let (_, second) = call(router, basic_form().text("message", "same").request("/send-email")).await;

    assert_eq!(mailer.sent().len(), 2);
    assert_eq!(first["messageId"], "<test-1@example.com>");
    assert_eq!(second["messageId"], "<test-2@example.com>");
}

#[tokio::test]
async fn missing_fields_are_invalid_requests() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let router = app(mailer.clone(), StoragePolicy::Memory);

    let form = Form::new().text("subject", "no recipient").text("message", "hi");
    let (status, body) = call(router.clone(), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "invalid request: missing required field `to`");

    let form = basic_form().text("emailType", "html").text("message", "fallback only");
    let (_, body) = call(router, form.request("/send-email")).await;
    assert_eq!(body["message"], "invalid request: missing required field `htmlMessage`");

    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn file_under_unknown_field_is_rejected() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let form = basic_form()
        .text("message", "hi")
        .file("upload", "a.txt", b"a");

    let (status, body) = call(app(mailer.clone(), StoragePolicy::Memory), form.request("/send-email")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "invalid request: unexpected file field `upload`");
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn non_multipart_body_keeps_json_shape() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let request = Request::builder()
        .method("POST")
        .uri("/send-email")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"to":"a@example.com"}"#))
        .unwrap();

    let (status, body) = call(app(mailer.clone(), StoragePolicy::Memory), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("invalid request"));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn serverless_prefix_routes_work() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let router = app(mailer.clone(), StoragePolicy::Memory);

    let (status, _) = call(router.clone(), basic_form().text("message", "hi").request("/api/send-email")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(router, get("/api/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn verify_reports_success() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let (status, body) = call(app(mailer.clone(), StoragePolicy::Memory), get("/verify")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "SMTP configuration is valid!");
    assert_eq!(mailer.verifications(), 1);
}

#[tokio::test]
async fn verify_reports_failure() {
    let mailer = RecordingMailer::new(Behavior::Unreachable("535 bad credentials".into()));
    let (status, body) = call(app(mailer.clone(), StoragePolicy::Memory), get("/verify")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "connection to SMTP server failed: 535 bad credentials"
    );
}

#[tokio::test]
async fn health_is_ok() {
    let mailer = RecordingMailer::new(Behavior::Accept);
    let (status, body) = call(app(mailer, StoragePolicy::Memory), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "status": "ok" }));
}
