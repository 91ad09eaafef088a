mod common;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use mailparse::parse_mail;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{LUNCH, assert_success, astropost, stderr, stdout, write_token};

async fn mount_inbox(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/messages"))
        .and(query_param("labelIds", "INBOX"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{ "id": "m1", "threadId": "t1" }],
            "resultSizeEstimate": 1
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .and(query_param("format", "raw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Are you free at noon?",
            "raw": URL_SAFE.encode(LUNCH),
        })))
        .mount(server)
        .await;
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": { "code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND" }
    }))
}

#[tokio::test]
async fn list_json_returns_parsed_emails() {
    let server = MockServer::start().await;
    mount_inbox(&server).await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["--json", "list", "3"])
        .output()
        .expect("run");
    assert_success(&output);

    let v: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(v["ok"], true);
    assert_eq!(v["result"]["count"], 1);
    let email = &v["result"]["emails"][0];
    assert_eq!(email["id"], "m1");
    assert_eq!(email["subject"], "Lunch");
    assert!(email["from"].as_str().unwrap().contains("alice@example.com"));
    assert!(email["body"].as_str().unwrap().contains("Are you free at noon?"));

    let requests = server.received_requests().await.unwrap();
    let list = requests.iter().find(|r| r.url.path() == "/messages").unwrap();
    assert!(list.url.query().unwrap_or_default().contains("maxResults=3"));
    let auth = list.headers.get("authorization").unwrap().to_str().unwrap();
    assert_eq!(auth, "Bearer ya29.test");
}

#[tokio::test]
async fn list_prints_table() {
    let server = MockServer::start().await;
    mount_inbox(&server).await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .arg("ls")
        .output()
        .expect("run");
    assert_success(&output);
    let out = stdout(&output);
    assert!(out.contains("Latest 1 Emails"));
    assert!(out.contains("│ m1 "));
    assert!(out.contains("Lunch"));
}

#[tokio::test]
async fn empty_search_says_so() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages"))
        .and(query_param("q", "from:nobody"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resultSizeEstimate": 0 })))
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["search", "from:nobody"])
        .output()
        .expect("run");
    assert_success(&output);
    assert!(stdout(&output).contains("No emails found."));
}

#[tokio::test]
async fn show_missing_message_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/nope"))
        .respond_with(not_found())
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["show", "nope"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Email nope not found."));
}

#[tokio::test]
async fn show_renders_panel() {
    let server = MockServer::start().await;
    mount_inbox(&server).await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["show", "m1", "--attachments"])
        .output()
        .expect("run");
    assert_success(&output);
    let out = stdout(&output);
    assert!(out.contains("Email ID: m1"));
    assert!(out.contains("Subject: Lunch"));
    assert!(out.contains("No attachments."));
}

#[tokio::test]
async fn send_posts_raw_message_and_warns_about_missing_attachment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "emailAddress": "me@example.com" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "s1", "threadId": "t9" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args([
            "send", "--to", "bob@example.com", "-s", "Hello", "-b", "Hi **Bob**", "-a",
            "missing.pdf",
        ])
        .output()
        .expect("run");
    assert_success(&output);
    assert!(stdout(&output).contains("Email sent successfully! ID: s1"));
    assert!(stderr(&output).contains("Warning: Attachment missing.pdf not found. Skipping."));

    let requests = server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path() == "/messages/send")
        .unwrap();
    let body: Value = serde_json::from_slice(&send.body).unwrap();
    let raw = body["raw"].as_str().unwrap().trim_end_matches('=');
    let message = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
    assert!(message.contains("Subject: Hello"));
    assert!(message.contains("To: bob@example.com"));
    assert!(message.contains("From: me@example.com"));
    assert!(message.contains("text/html"));
}

#[tokio::test]
async fn send_with_empty_body_warns_unless_confirmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "s2" })))
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let args = ["send", "--to", "bob@example.com", "-s", "Ping", "--from", "me@example.com"];
    let output = astropost(home.path(), &server.uri())
        .args(args)
        .output()
        .expect("run");
    assert_success(&output);
    assert!(stderr(&output).contains("Warning: Sending email with empty body."));

    let output = astropost(home.path(), &server.uri())
        .args(args)
        .arg("-y")
        .output()
        .expect("run");
    assert_success(&output);
    assert!(!stderr(&output).contains("empty body"));
}

#[tokio::test]
async fn archive_keeps_going_after_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/a1/modify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "a1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages/b2/modify"))
        .respond_with(not_found())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages/c3/modify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c3" })))
        .expect(1)
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["archive", "a1", "b2", "c3"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Archived email a1."));
    assert!(out.contains("Archived email c3."));
    let err = stderr(&output);
    assert!(err.contains("Failed to archive b2"));
    assert!(err.contains("1 of 3 emails could not be updated"));
}

#[tokio::test]
async fn labels_json_keeps_api_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": [
                { "id": "INBOX", "name": "INBOX", "type": "system" },
                { "id": "Label_1", "name": "Receipts", "type": "user" }
            ]
        })))
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());

    let output = astropost(home.path(), &server.uri())
        .args(["--json", "labels"])
        .output()
        .expect("run");
    assert_success(&output);
    let v: Value = serde_json::from_slice(&output.stdout).expect("json");
    let labels = v["result"].as_array().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[1]["name"], "Receipts");
    assert_eq!(labels[1]["type"], "user");
}

#[tokio::test]
async fn batch_send_keeps_fenced_report_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "emailAddress": "me@example.com" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "b1" })))
        .expect(1)
        .mount(&server)
        .await;
    let home = tempfile::tempdir().unwrap();
    write_token(home.path());
    let notes = home.path().join("notes");
    std::fs::create_dir(&notes).unwrap();
    std::fs::write(
        notes.join("email_to_ops.txt"),
        "Weekly report\nAll systems nominal.\n```\ncargo test\n```\nThanks\n",
    )
    .unwrap();

    let output = astropost(home.path(), &server.uri())
        .args(["batch", "notes", "--to", "boss@example.com"])
        .output()
        .expect("run");
    assert_success(&output);
    assert!(stdout(&output).contains("Sent 'Update for Ops' to boss@example.com (ID: b1)"));

    let requests = server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path() == "/messages/send")
        .unwrap();
    let body: Value = serde_json::from_slice(&send.body).unwrap();
    let raw = body["raw"].as_str().unwrap().trim_end_matches('=');
    let raw = URL_SAFE_NO_PAD.decode(raw).unwrap();
    let parsed = parse_mail(&raw).unwrap();
    let html = parsed
        .subparts
        .iter()
        .find(|part| part.ctype.mimetype == "text/html")
        .unwrap()
        .get_body()
        .unwrap()
        .replace("\r\n", "\n");
    assert!(html.contains("<pre>Weekly report\nAll systems nominal.\n```\ncargo test\n```\nThanks"));
    let text = parsed.subparts[0].get_body().unwrap();
    assert!(text.contains("All systems nominal."));
    assert!(text.contains("Thanks"));
}
