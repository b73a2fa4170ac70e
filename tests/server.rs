//! HTTP integration tests: upload, ask, document management and the
//! bearer guard, against a live server with fake models.

mod common;

use common::{pdf_part, start_server};
use docquery::generate::NO_CONTEXT_SENTINEL;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;

async fn upload(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    form: Form,
) -> (reqwest::StatusCode, Value) {
    let resp = client
        .post(url)
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn ask(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    body: Value,
) -> (reqwest::StatusCode, Value) {
    let resp = client
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn list_documents(client: &reqwest::Client, url: &str, token: &str) -> Value {
    let resp = client.get(url).bearer_auth(token).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

fn filenames(listing: &Value) -> Vec<String> {
    let mut names: Vec<String> = listing["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["filename"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_health() {
    let server = start_server(None).await;
    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_protected_routes_require_valid_token() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/documents")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers()["www-authenticate"], "Bearer");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let resp = client
        .post(server.url("/ask"))
        .bearer_auth("not-a-jwt")
        .json(&json!({ "question": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Validly signed token for a user that is not in the store.
    let ghost = docquery::models::User {
        id: "ghost".to_string(),
        name: "Ghost".to_string(),
        email: "ghost@example.com".to_string(),
        picture: None,
    };
    let token = docquery::auth::TokenSigner::new(common::SECRET_KEY, 24)
        .issue(&ghost)
        .unwrap();
    let resp = client
        .get(server.url("/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let token = server.sign_in("alice", "Alice@Example.com").await;
    let resp = client
        .get(server.url("/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let me: Value = resp.json().await.unwrap();
    assert_eq!(me["id"], "alice");
    assert_eq!(me["email"], "alice@example.com");

    let resp = client
        .get(server.url("/"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("alice"));
}

#[tokio::test]
async fn test_empty_question_rejected_without_model_calls() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;

    let (status, body) = ask(&client, &server.url("/ask"), &token, json!({ "question": "   " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = ask(&client, &server.url("/ask"), &token, json!({ "q": "typo" })).await;
    assert_eq!(status, 400);

    assert_eq!(server.embedder.calls.load(Ordering::SeqCst), 0);
    assert!(server.generator.prompts().is_empty());
}

#[tokio::test]
async fn test_non_pdf_upload_rejected_without_mutation() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;

    let form = Form::new().part(
        "file",
        Part::bytes(b"just some notes".to_vec())
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 400);
    assert_eq!(body["files"][0]["status"], "rejected");
    assert_eq!(body["indexed_files"], 0);

    // A renamed non-PDF is caught by the magic bytes.
    let form = Form::new().part(
        "file",
        Part::bytes(b"PK\x03\x04 zip archive".to_vec()).file_name("disguised.pdf"),
    );
    let (status, _) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 400);

    let form = Form::new().text("source", "report");
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    assert!(server.store.is_empty());
    assert_eq!(server.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_then_ask_end_to_end() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;

    let form = Form::new().part("file", pdf_part("checkup.pdf", "Patient has mild hypertension."));
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200, "upload failed: {}", body);
    assert_eq!(body["source"], "report");
    assert_eq!(body["indexed_files"], 1);
    assert_eq!(body["files"][0]["status"], "indexed");
    assert!(body["total_chunks"].as_u64().unwrap() >= 1);

    let (status, body) = ask(
        &client,
        &server.url("/ask"),
        &token,
        json!({ "question": "What is the patient's condition?" }),
    )
    .await;
    assert_eq!(status, 200, "ask failed: {}", body);
    assert!(body["answer"].as_str().unwrap().contains("hypertension"));

    let prompts = server.generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Patient has mild hypertension."));
    assert!(prompts[0].contains("[checkup.pdf]"));
    assert!(prompts[0].contains("What is the patient's condition?"));
}

#[tokio::test]
async fn test_other_users_documents_never_reach_context() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let alice = server.sign_in("alice", "alice@example.com").await;
    let bob = server.sign_in("bob", "bob@example.com").await;

    let form = Form::new().part("file", pdf_part("alice.pdf", "Patient has mild hypertension."));
    let (status, _) = upload(&client, &server.url("/upload"), &alice, form).await;
    assert_eq!(status, 200);

    let (status, body) = ask(
        &client,
        &server.url("/ask"),
        &bob,
        json!({ "question": "What is the patient's condition?" }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(!body["answer"].as_str().unwrap().contains("hypertension"));

    let prompts = server.generator.prompts();
    assert!(prompts[0].contains(NO_CONTEXT_SENTINEL));
    assert!(!prompts[0].contains("Patient has mild hypertension."));
}

#[tokio::test]
async fn test_report_upload_supersedes_previous_reports() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;
    let docs_url = server.url("/documents");

    let form = Form::new()
        .text("source", "document")
        .part("file", pdf_part("guide.pdf", "Hypertension guidelines for adults."));
    let (status, _) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200);

    let form = Form::new().part("file", pdf_part("march.pdf", "Blood pressure reading 150 over 95."));
    let (status, _) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200);

    let form = Form::new().part("file", pdf_part("april.pdf", "Blood pressure reading 120 over 80."));
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200);
    assert!(body["superseded_chunks"].as_u64().unwrap() >= 1);

    let listing = list_documents(&client, &docs_url, &token).await;
    assert_eq!(filenames(&listing), vec!["april.pdf", "guide.pdf"]);
}

#[tokio::test]
async fn test_delete_document_is_exact_and_isolated() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let alice = server.sign_in("alice", "alice@example.com").await;
    let bob = server.sign_in("bob", "bob@example.com").await;
    let docs_url = server.url("/documents");

    for (token, name, text) in [
        (&alice, "shared.pdf", "Cholesterol levels are slightly elevated."),
        (&alice, "other.pdf", "Vitamin D levels are within range."),
        (&bob, "shared.pdf", "Bob has seasonal allergies noted."),
    ] {
        let form = Form::new()
            .text("source", "document")
            .part("file", pdf_part(name, text));
        let (status, body) = upload(&client, &server.url("/upload"), token, form).await;
        assert_eq!(status, 200, "upload failed: {}", body);
    }

    let before = list_documents(&client, &docs_url, &alice).await;
    let shared_chunks = before["documents"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["filename"] == "shared.pdf")
        .unwrap()["chunks"]
        .as_u64()
        .unwrap();

    let resp = client
        .delete(server.url("/documents/shared.pdf"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deleted_chunks"].as_u64().unwrap(), shared_chunks);

    assert_eq!(filenames(&list_documents(&client, &docs_url, &alice).await), vec!["other.pdf"]);
    assert_eq!(filenames(&list_documents(&client, &docs_url, &bob).await), vec!["shared.pdf"]);

    let resp = client
        .delete(server.url("/documents/shared.pdf"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .delete(server.url("/documents"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let listing = list_documents(&client, &docs_url, &alice).await;
    assert_eq!(listing["total_chunks"], 0);
    assert_eq!(filenames(&list_documents(&client, &docs_url, &bob).await), vec!["shared.pdf"]);
}

fn text_part(filename: &str, body: &str) -> Part {
    Part::bytes(body.as_bytes().to_vec())
        .file_name(filename.to_string())
        .mime_str("text/plain")
        .unwrap()
}

#[tokio::test]
async fn test_mixed_upload_indexes_valid_files_only() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;

    let form = Form::new()
        .text("source", "document")
        .part("file", pdf_part("guide.pdf", "Hypertension guidelines for adults."))
        .part("file", text_part("notes.txt", "just some notes"));
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200, "upload failed: {}", body);
    assert_eq!(body["indexed_files"], 1);

    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["filename"], "guide.pdf");
    assert_eq!(files[0]["status"], "indexed");
    assert_eq!(files[1]["filename"], "notes.txt");
    assert_eq!(files[1]["status"], "rejected");
    assert!(files[1]["error"].as_str().is_some());

    let stored = server.store.snapshot();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|p| p.payload.filename == "guide.pdf"));
    assert_eq!(body["total_chunks"].as_u64().unwrap(), stored.len() as u64);
}

#[tokio::test]
async fn test_report_supersede_runs_once_after_rejected_first_file() {
    let server = start_server(None).await;
    let client = reqwest::Client::new();
    let token = server.sign_in("alice", "alice@example.com").await;
    let docs_url = server.url("/documents");

    let form = Form::new().part("file", pdf_part("march.pdf", "Blood pressure reading 150 over 95."));
    let (status, _) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200);
    let march_chunks = server.store.len() as u64;

    let form = Form::new()
        .part("file", text_part("notes.txt", "not a report"))
        .part("file", pdf_part("april.pdf", "Blood pressure reading 120 over 80."))
        .part("file", pdf_part("may.pdf", "Cholesterol panel within normal range."));
    let (status, body) = upload(&client, &server.url("/upload"), &token, form).await;
    assert_eq!(status, 200, "upload failed: {}", body);

    let statuses: Vec<&str> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["rejected", "indexed", "indexed"]);
    assert_eq!(body["superseded_chunks"].as_u64().unwrap(), march_chunks);

    // A second supersede pass would have removed april.pdf.
    let listing = list_documents(&client, &docs_url, &token).await;
    assert_eq!(filenames(&listing), vec!["april.pdf", "may.pdf"]);
}
