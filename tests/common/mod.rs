//! Shared helpers for the HTTP integration tests: a server wired to
//! in-process fake models and the in-memory vector store.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use docquery::auth::TokenSigner;
use docquery::config::{Config, Secrets};
use docquery::embedding::Embedder;
use docquery::generate::AnswerGenerator;
use docquery::models::User;
use docquery::rerank::DisabledReranker;
use docquery::server::run_server_with_services;
use docquery::services::Services;
use docquery::users::{NewUser, UserStore};
use docquery::vector_store::InMemoryStore;
use docquery::{db, migrate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const SECRET_KEY: &str = "integration-test-secret";
pub const FRONTEND: &str = "http://frontend.test/app.html";

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Single-page PDF whose only content is `text` in Helvetica.
/// Object offsets and the stream length are computed so pdf-extract can
/// parse it.
pub fn minimal_pdf(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);

    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

// ============ Fake models ============

const DIMS: usize = 32;

/// Hashed bag-of-words embedding; counts calls.
#[derive(Default)]
pub struct WordHashEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for WordHashEmbedder {
    fn model_name(&self) -> &str {
        "word-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text.split(|c: char| !c.is_alphanumeric()) {
                    if word.is_empty() {
                        continue;
                    }
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                    v[bucket % DIMS] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Records prompts and answers with the document context it was given.
#[derive(Default)]
pub struct EchoGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let context = prompt
            .split("--- Document context ---\n")
            .nth(1)
            .and_then(|rest| rest.split("\n--- End of document context ---").next())
            .unwrap_or("");
        Ok(format!("Based on your documents: {}", context))
    }
}

// ============ Test server ============

pub struct TestServer {
    pub port: u16,
    pub tmp: TempDir,
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<WordHashEmbedder>,
    pub generator: Arc<EchoGenerator>,
    pub users: UserStore,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Insert a user and return a valid bearer token for them.
    pub async fn sign_in(&self, id: &str, email: &str) -> String {
        let user: User = self
            .users
            .upsert(NewUser {
                id: id.to_string(),
                name: id.to_string(),
                email: email.to_string(),
                picture: None,
            })
            .await
            .unwrap();
        TokenSigner::new(SECRET_KEY, 24).issue(&user).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn test_config(tmp: &TempDir, port: u16, provider_base: Option<&str>) -> Config {
    let provider = provider_base.unwrap_or("http://127.0.0.1:9");
    toml::from_str(&format!(
        r#"
[db]
path = "{db}"

[server]
bind = "127.0.0.1:{port}"
public_url = "http://127.0.0.1:{port}"

[vector_store]
backend = "memory"

[reranker]
provider = "disabled"

[auth]
google_auth_url = "{provider}/authorize"
google_token_url = "{provider}/token"
google_userinfo_url = "{provider}/userinfo"
"#,
        db = tmp.path().join("users.sqlite").display(),
        port = port,
        provider = provider,
    ))
    .unwrap()
}

pub fn test_secrets() -> Secrets {
    Secrets {
        google_client_id: "test-client".to_string(),
        google_client_secret: "test-client-secret".to_string(),
        secret_key: SECRET_KEY.to_string(),
        gemini_api_key: "unused".to_string(),
        qdrant_url: None,
        qdrant_api_key: None,
        frontend_redirect_url: FRONTEND.to_string(),
    }
}

pub async fn start_server(provider_base: Option<&str>) -> TestServer {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port, provider_base);

    let pool = db::connect(&cfg.db).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let users = UserStore::new(pool);

    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(WordHashEmbedder::default());
    let generator = Arc::new(EchoGenerator::default());
    let services = Services::new(
        embedder.clone(),
        Arc::new(DisabledReranker),
        store.clone(),
        generator.clone(),
    );

    let secrets = test_secrets();
    let handle = tokio::spawn(async move {
        run_server_with_services(&cfg, &secrets, services).await.ok();
    });
    wait_for_server(port).await;

    TestServer {
        port,
        tmp,
        store,
        embedder,
        generator,
        users,
        handle,
    }
}

pub fn pdf_part(filename: &str, text: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(minimal_pdf(text))
        .file_name(filename.to_string())
        .mime_str("application/pdf")
        .unwrap()
}
