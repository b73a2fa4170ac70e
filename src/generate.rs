//! Answer generation with the Gemini `generateContent` API.
//!
//! The prompt template is fixed: it embeds the question and the retrieved
//! context, tells the model to fall back to general knowledge when the
//! context is [`NO_CONTEXT_SENTINEL`], and asks for the standard disclaimer.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LlmConfig;

/// Context used when retrieval finds nothing for the question.
pub const NO_CONTEXT_SENTINEL: &str =
    "No highly relevant information found in the uploaded documents.";

pub const DISCLAIMER: &str = "This information is for educational purposes only and should not \
replace professional medical advice. Please consult a qualified healthcare provider for \
diagnosis and treatment.";

/// Build the generation prompt for `question` over `context`.
pub fn build_prompt(question: &str, context: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a helpful and empathetic assistant that answers health questions using the \
         user's uploaded medical documents and general medical knowledge.\n\n",
    );
    prompt.push_str(&format!("User's question: \"{}\"\n\n", question));

    prompt.push_str("--- Document context ---\n");
    prompt.push_str(context);
    prompt.push_str("\n--- End of document context ---\n\n");

    prompt.push_str(
        "Answer the question clearly, concisely, and empathetically, using the document \
         context when it is relevant.\n",
    );
    prompt.push_str(&format!(
        "If the document context is '{}', say that the answer is based on general medical \
         knowledge.\n",
        NO_CONTEXT_SENTINEL
    ));
    prompt.push_str(&format!(
        "End the answer with this reminder: \"{}\"\n",
        DISCLAIMER
    ));

    prompt
}

/// Produces a text answer for a prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Client for the public Gemini API, authenticated with an API key.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        // No request timeout: long generations are allowed to finish.
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        bail!("Gemini did not return a valid answer");
    }
    Ok(text)
}

#[async_trait]
impl AnswerGenerator for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Gemini request failed: {}", e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Gemini generation failed ({}): {}", status, body);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Gemini response: {}", e.without_url()))?;

        response_text(parsed)
    }
}

pub fn create_generator(config: &LlmConfig, api_key: &str) -> Result<Arc<dyn AnswerGenerator>> {
    Ok(Arc::new(GeminiClient::new(config, api_key)?))
}
