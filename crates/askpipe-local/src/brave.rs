//! Brave AI answer adapter.
//!
//! Two-step handshake: create a conversation (`/new`), then stream the
//! answer (`/stream`) as newline-delimited JSON events carrying
//! `text_delta` payloads.

use crate::cache::QueryCache;
use crate::stream::DeltaJsonAccumulator;
use crate::useragent::random_user_agent;
use askpipe_core::{AnswerProvider, Error, Result};
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://search.brave.com/api/tap/v1";
const ASK_PAGE: &str = "https://search.brave.com/ask";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PROMPT_CHARS: usize = 5_000;
const MAX_CACHE_ENTRIES: usize = 5;

const LANGUAGE: &str = "en";
const COUNTRY: &str = "US";
const UI_LANG: &str = "en-us";

/// Ephemeral per-conversation key: 32 random bytes as a base64url JWK,
/// wrapped once more in standard base64 for the query string.
fn generate_symmetric_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let k = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key);
    let jwk = serde_json::json!({
        "alg": "A256GCM",
        "ext": true,
        "k": k,
        "key_ops": ["encrypt", "decrypt"],
        "kty": "oct"
    });
    base64::engine::general_purpose::STANDARD.encode(jwk.to_string())
}

#[derive(Debug, Deserialize)]
struct NewConversation {
    id: Option<String>,
}

#[derive(Debug)]
pub struct BraveAiClient {
    client: reqwest::Client,
    endpoint: String,
    cache: QueryCache<String>,
}

impl BraveAiClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let client = crate::http_client(REQUEST_TIMEOUT)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            cache: QueryCache::new(MAX_CACHE_ENTRIES),
        })
    }

    fn cache_key(prompt: &str, research: bool) -> String {
        let normalized = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{normalized}-{research}")
    }

    fn decorate(&self, rb: reqwest::RequestBuilder, referer: &str) -> reqwest::RequestBuilder {
        rb.header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .header(reqwest::header::REFERER, referer)
    }

    /// Ask one question; `research` switches the upstream into its deep
    /// research mode.
    pub async fn search(&self, prompt: &str, research: bool) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(Error::Validation(format!(
                "prompt too long (maximum {MAX_PROMPT_CHARS} characters)"
            )));
        }

        let cache_key = Self::cache_key(prompt, research);
        if let Some(text) = self.cache.get(&cache_key) {
            return Ok(text);
        }

        let research_s = if research { "true" } else { "false" };
        let symmetric_key = generate_symmetric_key();
        let source = if research { "home" } else { "llmSuggest" };

        let new_resp = self
            .decorate(self.client.get(format!("{}/new", self.endpoint)), ASK_PAGE)
            .query(&[
                ("language", LANGUAGE),
                ("country", COUNTRY),
                ("ui_lang", UI_LANG),
                ("symmetric_key", symmetric_key.as_str()),
                ("source", source),
                ("query", prompt),
                ("enable_research", research_s),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = new_resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(
                "brave ai is rate-limiting (HTTP 429)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "brave ai failed to initialize chat: HTTP {status}"
            )));
        }

        let conversation: NewConversation = new_resp
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;
        let Some(chat_id) = conversation.id.filter(|id| !id.is_empty()) else {
            return Err(Error::Protocol(
                "brave ai failed to initialize chat: missing conversation id".to_string(),
            ));
        };

        let referer = format!(
            "{ASK_PAGE}?q={}&conversation={chat_id}",
            urlencoded(prompt)
        );
        let stream_resp = self
            .decorate(self.client.get(format!("{}/stream", self.endpoint)), &referer)
            .query(&[
                ("id", chat_id.as_str()),
                ("query", prompt),
                ("symmetric_key", symmetric_key.as_str()),
                ("language", LANGUAGE),
                ("country", COUNTRY),
                ("ui_lang", UI_LANG),
                ("enable_research", research_s),
                ("enable_followups", research_s),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = stream_resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(
                "brave ai is rate-limiting (HTTP 429)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("brave ai stream: HTTP {status}")));
        }

        let mut accumulator = DeltaJsonAccumulator::new();
        let mut body = stream_resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            accumulator.push_chunk(&chunk);
        }

        let text = accumulator.finish();
        self.cache.insert(cache_key, text.clone());
        Ok(text)
    }
}

fn urlencoded(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[async_trait::async_trait]
impl AnswerProvider for BraveAiClient {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        self.search(prompt, false).await
    }
}
