//! Felo answer adapter.
//!
//! One POST per query; the response is an SSE-style stream whose `answer`
//! events carry the cumulative text so far. The upstream session id from
//! the first response is resent on later calls from the same client.

use crate::cache::QueryCache;
use crate::stream::CumulativeSseAccumulator;
use crate::useragent::random_user_agent;
use askpipe_core::{AnswerProvider, Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_ENDPOINT: &str = "https://api.felo.ai/search/threads";
const ORIGIN: &str = "https://felo.ai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CACHE_ENTRIES: usize = 5;
const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct FeloClient {
    client: reqwest::Client,
    endpoint: String,
    cache: Arc<QueryCache<String>>,
    session_id: Arc<Mutex<Option<String>>>,
}

impl FeloClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let client = crate::http_client(REQUEST_TIMEOUT)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            cache: Arc::new(QueryCache::new(MAX_CACHE_ENTRIES)),
            session_id: Arc::new(Mutex::new(None)),
        })
    }

    fn cache_key(prompt: &str) -> String {
        prompt.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn current_session_id(&self) -> String {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }

    fn remember_session_id(&self, sid: Option<&str>) {
        if let Some(sid) = sid.filter(|s| !s.is_empty()) {
            *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(sid.to_string());
        }
    }

    async fn open_stream(&self, prompt: &str) -> Result<reqwest::Response> {
        let payload = serde_json::json!({
            "query": prompt,
            "search_uuid": uuid::Uuid::new_v4().to_string(),
            "session_id": self.current_session_id(),
            "lang": "",
            "agent_lang": "en",
            "search_options": { "langcode": "en-US" },
            "search_video": true,
            "contexts_from": "google",
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::ORIGIN, ORIGIN)
            .header(reqwest::header::REFERER, format!("{ORIGIN}/"))
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(
                "felo is rate-limiting (HTTP 429)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("felo search HTTP {status}")));
        }
        Ok(resp)
    }

    /// Ask one question and wait for the full answer.
    pub async fn search(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }

        let cache_key = Self::cache_key(prompt);
        if let Some(text) = self.cache.get(&cache_key) {
            return Ok(text);
        }

        let resp = self.open_stream(prompt).await?;
        let mut accumulator = CumulativeSseAccumulator::new();
        let mut body = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            accumulator.push_chunk(&chunk);
        }

        let outcome = accumulator.finish()?;
        self.remember_session_id(outcome.session_id.as_deref());
        self.cache.insert(cache_key, outcome.text.clone());
        Ok(outcome.text)
    }

    /// Ask one question and receive the answer as a finite stream of
    /// deltas. Single-consumption; the full text is cached once the
    /// stream completes.
    pub async fn search_streaming(&self, prompt: &str) -> Result<ReceiverStream<Result<String>>> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }

        let resp = self.open_stream(prompt).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let this = self.clone();
        let cache_key = Self::cache_key(prompt);

        tokio::spawn(async move {
            let mut accumulator = CumulativeSseAccumulator::new();
            let mut body = resp.bytes_stream();
            use futures_util::StreamExt;
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Transport(e.to_string()))).await;
                        return;
                    }
                };
                for delta in accumulator.push_chunk(&chunk) {
                    if tx.send(Ok(delta)).await.is_err() {
                        // Receiver went away; stop reading.
                        return;
                    }
                }
            }

            match accumulator.finish() {
                Ok(outcome) => {
                    this.remember_session_id(outcome.session_id.as_deref());
                    this.cache.insert(cache_key, outcome.text);
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

#[async_trait::async_trait]
impl AnswerProvider for FeloClient {
    fn name(&self) -> &'static str {
        "felo"
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        self.search(prompt).await
    }
}
