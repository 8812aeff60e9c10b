//! iAsk answer adapter: a stateful Phoenix-LiveView channel flow.
//!
//! Three phases:
//! 1. fetch the page once and scrape the session-scoped element id, CSRF
//!    token and session payload out of the HTML;
//! 2. open the WebSocket and send a `phx_join` referencing all three;
//! 3. accumulate answer fragments out of each message's diff payload until
//!    the channel closes or the session deadline fires. On the deadline the
//!    partial text is a success, not an error.

use crate::cache::QueryCache;
use crate::htmlfmt::format_html;
use crate::useragent::random_user_agent;
use askpipe_core::{AnswerProvider, AskMode, DetailLevel, Error, Result, NO_RESULTS_PLACEHOLDER};
use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const DEFAULT_PAGE_ENDPOINT: &str = "https://iask.ai/";
const DEFAULT_SOCKET_ENDPOINT: &str = "wss://iask.ai/live/websocket";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_DEADLINE: Duration = Duration::from_secs(30);
const MAX_CACHE_ENTRIES: usize = 5;
const MAX_FALLBACK_DEPTH: usize = 32;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid literal pattern"));
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<p>.+?</p>").expect("valid literal pattern"));

/// Tokens scraped from one page fetch; consumed exactly once to open the
/// channel, never persisted across requests.
#[derive(Debug)]
struct SessionContext {
    phx_id: String,
    csrf_token: String,
    phx_session: Option<String>,
    response_url: String,
    cookie_header: Option<String>,
}

pub struct IAskClient {
    client: reqwest::Client,
    jar: Arc<reqwest::cookie::Jar>,
    page_endpoint: String,
    socket_endpoint: String,
    origin: String,
    deadline: Duration,
    cache: QueryCache<String>,
}

impl IAskClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(DEFAULT_PAGE_ENDPOINT, DEFAULT_SOCKET_ENDPOINT)
    }

    pub fn with_endpoints(page_endpoint: &str, socket_endpoint: &str) -> Result<Self> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let origin = url::Url::parse(page_endpoint)
            .map(|u| u.origin().ascii_serialization())
            .map_err(|e| Error::Validation(format!("invalid page endpoint: {e}")))?;
        Ok(Self {
            client,
            jar,
            page_endpoint: page_endpoint.to_string(),
            socket_endpoint: socket_endpoint.to_string(),
            origin,
            deadline: SESSION_DEADLINE,
            cache: QueryCache::new(MAX_CACHE_ENTRIES),
        })
    }

    fn cache_key(prompt: &str, mode: AskMode, detail: Option<DetailLevel>) -> String {
        let normalized = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
        format!(
            "iask-{}-{}-{normalized}",
            mode.as_str(),
            detail.map(DetailLevel::as_str).unwrap_or("default")
        )
    }

    /// Ask one question. Mode and detail level ride along as destination
    /// query parameters on the initial page fetch.
    pub async fn search(
        &self,
        prompt: &str,
        mode: AskMode,
        detail: Option<DetailLevel>,
    ) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }

        let cache_key = Self::cache_key(prompt, mode, detail);
        if let Some(text) = self.cache.get(&cache_key) {
            return Ok(text);
        }

        let ctx = self.fetch_session_context(prompt, mode, detail).await?;
        let mut ws = self.open_channel(&ctx).await?;

        let mut accumulated = String::new();
        let outcome = tokio::time::timeout(
            self.deadline,
            drive_session(&mut ws, &mut accumulated),
        )
        .await;
        let _ = ws.close(None).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            // Deadline elapsed: keep whatever accumulated so far.
            Err(_) => {
                tracing::debug!("channel session hit its deadline; returning partial text");
            }
        }

        if accumulated.is_empty() {
            return Ok(NO_RESULTS_PLACEHOLDER.to_string());
        }
        self.cache.insert(cache_key, accumulated.clone());
        Ok(accumulated)
    }

    async fn fetch_session_context(
        &self,
        prompt: &str,
        mode: AskMode,
        detail: Option<DetailLevel>,
    ) -> Result<SessionContext> {
        let mut params: Vec<(&str, String)> = vec![
            ("mode", mode.as_str().to_string()),
            ("q", prompt.to_string()),
        ];
        if let Some(detail) = detail {
            params.push(("options[detail_level]", detail.as_str().to_string()));
        }

        let resp = self
            .client
            .get(&self.page_endpoint)
            .query(&params)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(
                "iask is rate-limiting (HTTP 429)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("iask page fetch HTTP {status}")));
        }

        // Resolve after redirects; the join message echoes this exact URL.
        let response_url = resp.url().clone();
        let html = resp.text().await.map_err(|e| Error::Transport(e.to_string()))?;

        let cookie_header = {
            use reqwest::cookie::CookieStore;
            self.jar
                .cookies(&response_url)
                .and_then(|v| v.to_str().ok().map(String::from))
        };

        let (phx_id, csrf_token, phx_session) = extract_page_tokens(&html)?;
        Ok(SessionContext {
            phx_id,
            csrf_token,
            phx_session,
            response_url: response_url.to_string(),
            cookie_header,
        })
    }

    async fn open_channel(&self, ctx: &SessionContext) -> Result<WsStream> {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("_csrf_token", &ctx.csrf_token)
            .append_pair("vsn", "2.0.0")
            .finish();
        let ws_url = format!("{}?{query}", self.socket_endpoint);

        let mut request = ws_url
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let headers = request.headers_mut();
        if let Some(cookie) = ctx
            .cookie_header
            .as_deref()
            .and_then(|c| HeaderValue::from_str(c).ok())
        {
            headers.insert("Cookie", cookie);
        }
        if let Ok(ua) = HeaderValue::from_str(random_user_agent()) {
            headers.insert("User-Agent", ua);
        }
        if let Ok(origin) = HeaderValue::from_str(&self.origin) {
            headers.insert("Origin", origin);
        }

        let (mut ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;

        let mut join_payload = serde_json::Map::new();
        join_payload.insert(
            "params".to_string(),
            serde_json::json!({ "_csrf_token": ctx.csrf_token }),
        );
        join_payload.insert("url".to_string(), serde_json::json!(ctx.response_url));
        if let Some(session) = &ctx.phx_session {
            join_payload.insert("session".to_string(), serde_json::json!(session));
        }
        let join = serde_json::json!([
            null,
            null,
            format!("lv:{}", ctx.phx_id),
            "phx_join",
            join_payload
        ]);
        ws.send(Message::Text(join.to_string()))
            .await
            .map_err(|e| Error::Transport(format!("websocket send failed: {e}")))?;
        Ok(ws)
    }
}

fn extract_page_tokens(html: &str) -> Result<(String, String, Option<String>)> {
    let (Ok(phx_sel), Ok(csrf_sel)) = (
        Selector::parse("[id^=\"phx-\"]"),
        Selector::parse("[name=\"csrf-token\"]"),
    ) else {
        return Err(Error::Protocol("invalid page selectors".to_string()));
    };

    let doc = Html::parse_document(html);
    let phx_node = doc.select(&phx_sel).next();
    let phx_id = phx_node
        .and_then(|el| el.value().attr("id"))
        .map(str::to_string);
    let phx_session = phx_node
        .and_then(|el| el.value().attr("data-phx-session"))
        .map(str::to_string);
    let csrf_token = doc
        .select(&csrf_sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);

    match (phx_id, csrf_token) {
        (Some(phx_id), Some(csrf_token)) => Ok((phx_id, csrf_token, phx_session)),
        // Missing either token means the upstream changed its page
        // structure or blocked the request.
        _ => Err(Error::Protocol(
            "failed to extract session tokens from page".to_string(),
        )),
    }
}

async fn drive_session(ws: &mut WsStream, accumulated: &mut String) -> Result<()> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| Error::Transport(format!("websocket error: {e}")))?;
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        // A malformed frame never aborts the session.
        let Ok(envelope) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        if is_protocol_error(&envelope) {
            return Err(Error::Protocol(
                "channel reported an error event".to_string(),
            ));
        }
        let Some(diff) = envelope.get(4) else {
            continue;
        };
        if let Some(chunk) = primary_chunk(diff) {
            append_chunk(accumulated, chunk);
        } else if let Some(found) = find_paragraph_fragment(diff, 0) {
            append_chunk(accumulated, &found);
            // The fallback path only ever yields one chunk; close the
            // session right after it.
            break;
        }
    }
    Ok(())
}

fn is_protocol_error(envelope: &serde_json::Value) -> bool {
    match envelope.get(3).and_then(|v| v.as_str()) {
        Some("phx_error") => true,
        Some("phx_reply") => {
            envelope
                .get(4)
                .and_then(|p| p.get("status"))
                .and_then(|s| s.as_str())
                == Some("error")
        }
        _ => false,
    }
}

/// Primary extraction: the diff's `e[0][1].data` content chunk.
fn primary_chunk(diff: &serde_json::Value) -> Option<&str> {
    diff.get("e")?.get(0)?.get(1)?.get("data")?.as_str()
}

/// Last-resort extraction: depth-first search for the first string that
/// looks like an HTML paragraph. A deliberately loose heuristic, bounded
/// by a depth guard.
fn find_paragraph_fragment(value: &serde_json::Value, depth: usize) -> Option<String> {
    if depth >= MAX_FALLBACK_DEPTH {
        return None;
    }
    match value {
        serde_json::Value::String(s) if PARAGRAPH.is_match(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items
            .iter()
            .find_map(|v| find_paragraph_fragment(v, depth + 1)),
        serde_json::Value::Object(map) => map
            .values()
            .find_map(|v| find_paragraph_fragment(v, depth + 1)),
        _ => None,
    }
}

fn append_chunk(accumulated: &mut String, chunk: &str) {
    if HTML_TAG.is_match(chunk) {
        accumulated.push_str(&format_html(chunk));
    } else {
        accumulated.push_str(&chunk.replace("<br/>", "\n"));
    }
}

#[async_trait::async_trait]
impl AnswerProvider for IAskClient {
    fn name(&self) -> &'static str {
        "iask"
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        self.search(prompt, AskMode::Question, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::{Query, State};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    const PAGE_HTML: &str = concat!(
        "<html><head><meta name=\"csrf-token\" content=\"csrf-123\"></head>",
        "<body><div id=\"phx-ABC123\" data-phx-session=\"SESSION-BLOB\"></div></body></html>"
    );

    #[derive(Clone, Copy, PartialEq)]
    enum Script {
        PrimaryChunks,
        FallbackOnly,
        ErrorReply,
        StallAfterFirstChunk,
    }

    async fn serve_ws(mut socket: WebSocket, script: Script) {
        let Some(Ok(WsMessage::Text(join))) = socket.recv().await else {
            return;
        };
        let join: serde_json::Value = serde_json::from_str(&join).unwrap();
        assert_eq!(join[2], "lv:phx-ABC123");
        assert_eq!(join[3], "phx_join");
        assert_eq!(join[4]["params"]["_csrf_token"], "csrf-123");
        assert_eq!(join[4]["session"], "SESSION-BLOB");

        let reply = |payload: serde_json::Value| {
            serde_json::json!([null, null, join[2].clone(), "diff", payload]).to_string()
        };

        match script {
            Script::PrimaryChunks => {
                let ok = serde_json::json!([
                    null, null, join[2].clone(), "phx_reply", {"status": "ok", "response": {}}
                ]);
                let _ = socket.send(WsMessage::Text(ok.to_string())).await;
                let _ = socket
                    .send(WsMessage::Text("definitely not json".to_string()))
                    .await;
                let _ = socket
                    .send(WsMessage::Text(reply(serde_json::json!({
                        "e": [["chunk", {"data": "<p>Hello</p>"}]]
                    }))))
                    .await;
                let _ = socket
                    .send(WsMessage::Text(reply(serde_json::json!({
                        "e": [["chunk", {"data": "<p>from the channel</p>"}]]
                    }))))
                    .await;
                let _ = socket.send(WsMessage::Close(None)).await;
            }
            Script::FallbackOnly => {
                let _ = socket
                    .send(WsMessage::Text(reply(serde_json::json!({
                        "rendered": {"s": ["<p>Fallback answer</p>"]}
                    }))))
                    .await;
                // Anything after the fallback chunk must never be read.
                let _ = socket
                    .send(WsMessage::Text(reply(serde_json::json!({
                        "e": [["chunk", {"data": "<p>ignored</p>"}]]
                    }))))
                    .await;
                let _ = socket.send(WsMessage::Close(None)).await;
            }
            Script::ErrorReply => {
                let err = serde_json::json!([
                    null, null, join[2].clone(), "phx_reply",
                    {"status": "error", "response": {"reason": "unmatched topic"}}
                ]);
                let _ = socket.send(WsMessage::Text(err.to_string())).await;
                let _ = socket.send(WsMessage::Close(None)).await;
            }
            Script::StallAfterFirstChunk => {
                let _ = socket
                    .send(WsMessage::Text(reply(serde_json::json!({
                        "e": [["chunk", {"data": "<p>Partial</p>"}]]
                    }))))
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    }

    async fn spawn_fixture(script: Script) -> SocketAddr {
        let app = Router::new()
            .route(
                "/",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    assert!(params.contains_key("q"));
                    assert!(params.contains_key("mode"));
                    axum::response::Html(PAGE_HTML)
                }),
            )
            .route(
                "/live/websocket",
                get(
                    |State(script): State<Script>, ws: WebSocketUpgrade| async move {
                        ws.on_upgrade(move |socket| serve_ws(socket, script))
                            .into_response()
                    },
                ),
            )
            .with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fixture_client(addr: SocketAddr) -> IAskClient {
        IAskClient::with_endpoints(
            &format!("http://{addr}/"),
            &format!("ws://{addr}/live/websocket"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn primary_path_accumulates_across_messages() {
        let addr = spawn_fixture(Script::PrimaryChunks).await;
        let client = fixture_client(addr);
        let text = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap();
        assert!(text.contains("Hello"), "got: {text:?}");
        assert!(text.contains("from the channel"), "got: {text:?}");
        assert!(!text.contains('<'), "got: {text:?}");
    }

    #[tokio::test]
    async fn fallback_path_closes_after_its_first_chunk() {
        let addr = spawn_fixture(Script::FallbackOnly).await;
        let client = fixture_client(addr);
        let text = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap();
        assert!(text.contains("Fallback answer"), "got: {text:?}");
        assert!(!text.contains("ignored"), "got: {text:?}");
    }

    #[tokio::test]
    async fn an_error_reply_aborts_the_whole_operation() {
        let addr = spawn_fixture(Script::ErrorReply).await;
        let client = fixture_client(addr);
        let err = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got: {err}");
    }

    #[tokio::test]
    async fn the_deadline_returns_partial_text_as_a_success() {
        let addr = spawn_fixture(Script::StallAfterFirstChunk).await;
        let mut client = fixture_client(addr);
        client.deadline = Duration::from_millis(300);
        let text = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap();
        assert!(text.contains("Partial"), "got: {text:?}");
    }

    #[tokio::test]
    async fn a_page_without_tokens_is_a_protocol_error() {
        let app = Router::new().route(
            "/",
            get(|| async { axum::response::Html("<html><body>blocked</body></html>") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = fixture_client(addr);
        let err = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got: {err}");
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let addr = spawn_fixture(Script::PrimaryChunks).await;
        let client = fixture_client(addr);
        let first = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap();
        let second = client
            .search("what is rust", AskMode::Question, None)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn page_token_extraction_reads_id_csrf_and_session() {
        let (phx_id, csrf, session) = extract_page_tokens(PAGE_HTML).unwrap();
        assert_eq!(phx_id, "phx-ABC123");
        assert_eq!(csrf, "csrf-123");
        assert_eq!(session.as_deref(), Some("SESSION-BLOB"));
    }

    #[test]
    fn primary_chunk_reads_the_nested_data_field() {
        let diff = serde_json::json!({"e": [["chunk", {"data": "<p>Hi</p>"}]]});
        assert_eq!(primary_chunk(&diff), Some("<p>Hi</p>"));
        assert_eq!(primary_chunk(&serde_json::json!({"k": 1})), None);
    }

    #[test]
    fn channel_diff_scenario_formats_html_to_plain_text() {
        let diff = serde_json::json!({"e": [["chunk", {"data": "<p>Hi</p>"}]]});
        let mut out = String::new();
        append_chunk(&mut out, primary_chunk(&diff).unwrap());
        assert!(out.contains("Hi"), "got: {out:?}");
        assert!(!out.contains('<'), "got: {out:?}");
    }

    #[test]
    fn fallback_search_is_depth_first_and_depth_guarded() {
        let nested = serde_json::json!({
            "a": [1, {"b": ["<p>found me</p>"]}],
            "c": "no paragraph here"
        });
        assert_eq!(
            find_paragraph_fragment(&nested, 0).as_deref(),
            Some("<p>found me</p>")
        );

        // A value nested past the guard is never reached.
        let mut deep = serde_json::json!("<p>too deep</p>");
        for _ in 0..(MAX_FALLBACK_DEPTH + 1) {
            deep = serde_json::json!([deep]);
        }
        assert_eq!(find_paragraph_fragment(&deep, 0), None);
    }

    #[test]
    fn plain_chunks_get_break_substitution_only() {
        let mut out = String::new();
        append_chunk(&mut out, "line one, still line one");
        assert_eq!(out, "line one, still line one");
    }
}
