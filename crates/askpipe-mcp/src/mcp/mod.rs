//! MCP stdio surface: one tool per backend adapter.
//!
//! This layer only validates/normalizes caller parameters, invokes the
//! relevant adapter, and maps results and errors into the tool response
//! envelope. The adapters never see envelopes.

use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

use askpipe_core::{AskMode, DetailLevel, WebSearchMode};
use askpipe_local::{
    BraveAiClient, DuckDuckGoClient, FeloClient, FetchOptions, IAskClient, PageClient,
};

mod envelope;
use envelope::{error_result, text_result};

#[derive(Debug, Deserialize, JsonSchema)]
struct WebSearchArgs {
    /// Search query.
    query: String,
    /// How many results to return (default 3, maximum 20).
    #[serde(default)]
    num_results: Option<usize>,
    /// 1-based results page (default 1).
    #[serde(default)]
    page: Option<usize>,
    /// "short" for basic results, "detailed" to include a per-result
    /// description fetched through the reader proxy.
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchUrlArgs {
    /// URL to fetch.
    url: String,
    /// Prefer the page's main-content container over the whole body
    /// (default true).
    #[serde(default)]
    extract_main_content: Option<bool>,
    /// Replace images with their alt text instead of dropping them
    /// (default true).
    #[serde(default)]
    include_images: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UrlMetadataArgs {
    /// URL to inspect.
    url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FeloSearchArgs {
    /// Search query or prompt.
    query: String,
    /// Consume the upstream stream incrementally before returning the
    /// assembled text (default false).
    #[serde(default)]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BraveSearchArgs {
    /// Search query or prompt.
    query: String,
    /// Enable the upstream deep-research mode (default false).
    #[serde(default)]
    research: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct IAskSearchArgs {
    /// The question to ask.
    query: String,
    /// One of: question, academic, forums, wiki, thinking (default
    /// question).
    #[serde(default)]
    mode: Option<String>,
    /// One of: concise, detailed, comprehensive (default: upstream
    /// standard response).
    #[serde(default)]
    detail_level: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AskpipeMcp {
    tool_router: RmcpToolRouter<Self>,
    search: Arc<DuckDuckGoClient>,
    brave: Arc<BraveAiClient>,
    felo: Arc<FeloClient>,
    iask: Arc<IAskClient>,
    page: Arc<PageClient>,
}

#[tool_router]
impl AskpipeMcp {
    pub(crate) fn new() -> Result<Self, McpError> {
        fn internal(e: askpipe_core::Error) -> McpError {
            McpError::internal_error(e.to_string(), None)
        }
        Ok(Self {
            tool_router: Self::tool_router(),
            search: Arc::new(DuckDuckGoClient::new().map_err(internal)?),
            brave: Arc::new(BraveAiClient::new().map_err(internal)?),
            felo: Arc::new(FeloClient::new().map_err(internal)?),
            iask: Arc::new(IAskClient::new().map_err(internal)?),
            page: Arc::new(PageClient::new().map_err(internal)?),
        })
    }

    #[tool(
        description = "Perform a web search and receive results with titles, URLs and snippets"
    )]
    async fn web_search(
        &self,
        params: Parameters<WebSearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(query = %args.query, "web_search");
        let mode = match args.mode.as_deref().map(str::parse::<WebSearchMode>) {
            None => WebSearchMode::default(),
            Some(Ok(mode)) => mode,
            Some(Err(e)) => return Ok(error_result("searching the web", &e)),
        };
        let num_results = args.num_results.unwrap_or(3);
        let page = args.page.unwrap_or(1);
        match self.search.search(&args.query, page, num_results, mode).await {
            Ok(hits) => {
                let text = serde_json::to_string(&hits)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                Ok(text_result(text))
            }
            Err(e) => Ok(error_result("searching the web", &e)),
        }
    }

    #[tool(description = "Fetch a URL and return its readable text content")]
    async fn fetch_url(
        &self,
        params: Parameters<FetchUrlArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(url = %args.url, "fetch_url");
        let opts = FetchOptions {
            extract_main_content: args.extract_main_content.unwrap_or(true),
            include_images: args.include_images.unwrap_or(true),
        };
        match self.page.fetch_content(&args.url, opts).await {
            Ok(text) => Ok(text_result(text)),
            Err(e) => Ok(error_result("fetching url", &e)),
        }
    }

    #[tool(description = "Extract title/description/social metadata from a URL")]
    async fn url_metadata(
        &self,
        params: Parameters<UrlMetadataArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(url = %args.url, "url_metadata");
        match self.page.metadata(&args.url).await {
            Ok(meta) => {
                let text = serde_json::to_string(&meta)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                Ok(text_result(text))
            }
            Err(e) => Ok(error_result("extracting metadata", &e)),
        }
    }

    #[tool(description = "AI answer search via Felo (streaming upstream, returns full text)")]
    async fn felo_search(
        &self,
        params: Parameters<FeloSearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(query = %args.query, stream = args.stream.unwrap_or(false), "felo_search");
        if args.stream.unwrap_or(false) {
            let mut chunks = match self.felo.search_streaming(&args.query).await {
                Ok(chunks) => chunks,
                Err(e) => return Ok(error_result("searching felo", &e)),
            };
            let mut full = String::new();
            use tokio_stream::StreamExt;
            while let Some(delta) = chunks.next().await {
                match delta {
                    Ok(delta) => full.push_str(&delta),
                    Err(e) => return Ok(error_result("searching felo", &e)),
                }
            }
            return Ok(text_result(full));
        }
        match self.felo.search(&args.query).await {
            Ok(text) => Ok(text_result(text)),
            Err(e) => Ok(error_result("searching felo", &e)),
        }
    }

    #[tool(description = "AI answer search via Brave (optionally in deep-research mode)")]
    async fn brave_search(
        &self,
        params: Parameters<BraveSearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(query = %args.query, "brave_search");
        match self
            .brave
            .search(&args.query, args.research.unwrap_or(false))
            .await
        {
            Ok(text) => Ok(text_result(text)),
            Err(e) => Ok(error_result("searching brave", &e)),
        }
    }

    #[tool(
        description = "AI answer search via iAsk with mode and detail-level modifiers"
    )]
    async fn iask_search(
        &self,
        params: Parameters<IAskSearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        tracing::debug!(query = %args.query, "iask_search");
        let mode = match args.mode.as_deref().map(str::parse::<AskMode>) {
            None => AskMode::default(),
            Some(Ok(mode)) => mode,
            Some(Err(e)) => return Ok(error_result("searching iask", &e)),
        };
        let detail = match args.detail_level.as_deref().map(str::parse::<DetailLevel>) {
            None => None,
            Some(Ok(detail)) => Some(detail),
            Some(Err(e)) => return Ok(error_result("searching iask", &e)),
        };
        match self.iask.search(&args.query, mode, detail).await {
            Ok(text) => Ok(text_result(text)),
            Err(e) => Ok(error_result("searching iask", &e)),
        }
    }
}

#[tool_handler]
impl rmcp::ServerHandler for AskpipeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Web search plus three AI answer engines behind one tool surface. \
                 Results are plain text; errors come back in the envelope, never as crashes."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio() -> Result<(), McpError> {
    let svc = AskpipeMcp::new()?;
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_constructs_with_all_backends() {
        let svc = AskpipeMcp::new().unwrap();
        let info = rmcp::ServerHandler::get_info(&svc);
        assert!(info.instructions.is_some());
    }

    #[tokio::test]
    async fn invalid_iask_mode_maps_to_the_error_envelope() {
        let svc = AskpipeMcp::new().unwrap();
        let result = svc
            .iask_search(Parameters(IAskSearchArgs {
                query: "q".to_string(),
                mode: Some("bogus".to_string()),
                detail_level: None,
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(text.starts_with("Error searching iask:"), "got: {text}");
        assert!(text.contains("bogus"), "got: {text}");
    }

    #[tokio::test]
    async fn invalid_web_search_mode_maps_to_the_error_envelope() {
        let svc = AskpipeMcp::new().unwrap();
        let result = svc
            .web_search(Parameters(WebSearchArgs {
                query: "q".to_string(),
                num_results: None,
                page: None,
                mode: Some("verbose".to_string()),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
