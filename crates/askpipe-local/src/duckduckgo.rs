//! DuckDuckGo HTML results-page adapter.
//!
//! Scrapes the `/html/` listing (no chat API), resolves each row's
//! obfuscated redirect link, and in detailed mode hydrates a longer
//! description per result through the reader proxy.

use crate::cache::QueryCache;
use crate::redirect::{favicon_url, reader_proxy_url_at, resolve_redirect};
use crate::useragent::random_user_agent;
use askpipe_core::{Error, Result, SearchHit, WebSearchMode};
use scraper::{Html, Selector};
use std::time::Duration;

pub const RESULTS_PER_PAGE: usize = 10;
const MAX_RESULTS: usize = 20;
const MAX_CACHE_PAGES: usize = 5;
const MAX_DESCRIPTION_CHARS: usize = 4_000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_ENDPOINT: &str = "https://duckduckgo.com/html/";
const DEFAULT_READER_PROXY: &str = "https://r.jina.ai";

#[derive(Debug)]
pub struct DuckDuckGoClient {
    client: reqwest::Client,
    endpoint: String,
    reader_proxy: String,
    cache: QueryCache<Vec<SearchHit>>,
}

impl DuckDuckGoClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(DEFAULT_ENDPOINT, DEFAULT_READER_PROXY)
    }

    /// Construct against explicit endpoints (tests point these at local
    /// fixture servers).
    pub fn with_endpoints(endpoint: &str, reader_proxy: &str) -> Result<Self> {
        let client = crate::http_client(FETCH_TIMEOUT)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            reader_proxy: reader_proxy.trim_end_matches('/').to_string(),
            cache: QueryCache::new(MAX_CACHE_PAGES),
        })
    }

    fn cache_key(query: &str, page: usize, num_results: usize, mode: WebSearchMode) -> String {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
        let mode = match mode {
            WebSearchMode::Short => "short",
            WebSearchMode::Detailed => "detailed",
        };
        format!("{normalized}-{page}-{num_results}-{mode}")
    }

    /// Scrape one page of results.
    ///
    /// `page` is 1-based; `num_results` is capped at 20. Detailed mode
    /// fetches descriptions concurrently, and a failed per-result fetch
    /// degrades to an empty description instead of failing the query.
    pub async fn search(
        &self,
        query: &str,
        page: usize,
        num_results: usize,
        mode: WebSearchMode,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        let page = page.max(1);
        let num_results = num_results.clamp(1, MAX_RESULTS);

        let cache_key = Self::cache_key(query, page, num_results, mode);
        if let Some(hits) = self.cache.get(&cache_key) {
            return Ok(hits);
        }

        let start_index = (page - 1) * RESULTS_PER_PAGE;
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("s", &start_index.to_string())])
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(
                "duckduckgo is rate-limiting (HTTP 429)".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("duckduckgo search HTTP {status}")));
        }

        let html = resp.text().await.map_err(|e| Error::Transport(e.to_string()))?;
        let mut hits = parse_results_page(&html);
        hits.truncate(num_results);

        if mode == WebSearchMode::Detailed {
            let fetches = hits
                .iter()
                .map(|hit| self.fetch_description(hit.url.clone()));
            let descriptions = futures_util::future::join_all(fetches).await;
            for (hit, description) in hits.iter_mut().zip(descriptions) {
                hit.description = Some(description);
            }
        }

        self.cache.insert(cache_key, hits.clone());
        Ok(hits)
    }

    /// Best-effort description fetch through the reader proxy. Any failure
    /// maps to an empty description.
    async fn fetch_description(&self, result_url: String) -> String {
        let proxy_url = reader_proxy_url_at(&self.reader_proxy, &result_url);
        if proxy_url.is_empty() {
            return String::new();
        }
        let resp = match self
            .client
            .get(&proxy_url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(url = %result_url, error = %e, "description fetch failed");
                return String::new();
            }
        };
        if !resp.status().is_success() {
            return String::new();
        }
        let mut text = resp.text().await.unwrap_or_default();
        if let Some((cut, _)) = text.char_indices().nth(MAX_DESCRIPTION_CHARS) {
            text.truncate(cut);
        }
        text.trim().to_string()
    }
}

fn parse_results_page(html: &str) -> Vec<SearchHit> {
    let (Ok(result_sel), Ok(title_sel), Ok(url_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse(".result__title a"),
        Selector::parse(".result__url"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let doc = Html::parse_document(html);
    let mut hits = Vec::new();
    for row in doc.select(&result_sel) {
        let Some(title_el) = row.select(&title_sel).next() else {
            continue;
        };
        let title = title_el.text().collect::<String>().trim().to_string();
        let raw_link = title_el.value().attr("href").unwrap_or("");
        let url = resolve_redirect(raw_link);
        if title.is_empty() || url.is_empty() {
            continue;
        }
        let snippet = row
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let display_url = row
            .select(&url_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        hits.push(SearchHit {
            favicon: favicon_url(&url),
            title,
            url,
            snippet,
            display_url,
            description: None,
        });
    }
    hits
}
