//! Direct page utilities: readable-text extraction and metadata scraping
//! for a single URL.

use crate::redirect::favicon_url;
use crate::useragent::random_user_agent;
use askpipe_core::{Error, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const EXCLUDED_TAGS: [&str; 9] = [
    "script", "style", "noscript", "iframe", "svg", "nav", "footer", "header", "aside",
];

// Substring markers over class/id attributes; deliberately coarse.
const UNWANTED_MARKERS: [&str; 7] = [
    "ad", "banner", "popup", "cookie", "newsletter", "social", "share",
];

// Checked in priority order; the first match wins.
const CONTENT_SELECTORS: [&str; 14] = [
    "article",
    "main",
    "[role=\"main\"]",
    ".post-content",
    ".article-content",
    ".content",
    "#content",
    ".post",
    ".article",
    ".entry-content",
    ".page-content",
    ".post-body",
    ".post-text",
    ".story-body",
];

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Prefer a main-content container over the whole `<body>`.
    pub extract_main_content: bool,
    /// Replace images with their alt text (`[Image: alt]`); drop them
    /// entirely otherwise.
    pub include_images: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            extract_main_content: true,
            include_images: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub og_image: String,
    pub favicon: String,
    pub url: String,
}

#[derive(Debug)]
pub struct PageClient {
    client: reqwest::Client,
}

impl PageClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: crate::http_client(FETCH_TIMEOUT)?,
        })
    }

    async fn fetch(&self, page_url: &str) -> Result<reqwest::Response> {
        url::Url::parse(page_url)
            .map_err(|e| Error::Validation(format!("invalid url: {e}")))?;
        let resp = self
            .client
            .get(page_url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimit(format!(
                "{page_url} is rate-limiting (HTTP 429)"
            )));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "failed to fetch {page_url}: HTTP {status}"
            )));
        }
        Ok(resp)
    }

    /// Fetch a URL and return its readable text content. Non-HTML bodies
    /// are returned as-is.
    pub async fn fetch_content(&self, page_url: &str, opts: FetchOptions) -> Result<String> {
        let resp = self.fetch(page_url).await?;
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = resp.text().await.map_err(|e| Error::Transport(e.to_string()))?;
        if !is_html {
            return Ok(body);
        }
        Ok(extract_readable_text(&body, opts))
    }

    /// Fetch a URL and scrape its title/description/social metadata.
    pub async fn metadata(&self, page_url: &str) -> Result<PageMetadata> {
        let resp = self.fetch(page_url).await?;
        let body = resp.text().await.map_err(|e| Error::Transport(e.to_string()))?;
        Ok(extract_metadata(&body, page_url))
    }
}

fn attr_markers(el: &ElementRef) -> String {
    let mut out = String::new();
    if let Some(class) = el.value().attr("class") {
        out.push_str(class);
        out.push(' ');
    }
    if let Some(id) = el.value().attr("id") {
        out.push_str(id);
    }
    out.to_ascii_lowercase()
}

fn is_unwanted(el: &ElementRef) -> bool {
    let name = el.value().name();
    if EXCLUDED_TAGS.contains(&name) {
        return true;
    }
    let markers = attr_markers(el);
    !markers.is_empty() && UNWANTED_MARKERS.iter().any(|m| markers.contains(m))
}

fn collect_text(el: ElementRef, include_images: bool, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        if is_unwanted(&child_el) {
            continue;
        }
        if child_el.value().name() == "img" {
            if include_images {
                if let Some(alt) = child_el.value().attr("alt").filter(|a| !a.is_empty()) {
                    out.push_str(&format!("[Image: {alt}]"));
                }
            }
            continue;
        }
        collect_text(child_el, include_images, out);
    }
}

/// Collapse all whitespace runs to single spaces and trim.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn extract_readable_text(html: &str, opts: FetchOptions) -> String {
    let doc = Html::parse_document(html);

    if opts.extract_main_content {
        for sel_str in CONTENT_SELECTORS {
            let Ok(sel) = Selector::parse(sel_str) else {
                continue;
            };
            if let Some(el) = doc.select(&sel).next() {
                let mut out = String::new();
                collect_text(el, opts.include_images, &mut out);
                return clean_text(&out);
            }
        }
    }

    let Ok(body_sel) = Selector::parse("body") else {
        return String::new();
    };
    let mut out = String::new();
    if let Some(body) = doc.select(&body_sel).next() {
        collect_text(body, opts.include_images, &mut out);
    }
    clean_text(&out)
}

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn resolve_relative(href: &str, base: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

pub fn extract_metadata(html: &str, page_url: &str) -> PageMetadata {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            doc.select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let description = select_attr(&doc, "meta[name=\"description\"]", "content")
        .or_else(|| select_attr(&doc, "meta[property=\"og:description\"]", "content"))
        .unwrap_or_default();

    let og_image = select_attr(&doc, "meta[property=\"og:image\"]", "content")
        .map(|href| resolve_relative(&href, page_url))
        .unwrap_or_default();

    let favicon = select_attr(&doc, "link[rel=\"icon\"]", "href")
        .or_else(|| select_attr(&doc, "link[rel=\"shortcut icon\"]", "href"))
        .map(|href| resolve_relative(&href, page_url))
        .unwrap_or_else(|| favicon_url(page_url));

    PageMetadata {
        title,
        description,
        og_image,
        favicon,
        url: page_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    const ARTICLE_HTML: &str = concat!(
        "<html><head><title>A Page</title>",
        "<meta name=\"description\" content=\"Page description\">",
        "<meta property=\"og:image\" content=\"/img/cover.png\">",
        "<link rel=\"icon\" href=\"/favicon.ico\">",
        "<script>var junk = 1;</script>",
        "</head><body>",
        "<nav>Navigation links</nav>",
        "<div class=\"cookie-banner\">Accept cookies</div>",
        "<article>Real content <img alt=\"a diagram\"> continues here.</article>",
        "<footer>Footer junk</footer>",
        "</body></html>"
    );

    #[test]
    fn main_content_extraction_prefers_the_article_element() {
        let text = extract_readable_text(ARTICLE_HTML, FetchOptions::default());
        assert_eq!(text, "Real content [Image: a diagram] continues here.");
    }

    #[test]
    fn body_fallback_skips_boilerplate_and_unwanted_containers() {
        let html = concat!(
            "<html><body><nav>menu</nav>",
            "<div id=\"ad-slot\">buy things</div>",
            "<div>visible text</div>",
            "</body></html>"
        );
        let text = extract_readable_text(html, FetchOptions::default());
        assert_eq!(text, "visible text");
    }

    #[test]
    fn images_can_be_dropped_entirely() {
        let opts = FetchOptions {
            extract_main_content: true,
            include_images: false,
        };
        let text = extract_readable_text(ARTICLE_HTML, opts);
        assert_eq!(text, "Real content continues here.");
    }

    #[test]
    fn metadata_resolves_relative_urls_against_the_page() {
        let meta = extract_metadata(ARTICLE_HTML, "https://example.com/post/1");
        assert_eq!(meta.title, "A Page");
        assert_eq!(meta.description, "Page description");
        assert_eq!(meta.og_image, "https://example.com/img/cover.png");
        assert_eq!(meta.favicon, "https://example.com/favicon.ico");
    }

    #[test]
    fn metadata_falls_back_to_the_favicon_service() {
        let meta = extract_metadata("<html><head></head></html>", "https://example.com/x");
        assert_eq!(
            meta.favicon,
            "https://www.google.com/s2/favicons?domain=example.com&sz=32"
        );
        assert_eq!(meta.title, "");
    }

    async fn spawn_fixture() -> SocketAddr {
        let app = Router::new()
            .route(
                "/article",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], ARTICLE_HTML) }),
            )
            .route(
                "/plain",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "raw body\n") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn html_bodies_are_reduced_to_readable_text() {
        let addr = spawn_fixture().await;
        let client = PageClient::new().unwrap();
        let text = client
            .fetch_content(&format!("http://{addr}/article"), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "Real content [Image: a diagram] continues here.");
    }

    #[tokio::test]
    async fn non_html_bodies_are_returned_as_is() {
        let addr = spawn_fixture().await;
        let client = PageClient::new().unwrap();
        let text = client
            .fetch_content(&format!("http://{addr}/plain"), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "raw body\n");
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_before_any_request() {
        let client = PageClient::new().unwrap();
        let err = client
            .fetch_content("not-a-url", FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got: {err}");
    }
}
