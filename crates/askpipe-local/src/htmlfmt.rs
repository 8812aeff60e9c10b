//! Deterministic HTML-fragment to Markdown-ish text conversion for the
//! channel backend's answer chunks.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static ATTRIBUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^According to Ask AI & Question AI www\.iAsk\.ai:\s*")
        .expect("valid literal pattern")
});

static FOOTNOTE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+\]\(#fn:\d+ 'see footnote'\)").expect("valid literal pattern")
});

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

/// Convert an HTML fragment into plain text.
///
/// Walks every `h1/h2/h3/p/ol/ul/div` match in document order: headings
/// become bold lines, paragraphs are stripped of the upstream attribution
/// sentence and inline footnote markers (and skipped when nothing
/// remains), list items are flattened to `- item` lines, and a
/// `div.footnotes` container becomes an "Authoritative Sources" block with
/// one `- text (href)` line per link. Everything else is ignored.
pub fn format_html(fragment: &str) -> String {
    if fragment.is_empty() {
        return String::new();
    }
    let (Ok(block_sel), Ok(li_sel), Ok(a_sel)) = (
        Selector::parse("h1, h2, h3, p, ol, ul, div"),
        Selector::parse("li"),
        Selector::parse("a"),
    ) else {
        return String::new();
    };

    let doc = Html::parse_fragment(fragment);
    let mut out = String::new();

    for el in doc.select(&block_sel) {
        match el.value().name() {
            "h1" | "h2" | "h3" => {
                out.push_str(&format!("\n**{}**\n", element_text(&el).trim()));
            }
            "p" => {
                let raw = element_text(&el);
                let stripped = ATTRIBUTION.replace(raw.trim(), "");
                let stripped = FOOTNOTE_MARKER.replace_all(&stripped, "");
                let text = stripped.trim();
                if !text.is_empty() {
                    out.push_str(text);
                    out.push('\n');
                }
            }
            "ol" | "ul" => {
                for li in el.select(&li_sel) {
                    out.push_str(&format!("- {}\n", element_text(&li).trim()));
                }
            }
            "div" => {
                if el.value().classes().any(|c| c == "footnotes") {
                    out.push_str("\n**Authoritative Sources**\n");
                    for li in el.select(&li_sel) {
                        if let Some(a) = li.select(&a_sel).next() {
                            out.push_str(&format!(
                                "- {} ({})\n",
                                element_text(&a).trim(),
                                a.value().attr("href").unwrap_or("")
                            ));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    out
}
