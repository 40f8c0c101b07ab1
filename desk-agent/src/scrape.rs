//! Web scraping collaborator.
//!
//! Fetches a page with a bounded GET and extracts coarse structure (title,
//! visible text, links, images, optional selector matches) with regular
//! expressions. Extraction fidelity is deliberately rough; callers that need
//! real DOM semantics are outside this crate's scope.

use desk_agent_sdk::{async_trait, PageData, PageImage, PageLink};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

/// Original assistant caps carried over
const MAX_LINKS: usize = 20;
const MAX_IMAGES: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("target returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, selector: Option<&str>) -> Result<PageData, FetchError>;
}

/// HTTP fetcher with a browser user agent
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, selector: Option<&str>) -> Result<PageData, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(extract_page(url, status.as_u16(), &html, selector))
    }
}

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
});
static IMG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\s[^>]*>").unwrap());
static IMG_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)src\s*=\s*["']([^"']+)["']"#).unwrap());
static IMG_ALT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)alt\s*=\s*["']([^"']*)["']"#).unwrap());

/// Build a [`PageData`] from raw HTML. With a selector only the matched
/// fragments are returned; otherwise the full text plus links and images.
pub fn extract_page(url: &str, status: u16, html: &str, selector: Option<&str>) -> PageData {
    let content_length = html.len();
    let title = TITLE_RE
        .captures(html)
        .map(|c| collapse_text(&c[1]))
        .filter(|t| !t.is_empty());

    let (text, links, images, selected) = match selector {
        Some(selector) => (
            String::new(),
            Vec::new(),
            Vec::new(),
            Some(select_fragments(html, selector)),
        ),
        None => (
            visible_text(html),
            extract_links(html),
            extract_images(html),
            None,
        ),
    };

    PageData {
        url: url.to_string(),
        status,
        title,
        text,
        links,
        images,
        selected,
        content_length,
        fetched_at: chrono::Local::now(),
    }
}

/// Strip scripts, styles and tags; collapse whitespace
pub fn visible_text(html: &str) -> String {
    let without_blocks = SCRIPT_STYLE_RE.replace_all(html, " ");
    collapse_text(&without_blocks)
}

fn collapse_text(fragment: &str) -> String {
    let without_tags = TAG_RE.replace_all(fragment, " ");
    WHITESPACE_RE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

fn extract_links(html: &str) -> Vec<PageLink> {
    LINK_RE
        .captures_iter(html)
        .take(MAX_LINKS)
        .map(|c| PageLink {
            href: c[1].to_string(),
            text: collapse_text(&c[2]),
        })
        .collect()
}

fn extract_images(html: &str) -> Vec<PageImage> {
    IMG_RE
        .find_iter(html)
        .filter_map(|m| {
            let tag = m.as_str();
            let src = IMG_SRC_RE.captures(tag)?[1].to_string();
            let alt = IMG_ALT_RE
                .captures(tag)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            Some(PageImage { alt, src })
        })
        .take(MAX_IMAGES)
        .collect()
}

/// Limited selector support: `tag`, `.class` or `#id`. Matches return the
/// fragment's visible text.
fn select_fragments(html: &str, selector: &str) -> Vec<String> {
    let selector = selector.trim();
    let pattern = if let Some(class) = selector.strip_prefix('.') {
        format!(
            r#"(?is)<[a-z][a-z0-9]*\b[^>]*class\s*=\s*["'][^"']*\b{}\b[^"']*["'][^>]*>(.*?)</"#,
            regex::escape(class)
        )
    } else if let Some(id) = selector.strip_prefix('#') {
        format!(
            r#"(?is)<[a-z][a-z0-9]*\b[^>]*id\s*=\s*["']{}["'][^>]*>(.*?)</"#,
            regex::escape(id)
        )
    } else {
        let tag = regex::escape(selector);
        format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>")
    };

    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(html)
        .map(|c| collapse_text(&c[1]))
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title> Example  Page </title>
        <style>body { color: red; }</style></head>
        <body>
        <script>var hidden = 1;</script>
        <h1 id="headline">Welcome</h1>
        <p class="note">first note</p>
        <p class="note important">second note</p>
        <a href="/one">One</a>
        <a href="/two"><b>Two</b></a>
        <img src="/logo.png" alt="Logo">
        <img src="/plain.png">
        </body></html>
    "#;

    #[test]
    fn title_is_extracted_and_collapsed() {
        let page = extract_page("http://example.test", 200, PAGE, None);
        assert_eq!(page.title.as_deref(), Some("Example Page"));
    }

    #[test]
    fn scripts_and_styles_are_invisible() {
        let page = extract_page("http://example.test", 200, PAGE, None);
        assert!(page.text.contains("Welcome"));
        assert!(!page.text.contains("hidden"));
        assert!(!page.text.contains("color: red"));
    }

    #[test]
    fn links_capture_href_and_nested_text() {
        let page = extract_page("http://example.test", 200, PAGE, None);
        assert_eq!(page.links.len(), 2);
        assert_eq!(page.links[0].href, "/one");
        assert_eq!(page.links[1].text, "Two");
    }

    #[test]
    fn images_capture_src_and_optional_alt() {
        let page = extract_page("http://example.test", 200, PAGE, None);
        assert_eq!(page.images.len(), 2);
        assert_eq!(page.images[0].alt, "Logo");
        assert_eq!(page.images[1].alt, "");
    }

    #[test]
    fn link_cap_is_applied() {
        let many: String = (0..50)
            .map(|i| format!(r#"<a href="/{i}">link {i}</a>"#))
            .collect();
        assert_eq!(extract_links(&many).len(), MAX_LINKS);
    }

    #[test]
    fn class_selector_returns_only_matches() {
        let page = extract_page("http://example.test", 200, PAGE, Some(".note"));
        let selected = page.selected.unwrap();
        assert_eq!(selected, vec!["first note", "second note"]);
        // Selector mode skips the generic extraction
        assert!(page.links.is_empty());
        assert!(page.text.is_empty());
    }

    #[test]
    fn id_and_tag_selectors_match() {
        let by_id = select_fragments(PAGE, "#headline");
        assert_eq!(by_id, vec!["Welcome"]);

        let by_tag = select_fragments(PAGE, "h1");
        assert_eq!(by_tag, vec!["Welcome"]);
    }
}
