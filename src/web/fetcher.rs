//! Bounded-concurrency, rate-limited web fetcher with HTML extraction
//! (spec §4.B). Blocked-domain list and default headers are carried over
//! verbatim from the Python original's `web_scraper.py`.
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::orchestrator::model::{ExtractedLink, ScrapedDocument};
use crate::web::quality;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_CONTENT_CHARS: usize = 8000;
const MAX_LINKS: usize = 25;
const MAX_IMAGES: usize = 10;
const MIN_REQUEST_SPACING: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_SECS: u64 = 2;
const MAX_RETRY_ATTEMPTS: u32 = 2;

/// Hosts known to block automated fetches or require auth; the handler for
/// FETCH_PROFILE treats these specially rather than scraping directly.
pub const BLOCKED_DOMAINS: &[&str] = &[
    "linkedin.com",
    "www.linkedin.com",
    "facebook.com",
    "www.facebook.com",
    "instagram.com",
    "www.instagram.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "www.tiktok.com",
    "api.github.com",
];

#[must_use]
pub fn is_blocked_host(host: &str) -> bool {
    BLOCKED_DOMAINS.iter().any(|blocked| host.eq_ignore_ascii_case(blocked))
}

/// Process-wide "last request started at" clock enforcing the 1s global
/// spacing rule (§4.B). Guarded by a mutex rather than an atomic because the
/// critical section spans a `sleep`.
struct RateLimiter {
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self { last_start: Mutex::new(None) }
    }

    async fn wait_turn(&self) {
        let mut guard = self.last_start.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_SPACING {
                tokio::time::sleep(MIN_REQUEST_SPACING - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

pub struct WebFetcher {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
}

impl WebFetcher {
    /// # Errors
    /// Returns an error if the underlying `reqwest` client fails to build.
    pub fn new(max_concurrent: usize) -> anyhow::Result<Self> {
        Self::with_timeouts(max_concurrent, Duration::from_secs(10), Duration::from_secs(30))
    }

    /// Like [`Self::new`], but with explicit connect/total timeouts (used by
    /// the production registry to honor the configured values).
    ///
    /// # Errors
    /// Returns an error if the underlying `reqwest` client fails to build.
    pub fn with_timeouts(max_concurrent: usize, connect_timeout: Duration, total_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .build()?;
        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    /// Fetch and extract one URL. Never propagates an error to the caller:
    /// failures are encoded as `ScrapedDocument { success: false, .. }`
    /// (spec §4.B "Failure modes").
    pub async fn scrape(&self, url: &str) -> ScrapedDocument {
        let normalized = normalize_url(url);
        let parsed = match Url::parse(&normalized) {
            Ok(u) => u,
            Err(error) => return ScrapedDocument::failed(url, format!("invalid url: {error}")),
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return ScrapedDocument::failed(url, "unsupported scheme");
        }
        let Some(host) = parsed.host_str() else {
            return ScrapedDocument::failed(url, "missing host");
        };
        if is_blocked_host(host) {
            return ScrapedDocument::failed(url, format!("blocked host: {host}"));
        }

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return ScrapedDocument::failed(url, "fetcher is shutting down"),
        };

        let mut result = self.fetch_with_retry(&normalized, host).await;
        drop(permit);
        // Preserve the caller's exact URL string in the output (spec §8:
        // output[i].url == ui), even though fetching normalizes it.
        result.url = url.to_string();
        result
    }

    /// `scrape_many` (spec §4.B): fetches each distinct normalized URL at
    /// most once (deduplicating network work), but returns exactly one
    /// output entry per input in input order, each carrying its own
    /// caller-supplied URL string (spec §8: `output[i].url == ui`).
    pub async fn scrape_many(&self, urls: &[String], max_concurrent: usize) -> Vec<ScrapedDocument> {
        let unique = dedupe_preserving_order(urls);
        let call_limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let fetched = futures::future::join_all(unique.iter().map(|normalized| {
            let call_limiter = Arc::clone(&call_limiter);
            async move {
                let _permit = call_limiter.acquire().await;
                (normalized.clone(), self.scrape(normalized).await)
            }
        }))
        .await;

        let mut by_normalized: std::collections::HashMap<String, ScrapedDocument> =
            fetched.into_iter().collect();

        urls.iter()
            .map(|original| {
                let normalized = normalize_url(original);
                let mut doc = by_normalized
                    .get(&normalized)
                    .cloned()
                    .unwrap_or_else(|| ScrapedDocument::failed(original, "internal: scrape result missing"));
                doc.url = original.clone();
                doc
            })
            .collect()
    }

    async fn fetch_with_retry(&self, url: &str, host: &str) -> ScrapedDocument {
        let mut attempt: u32 = 0;
        loop {
            self.rate_limiter.wait_turn().await;

            match self.try_fetch_once(url).await {
                FetchOutcome::Success(doc) => return doc,
                FetchOutcome::Permanent(reason) => return ScrapedDocument::failed(url, reason),
                FetchOutcome::Retryable(reason) => {
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return ScrapedDocument::failed(url, reason);
                    }
                    attempt += 1;
                    let backoff = Duration::from_secs(RETRY_BACKOFF_SECS * u64::from(attempt));
                    debug!(%url, %host, attempt, ?backoff, "retrying scrape");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn try_fetch_once(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) if error.is_timeout() => return FetchOutcome::Retryable("request timed out".into()),
            Err(error) => return FetchOutcome::Permanent(format!("request failed: {error}")),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return FetchOutcome::Retryable("rate limited (429)".into());
        }
        if !status.is_success() {
            return FetchOutcome::Permanent(format!("http status {status}"));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_html_content_type(&content_type) {
            return FetchOutcome::Permanent(format!("unsupported content type: {content_type}"));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => return FetchOutcome::Retryable(format!("failed to read body: {error}")),
        };

        FetchOutcome::Success(extract(url, &body))
    }
}

enum FetchOutcome {
    Success(ScrapedDocument),
    Retryable(String),
    Permanent(String),
}

fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml+xml")
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed).to_string()
}

fn dedupe_preserving_order(urls: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(urls.len());
    for url in urls {
        let normalized = normalize_url(url);
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

static PUBLISHED_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(20\d{2}-\d{2}-\d{2})\b").expect("valid regex")
});

/// Parse HTML and build a [`ScrapedDocument`] (spec §4.B extraction rules).
fn extract(url: &str, body: &str) -> ScrapedDocument {
    let document = Html::parse_document(body);
    let domain = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));

    let title = select_text(&document, "title")
        .or_else(|| meta_content(&document, "og:title"));
    let description = meta_content(&document, "description")
        .or_else(|| meta_content(&document, "og:description"));
    let site_name = meta_content(&document, "og:site_name");

    let main = select_main(&document);
    let original_length = main.chars().count();
    let mut content = main;
    if content.chars().count() > MAX_CONTENT_CHARS {
        content = content.chars().take(MAX_CONTENT_CHARS).collect();
    }

    let headings = select_headings(&document);
    let links = select_links(&document, url);
    let images = select_images(&document, url);
    let author = extract_author(&document);
    let published_date = extract_published_date(&document, body);
    let featured_image = meta_content(&document, "og:image").or_else(|| images.first().cloned());

    let mut doc = ScrapedDocument {
        url: url.to_string(),
        success: true,
        error: None,
        title,
        description,
        content,
        original_length,
        headings,
        author,
        publisher: site_name,
        domain,
        published_date,
        featured_image,
        links,
        quality_score: 0.0,
    };
    doc.quality_score = quality::score(&doc);
    doc
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn meta_content(document: &Html, name: &str) -> Option<String> {
    for attr in ["name", "property"] {
        let selector = format!(r#"meta[{attr}="{name}"]"#);
        if let Ok(sel) = Selector::parse(&selector) {
            if let Some(el) = document.select(&sel).next() {
                if let Some(content) = el.value().attr("content") {
                    if !content.trim().is_empty() {
                        return Some(content.trim().to_string());
                    }
                }
            }
        }
    }
    None
}

/// Main content container: `<article>`, then `<main>`, then common content
/// class selectors, then `<body>` as the last resort.
fn select_main(document: &Html) -> String {
    const CANDIDATES: &[&str] = &[
        "article",
        "main",
        ".content",
        ".article",
        ".post",
        "#content",
        "#article",
        "body",
    ];
    for candidate in CANDIDATES {
        if let Ok(sel) = Selector::parse(candidate) {
            if let Some(el) = document.select(&sel).next() {
                let text: String = el.text().collect::<Vec<_>>().join(" ");
                let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !cleaned.is_empty() {
                    return cleaned;
                }
            }
        }
    }
    String::new()
}

fn select_headings(document: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse("h1, h2, h3") else { return Vec::new() };
    document
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn select_links(document: &Html, base_url: &str) -> Vec<ExtractedLink> {
    let Ok(sel) = Selector::parse("article a, main a, a") else { return Vec::new() };
    let base = Url::parse(base_url).ok();
    let mut out = Vec::new();
    for el in document.select(&sel) {
        if out.len() >= MAX_LINKS {
            break;
        }
        let Some(href) = el.value().attr("href") else { continue };
        let text = el.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            continue;
        }
        let absolute = resolve_url(base.as_ref(), href);
        out.push(ExtractedLink { text, url: absolute });
    }
    out
}

fn select_images(document: &Html, base_url: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse("img") else { return Vec::new() };
    let base = Url::parse(base_url).ok();
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("src"))
        .map(|src| resolve_url(base.as_ref(), src))
        .take(MAX_IMAGES)
        .collect()
}

fn resolve_url(base: Option<&Url>, href: &str) -> String {
    match base {
        Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

fn extract_author(document: &Html) -> Option<String> {
    meta_content(document, "author")
        .or_else(|| meta_content(document, "article:author"))
        .or_else(|| meta_content(document, "twitter:creator"))
        .or_else(|| {
            Selector::parse("[itemprop=author], .author, .byline").ok().and_then(|sel| {
                document
                    .select(&sel)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .filter(|s| !s.is_empty())
            })
        })
}

fn extract_published_date(document: &Html, raw_body: &str) -> Option<String> {
    if let Some(value) = meta_content(document, "article:published_time") {
        return Some(value);
    }
    if let Ok(sel) = Selector::parse("[itemprop=datePublished]") {
        if let Some(el) = document.select(&sel).next() {
            if let Some(value) = el.value().attr("content").or_else(|| el.value().attr("datetime")) {
                return Some(value.to_string());
            }
        }
    }
    if let Ok(sel) = Selector::parse("time[datetime]") {
        if let Some(el) = document.select(&sel).next() {
            if let Some(value) = el.value().attr("datetime") {
                return Some(value.to_string());
            }
        }
    }
    PUBLISHED_DATE_RE.find(raw_body).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_trims_trailing_slash() {
        assert_eq!(normalize_url("https://example.dev/a/"), "https://example.dev/a");
        assert_eq!(normalize_url(" https://example.dev/a "), "https://example.dev/a");
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let urls = vec![
            "https://example.dev/a/".to_string(),
            "https://example.dev/b".to_string(),
            "https://example.dev/a".to_string(),
        ];
        let deduped = dedupe_preserving_order(&urls);
        assert_eq!(deduped, vec!["https://example.dev/a", "https://example.dev/b"]);
    }

    #[test]
    fn is_blocked_host_matches_blocklist() {
        assert!(is_blocked_host("www.linkedin.com"));
        assert!(is_blocked_host("x.com"));
        assert!(!is_blocked_host("example.dev"));
    }

    #[test]
    fn is_html_content_type_accepts_xhtml() {
        assert!(is_html_content_type("application/xhtml+xml; charset=utf-8"));
        assert!(is_html_content_type("text/html"));
        assert!(!is_html_content_type("application/pdf"));
    }

    #[test]
    fn extract_reads_title_description_and_headings() {
        let html = r#"<html><head><title>My Profile</title>
            <meta name="description" content="A bio"></head>
            <body><article><h1>Heading One</h1><h2>Heading Two</h2>
            <p>Experienced professional with career achievements in leadership.</p>
            <a href="/projects">Projects</a></article></body></html>"#;
        let doc = extract("https://example.dev/me", html);
        assert_eq!(doc.title.as_deref(), Some("My Profile"));
        assert_eq!(doc.description.as_deref(), Some("A bio"));
        assert_eq!(doc.headings.len(), 2);
        assert_eq!(doc.links.len(), 1);
        assert_eq!(doc.links[0].url, "https://example.dev/projects");
    }

    #[tokio::test]
    async fn scrape_rejects_invalid_scheme() {
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let doc = fetcher.scrape("ftp://example.dev/a").await;
        assert!(!doc.success);
    }

    #[tokio::test]
    async fn scrape_rejects_blocked_host() {
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let doc = fetcher.scrape("https://www.linkedin.com/in/someone").await;
        assert!(!doc.success);
        assert!(doc.error.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn scrape_many_preserves_order_and_length() {
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let urls = vec![
            "https://www.linkedin.com/in/a".to_string(),
            "ftp://bad".to_string(),
        ];
        let docs = fetcher.scrape_many(&urls, 5).await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].url, "https://www.linkedin.com/in/a");
    }
}
