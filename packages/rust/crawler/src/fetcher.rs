//! Page fetcher backends.
//!
//! A [`PageFetcher`] turns a URL into a [`PageRecord`] or a failure reason.
//! It never returns an error to the crawl loop: one bad page must not stop
//! the job, so every problem is folded into [`FetchOutcome::Failed`].

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use sitekb_markdown::{ConvertOptions, convert};
use sitekb_shared::{PageRecord, Result, SiteKbError};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("SiteKB/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Trait and outcome
// ---------------------------------------------------------------------------

/// Result of fetching one URL.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(PageRecord),
    Failed { reason: String },
}

impl FetchOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl From<Result<PageRecord>> for FetchOutcome {
    fn from(result: Result<PageRecord>) -> Self {
        match result {
            Ok(page) => Self::Fetched(page),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Backend that retrieves a page's content and internal links.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// A link as reported by a crawl backend: either a bare URL or an object
/// carrying an `href`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InternalLink {
    Plain(String),
    Object {
        #[serde(default)]
        href: Option<String>,
    },
}

impl InternalLink {
    /// The link as a plain URL string; objects without an `href` yield `None`.
    pub fn into_url(self) -> Option<String> {
        match self {
            Self::Plain(url) => Some(url),
            Self::Object { href } => href,
        }
        .filter(|u| !u.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches HTML directly and converts it to Markdown in-process.
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (local dev sites, tests with mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: false,
        })
    }

    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    async fn try_fetch(&self, url: &str) -> Result<PageRecord> {
        let parsed = Url::parse(url).map_err(|e| SiteKbError::validation(format!("{url}: {e}")))?;
        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            return Err(SiteKbError::validation(format!(
                "{url}: refusing to fetch private or non-http address"
            )));
        }

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| SiteKbError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteKbError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        if !content_type.contains("html") && !content_type.starts_with("text/") {
            return Err(SiteKbError::parse(format!(
                "{url}: unsupported content type {content_type}"
            )));
        }

        // Redirects may have moved us; links resolve against the final URL.
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| SiteKbError::Network(format!("{url}: body read failed: {e}")))?;

        parse_page(url, &final_url, &body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip(self), fields(backend = "http"))]
    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.try_fetch(url).await.into()
    }
}

/// Build a [`PageRecord`] from a fetched HTML body.
fn parse_page(requested: &str, final_url: &Url, body: &str) -> Result<PageRecord> {
    let internal_links = {
        let doc = Html::parse_document(body);
        extract_internal_links(&doc, final_url)
    };

    let converted = convert(
        body,
        &ConvertOptions {
            source_url: final_url.to_string(),
            title: None,
        },
    )?;

    debug!(
        url = requested,
        links = internal_links.len(),
        words = converted.word_count,
        "page parsed"
    );

    Ok(PageRecord {
        url: requested.to_string(),
        title: converted.title,
        markdown: converted.markdown,
        internal_links,
    })
}

/// Same-origin links on the page, resolved and de-duplicated in page order.
///
/// In-page anchors are dropped; hash routes (`#/path`, `#!/path`) are kept
/// because they address distinct content in single-page apps.
fn extract_internal_links(doc: &Html, page_url: &Url) -> Vec<String> {
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

    let origin = page_url.origin();
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for href in doc.select(&LINK_SEL).filter_map(|el| el.value().attr("href")) {
        let href = href.trim();
        if href.is_empty()
            || (href.starts_with('#') && !is_hash_route(href))
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(mut resolved) = page_url.join(href) else {
            continue;
        };
        if resolved.origin() != origin {
            continue;
        }
        if !resolved.fragment().is_some_and(|f| is_hash_route(&format!("#{f}"))) {
            resolved.set_fragment(None);
        }

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn is_hash_route(href: &str) -> bool {
    href.starts_with("#/") || href.starts_with("#!/")
}

// ---------------------------------------------------------------------------
// ServiceFetcher
// ---------------------------------------------------------------------------

/// Delegates fetching and Markdown conversion to an external crawl service.
///
/// The service accepts `POST {"url": ...}` and answers with
/// `{success, metadata: {title}, markdown, links: {internal: [...]}}`.
pub struct ServiceFetcher {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    success: bool,
    #[serde(default)]
    metadata: ServiceMetadata,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    links: ServiceLinks,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceMetadata {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceLinks {
    #[serde(default)]
    internal: Vec<InternalLink>,
}

impl ServiceFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn try_fetch(&self, url: &str) -> Result<PageRecord> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| SiteKbError::Network(format!("crawl service: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteKbError::Network(format!(
                "crawl service returned HTTP {status} for {url}"
            )));
        }

        let body: ServiceResponse = response
            .json()
            .await
            .map_err(|e| SiteKbError::parse(format!("crawl service response: {e}")))?;

        if !body.success {
            let reason = body
                .error_message
                .unwrap_or_else(|| "crawl service reported failure".into());
            return Err(SiteKbError::Network(format!("{url}: {reason}")));
        }

        Ok(PageRecord {
            url: url.to_string(),
            title: body.metadata.title.filter(|t| !t.trim().is_empty()),
            markdown: body.markdown.unwrap_or_default(),
            internal_links: body
                .links
                .internal
                .into_iter()
                .filter_map(InternalLink::into_url)
                .collect(),
        })
    }
}

#[async_trait]
impl PageFetcher for ServiceFetcher {
    #[instrument(skip(self), fields(backend = "service"))]
    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.try_fetch(url).await.into()
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
