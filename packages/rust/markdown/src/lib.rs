//! HTML-to-Markdown conversion, cleanup passes, and section chunking.
//!
//! Converts fetched HTML pages to clean Markdown using the `htmd` crate, runs
//! cleanup passes so headings and links survive chunking, and splits the
//! result into `## ` sections for indexing.

pub mod chunk;
mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use sitekb_shared::{Result, SiteKbError};

pub use chunk::{Chunk, split_by_h2};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The cleaned Markdown body.
    pub markdown: String,
    /// Page title, if one could be found.
    pub title: Option<String>,
    /// Approximate word count, excluding code blocks.
    pub word_count: usize,
}

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Page URL, used for resolving relative links.
    pub source_url: String,
    /// Override title. When `None` the `<title>` element is used, then the first H1.
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert a full HTML document to clean Markdown.
///
/// 1. Picks the main content container and drops page chrome
/// 2. Rewrites `<table>` elements as Markdown tables
/// 3. Converts HTML to Markdown via `htmd`
/// 4. Runs the cleanup passes
#[instrument(skip(html), fields(url = %opts.source_url))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let (content_html, document_title) = {
        let doc = Html::parse_document(html);
        (extract_content_html(&doc, html), document_title(&doc))
    };
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "iframe", "noscript", "svg",
        ])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| SiteKbError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(&opts.source_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    let title = opts
        .title
        .clone()
        .or(document_title)
        .or_else(|| extract_title_from_markdown(&markdown));
    let word_count = count_words(&markdown);

    debug!(?title, word_count, final_len = markdown.len(), "conversion complete");

    Ok(ConvertResult {
        markdown,
        title,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("valid selector"));

/// Replace HTML `<table>` elements with Markdown table text before `htmd` runs.
///
/// `htmd` 0.1 has no table support.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    let mut result = html.to_string();
    for table in doc.select(&TABLE_SEL) {
        let md_table = html_table_to_markdown(&table);
        result = result.replacen(&table.html(), &md_table, 1);
    }
    result
}

fn cell_texts(row: &ElementRef, sel: &Selector) -> Vec<String> {
    row.select(sel)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

/// Render one table element as Markdown. The first `<th>` row is the header;
/// without one the first data row is promoted.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&TR_SEL) {
        let ths = cell_texts(&tr, &TH_SEL);
        if !ths.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }
        let tds = cell_texts(&tr, &TD_SEL);
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let render = |row: &[String]| format!("| {} |\n", row.join(" | "));
    let mut md = String::from("\n\n");
    md.push_str(&render(&rows[0]));
    md.push_str(&render(&vec!["---".to_string(); col_count]));
    let data_start = usize::from(has_header);
    for row in &rows[data_start..] {
        md.push_str(&render(row));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Main content HTML, falling back to `<body>` and then the raw input.
fn extract_content_html(doc: &Html, raw: &str) -> String {
    const CONTENT_SELECTORS: &[&str] = &[
        "article .markdown",
        ".vp-doc",
        ".markdown-section",
        "[role=\"main\"]",
        "article",
        "main",
        ".content",
        "body",
    ];

    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| doc.select(&sel).next().map(|el| el.inner_html()))
        .unwrap_or_else(|| raw.to_string())
}

/// Text of the `<title>` element, if present and non-blank.
fn document_title(doc: &Html) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("head > title, title").expect("valid selector"));

    doc.select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

/// Count words in the Markdown body, skipping fenced code.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    CODE_BLOCK_RE
        .replace_all(md, "")
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c == '#'))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
