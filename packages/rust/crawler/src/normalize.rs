//! Turning URLs and titles into stable filename tokens.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Title token used when a page has no usable title.
pub const DEFAULT_TITLE: &str = "untitled";

/// Token for `url` relative to the crawl's `base_url`.
///
/// Both inputs are percent-decoded first, so `caf%C3%A9` and `café` give the
/// same token. The base is removed only as a leading prefix; a URL outside
/// the base contributes its own path. If the remainder has a `#`, the
/// fragment names the page (hash-routed apps); otherwise the query string is
/// dropped. An empty result means "no path token".
pub fn normalize_path(url: &str, base_url: &str) -> String {
    let url = percent_decode(url);
    let base = percent_decode(base_url);

    let remainder = match url.strip_prefix(base.as_ref()) {
        Some(rest) => rest,
        None => after_authority(&url),
    };
    let remainder = remainder.trim_start_matches('/');

    let raw = match remainder.split_once('#') {
        Some((_, fragment)) => fragment.split('#').next().unwrap_or_default(),
        None => remainder.split_once('?').map_or(remainder, |(path, _)| path),
    };

    clean_token(raw)
}

/// Filename-safe token for a page title, or [`DEFAULT_TITLE`].
pub fn clean_title(title: Option<&str>) -> String {
    title
        .map(clean_token)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// `{title}[_{path}].md` for a fetched page.
pub fn page_filename(title: Option<&str>, url: &str, base_url: &str) -> String {
    let title = clean_title(title);
    match normalize_path(url, base_url) {
        path if path.is_empty() => format!("{title}.md"),
        path => format!("{title}_{path}.md"),
    }
}

/// Drop everything but word characters, whitespace and `-`, then join words
/// with `_` and lower-case.
fn clean_token(raw: &str) -> String {
    static DISALLOWED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
    static WHITESPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let kept = DISALLOWED_RE.replace_all(raw, "");
    WHITESPACE_RE
        .replace_all(kept.trim(), "_")
        .to_lowercase()
}

pub(crate) fn percent_decode(s: &str) -> Cow<'_, str> {
    match urlencoding::decode_binary(s.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(s),
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Path, query and fragment of an absolute URL string.
fn after_authority(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find(['/', '?', '#']).map_or("", |i| &rest[i..])
}
