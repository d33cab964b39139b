//! Post-conversion cleanup for Markdown that will be chunked and indexed.
//!
//! Passes run in order. Line-oriented passes never touch the inside of
//! fenced code blocks, so a `## ` inside a fence stays code and is not
//! mistaken for a section heading later on.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;
use url::Url;

/// Run every cleanup pass over raw `htmd` output.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut out = map_prose_lines(md, strip_heading_permalinks);
    out = demote_extra_titles(&out);
    out = map_prose_lines(&out, strip_layout_tags);
    out = absolutize_links(&out, base_url);
    out = tidy_whitespace(&out);
    trace!(before = md.len(), after = out.len(), "markdown cleanup done");
    out
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, f: impl Fn(&str) -> String) -> String {
    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if is_fence(line) {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence { line.to_string() } else { f(line) }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Drop the permalink decorations docs generators append to headings,
/// e.g. `## Install[​](#install "Direct link to Install")` or `## Usage ¶`.
fn strip_heading_permalinks(line: &str) -> String {
    static PERMALINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"\s*\[[^\]]{0,2}\]\(#[^)\s]*(?:\s+"[^"]*")?\)\s*$"#).expect("valid regex")
    });

    if !line.starts_with('#') {
        return line.to_string();
    }
    let stripped = PERMALINK_RE.replace(line, "");
    stripped.trim_end_matches(['¶', ' ']).to_string()
}

/// Keep the first H1 and turn later ones into H2 so they start their own chunk.
fn demote_extra_titles(md: &str) -> String {
    let mut in_fence = false;
    let mut seen_title = false;
    let mut lines = Vec::new();

    for line in md.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        match line.strip_prefix("# ") {
            Some(text) if !in_fence && seen_title => lines.push(format!("## {text}")),
            Some(_) if !in_fence => {
                seen_title = true;
                lines.push(line.to_string());
            }
            _ => lines.push(line.to_string()),
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Stray HTML
// ---------------------------------------------------------------------------

/// Remove layout-only tags that `htmd` passes through, keeping their text.
fn strip_layout_tags(line: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    LAYOUT_TAG_RE.replace_all(line, "").to_string()
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Rewrite relative `[text](href)` links to absolute URLs so a chunk read in
/// isolation still points somewhere real. Images and anchors are left alone.
fn absolutize_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
            let keep = !bang.is_empty()
                || href.starts_with('#')
                || href.contains("://")
                || href.starts_with("mailto:");
            match base.join(href) {
                Ok(resolved) if !keep => format!("[{text}]({resolved})"),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing spaces, cap blank runs at two lines and end with one newline.
fn tidy_whitespace(md: &str) -> String {
    static BLANK_RUN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    let trimmed = md
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let collapsed = BLANK_RUN_RE.replace_all(&trimmed, "\n\n\n");
    format!("{}\n", collapsed.trim_matches('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permalink_anchors_removed_from_headings() {
        assert_eq!(
            strip_heading_permalinks("## Install[\u{200b}](#install \"Direct link to Install\")"),
            "## Install"
        );
        assert_eq!(strip_heading_permalinks("### Usage ¶"), "### Usage");
        assert_eq!(strip_heading_permalinks("## Config [#](#config)"), "## Config");
        // Body text with anchor links is untouched
        assert_eq!(
            strip_heading_permalinks("See [here](#install)"),
            "See [here](#install)"
        );
    }

    #[test]
    fn extra_titles_become_sections() {
        let input = "# Title\n\nSome text\n\n# Another Title\n\nMore text";
        assert_eq!(
            demote_extra_titles(input),
            "# Title\n\nSome text\n\n## Another Title\n\nMore text"
        );
    }

    #[test]
    fn titles_inside_fences_are_left_alone() {
        let input = "# Title\n\n```sh\n# a shell comment\n```\n";
        let out = demote_extra_titles(input);
        assert!(out.contains("# a shell comment"));
        assert!(!out.contains("## a shell comment"));
    }

    #[test]
    fn layout_tags_stripped_outside_code() {
        let input = "<div class=\"note\">Important info</div>\n\n```html\n<div>Preserved</div>\n```";
        let out = map_prose_lines(input, strip_layout_tags);
        assert!(out.starts_with("Important info"));
        assert!(out.contains("<div>Preserved</div>"));
    }

    #[test]
    fn relative_links_resolved_against_page() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        assert_eq!(
            absolutize_links("[Next](/api/reference)", Some(&base)),
            "[Next](https://docs.example.com/api/reference)"
        );
        assert_eq!(
            absolutize_links("[Sibling](setup)", Some(&base)),
            "[Sibling](https://docs.example.com/guide/setup)"
        );
        assert_eq!(
            absolutize_links("[Other](https://other.com/page)", Some(&base)),
            "[Other](https://other.com/page)"
        );
        assert_eq!(
            absolutize_links("[Section](#section-1)", Some(&base)),
            "[Section](#section-1)"
        );
        assert_eq!(
            absolutize_links("![logo](img/logo.png)", Some(&base)),
            "![logo](img/logo.png)"
        );
    }

    #[test]
    fn whitespace_tidied() {
        assert_eq!(tidy_whitespace("Line 1   \nLine 2\t"), "Line 1\nLine 2\n");
        assert_eq!(tidy_whitespace("A\n\n\n\n\n\nB\n\n\n"), "A\n\n\nB\n");
    }

    #[test]
    fn full_pipeline() {
        let input = "# Title\n\n\n\n\n\n## Section[\u{200b}](#section)\n\n<div>Some content</div>\n\n[Next](next)\n\n# Trailing Title";
        let base = Url::parse("https://example.com/docs/page").unwrap();
        let out = run_pipeline(input, Some(&base));

        assert!(!out.contains("\n\n\n\n"));
        assert!(out.contains("## Section\n"));
        assert!(!out.contains("<div>"));
        assert!(out.contains("Some content"));
        assert!(out.contains("(https://example.com/docs/next)"));
        assert!(out.contains("## Trailing Title"));
        assert!(out.ends_with('\n'));
    }
}
