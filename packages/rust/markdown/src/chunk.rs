//! Split Markdown into indexable chunks at second-level headings.

/// One section of a page. The heading line stays in `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Text of the `## ` heading that opens the chunk; `None` for the preamble.
    pub heading: Option<String>,
    pub text: String,
}

/// Split `md` before every `## ` heading outside a fenced code block.
///
/// Content before the first heading becomes its own chunk. Chunks that are
/// empty after trimming are dropped.
pub fn split_by_h2(md: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut heading: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in md.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence {
            if let Some(text) = line.strip_prefix("## ") {
                flush(&mut chunks, heading.take(), &lines);
                lines.clear();
                heading = Some(text.trim().to_string());
            }
        }
        lines.push(line);
    }
    flush(&mut chunks, heading, &lines);

    chunks
}

fn flush(chunks: &mut Vec<Chunk>, heading: Option<String>, lines: &[&str]) {
    let text = lines.join("\n").trim().to_string();
    if !text.is_empty() {
        chunks.push(Chunk { heading, text });
    }
}
