//! Turns retrieved chunks into the bounded context block handed to the model,
//! plus the citation list shown to the user.

use crate::models::{DocumentChunk, FormattedContext};

pub const ELLIPSIS: char = '…';

const BLOCK_SEPARATOR: &str = "\n\n";
const UNKNOWN_DOC_ID: &str = "N/A";
const UNKNOWN_TITLE: &str = "Desconocido";
const UNKNOWN_AUTHORS: &str = "Autor desconocido";
const UNKNOWN_PAGE: &str = "N/A";
const UNKNOWN_SOURCE: &str = "Fuente desconocida";

/// Formats chunks in input order. The returned text never exceeds
/// `max_chars_total` characters, separators included.
pub fn format_context(
    chunks: &[DocumentChunk],
    enumerate: bool,
    max_chars_total: usize,
    max_chars_per_block: usize,
) -> FormattedContext {
    let mut parts: Vec<String> = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    let mut total = 0usize;

    for (idx, chunk) in chunks.iter().enumerate() {
        let labels = BlockLabels::from_chunk(chunk);
        let header = labels.header(enumerate.then_some(idx + 1));
        let body = truncate_at_word(chunk.content.trim(), max_chars_per_block);

        let separator = if parts.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.len()
        };
        let header_len = char_len(&header);
        let used = total + separator;

        if used + header_len + char_len(&body) > max_chars_total {
            let remaining = max_chars_total.saturating_sub(used + header_len);
            let partial = truncate_at_word(&body, remaining);
            if used + header_len < max_chars_total && has_words(&partial) {
                parts.push(format!("{header}{partial}"));
                push_unique(&mut sources, labels.citation());
            }
            break;
        }

        let block = format!("{header}{body}");
        total = used + char_len(&block);
        parts.push(block);
        push_unique(&mut sources, labels.citation());
    }

    FormattedContext {
        text: parts.join(BLOCK_SEPARATOR),
        sources,
    }
}

/// Cuts `text` to at most `limit` characters on a whitespace boundary and
/// appends the ellipsis marker. Text that already fits is returned as is.
pub fn truncate_at_word(text: &str, limit: usize) -> String {
    if char_len(text) <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }

    let candidate: String = text.chars().take(limit).collect();
    let kept = match candidate.rfind(char::is_whitespace) {
        Some(pos) => candidate[..pos].trim_end(),
        None => "",
    };

    let mut out = String::with_capacity(kept.len() + ELLIPSIS.len_utf8());
    out.push_str(kept);
    out.push(ELLIPSIS);
    out
}

struct BlockLabels<'a> {
    doc_id: &'a str,
    title: &'a str,
    authors: &'a str,
    page: String,
    source: &'a str,
}

impl<'a> BlockLabels<'a> {
    fn from_chunk(chunk: &'a DocumentChunk) -> Self {
        let md = &chunk.metadata;
        Self {
            doc_id: non_empty(md.doc_id.as_deref()).unwrap_or(UNKNOWN_DOC_ID),
            title: non_empty(md.title.as_deref())
                .or_else(|| non_empty(md.source.as_deref()))
                .unwrap_or(UNKNOWN_TITLE),
            authors: non_empty(md.authors.as_deref()).unwrap_or(UNKNOWN_AUTHORS),
            page: md
                .page
                .map(|page| page.to_string())
                .unwrap_or_else(|| UNKNOWN_PAGE.to_string()),
            source: non_empty(md.source.as_deref()).unwrap_or(UNKNOWN_SOURCE),
        }
    }

    fn header(&self, number: Option<usize>) -> String {
        let prefix = number.map(|n| format!("[{n}] ")).unwrap_or_default();
        format!(
            "{prefix}Documento ID: {}\nTítulo: {}\nAutores: {}\nPágina: {}\nFuente: {}\nContenido:\n",
            self.doc_id, self.title, self.authors, self.page, self.source
        )
    }

    fn citation(&self) -> String {
        format!("{} (p.{})", self.title, self.page)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn push_unique(sources: &mut Vec<String>, citation: String) {
    if !sources.contains(&citation) {
        sources.push(citation);
    }
}

fn has_words(text: &str) -> bool {
    !text.trim_end_matches(ELLIPSIS).trim().is_empty()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
