//! Best-effort text extraction for content triggers and keyword heuristics.

use std::io::{self, Read};
use std::path::Path;

use flate2::read::ZlibDecoder;
use lopdf::Document;
use vsort_config::log_pipeline_debug;

/// Pulls plain text out of a file. Unsupported types yield an empty string.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> io::Result<String>;
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "log"];

/// Plain text files plus PDFs.
#[derive(Debug, Clone)]
pub struct DefaultExtractor {
    /// Characters returned at most
    pub max_chars: usize,
    /// Leading PDF pages read at most
    pub max_pdf_pages: usize,
}

impl Default for DefaultExtractor {
    fn default() -> Self {
        Self {
            max_chars: 5000,
            max_pdf_pages: 5,
        }
    }
}

impl TextExtractor for DefaultExtractor {
    fn extract(&self, path: &Path) -> io::Result<String> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let text = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            let mut buf = Vec::new();
            std::fs::File::open(path)?
                .take((self.max_chars * 4) as u64)
                .read_to_end(&mut buf)?;
            String::from_utf8_lossy(&buf).into_owned()
        } else if ext == "pdf" {
            pdf_text(&std::fs::read(path)?, self.max_pdf_pages)
        } else {
            String::new()
        };

        Ok(text.chars().take(self.max_chars).collect())
    }
}

/// Text of the first `max_pages` pages, whitespace collapsed.
///
/// Parsed with lopdf, which joins `TJ` arrays and decodes hex strings through
/// the page font encoding. Files lopdf cannot load (truncated downloads, no
/// xref) fall back to scanning string literals out of the raw streams.
pub fn pdf_text(data: &[u8], max_pages: usize) -> String {
    let text = match document_text(data, max_pages) {
        Some(text) if !text.trim().is_empty() => text,
        _ => scan_literals(data, max_pages),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn document_text(data: &[u8], max_pages: usize) -> Option<String> {
    let doc = match Document::load_mem(data) {
        Ok(doc) => doc,
        Err(e) => {
            log_pipeline_debug!("PDF did not parse, scanning raw streams", error = %e);
            return None;
        }
    };
    let pages: Vec<u32> = doc.get_pages().keys().copied().take(max_pages).collect();
    if pages.is_empty() {
        return None;
    }
    doc.extract_text(&pages).ok()
}

/// Literal strings from the first `max_streams` content streams.
///
/// Flate streams are inflated; anything else is scanned raw. No font
/// decoding, so only simple encodings produce readable text.
fn scan_literals(data: &[u8], max_streams: usize) -> String {
    let mut out = String::new();
    for raw in pdf_streams(data).take(max_streams) {
        let mut inflated = Vec::new();
        let body = match ZlibDecoder::new(raw).read_to_end(&mut inflated) {
            Ok(_) => inflated.as_slice(),
            Err(_) => raw,
        };
        for literal in literal_strings(body) {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            out.push_str(&literal);
        }
    }
    out
}

/// Byte ranges between `stream` and `endstream` keywords.
fn pdf_streams(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let start_kw = find(&data[pos..], b"stream")? + pos;
        let mut start = start_kw + b"stream".len();
        if data.get(start) == Some(&b'\r') {
            start += 1;
        }
        if data.get(start) == Some(&b'\n') {
            start += 1;
        }
        let end = find(&data[start..], b"endstream")? + start;
        pos = end + b"endstream".len();
        Some(&data[start..end])
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parenthesised PDF string literals with escapes resolved.
fn literal_strings(body: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < body.len() {
        if body[i] != b'(' {
            i += 1;
            continue;
        }
        let mut depth = 1;
        let mut buf = Vec::new();
        i += 1;
        while i < body.len() && depth > 0 {
            match body[i] {
                b'\\' if i + 1 < body.len() => {
                    i += 1;
                    match body[i] {
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        other => buf.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    buf.push(b'(');
                }
                b')' => {
                    depth -= 1;
                    if depth > 0 {
                        buf.push(b')');
                    }
                }
                other => buf.push(other),
            }
            i += 1;
        }
        let text = String::from_utf8_lossy(&buf).trim().to_string();
        if !text.is_empty() {
            out.push(text);
        }
    }
    out
}
