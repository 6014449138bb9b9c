//! Content heuristics that refine a file's category for naming.
//!
//! Classifiers are best-effort: any failure yields `None` and the pipeline
//! carries on with the extension category alone.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::extract::{DefaultExtractor, TextExtractor};

/// Sub-category plus the keyword that triggered it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insight {
    pub sub_category: String,
    pub keyword: Option<String>,
}

impl Insight {
    pub fn new(sub_category: impl Into<String>, keyword: Option<String>) -> Self {
        Self {
            sub_category: sub_category.into(),
            keyword,
        }
    }
}

/// Given a file and its primary category, optionally return a sub-category.
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, path: &Path, category: &str) -> Option<Insight>;
}

/// Keyword groups in priority order. Patterns are unanchored, so they match
/// inside longer words ("tax" in "taxes"); within a group the first listed
/// pattern that matches is reported.
static KEYWORD_GROUPS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    let groups: [(&str, &[&str]); 4] = [
        (
            "Financial",
            &["invoice", "receipt", "payment", "billing", "tax", "statement", "salary", "nomina"],
        ),
        (
            "Work",
            &["resume", "curriculum", "cv", "experience", "employment", "contract", "offer"],
        ),
        (
            "Academic",
            &["university", "thesis", "research", "paper", "homework", "exam", "assignment", "course"],
        ),
        (
            "Legal",
            &["agreement", "terms", "privacy", "policy", "license", "copyright", "litigation"],
        ),
    ];
    groups
        .into_iter()
        .map(|(name, patterns)| {
            let compiled = patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
            (name, compiled)
        })
        .collect()
});

/// Keyword scan over the opening text of documents.
pub struct DocumentKeywords {
    extractor: Box<dyn TextExtractor>,
    max_chars: usize,
}

impl DocumentKeywords {
    pub fn new(extractor: Box<dyn TextExtractor>) -> Self {
        Self {
            extractor,
            max_chars: 2000,
        }
    }

    /// Classify already-extracted text.
    pub fn classify_text(text: &str) -> Option<Insight> {
        let text = text.to_lowercase();
        KEYWORD_GROUPS.iter().find_map(|(name, patterns)| {
            patterns
                .iter()
                .find(|re| re.is_match(&text))
                .map(|re| Insight::new(*name, Some(re.as_str().to_string())))
        })
    }
}

impl Default for DocumentKeywords {
    fn default() -> Self {
        Self::new(Box::new(DefaultExtractor {
            max_chars: 2000,
            max_pdf_pages: 2,
        }))
    }
}

impl ContentClassifier for DocumentKeywords {
    fn classify(&self, path: &Path, category: &str) -> Option<Insight> {
        if category != "Documents" {
            return None;
        }
        let text = self.extractor.extract(path).ok()?;
        let head: String = text.chars().take(self.max_chars).collect();
        Self::classify_text(&head)
    }
}

/// Screen-sized and aspect-ratio guesses for images.
#[derive(Debug, Default)]
pub struct ImageShape;

const SCREEN_WIDTHS: &[u32] = &[1920, 2560, 3840, 1366];

impl ImageShape {
    pub fn classify_dimensions(width: u32, height: u32) -> Option<Insight> {
        if width == 0 || height == 0 {
            return None;
        }
        let aspect = width as f64 / height as f64;
        let sub = if SCREEN_WIDTHS.contains(&width) || (aspect > 1.7 && aspect < 1.8) {
            "Screenshots"
        } else if aspect < 0.8 {
            "Portraits"
        } else if aspect > 1.2 {
            "Landscapes"
        } else {
            return None;
        };
        Some(Insight::new(sub, None))
    }
}

impl ContentClassifier for ImageShape {
    fn classify(&self, path: &Path, category: &str) -> Option<Insight> {
        if category != "Images" {
            return None;
        }
        let (width, height) = image::image_dimensions(path).ok()?;
        Self::classify_dimensions(width, height)
    }
}

/// Built-in classifiers in the order they are consulted.
pub fn default_classifiers() -> Vec<Box<dyn ContentClassifier>> {
    vec![Box::new(DocumentKeywords::default()), Box::new(ImageShape)]
}

/// Human-friendly stem for the relocated file.
///
/// Long machine-generated names (over 20 chars with a digit) are replaced by
/// `{Sub}_{Keyword}` or `{Sub}_Document`; otherwise a meaningful sub-category
/// is prefixed to the original stem.
pub fn smart_name(stem: &str, insight: Option<&Insight>) -> String {
    let stem = sanitize(stem);
    let sub = insight
        .map(|i| i.sub_category.as_str())
        .unwrap_or("General");

    if stem.chars().count() > 20 && stem.chars().any(|c| c.is_ascii_digit()) {
        return match insight.and_then(|i| i.keyword.as_deref()) {
            Some(keyword) => format!("{}_{}", sub, capitalize(keyword)),
            None => format!("{}_Document", sub),
        };
    }

    if sub != "General" && sub != "Other" {
        format!("{}_{}", sub, stem)
    } else {
        stem
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Keep letters, digits, `-`, `_` and `.`; everything else becomes `_`.
fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
