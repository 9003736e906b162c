use query_understanding::Entity;
use serde::{Deserialize, Serialize};

/// Merge precedence: entity spans outrank exact term spans, which outrank
/// fuzzy spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    Entity,
    Exact,
    Fuzzy,
}

/// One match span over the chunk text, byte-offset based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub term: String,
    pub kind: HighlightKind,
}

const MIN_TERM_LEN: usize = 3;
const MAX_FUZZY_DISTANCE: usize = 2;
const SNIPPET_WINDOW: usize = 200;

/// Computes exact, entity and (optionally) fuzzy match spans over a chunk.
/// Overlapping or adjacent spans are merged; the merged span takes the
/// highest-precedence constituent's kind and term.
pub fn generate_highlights(
    chunk_text: &str,
    query_terms: &[String],
    entities: &[Entity],
    enable_fuzzy: bool,
) -> Vec<Highlight> {
    let haystack = chunk_text.to_ascii_lowercase();
    let mut spans: Vec<Highlight> = Vec::new();

    for term in query_terms {
        let needle = term.to_ascii_lowercase();
        if needle.chars().count() < MIN_TERM_LEN {
            continue;
        }
        collect_exact(&haystack, chunk_text, &needle, HighlightKind::Exact, &mut spans);
    }

    for entity in entities {
        let needle = entity.text.to_ascii_lowercase();
        if !needle.is_empty() {
            collect_exact(&haystack, chunk_text, &needle, HighlightKind::Entity, &mut spans);
        }
        let canonical = entity.normalized.to_ascii_lowercase();
        if canonical != needle && !canonical.is_empty() {
            collect_exact(&haystack, chunk_text, &canonical, HighlightKind::Entity, &mut spans);
        }
    }

    if enable_fuzzy {
        collect_fuzzy(chunk_text, query_terms, &mut spans);
    }

    merge_spans(spans)
}

fn collect_exact(
    haystack: &str,
    original: &str,
    needle: &str,
    kind: HighlightKind,
    spans: &mut Vec<Highlight>,
) {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        spans.push(Highlight {
            start,
            end,
            term: original[start..end].to_owned(),
            kind,
        });
        from = end;
    }
}

/// Word-level fuzzy matches within Levenshtein distance 2 of a query term.
/// Identical words are left to the exact pass.
fn collect_fuzzy(chunk_text: &str, query_terms: &[String], spans: &mut Vec<Highlight>) {
    for (word_start, word) in word_offsets(chunk_text) {
        let lower_word = word.to_ascii_lowercase();
        if lower_word.chars().count() < MIN_TERM_LEN + 1 {
            continue;
        }
        for term in query_terms {
            let lower_term = term.to_ascii_lowercase();
            if lower_term.chars().count() < MIN_TERM_LEN + 1 || lower_term == lower_word {
                continue;
            }
            let distance = levenshtein(&lower_word, &lower_term);
            if distance > 0 && distance <= MAX_FUZZY_DISTANCE {
                spans.push(Highlight {
                    start: word_start,
                    end: word_start + word.len(),
                    term: word.to_owned(),
                    kind: HighlightKind::Fuzzy,
                });
                break;
            }
        }
    }
}

fn word_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            words.push((s, &text[s..idx]));
        }
    }
    if let Some(s) = start {
        words.push((s, &text[s..]));
    }

    words
}

/// Sorts by start and merges overlapping or adjacent spans.
fn merge_spans(mut spans: Vec<Highlight>) -> Vec<Highlight> {
    if spans.is_empty() {
        return spans;
    }

    spans.sort_by(|a, b| a.start.cmp(&b.start).then(a.kind.cmp(&b.kind)));

    let mut merged: Vec<Highlight> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
                if span.kind < last.kind {
                    last.kind = span.kind;
                    last.term = span.term;
                }
            }
            _ => merged.push(span),
        }
    }

    merged
}

/// Selects a ~200-char snippet centered on the first highlight, ellipsized
/// at cut boundaries. Falls back to the leading window when nothing
/// matched.
pub fn build_snippet(chunk_text: &str, highlights: &[Highlight]) -> String {
    if chunk_text.len() <= SNIPPET_WINDOW {
        return chunk_text.to_owned();
    }

    let focus = highlights.first().map_or(0, |h| h.start);
    let half = SNIPPET_WINDOW / 2;

    let mut start = focus.saturating_sub(half);
    let mut end = (start + SNIPPET_WINDOW).min(chunk_text.len());
    if end - start < SNIPPET_WINDOW {
        start = end.saturating_sub(SNIPPET_WINDOW);
    }

    start = floor_char_boundary(chunk_text, start);
    end = ceil_char_boundary(chunk_text, end);

    let mut snippet = String::with_capacity(end - start + 6);
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(chunk_text[start..end].trim());
    if end < chunk_text.len() {
        snippet.push_str("...");
    }

    snippet
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let substitution_cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + substitution_cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
