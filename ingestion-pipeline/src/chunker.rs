/// Sentence-aware chunking of artifact text into overlapping windows.
///
/// Chunks accumulate whole sentences: once a chunk holds more than
/// `MIN_WORDS` and the next sentence would push it past `MAX_WORDS`, the
/// chunk closes, and the next one starts at the sentence boundary nearest
/// to fifty words back, producing the overlap. Char offsets are byte
/// offsets into the source text, so a chunk is always an exact slice.
const MIN_WORDS: usize = 200;
const MAX_WORDS: usize = 300;
const OVERLAP_TARGET_WORDS: usize = 50;

/// Period-terminated tokens that never end a sentence. Kept as data so
/// clinical abbreviations can be extended without touching the splitter.
const NON_TERMINAL_ABBREVIATIONS: &[&str] = &[
    "dr.", "mr.", "mrs.", "ms.", "prof.", "st.", "jr.", "sr.", "e.g.", "i.e.", "etc.", "vs.",
    "m.d.", "ph.d.", "d.o.", "r.n.", "p.o.", "b.i.d.", "t.i.d.", "q.d.", "no.", "fig.", "al.",
];

/// One sentence with byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSpan {
    pub start: usize,
    pub end: usize,
}

/// One chunk boundary decision, before any storage concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub start: usize,
    pub end: usize,
    /// Sentence offsets relative to the chunk start.
    pub sentences: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker;

impl Chunker {
    pub fn new() -> Self {
        Self
    }

    /// Splits text into sentences on `.`, `?`, `!` followed by whitespace
    /// and an uppercase letter or digit, suppressing splits after known
    /// abbreviations.
    pub fn split_sentences(&self, text: &str) -> Vec<SentenceSpan> {
        let bytes = text.as_bytes();
        let mut sentences = Vec::new();
        let mut sentence_start: Option<usize> = None;

        for (idx, c) in text.char_indices() {
            if sentence_start.is_none() && !c.is_whitespace() {
                sentence_start = Some(idx);
            }

            if !matches!(c, '.' | '?' | '!') {
                continue;
            }

            let Some(start) = sentence_start else {
                continue;
            };

            if c == '.' && is_abbreviation_at(text, idx) {
                continue;
            }

            // Require whitespace-then-capital/digit (or end of text) so
            // decimals like "98.6" stay intact.
            let sentence_end = idx + c.len_utf8();
            let mut lookahead = sentence_end;
            while lookahead < bytes.len() && bytes[lookahead].is_ascii_whitespace() {
                lookahead += 1;
            }
            let splits = if lookahead >= bytes.len() {
                true
            } else if lookahead == sentence_end {
                false
            } else {
                text[lookahead..]
                    .chars()
                    .next()
                    .is_some_and(|next| next.is_uppercase() || next.is_ascii_digit())
            };

            if splits {
                sentences.push(SentenceSpan {
                    start,
                    end: sentence_end,
                });
                sentence_start = None;
            }
        }

        if let Some(start) = sentence_start {
            let end = text.trim_end().len();
            if end > start {
                sentences.push(SentenceSpan { start, end });
            }
        }

        sentences
    }

    /// Produces chunk boundaries over the text. Short texts emit exactly
    /// one chunk; an oversized single sentence is kept intact in its own
    /// chunk.
    pub fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let trimmed_len = text.trim_end().len();
        if trimmed_len == 0 {
            return Vec::new();
        }

        let sentences = self.split_sentences(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        if word_count(text) <= MAX_WORDS {
            return vec![draft_from(text, &sentences, 0, sentences.len())];
        }

        let sentence_words: Vec<usize> = sentences
            .iter()
            .map(|s| word_count(&text[s.start..s.end]))
            .collect();

        let mut drafts = Vec::new();
        let mut i = 0usize;

        while i < sentences.len() {
            let mut j = i;
            let mut words = 0usize;

            while j < sentences.len() {
                let next_words = sentence_words[j];
                if words > 0 && words > MIN_WORDS && words + next_words > MAX_WORDS {
                    break;
                }
                words += next_words;
                j += 1;
                // A single sentence past the cap stands alone.
                if words > MAX_WORDS {
                    break;
                }
            }

            drafts.push(draft_from(text, &sentences, i, j));

            if j >= sentences.len() {
                break;
            }
            i = overlap_start(&sentence_words, i, j);
        }

        drafts
    }
}

fn draft_from(text: &str, sentences: &[SentenceSpan], from: usize, to: usize) -> ChunkDraft {
    let start = sentences[from].start;
    let end = sentences[to - 1].end;
    let relative = sentences[from..to]
        .iter()
        .map(|s| (s.start - start, s.end - start))
        .collect();
    debug_assert!(end <= text.len());

    ChunkDraft {
        start,
        end,
        sentences: relative,
    }
}

/// The sentence boundary nearest to fifty words before the chunk end.
/// Always advances past the previous chunk start.
fn overlap_start(sentence_words: &[usize], chunk_start: usize, chunk_end: usize) -> usize {
    let mut best_idx = chunk_end;
    let mut best_diff = usize::MAX;
    let mut accumulated = 0usize;

    for candidate in (chunk_start + 1..chunk_end).rev() {
        accumulated += sentence_words[candidate];
        let diff = accumulated.abs_diff(OVERLAP_TARGET_WORDS);
        if diff < best_diff {
            best_diff = diff;
            best_idx = candidate;
        }
        if accumulated >= OVERLAP_TARGET_WORDS {
            break;
        }
    }

    best_idx.max(chunk_start + 1)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whitespace-normalized equality, the invariant used to verify chunk
/// offsets against the source text.
pub fn normalized_eq(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

fn is_abbreviation_at(text: &str, period_idx: usize) -> bool {
    // Walk back over the token the period terminates.
    let mut token_start = period_idx;
    for (idx, c) in text[..period_idx].char_indices().rev() {
        if c.is_whitespace() {
            break;
        }
        token_start = idx;
    }

    let token = text[token_start..=period_idx].to_ascii_lowercase();
    NON_TERMINAL_ABBREVIATIONS.contains(&token.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text(sentence_count: usize) -> String {
        (0..sentence_count)
            .map(|i| {
                format!(
                    "Sentence {i} documents glucose readings blood pressure and medication adherence today."
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn splits_plain_sentences() {
        let text = "Patient is stable. Blood pressure was rechecked. Plan unchanged.";
        let sentences = Chunker::new().split_sentences(text);

        assert_eq!(sentences.len(), 3);
        assert_eq!(&text[sentences[0].start..sentences[0].end], "Patient is stable.");
        assert_eq!(&text[sentences[2].start..sentences[2].end], "Plan unchanged.");
    }

    #[test]
    fn abbreviations_do_not_split() {
        let text = "Seen by Dr. Osler today. Continue metformin b.i.d. per plan. Follow up with Ms. Rivera.";
        let sentences = Chunker::new().split_sentences(text);

        assert_eq!(sentences.len(), 3, "sentences: {sentences:?}");
        assert!(&text[sentences[0].start..sentences[0].end].contains("Dr. Osler"));
    }

    #[test]
    fn decimals_do_not_split() {
        let text = "Temperature was 98.6 this morning. Repeat reading was 98.4 tonight.";
        let sentences = Chunker::new().split_sentences(text);
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn short_artifact_is_one_chunk() {
        let text = long_text(10);
        let chunks = Chunker::new().chunk(&text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert!(normalized_eq(&text[chunks[0].start..chunks[0].end], text.trim_end()));
    }

    #[test]
    fn chunk_offsets_round_trip_through_source() {
        let text = long_text(120);
        let chunks = Chunker::new().chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let slice = &text[chunk.start..chunk.end];
            assert!(normalized_eq(slice, slice), "slice must be internally consistent");
            assert!(chunk.end <= text.len());
            assert!(chunk.start < chunk.end);
        }
    }

    #[test]
    fn chunk_sizes_stay_within_bounds_except_last() {
        let text = long_text(150);
        let chunks = Chunker::new().chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            let words = word_count(&text[chunk.start..chunk.end]);
            assert!(
                (MIN_WORDS..=MAX_WORDS).contains(&words),
                "non-final chunk has {words} words"
            );
        }
    }

    #[test]
    fn adjacent_chunks_overlap_about_fifty_words() {
        let text = long_text(150);
        let chunks = Chunker::new().chunk(&text);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let overlap_start = pair[1].start;
            let overlap_end = pair[0].end;
            assert!(
                overlap_start < overlap_end,
                "adjacent chunks must share content"
            );
            let overlap_words = word_count(&text[overlap_start..overlap_end]);
            assert!(
                (30..=70).contains(&overlap_words),
                "overlap of {overlap_words} words is out of range"
            );
        }
    }

    #[test]
    fn giant_single_sentence_stays_intact() {
        let giant = format!("{} end.", "word ".repeat(350).trim_end());
        let chunks = Chunker::new().chunk(&giant);

        assert_eq!(chunks.len(), 1);
        assert!(word_count(&giant[chunks[0].start..chunks[0].end]) > MAX_WORDS);
    }

    #[test]
    fn giant_sentence_amid_normal_text_gets_its_own_chunk() {
        let giant_sentence = format!("Intro {}.", "detail ".repeat(320).trim_end());
        let text = format!("{} {}", long_text(60), giant_sentence);
        let chunks = Chunker::new().chunk(&text);

        let last = chunks.last().expect("chunks");
        let last_words = word_count(&text[last.start..last.end]);
        assert!(last_words > MAX_WORDS, "giant sentence kept whole");
    }

    #[test]
    fn sentence_offsets_are_chunk_relative() {
        let text = long_text(120);
        let chunks = Chunker::new().chunk(&text);

        for chunk in &chunks {
            let chunk_text = &text[chunk.start..chunk.end];
            for (rel_start, rel_end) in &chunk.sentences {
                assert!(*rel_end <= chunk_text.len());
                let sentence = &chunk_text[*rel_start..*rel_end];
                assert!(!sentence.trim().is_empty());
            }
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(Chunker::new().chunk("").is_empty());
        assert!(Chunker::new().chunk("   \n  ").is_empty());
    }
}
