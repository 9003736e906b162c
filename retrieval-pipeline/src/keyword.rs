use std::collections::HashMap;

/// Simplified BM25 over an in-memory document population.
///
/// Built per request from the metadata-filtered chunk set; the population
/// for a single patient is small enough that index construction is cheap.
/// Stopwords are kept; their low IDF down-weights them naturally.
pub struct Bm25Index {
    k1: f32,
    b: f32,
    doc_term_freqs: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f32,
    doc_freqs: HashMap<String, usize>,
}

const DEFAULT_K1: f32 = 1.2;
const DEFAULT_B: f32 = 0.75;

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(std::borrow::ToOwned::to_owned)
        .collect()
}

impl Bm25Index {
    pub fn build<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut doc_term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for document in documents {
            let tokens = tokenize(document.as_ref());
            doc_lengths.push(tokens.len());

            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_term_freqs.push(term_freqs);
        }

        #[allow(clippy::cast_precision_loss)]
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f32 / doc_lengths.len() as f32
        };

        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            doc_term_freqs,
            doc_lengths,
            avg_doc_length,
            doc_freqs,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_term_freqs.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_term_freqs.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Raw BM25 score of one document against weighted query terms.
    #[allow(clippy::cast_precision_loss)]
    pub fn score_document(&self, doc_index: usize, terms: &[(String, f32)]) -> f32 {
        let Some(term_freqs) = self.doc_term_freqs.get(doc_index) else {
            return 0.0;
        };
        let doc_length = self.doc_lengths.get(doc_index).copied().unwrap_or(0) as f32;
        let length_norm = if self.avg_doc_length > 0.0 {
            1.0 - self.b + self.b * doc_length / self.avg_doc_length
        } else {
            1.0
        };

        let mut score = 0.0f32;
        for (term, boost) in terms {
            let tf = term_freqs.get(term).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            score += boost * idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * length_norm);
        }

        score
    }

    /// Scores every document, returning (doc_index, score) for documents
    /// with a positive score, best first.
    pub fn search(&self, terms: &[(String, f32)], take: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|idx| (idx, self.score_document(idx, terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(take);
        scored
    }
}
