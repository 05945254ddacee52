#[cfg(test)]
mod tests;

use std::collections::HashMap;

/// One token-bounded slice of a document, the atomic unit of
/// classification, embedding, and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    /// Character offset of the chunk start within the trimmed source text.
    /// Spans always lie within the source bounds.
    pub start_index: usize,
    pub end_index: usize,
    pub tokens: usize,
}

/// One sentence together with its character span in the source text.
#[derive(Debug, Clone)]
struct SentenceSpan {
    text: String,
    start: usize,
    end: usize,
}

/// Sentence-aware chunker producing overlapping, token-bounded segments.
///
/// Pure function of (text, chunk_size, chunk_overlap): the same input
/// always yields the same chunk sequence.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split text into chunks of at most `chunk_size` tokens, seeding each
    /// chunk after the first with trailing sentences of its predecessor up
    /// to `chunk_overlap` tokens. A single sentence longer than
    /// `chunk_size` is emitted whole, never truncated.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let sentences = split_into_sentences(text);

        let mut chunks = Vec::new();
        let mut current: Vec<SentenceSpan> = Vec::new();
        let mut current_tokens = 0;

        for sentence in sentences {
            let sentence_tokens = estimate_token_count(&sentence.text);

            if current_tokens + sentence_tokens > self.chunk_size && !current.is_empty() {
                if let Some(chunk) = make_chunk(&chars, &current, current_tokens) {
                    chunks.push(chunk);
                }

                // Walk backward from the end of the emitted chunk,
                // collecting sentences that fit within the overlap budget.
                let mut overlap: Vec<SentenceSpan> = Vec::new();
                let mut overlap_tokens = 0;
                for prev in current.iter().rev() {
                    let prev_tokens = estimate_token_count(&prev.text);
                    if overlap_tokens + prev_tokens <= self.chunk_overlap {
                        overlap.insert(0, prev.clone());
                        overlap_tokens += prev_tokens;
                    } else {
                        break;
                    }
                }

                current = overlap;
                current.push(sentence);
                current_tokens = overlap_tokens + sentence_tokens;
            } else {
                current.push(sentence);
                current_tokens += sentence_tokens;
            }
        }

        if let Some(chunk) = make_chunk(&chars, &current, current_tokens) {
            chunks.push(chunk);
        }

        chunks
    }
}

/// A chunk covers the source span from its first sentence's start to its
/// last sentence's end, so the text is the literal source slice and the
/// span never leaves the source bounds.
fn make_chunk(chars: &[char], sentences: &[SentenceSpan], tokens: usize) -> Option<TextChunk> {
    let first = sentences.first()?;
    let last = sentences.last()?;

    Some(TextChunk {
        text: chars[first.start..last.end].iter().collect(),
        start_index: first.start,
        end_index: last.end,
        tokens,
    })
}

/// Naive punctuation-boundary sentence split on `.`, `!`, `?`, recording
/// each sentence's character span in the source text.
fn split_into_sentences(text: &str) -> Vec<SentenceSpan> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;

    for (index, ch) in text.chars().enumerate() {
        if current.is_empty() {
            if ch.is_whitespace() {
                continue;
            }
            current_start = index;
        }
        current.push(ch);

        if matches!(ch, '.' | '!' | '?') && current.chars().count() > 1 {
            sentences.push(SentenceSpan {
                text: std::mem::take(&mut current),
                start: current_start,
                end: index + 1,
            });
        }
    }

    let trailing = current.trim_end();
    if !trailing.is_empty() {
        sentences.push(SentenceSpan {
            text: trailing.to_string(),
            start: current_start,
            end: current_start + trailing.chars().count(),
        });
    }

    sentences
}

/// Estimate token count using a simple heuristic: roughly 0.75 words per
/// token for English text, plus a small surcharge for punctuation.
pub fn estimate_token_count(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

/// Extract the most frequent non-stop-word keywords from a text.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "can", "this", "that",
        "these", "those", "i", "you", "he", "she", "it", "we", "they",
    ];

    let mut word_freq: HashMap<String, usize> = HashMap::new();
    for word in text.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| c.is_ascii_punctuation());
        if word.len() > 2 && !STOP_WORDS.contains(&word) {
            *word_freq.entry(word.to_string()).or_insert(0) += 1;
        }
    }

    let mut sorted: Vec<(String, usize)> = word_freq.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
        .into_iter()
        .take(max_keywords)
        .map(|(word, _)| word)
        .collect()
}
