//! Word-window chunking driven by a token budget.

use common::error::AppError;

/// Tokens are roughly 1.33x English words, so a token budget maps to 0.75x as many words.
const WORDS_PER_TOKEN: f64 = 0.75;

/// Window and overlap sizes in words, derived from token settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBudget {
    pub chunk_words: usize,
    pub overlap_words: usize,
}

impl WordBudget {
    /// Rejects any configuration whose window would not advance.
    pub fn from_tokens(chunk_size: usize, chunk_overlap: usize) -> Result<Self, AppError> {
        if chunk_overlap >= chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }

        let budget = Self {
            chunk_words: tokens_to_words(chunk_size),
            overlap_words: tokens_to_words(chunk_overlap),
        };
        if budget.chunk_words == 0 || budget.overlap_words >= budget.chunk_words {
            return Err(AppError::Validation(format!(
                "chunk_size {chunk_size} with overlap {chunk_overlap} leaves no room to advance between chunks"
            )));
        }
        Ok(budget)
    }

    fn stride(self) -> usize {
        self.chunk_words - self.overlap_words
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn tokens_to_words(tokens: usize) -> usize {
    (tokens as f64 * WORDS_PER_TOKEN).floor() as usize
}

/// Slide a `chunk_words` window over the text, advancing by `chunk_words - overlap_words`.
/// Stops once a window reaches the last word, so the tail is never emitted twice.
pub fn split_text(text: &str, budget: WordBudget) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + budget.chunk_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += budget.stride();
    }

    chunks
}

/// An image that survived upload and captioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionedImage {
    pub index: usize,
    pub path: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub content: String,
    pub image: Option<CaptionedImage>,
}

/// Text windows first, then one synthetic chunk per captioned image.
pub fn plan_chunks(
    text: &str,
    budget: WordBudget,
    images: Vec<CaptionedImage>,
) -> Vec<PlannedChunk> {
    let text_chunks = split_text(text, budget).into_iter().map(|content| PlannedChunk {
        content,
        image: None,
    });
    let image_chunks = images.into_iter().map(|image| PlannedChunk {
        content: format!("[IMAGE {}] {}", image.index + 1, image.caption),
        image: Some(image),
    });

    text_chunks.chain(image_chunks).collect()
}
