use serde::{Deserialize, Serialize};

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Byte offset of the first non-overlapping piece in the original document
    pub start_position: usize,
}

/// Size limits applied when splitting a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum estimated tokens per chunk
    pub chunk_size: usize,
    /// Tokens carried over from the end of the previous chunk
    pub chunk_overlap: usize,
}

/// A trimmed slice of the source text that fits in one chunk on its own
struct Piece<'a> {
    text: &'a str,
    tokens: usize,
    offset: usize,
    paragraph_start: bool,
}

/// Split text into chunks of at most `config.chunk_size` estimated tokens.
///
/// Paragraphs are packed together first. A paragraph that is too large is
/// split into sentences, and a sentence that is still too large is cut into
/// word windows. Consecutive chunks share up to `config.chunk_overlap`
/// tokens.
pub fn split_into_chunks(
    text: &str,
    document_id: &str,
    config: &ChunkingConfig,
) -> Vec<TextChunk> {
    let chunk_size = config.chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_token_count = 0;
    let mut start_position = 0;
    let mut has_new_content = false;

    for piece in split_into_pieces(text, chunk_size) {
        if has_new_content && current_token_count + piece.tokens > chunk_size {
            chunks.push(TextChunk {
                text: current_chunk.clone(),
                token_count: current_token_count,
                document_id: document_id.to_string(),
                start_position,
            });

            // Start a new chunk with overlap from the previous one, if it still fits
            let overlap = overlap_tail(&current_chunk, config.chunk_overlap);
            let overlap_tokens = estimate_token_count(overlap);
            if !overlap.is_empty() && overlap_tokens + piece.tokens <= chunk_size {
                current_chunk = overlap.to_string();
                current_token_count = overlap_tokens;
            } else {
                current_chunk.clear();
                current_token_count = 0;
            }
            has_new_content = false;
        }

        if !current_chunk.is_empty() {
            current_chunk.push_str(if piece.paragraph_start { "\n\n" } else { " " });
        }
        if !has_new_content {
            start_position = piece.offset;
        }
        current_chunk.push_str(piece.text);
        current_token_count += piece.tokens;
        has_new_content = true;
    }

    if has_new_content {
        chunks.push(TextChunk {
            text: current_chunk,
            token_count: current_token_count,
            document_id: document_id.to_string(),
            start_position,
        });
    }

    chunks
}

/// Break text into paragraphs, sentences or word windows no larger than `chunk_size`
fn split_into_pieces(text: &str, chunk_size: usize) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let paragraph_tokens = estimate_token_count(paragraph);
        if paragraph_tokens <= chunk_size {
            pieces.push(Piece {
                text: paragraph,
                tokens: paragraph_tokens,
                offset: offset_in(text, paragraph),
                paragraph_start: true,
            });
            continue;
        }

        let mut paragraph_start = true;
        let sentences = paragraph.split_inclusive(|c: char| matches!(c, '.' | '!' | '?' | '\n'));
        for sentence in sentences {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let sentence_tokens = estimate_token_count(sentence);
            if sentence_tokens <= chunk_size {
                pieces.push(Piece {
                    text: sentence,
                    tokens: sentence_tokens,
                    offset: offset_in(text, sentence),
                    paragraph_start,
                });
            } else {
                for window in word_windows(sentence, chunk_size) {
                    pieces.push(Piece {
                        text: window,
                        tokens: estimate_token_count(window),
                        offset: offset_in(text, window),
                        paragraph_start,
                    });
                    paragraph_start = false;
                }
            }
            paragraph_start = false;
        }
    }

    pieces
}

/// Cut a sentence into consecutive runs of whole words within `chunk_size` tokens.
/// A single word larger than the limit becomes a window of its own.
fn word_windows(sentence: &str, chunk_size: usize) -> Vec<&str> {
    let mut windows = Vec::new();
    let mut window_start: Option<usize> = None;
    let mut window_end = 0;
    let mut window_tokens = 0;

    for word in sentence.split_whitespace() {
        let word_tokens = estimate_token_count(word);
        let word_start = offset_in(sentence, word);

        if let Some(start) = window_start {
            if window_tokens + word_tokens > chunk_size {
                windows.push(&sentence[start..window_end]);
                window_start = None;
                window_tokens = 0;
            }
        }

        if window_start.is_none() {
            window_start = Some(word_start);
        }
        window_end = word_start + word.len();
        window_tokens += word_tokens;
    }

    if let Some(start) = window_start {
        windows.push(&sentence[start..window_end]);
    }

    windows
}

/// The longest run of trailing whole words within `max_tokens`
fn overlap_tail(text: &str, max_tokens: usize) -> &str {
    let mut start = text.len();
    let mut tokens = 0;

    for word in text.split_whitespace().rev() {
        let word_tokens = estimate_token_count(word);
        if tokens + word_tokens > max_tokens {
            break;
        }
        tokens += word_tokens;
        start = offset_in(text, word);
    }

    &text[start..]
}

/// Byte offset of `inner` within `outer`; `inner` must be a subslice of `outer`
fn offset_in(outer: &str, inner: &str) -> usize {
    inner.as_ptr() as usize - outer.as_ptr() as usize
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
