//! Sentence chunking for synthesis.
//!
//! The engine synthesises one chunk at a time, so long inputs are split at
//! sentence boundaries and sentences that are still too long are split at
//! word boundaries.  Terminal punctuation stays with its sentence; a chunk
//! that ends without any gets a trailing comma so the model closes the
//! phrase with a short pause instead of cutting it off.

/// Maximum characters per chunk before a sentence is split further.
pub const CHUNK_MAX_CHARS: usize = 400;

const TERMINATORS: &[char] = &['.', '!', '?'];

/// Append `,` when `text` does not already end in punctuation.
pub fn ensure_punctuation(text: &str) -> String {
    let text = text.trim();
    match text.chars().last() {
        None => String::new(),
        Some(c) if ".!?,;:".contains(c) => text.to_string(),
        Some(_) => format!("{},", text),
    }
}

/// Split `text` into sentences, each keeping its run of terminators.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }
        // "?!" and "..." end a single sentence.
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !TERMINATORS.contains(&next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        out.push(&text[start..end]);
        start = end;
    }
    out.push(&text[start..]);
    out.into_iter().map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Pack the words of one over-long sentence greedily into chunks of at most
/// `max_len` characters.  A single word longer than `max_len` becomes its
/// own chunk.
fn split_words(sentence: &str, max_len: usize, chunks: &mut Vec<String>) {
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_len {
            chunks.push(ensure_punctuation(&current));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(ensure_punctuation(&current));
    }
}

/// Split `text` into synthesis chunks of at most `max_len` characters (plus
/// the comma [`ensure_punctuation`] may add).
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    for sentence in sentences(text) {
        if sentence.chars().count() <= max_len {
            chunks.push(ensure_punctuation(sentence));
        } else {
            split_words(sentence, max_len, &mut chunks);
        }
    }
    chunks
}

/// Utterances with fewer words than this are padded before tokenisation.
const SHORT_UTTERANCE_WORDS: usize = 5;

/// Prepare one chunk for a SentencePiece tokenizer without a pre-tokenizer:
/// newlines become spaces, short utterances get leading padding (the model
/// otherwise swallows their first word), and every space becomes `▁`.
pub fn prepare_chunk(chunk: &str) -> String {
    let mut prepared = chunk.trim().replace('\n', " ");
    if prepared.split_whitespace().count() < SHORT_UTTERANCE_WORDS {
        prepared.insert_str(0, &" ".repeat(8));
    }
    format!("\u{2581}{}", prepared.replace(' ', "\u{2581}"))
}
