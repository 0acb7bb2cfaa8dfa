use crate::config::ChunkingConfig;
use crate::error::PipelineError;
use std::collections::VecDeque;

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` into overlapping chunks of at most `chunk_size` characters.
///
/// The text is cut at every separator, then consecutive pieces are merged back
/// (joined by the separator) until the next piece would overflow the chunk.
/// When a chunk is emitted, leading pieces are dropped until at most
/// `chunk_overlap` characters remain; those carry over into the next chunk.
/// A single piece longer than `chunk_size` is cut into fixed windows that
/// overlap by `chunk_overlap` characters. The first window is seeded with the
/// tail of the preceding chunk and the piece's own tail seeds what follows, so
/// neighbouring chunks always share text.
///
/// Lengths are counted in characters, not bytes. Empty or whitespace-only
/// input yields no chunks.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, PipelineError> {
    config.validate()?;

    if config.separator.is_empty() {
        return Ok(hard_split(text, config));
    }

    let separator = config.separator.as_str();
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;
    // false while the window only holds text that was already emitted
    let mut pending = false;

    for piece in text.split(separator).filter(|piece| !piece.is_empty()) {
        let piece_len = char_len(piece);

        if piece_len > config.chunk_size {
            let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
            if pending {
                push_trimmed(&mut chunks, &joined);
            }
            let carried = tail_chars(joined.trim(), config.chunk_overlap);
            if carried.is_empty() {
                chunks.extend(hard_split(piece, config));
            } else {
                chunks.extend(hard_split(&format!("{carried}{separator}{piece}"), config));
            }

            window.clear();
            let tail = tail_chars(piece, config.chunk_overlap);
            total = char_len(tail);
            if !tail.is_empty() {
                window.push_back(tail);
            }
            pending = false;
            continue;
        }

        let joiner = if window.is_empty() { 0 } else { separator_len };
        if total + piece_len + joiner > config.chunk_size && !window.is_empty() {
            if pending {
                push_joined(&mut chunks, &window, separator);
            }

            while total > config.chunk_overlap
                || (total > 0
                    && total
                        + piece_len
                        + if window.is_empty() { 0 } else { separator_len }
                        > config.chunk_size)
            {
                let Some(dropped) = window.pop_front() else {
                    break;
                };
                let joiner = if window.is_empty() { 0 } else { separator_len };
                total = total.saturating_sub(char_len(dropped) + joiner);
            }
        }

        window.push_back(piece);
        total += piece_len + if window.len() > 1 { separator_len } else { 0 };
        pending = true;
    }

    if pending {
        push_joined(&mut chunks, &window, separator);
    }
    Ok(chunks)
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    if window.is_empty() {
        return;
    }
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    push_trimmed(chunks, &joined);
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// The last `count` characters of `text`, or all of it when shorter.
fn tail_chars(text: &str, count: usize) -> &str {
    let len = char_len(text);
    if len <= count {
        return text;
    }
    text.char_indices()
        .nth(len - count)
        .map_or("", |(index, _)| &text[index..])
}

/// Fixed-size character windows stepping by `chunk_size - chunk_overlap`.
fn hard_split(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.chunk_overlap).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}
