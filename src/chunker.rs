//! Paragraph-boundary note chunker.
//!
//! Splits a note's body into retrieval-sized chunks on paragraph
//! boundaries (`\n\n`), respecting a configurable `max_chars` limit so
//! each chunk stays semantically coherent. Every chunk is prefixed with a
//! `SOURCE: <path>` header, which keeps the note's origin visible to the
//! generation model even when a chunk travels alone through a prompt.

/// A chunk of one note, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteChunk {
    /// Vault-relative path of the note this chunk came from.
    pub source_path: String,
    /// Chunk text including the `SOURCE:` header.
    pub text: String,
}

/// Split a note into chunks of at most `max_chars` content characters.
///
/// Empty or whitespace-only notes produce no chunks.
pub fn chunk_note(path: &str, text: &str, max_chars: usize) -> Vec<NoteChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed the limit, flush first.
        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if trimmed.len() > max_chars {
            // A single oversized paragraph gets hard-split at word or
            // line boundaries where possible.
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let mut split_at = remaining.len().min(max_chars);
                while !remaining.is_char_boundary(split_at) {
                    split_at -= 1;
                }
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                pieces.push(remaining[..actual_split].trim().to_string());
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|content| NoteChunk {
            source_path: path.to_string(),
            text: format!("SOURCE: {}\n\n{}", path, content),
        })
        .collect()
}

/// Strip the `SOURCE:` header from a chunk's text, yielding the content.
pub fn strip_source_header(text: &str) -> &str {
    match text.split_once("\n\n") {
        Some((header, content)) if header.starts_with("SOURCE: ") => content,
        _ => text,
    }
}
