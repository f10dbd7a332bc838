//! Core data types shared across the sync and query pipelines.
//!
//! These types represent the vault files, sync jobs, chat turns, and cited
//! answers that flow between the change tracker, the knowledge base
//! variants, and their callers.

use serde::{Deserialize, Serialize};

/// Stable identity of a vault file, assigned by the event source.
///
/// Identity survives renames: the same `FileId` can appear first under one
/// path and later under another. The change tracker deduplicates by
/// identity, not by path string, so a path can be re-added after a rename.
pub type FileId = u64;

/// A file in the vault as seen by the change tracker and sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFile {
    pub id: FileId,
    /// Vault-relative path (e.g. `notes/rust.md`).
    pub path: String,
}

impl NoteFile {
    pub fn new(id: FileId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    /// Lowercased extension without the leading dot, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Status of an indexing job, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    InProgress,
    Succeed,
    Failed,
}

impl SyncStatus {
    /// Terminal statuses stop the polling loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::InProgress)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::InProgress => write!(f, "IN_PROGRESS"),
            SyncStatus::Succeed => write!(f, "SUCCEED"),
            SyncStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A tracked indexing job. Created when a sync starts; its status is
/// advanced only by the polling loop.
#[derive(Debug, Clone, Serialize)]
pub struct SyncJob {
    pub sync_id: String,
    pub status: SyncStatus,
}

/// Byte-offset span into the final concatenated assistant message.
///
/// Offsets always refer to the complete answer text, never to an
/// individual stream chunk. `start <= end` holds for every span produced
/// by the citation aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One source backing a cited span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationReference {
    pub file_name: String,
    /// Excerpt of the referenced chunk, when the backend provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A resolved citation: which part of the answer cites which sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub message_part: Span,
    pub references: Vec<CitationReference>,
}

/// One element of the answer stream: a text chunk, citation events, or both.
///
/// Text chunks are forwarded as soon as the generation backend emits them,
/// with empty citations; citation-only responses follow once the full
/// answer text is known.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl QueryResponse {
    pub fn text_chunk(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn citation(citation: Citation) -> Self {
        Self {
            text: String::new(),
            citations: vec![citation],
        }
    }
}

/// Role of a turn in a chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One user or assistant message in a chat history. Histories are
/// append-only and never pruned; bounded growth is accepted.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}
