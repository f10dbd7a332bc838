//! Error taxonomy for the knowledge base core.
//!
//! Every variant here surfaces at the boundary as a user-visible notice;
//! none of them should abort the host process. Locally recoverable
//! conditions (a malformed citation marker, a single unreadable note) are
//! logged and skipped instead of being raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    /// A sync was requested while another one is still in flight.
    /// Recovered by the caller: report and retry later.
    #[error("knowledge base is already syncing")]
    AlreadySyncing,

    /// A vector's length does not match the store's locked dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A query was issued against a store with no vectors in it.
    #[error("vector store is empty")]
    EmptyStore,

    /// The generation backend produced no stream at all for a turn.
    #[error("no response stream from the generation backend")]
    NoGenerationStream,

    /// The remote knowledge base produced no answer stream for a turn.
    #[error("no response stream from the remote knowledge base")]
    NoRemoteResponse,

    /// One or more items in a batched upload/delete transfer failed.
    /// The sync that issued the transfer is marked failed.
    #[error("batch transfer failed for {failed} of {total} items")]
    BatchTransfer { failed: usize, total: usize },

    /// The configured provider name matches no known knowledge base variant.
    #[error("unknown knowledge base provider: {0}")]
    UnknownProvider(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid exclusion pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Backend returned a non-success status or an unusable payload.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type KbResult<T> = Result<T, KbError>;
