use crate::index::{DocId, Phase};
use std::path::PathBuf;
use thiserror::Error;

/// Structural failures of the build and query pipeline.
///
/// Per-document and per-partial problems are logged and skipped by the stages;
/// the variants here are the ones a caller has to see.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("required index file missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("corpus root is not a readable directory: {}", .0.display())]
    CorpusUnreadable(PathBuf),

    #[error("malformed document {}: {reason}", .path.display())]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("corrupt posting in {} at line {line}: {reason}", .path.display())]
    CorruptPosting { path: PathBuf, line: usize, reason: String },

    #[error("{} holds {found} postings, expected {expected}", .path.display())]
    PhaseMismatch { path: PathBuf, expected: Phase, found: Phase },

    #[error("term {term:?} has more than one posting for document {doc_id}")]
    DuplicatePosting { term: String, doc_id: DocId },

    #[error("query exceeded its deadline")]
    DeadlineExceeded,
}
