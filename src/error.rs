// src/error.rs

//! Error types for catalog resolution, title builds and caching
//!
//! Every failure that can occur while resolving a catalog entry is one
//! variant of [`Error`]. The resolver converts all of them into failed
//! download results; nothing here is meant to abort the process.

use std::fmt;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A content patch whose original bytes were not present in the content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchMismatch {
    /// Content id the patch targets
    pub content_id: u32,
    /// Offset the replacement would have been written at
    pub offset: usize,
    /// The original bytes that could not be found
    pub expected: Vec<u8>,
}

impl fmt::Display for PatchMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "content {:08x} @ {:#x} (expected {})",
            self.content_id,
            self.offset,
            hex::encode(&self.expected)
        )
    }
}

fn join_mismatches(mismatches: &[PatchMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Short, stable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    UnsupportedCategory,
    MalformedEntry,
    VerificationFailure,
    BaseMismatch,
    PatchVerificationFailure,
    MissingModule,
    InvalidSlotOrVersion,
    SourceUnavailable,
    CacheFailure,
    Package,
    Parse,
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    /// Catalog id, remote title/version or patch map variant absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// The base entry named by a derived entry is not in the catalog
    #[error("Base entry not found: {0}")]
    BaseNotFound(String),

    #[error("Unsupported category for download: {0}")]
    UnsupportedCategory(String),

    /// Entry descriptor is missing required fields or chains too deep
    #[error("Malformed catalog entry '{id}': {reason}")]
    MalformedEntry { id: String, reason: String },

    #[error(
        "File verification failed for {path}, expected digest: {expected}, got: {actual}, alternative digest: {}",
        expected_alt.as_deref().unwrap_or("none")
    )]
    VerificationFailed {
        path: String,
        expected: String,
        expected_alt: Option<String>,
        actual: String,
    },

    #[error("No digest provided for file verification: {0}")]
    MissingDigest(String),

    /// No patch map node for the base title's identity/version
    #[error("Base mismatch for '{variant}': map requires {expected}, base is {actual}")]
    BaseMismatch {
        variant: String,
        expected: String,
        actual: String,
    },

    #[error("Patch map for '{variant}' has {count} nodes for base {identity} v{version}")]
    AmbiguousBase {
        variant: String,
        identity: u8,
        version: u16,
        count: usize,
    },

    /// Expected original bytes absent from the unpatched content
    #[error("Patch verification failed: {}", join_mismatches(mismatches))]
    PatchVerificationFailed { mismatches: Vec<PatchMismatch> },

    #[error("Patch '{patch}' found no patch sites in title {title_id}")]
    PatchSiteNotFound { patch: String, title_id: String },

    #[error("Required module '{module}' not found at {path}")]
    MissingModule { module: String, path: String },

    #[error("Invalid slot or version: {0}")]
    InvalidSlotOrVersion(String),

    /// Network or remote failure while fetching from a source
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Cache failure: {0}")]
    CacheFailure(String),

    /// Error reported by the title-packaging collaborator
    #[error("Package error: {0}")]
    Package(String),

    #[error("No title codec configured; cannot build '{0}'")]
    CodecUnavailable(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// Classify this error for summaries and logs
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::BaseNotFound(_) => ErrorKind::NotFound,
            Self::UnsupportedCategory(_) => ErrorKind::UnsupportedCategory,
            Self::MalformedEntry { .. } => ErrorKind::MalformedEntry,
            Self::VerificationFailed { .. } | Self::MissingDigest(_) => {
                ErrorKind::VerificationFailure
            }
            Self::BaseMismatch { .. } | Self::AmbiguousBase { .. } => ErrorKind::BaseMismatch,
            Self::PatchVerificationFailed { .. } | Self::PatchSiteNotFound { .. } => {
                ErrorKind::PatchVerificationFailure
            }
            Self::MissingModule { .. } => ErrorKind::MissingModule,
            Self::InvalidSlotOrVersion(_) => ErrorKind::InvalidSlotOrVersion,
            Self::SourceUnavailable(_) | Self::CodecUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::CacheFailure(_) => ErrorKind::CacheFailure,
            Self::Package(_) => ErrorKind::Package,
            Self::ParseError(_) => ErrorKind::Parse,
            Self::IoError(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn io(context: impl fmt::Display, err: std::io::Error) -> Self {
        Self::IoError(format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
