//! Error taxonomy of the viewer core.
//!
//! Loading and window plumbing report through `anyhow` like the rest of the
//! crate; the variants below are what those errors carry when the failure
//! originates in the document, the GPU or the network, so callers can
//! `downcast_ref::<ViewerError>()` and react to the kind of failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    /// Element access past the end of a typed accessor.
    #[error("index {index} is out of range for an accessor with {count} elements")]
    IndexOutOfRange { index: usize, count: usize },

    /// A document index points at an entry that does not exist.
    #[error("{referrer} references {kind} {index}, but only {len} exist")]
    MalformedReference {
        kind: &'static str,
        index: usize,
        len: usize,
        referrer: String,
    },

    /// The byte range of an accessor does not fit its backing storage.
    #[error("accessor needs {needed} bytes but only {available} are available")]
    AccessorOverrun { needed: usize, available: usize },

    /// The GPU refused (or would refuse) to create a resource.
    #[error("could not create {resource} for model {model}: {reason}")]
    AllocationFailure {
        resource: String,
        model: String,
        reason: String,
    },

    #[error("could not fetch {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("invalid glTF document: {0}")]
    InvalidDocument(String),

    /// Data the GPU API has no way to express, e.g. triangle fans.
    #[error("unsupported {what}: {detail}")]
    Unsupported { what: &'static str, detail: String },
}

impl ViewerError {
    pub(crate) fn missing(
        kind: &'static str,
        index: usize,
        len: usize,
        referrer: impl Into<String>,
    ) -> Self {
        Self::MalformedReference {
            kind,
            index,
            len,
            referrer: referrer.into(),
        }
    }

    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailure {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = ViewerError> = std::result::Result<T, E>;
