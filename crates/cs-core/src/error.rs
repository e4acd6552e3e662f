//! Unified error type for cutsmith.
//!
//! All crates funnel their failures into [`Error`]. API handlers derive an
//! HTTP status from [`Error::http_status`]; background tasks record the
//! coarse [`ErrorKind`] next to the human-readable message on failed
//! operations and downloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes in cutsmith.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "video", "project").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The request conflicts with the current state of a resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe, yt-dlp) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Extracted diagnostic line.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// An export or download step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The step that failed (e.g. "cut", "merge", "chapters").
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Reading or writing a stored record failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The work was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The worker pool is saturated.
    #[error("Busy: {0}")]
    Busy(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], stored on failed records so that
/// clients can distinguish causes without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Io,
    Tool,
    Probe,
    Pipeline,
    Persistence,
    Cancelled,
    Busy,
    Internal,
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Probe(_) => 422,
            Error::Pipeline { .. } => 500,
            Error::Persistence(_) => 500,
            Error::Cancelled(_) => 409,
            Error::Busy(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Io { .. } => ErrorKind::Io,
            Error::Tool { .. } => ErrorKind::Tool,
            Error::Probe(_) => ErrorKind::Probe,
            Error::Pipeline { .. } => ErrorKind::Pipeline,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Busy(_) => ErrorKind::Busy,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the variant prefix, as shown on failed records.
    ///
    /// Tool and pipeline failures surface the extracted diagnostic line
    /// rather than the decorated display string.
    pub fn user_message(&self) -> String {
        match self {
            Error::NotFound { entity, .. } => format!("{entity} not found"),
            Error::Tool { message, .. } => message.clone(),
            Error::Pipeline { step, message } => format!("{step} failed: {message}"),
            Error::Validation(m)
            | Error::Conflict(m)
            | Error::Probe(m)
            | Error::Persistence(m)
            | Error::Cancelled(m)
            | Error::Busy(m)
            | Error::Internal(m) => m.clone(),
            Error::Io { source } => source.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure as the given pipeline step, keeping cancellation intact.
    pub fn in_step(self, step: &str) -> Self {
        match self {
            Error::Cancelled(_) => self,
            Error::Tool { message, .. } => Error::pipeline(step, message),
            other => Error::pipeline(step, other.user_message()),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
