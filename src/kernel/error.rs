//! Kernel error taxonomy.
//!
//! Every condition is local and terminal for the call that raised it.
//! Nothing here is fatal to the process.

use std::fmt;

use thiserror::Error;

use super::label::Level;
use super::policy::Mode;

/// Which registry table an id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Active principal.
    Subject,
    /// Protected resource.
    Object,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => f.write_str("subject"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Access mode being mediated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Simple security property.
    Read,
    /// Star property.
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Conditions raised by the registry, policy engine, and dispatcher.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Unknown subject or object id.
    #[error("unknown {kind} '{id}'")]
    NotFound {
        /// Table that was searched.
        kind: EntityKind,
        /// Id that was not present.
        id: String,
    },

    /// The policy refused the access.
    #[error("access denied: {detail}")]
    AccessDenied {
        /// Requesting subject.
        subject: String,
        /// Target object.
        object: String,
        /// `read` or `write`.
        access: Access,
        /// Human-readable explanation naming both labels.
        detail: String,
    },

    /// A permanent label change would lower level or drop categories.
    #[error("tranquility violation: {detail}")]
    TranquilityViolation {
        /// Subject whose label change was refused.
        id: String,
        /// Human-readable explanation.
        detail: String,
    },

    /// Override not strictly below the original level, or used outside
    /// the overridable mode.
    #[error("invalid override for '{id}': {reason}")]
    InvalidOverride {
        /// Subject the override targeted.
        id: String,
        /// Why it was refused.
        reason: String,
    },

    /// Level outside the clearance scale.
    #[error("invalid level {level}: must be between 0 and {max}")]
    InvalidLevel {
        /// Level as supplied.
        level: i128,
        /// Top rank of the configured scale.
        max: Level,
    },

    /// Missing or malformed request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Action name the dispatcher does not recognise.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// The operation exists but the configured mode does not offer it.
    #[error("{operation} is not available in {mode} mode")]
    NotOffered {
        /// Operation name.
        operation: &'static str,
        /// Mode the kernel runs in.
        mode: Mode,
    },
}

impl KernelError {
    /// Stable machine-readable code carried in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::TranquilityViolation { .. } => "tranquility_violation",
            Self::InvalidOverride { .. } => "invalid_override",
            Self::InvalidLevel { .. } => "invalid_level",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownAction(_) => "unknown_action",
            Self::NotOffered { .. } => "not_offered",
        }
    }

    pub(crate) fn subject_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: EntityKind::Subject,
            id: id.to_owned(),
        }
    }

    pub(crate) fn object_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: EntityKind::Object,
            id: id.to_owned(),
        }
    }
}
