/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors surfaced by the block-management core.
//!
//! Each subsystem reports failures with its own enum ([`HeaderError`], [`VoteError`],
//! [`KVGetError`](crate::storage::pluggables::KVGetError), ...). All of them convert into
//! [`CoreError`], which is what crosses component boundaries: it is what import and propose
//! callbacks receive, and what is fanned out to every live handle of a failed transition (hence
//! `Clone`).
//!
//! Callers that only need to branch on the category of a failure use [`CoreError::kind`].

use std::fmt::{self, Display, Formatter};

use crate::{
    block::verifier::HeaderError, storage::pluggables::KVGetError,
    types::commit_votes::VoteError,
};

/// Categories of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad parent ID, unknown block, or malformed input.
    IllegalArgument,
    /// Operation against a disposed or wrong-state object.
    InvalidState,
    /// Decode failure or version mismatch.
    InvalidFormat,
    InvalidSignature,
    /// Missing key in a bucket or missing block.
    NotFound,
    OutOfBalance,
    OutOfStep,
    /// Operation not available at the current version.
    Unsupported,
    /// Query against a block whose result has not been finalized yet.
    ResultNotFinalized,
    /// Cancellation or shutdown.
    Interrupted,
    Timeout,
}

impl ErrorKind {
    /// Create a [`CoreError`] of this kind with `message`.
    pub fn error(self, message: impl Into<String>) -> CoreError {
        CoreError::Other {
            kind: self,
            message: message.into(),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::IllegalArgument => "IllegalArgument",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::InvalidFormat => "InvalidFormat",
            ErrorKind::InvalidSignature => "InvalidSignature",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::OutOfBalance => "OutOfBalance",
            ErrorKind::OutOfStep => "OutOfStep",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ResultNotFinalized => "ResultNotFinalized",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// Error that crosses component boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// A block header failed verification against its parent.
    Header(HeaderError),
    Other { kind: ErrorKind, message: String },
}

impl CoreError {
    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Header(HeaderError::BadVersion { .. }) => ErrorKind::InvalidFormat,
            CoreError::Header(HeaderError::BadVotes(VoteError::InvalidSignature { .. })) => {
                ErrorKind::InvalidSignature
            }
            CoreError::Header(_) => ErrorKind::IllegalArgument,
            CoreError::Other { kind, .. } => *kind,
        }
    }

    /// Get the header verification failure wrapped in this error, if any.
    pub fn header_error(&self) -> Option<&HeaderError> {
        match self {
            CoreError::Header(err) => Some(err),
            _ => None,
        }
    }

    /// Prefix the message of this error with `context`. Header errors are returned unchanged.
    pub fn context(self, context: &str) -> CoreError {
        match self {
            CoreError::Other { kind, message } => CoreError::Other {
                kind,
                message: format!("{}: {}", context, message),
            },
            header => header,
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Header(err) => write!(f, "{}: {:?}", self.kind(), err),
            CoreError::Other { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<HeaderError> for CoreError {
    fn from(value: HeaderError) -> Self {
        CoreError::Header(value)
    }
}

impl From<VoteError> for CoreError {
    fn from(value: VoteError) -> Self {
        CoreError::Header(HeaderError::BadVotes(value))
    }
}

impl From<KVGetError> for CoreError {
    fn from(value: KVGetError) -> Self {
        match value {
            KVGetError::DeserializeValueError { key, source } => ErrorKind::InvalidFormat.error(
                format!("cannot decode value at {:?}: {}", key, source),
            ),
            KVGetError::ValueExpectedButNotFound { key } => {
                ErrorKind::NotFound.error(format!("value expected but not found at {:?}", key))
            }
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        ErrorKind::InvalidFormat.error(value.to_string())
    }
}
