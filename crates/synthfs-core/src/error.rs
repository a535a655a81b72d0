// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the synthfs namespace engine

use std::fmt;

/// Opaque failure reported by a driver callback.
///
/// The engine never looks inside; it only carries the error back to the caller.
pub struct DriverError(anyhow::Error);

impl DriverError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(err.into())
    }

    pub fn msg(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(msg))
    }

    /// Borrow the wrapped error, e.g. to downcast a driver-specific type.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DriverError").field(&self.0).finish()
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Core namespace error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("busy")]
    Busy,
    #[error("stale node reference")]
    Stale,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("no space left")]
    NoSpace,
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

pub type FsResult<T> = Result<T, FsError>;

/// Result type returned by driver callbacks.
pub type DriverResult<T> = Result<T, DriverError>;
