// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the memfs engine

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("name not allowed")]
    InvalidName,
}

impl FsError {
    /// POSIX errno equivalent, for callers that report integer status codes.
    pub fn errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::InvalidOperation => libc::EINVAL,
            FsError::InvalidName => libc::ENAMETOOLONG,
        }
    }
}

impl From<std::collections::TryReserveError> for FsError {
    fn from(_: std::collections::TryReserveError) -> Self {
        FsError::OutOfMemory
    }
}

pub type FsResult<T> = Result<T, FsError>;
