// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs core: an in-memory hierarchical filesystem engine.
//!
//! The tree is made of directory, regular-file and symlink nodes held in a
//! reference-counted node store. Each directory owns an entry table whose
//! user entries stay sorted by name; the reserved `.` and `..` entries are
//! back-references that never count as links. [`FsCore`] resolves
//! slash-separated paths against the root or the current directory and
//! implements create, delete, write/append, copy, move and link on top.

pub mod config;
pub mod entry;
pub mod error;
pub mod fault;
pub(crate) mod node;
pub mod path;
pub mod types;
pub mod verify;
pub mod vfs;

#[cfg(test)]
mod test_tree_ops;

pub use config::{ConfigError, FsConfig, FsLimits};
pub use error::{FsError, FsResult};
pub use fault::{FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use types::*;
pub use verify::InvariantViolation;
pub use vfs::FsCore;
