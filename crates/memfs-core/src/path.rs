// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path utilities and the path resolver.
//!
//! Paths are `/`-separated. A leading separator anchors at the root, anything
//! else starts at the current directory. Empty components are ignored, and
//! `.`/`..` are ordinary lookups through the reserved entries. Symlinks are
//! never followed.

use crate::entry::is_reserved;
use crate::error::{FsError, FsResult};
use crate::node::NodeStore;
use crate::NodeId;

pub const SEPARATOR: char = '/';

pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Non-empty components of `path`.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

/// Split `path` into its parent path and final component. Trailing
/// separators are ignored; the final component is empty for the root.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(pos) => {
            let parent = trimmed[..pos].trim_end_matches(SEPARATOR);
            if parent.is_empty() {
                ("/", &trimmed[pos + 1..])
            } else {
                (parent, &trimmed[pos + 1..])
            }
        }
        None if is_absolute(path) => ("/", ""),
        None => ("", trimmed),
    }
}

pub fn parent_of(path: &str) -> &str {
    split_parent(path).0
}

pub fn file_name(path: &str) -> &str {
    split_parent(path).1
}

/// Append `name` to `dir` with exactly one separator between them.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with(SEPARATOR) {
        format!("{dir}{name}")
    } else {
        format!("{dir}{SEPARATOR}{name}")
    }
}

/// Check a name about to become a user entry. `.` and `..` are present in
/// every directory, so they are reported as existing.
pub fn validate_name(name: &str, max_len: usize) -> FsResult<()> {
    if is_reserved(name) {
        return Err(FsError::AlreadyExists);
    }
    if name.is_empty() || name.len() > max_len || name.contains(['\0', SEPARATOR]) {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// Walk `path` from `root` (absolute) or `cwd` (relative) through the entry
/// tables of successive directories.
pub(crate) fn resolve(
    store: &NodeStore,
    root: NodeId,
    cwd: NodeId,
    path: &str,
) -> FsResult<NodeId> {
    let mut current = if is_absolute(path) { root } else { cwd };
    for component in components(path) {
        let node = store.get(current)?;
        let table = node.table()?;
        current = table.lookup(component).ok_or(FsError::NotFound)?;
    }
    Ok(current)
}
