// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-directory entry table
//!
//! A directory's entries are two reserved back-references (`.` and `..`)
//! followed by the user entries, which are kept sorted by name so lookups
//! are a binary search. The reserved slots are never part of the sorted
//! region and never own the node they point at.
//!
//! The table only records names; reference counting of the named nodes is
//! done by the caller against the node store.

use crate::error::{FsError, FsResult};
use crate::NodeId;

pub const SELF_NAME: &str = ".";
pub const PARENT_NAME: &str = "..";

pub fn is_reserved(name: &str) -> bool {
    name == SELF_NAME || name == PARENT_NAME
}

#[derive(Clone, Debug)]
pub(crate) struct Entry {
    pub name: String,
    pub node: NodeId,
}

#[derive(Clone, Debug)]
pub(crate) struct EntryTable {
    self_ref: NodeId,
    parent_ref: NodeId,
    entries: Vec<Entry>,
}

impl EntryTable {
    pub fn new(self_ref: NodeId, parent_ref: NodeId) -> Self {
        Self {
            self_ref,
            parent_ref,
            entries: Vec::new(),
        }
    }

    pub fn self_ref(&self) -> NodeId {
        self.self_ref
    }

    pub fn parent_ref(&self) -> NodeId {
        self.parent_ref
    }

    /// Re-point `..`, used when the owning directory is moved.
    pub fn set_parent(&mut self, parent: NodeId) {
        self.parent_ref = parent;
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.name.as_str().cmp(name))
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        match name {
            SELF_NAME => Some(self.self_ref),
            PARENT_NAME => Some(self.parent_ref),
            _ => self.position(name).ok().map(|idx| self.entries[idx].node),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Insert a user entry at its sorted position.
    pub fn insert(&mut self, name: &str, node: NodeId) -> FsResult<()> {
        if is_reserved(name) {
            return Err(FsError::AlreadyExists);
        }
        let idx = match self.position(name) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(idx) => idx,
        };
        self.entries.try_reserve(1)?;
        self.entries.insert(
            idx,
            Entry {
                name: name.to_string(),
                node,
            },
        );
        Ok(())
    }

    /// Remove a user entry, handing back the node it referenced.
    pub fn remove(&mut self, name: &str) -> FsResult<NodeId> {
        if is_reserved(name) {
            return Err(FsError::InvalidOperation);
        }
        match self.position(name) {
            Ok(idx) => Ok(self.entries.remove(idx).node),
            Err(_) => Err(FsError::NotFound),
        }
    }

    /// Number of user entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.entries.iter().map(|e| (e.name.as_str(), e.node))
    }

    /// `.` and `..` followed by the user entries.
    pub fn iter_with_reserved(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        [(SELF_NAME, self.self_ref), (PARENT_NAME, self.parent_ref)]
            .into_iter()
            .chain(self.iter())
    }

    /// Strictly increasing names, which also rules out duplicates.
    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].name < w[1].name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}
