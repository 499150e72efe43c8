// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Whole-tree consistency checker

use std::collections::HashMap;

use crate::node::NodeData;
use crate::{FsCore, NodeId};

/// A broken tree invariant, as found by [`FsCore::verify`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("root {0} is missing or not a directory")]
    BadRoot(NodeId),
    #[error("entry {name:?} in {dir} references freed node {node}")]
    DanglingEntry { dir: NodeId, name: String, node: NodeId },
    #[error("directory {dir}: '.' points at {found}")]
    BadSelfEntry { dir: NodeId, found: NodeId },
    #[error("directory {dir}: '..' points at {found}, expected {expected}")]
    BadParentEntry {
        dir: NodeId,
        expected: NodeId,
        found: NodeId,
    },
    #[error("directory {0} has unsorted or duplicate entries")]
    Unsorted(NodeId),
    #[error("directory {0} is reachable through more than one entry")]
    DirectoryHardlink(NodeId),
    #[error("node {node} records {recorded} links but {actual} entries reference it")]
    LinkCountMismatch {
        node: NodeId,
        recorded: u32,
        actual: u32,
    },
    #[error("node {0} is live but unreachable from root")]
    Unreachable(NodeId),
}

impl FsCore {
    /// Walk the tree from the root and check every structural invariant:
    /// reserved entries, entry ordering, single parent per directory,
    /// link counts, and the absence of unreachable live nodes.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let root = self.root;
        match self.store.get(root) {
            Ok(node) if node.is_dir() => {}
            _ => return Err(InvariantViolation::BadRoot(root)),
        }

        // The context itself holds the root's reference.
        let mut incoming: HashMap<NodeId, u32> = HashMap::from([(root, 1)]);
        let mut pending = vec![(root, root)];
        while let Some((dir, parent)) = pending.pop() {
            let Ok(node) = self.store.get(dir) else {
                return Err(InvariantViolation::BadRoot(dir));
            };
            let NodeData::Directory(table) = &node.data else {
                continue;
            };
            if table.self_ref() != dir {
                return Err(InvariantViolation::BadSelfEntry {
                    dir,
                    found: table.self_ref(),
                });
            }
            if table.parent_ref() != parent {
                return Err(InvariantViolation::BadParentEntry {
                    dir,
                    expected: parent,
                    found: table.parent_ref(),
                });
            }
            if !table.is_sorted() {
                return Err(InvariantViolation::Unsorted(dir));
            }
            for (name, child) in table.iter() {
                let Ok(child_node) = self.store.get(child) else {
                    return Err(InvariantViolation::DanglingEntry {
                        dir,
                        name: name.to_string(),
                        node: child,
                    });
                };
                let count = incoming.entry(child).or_insert(0);
                *count += 1;
                if child_node.is_dir() {
                    if *count > 1 {
                        return Err(InvariantViolation::DirectoryHardlink(child));
                    }
                    pending.push((child, dir));
                }
            }
        }

        for node in self.store.iter() {
            let Some(&actual) = incoming.get(&node.id) else {
                return Err(InvariantViolation::Unreachable(node.id));
            };
            if node.link_count != actual {
                return Err(InvariantViolation::LinkCountMismatch {
                    node: node.id,
                    recorded: node.link_count,
                    actual,
                });
            }
        }
        Ok(())
    }
}
