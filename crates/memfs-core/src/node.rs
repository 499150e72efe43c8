// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node store: allocation and reference-counted release of filesystem nodes

use std::collections::HashMap;

use tracing::trace;

use crate::entry::EntryTable;
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultOp};
use crate::{NodeId, NodeKind};

/// Node payload
#[derive(Clone, Debug)]
pub(crate) enum NodeData {
    Directory(EntryTable),
    Regular(Vec<u8>),
    Symlink(String),
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub id: NodeId,
    /// Entry-table slots referencing this node, reserved slots excluded.
    pub link_count: u32,
    pub data: NodeData,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Directory(_) => NodeKind::Directory,
            NodeData::Regular(_) => NodeKind::Regular,
            NodeData::Symlink(_) => NodeKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory(_))
    }

    pub fn table(&self) -> FsResult<&EntryTable> {
        match &self.data {
            NodeData::Directory(table) => Ok(table),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub fn table_mut(&mut self) -> FsResult<&mut EntryTable> {
        match &mut self.data {
            NodeData::Directory(table) => Ok(table),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub fn len(&self) -> u64 {
        match &self.data {
            NodeData::Directory(table) => table.len() as u64,
            NodeData::Regular(bytes) => bytes.len() as u64,
            NodeData::Symlink(target) => target.len() as u64,
        }
    }
}

/// Copy `bytes` into a freshly reserved buffer.
pub(crate) fn alloc_bytes(faults: &mut FaultInjector, bytes: &[u8]) -> FsResult<Vec<u8>> {
    faults.check(FaultOp::AllocateContent)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(buf)
}

/// Grow `buf` by `bytes`, leaving it untouched on failure.
pub(crate) fn extend_bytes(
    faults: &mut FaultInjector,
    buf: &mut Vec<u8>,
    bytes: &[u8],
) -> FsResult<()> {
    faults.check(FaultOp::AllocateContent)?;
    buf.try_reserve(bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Owns every live node. A node lives exactly while its link count is
/// positive; identifiers are never reused.
#[derive(Debug)]
pub(crate) struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_with(
        &mut self,
        faults: &mut FaultInjector,
        build: impl FnOnce(NodeId) -> NodeData,
    ) -> FsResult<NodeId> {
        faults.check(FaultOp::AllocateNode)?;
        self.nodes.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = Node {
            id,
            link_count: 1,
            data: build(id),
        };
        trace!(node = %id, kind = %node.kind(), "allocated node");
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// New directory whose `..` names `parent`, or itself when `parent` is None (root).
    pub fn allocate_directory(
        &mut self,
        faults: &mut FaultInjector,
        parent: Option<NodeId>,
    ) -> FsResult<NodeId> {
        self.allocate_with(faults, |id| {
            NodeData::Directory(EntryTable::new(id, parent.unwrap_or(id)))
        })
    }

    pub fn allocate_regular(
        &mut self,
        faults: &mut FaultInjector,
        content: Vec<u8>,
    ) -> FsResult<NodeId> {
        self.allocate_with(faults, |_| NodeData::Regular(content))
    }

    pub fn allocate_symlink(
        &mut self,
        faults: &mut FaultInjector,
        target: &str,
    ) -> FsResult<NodeId> {
        faults.check(FaultOp::AllocateContent)?;
        let mut owned = String::new();
        owned.try_reserve_exact(target.len())?;
        owned.push_str(target);
        self.allocate_with(faults, |_| NodeData::Symlink(owned))
    }

    pub fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    pub fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values()
    }

    pub fn retain(&mut self, id: NodeId) -> FsResult<()> {
        let node = self.get_mut(id)?;
        node.link_count = node.link_count.checked_add(1).ok_or(FsError::InvalidOperation)?;
        Ok(())
    }

    /// Drop one reference to `id`. A node reaching zero is freed, and the
    /// user entries of a freed directory are released in turn. Returns the
    /// number of nodes freed.
    ///
    /// # Panics
    ///
    /// Releasing a node that is not live is a bookkeeping bug and panics.
    pub fn release(&mut self, id: NodeId) -> usize {
        let mut pending = vec![id];
        let mut freed = 0;
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                panic!("release of freed node {id}");
            };
            assert!(node.link_count > 0, "release of node {id} with zero link count");
            node.link_count -= 1;
            if node.link_count > 0 {
                continue;
            }
            if let Some(node) = self.nodes.remove(&id) {
                trace!(node = %id, kind = %node.kind(), "freed node");
                if let NodeData::Directory(table) = &node.data {
                    pending.extend(table.iter().map(|(_, child)| child));
                }
                freed += 1;
            }
        }
        freed
    }
}
