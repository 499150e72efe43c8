// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Virtual filesystem implementation for memfs
//!
//! `FsCore` is the context object owning the whole tree: the node store, the
//! root directory and the current-directory cursor. Every operation takes
//! string paths, resolves them through [`crate::path::resolve`] and keeps
//! entry tables and link counts consistent. Operations are synchronous and
//! single-threaded; recursive delete and copy are not rolled back when a
//! later step fails.

#[cfg(feature = "events")]
use std::collections::HashMap;
#[cfg(feature = "events")]
use std::sync::Arc;

use tracing::{debug, warn};

use crate::entry::is_reserved;
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultPolicy};
use crate::node::{alloc_bytes, extend_bytes, NodeData, NodeStore};
use crate::path::{self, split_parent, validate_name};
use crate::{Attributes, DirEntry, FsConfig, FsStats, NodeId, NodeKind};
#[cfg(feature = "events")]
use crate::{EventKind, EventSink, SubscriptionId};

/// Owned payload of a file or symlink being copied
enum LeafContent {
    Bytes(Vec<u8>),
    Target(String),
}

/// The main filesystem core implementation
pub struct FsCore {
    config: FsConfig,
    pub(crate) store: NodeStore,
    faults: FaultInjector,
    pub(crate) root: NodeId,
    cwd: NodeId,
    #[cfg(feature = "events")]
    next_subscription_id: u64,
    #[cfg(feature = "events")]
    event_subscriptions: HashMap<SubscriptionId, Arc<dyn EventSink>>,
}

impl std::fmt::Debug for FsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCore")
            .field("root", &self.root)
            .field("cwd", &self.cwd)
            .field("nodes", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl FsCore {
    /// Create the filesystem with a default configuration.
    pub fn initialize() -> FsResult<Self> {
        Self::new(FsConfig::default())
    }

    /// Create a new FsCore instance with the given configuration
    pub fn new(config: FsConfig) -> FsResult<Self> {
        let mut store = NodeStore::new();
        // Fault rules apply to user operations, not to creating the root.
        let root = store.allocate_directory(&mut FaultInjector::default(), None)?;
        let faults = FaultInjector::new(config.faults.clone());
        debug!(root = %root, "initialized filesystem");
        Ok(Self {
            config,
            store,
            faults,
            root,
            cwd: root,
            #[cfg(feature = "events")]
            next_subscription_id: 1,
            #[cfg(feature = "events")]
            event_subscriptions: HashMap::new(),
        })
    }

    /// Release the whole tree from the root. Returns the number of nodes freed.
    pub fn shutdown(mut self) -> usize {
        let freed = self.store.release(self.root);
        debug!(freed, remaining = self.store.len(), "filesystem shut down");
        freed
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Replace the active fault policy, resetting its counters.
    pub fn set_fault_policy(&mut self, policy: FaultPolicy) {
        self.faults.set_policy(policy);
    }

    pub fn faults_injected(&self) -> u64 {
        self.faults.injected()
    }

    // Current directory

    pub fn current_dir(&self) -> NodeId {
        self.cwd
    }

    pub fn set_current_dir(&mut self, path: &str) -> FsResult<()> {
        let id = self.resolve(path)?;
        if !self.store.get(id)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.cwd = id;
        debug!(path, "changed current directory");
        Ok(())
    }

    /// Absolute path of the current directory, rebuilt from `..` links.
    pub fn current_dir_path(&self) -> FsResult<String> {
        let mut names = Vec::new();
        let mut current = self.cwd;
        while current != self.root {
            let parent = self.store.get(current)?.table()?.parent_ref();
            let name = self
                .store
                .get(parent)?
                .table()?
                .iter()
                .find(|(_, child)| *child == current)
                .map(|(name, _)| name.to_string())
                .ok_or(FsError::NotFound)?;
            names.push(name);
            current = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    fn reset_cwd_if_freed(&mut self) {
        if !self.store.contains(self.cwd) {
            warn!("current directory was removed, falling back to root");
            self.cwd = self.root;
        }
    }

    // Resolution

    /// Resolve `path` to a node without following symlinks.
    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        path::resolve(&self.store, self.root, self.cwd, path)
    }

    /// Resolve the parent directory of `path`, returning it with the final component.
    fn resolve_parent<'p>(&self, path: &'p str) -> FsResult<(NodeId, &'p str)> {
        let (parent_path, name) = split_parent(path);
        let parent = self.resolve(parent_path)?;
        if !self.store.get(parent)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok((parent, name))
    }

    /// Resolve the parent of a path that is about to gain a new entry.
    fn resolve_new_entry<'p>(&self, path: &'p str) -> FsResult<(NodeId, &'p str)> {
        let (parent, name) = self.resolve_parent(path)?;
        if name.is_empty() {
            return Err(FsError::AlreadyExists);
        }
        validate_name(name, self.config.limits.max_name_len)?;
        if self.store.get(parent)?.table()?.contains(name) {
            return Err(FsError::AlreadyExists);
        }
        Ok((parent, name))
    }

    /// Resolve the parent of an existing entry named by `path`, which must be
    /// neither the root nor a reserved entry.
    fn resolve_existing_entry<'p>(&self, path: &'p str) -> FsResult<(NodeId, &'p str, NodeId)> {
        let (parent, name) = self.resolve_parent(path)?;
        if name.is_empty() || is_reserved(name) {
            return Err(FsError::InvalidOperation);
        }
        let node = self.store.get(parent)?.table()?.lookup(name).ok_or(FsError::NotFound)?;
        Ok((parent, name, node))
    }

    /// Whether `ancestor` is `node` or one of its parents.
    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> FsResult<bool> {
        let mut current = node;
        loop {
            if current == ancestor {
                return Ok(true);
            }
            if current == self.root {
                return Ok(false);
            }
            current = self.store.get(current)?.table()?.parent_ref();
        }
    }

    // Entry bookkeeping

    /// Insert a freshly allocated node, handing its initial reference to the
    /// new entry. The node is freed again if the insert fails.
    fn attach_new(&mut self, parent: NodeId, name: &str, node: NodeId) -> FsResult<()> {
        let inserted = self.store.get_mut(parent).and_then(|p| p.table_mut()?.insert(name, node));
        if let Err(e) = inserted {
            self.store.release(node);
            return Err(e);
        }
        Ok(())
    }

    /// Add another name for an existing node.
    fn link_entry(&mut self, parent: NodeId, name: &str, node: NodeId) -> FsResult<()> {
        self.store.retain(node)?;
        let inserted = self.store.get_mut(parent).and_then(|p| p.table_mut()?.insert(name, node));
        if let Err(e) = inserted {
            self.store.release(node);
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry and drop the reference it held.
    fn unlink_entry(&mut self, parent: NodeId, name: &str) -> FsResult<usize> {
        let node = self.store.get_mut(parent)?.table_mut()?.remove(name)?;
        Ok(self.store.release(node))
    }

    /// Delete `name` from `parent`, emptying directories depth-first first.
    fn remove_tree(&mut self, parent: NodeId, name: &str) -> FsResult<usize> {
        let node = self.store.get(parent)?.table()?.lookup(name).ok_or(FsError::NotFound)?;
        let children = match &self.store.get(node)?.data {
            NodeData::Directory(table) => table.names(),
            _ => Vec::new(),
        };
        let mut freed = 0;
        for child in children {
            freed += self.remove_tree(node, &child)?;
        }
        freed += self.unlink_entry(parent, name)?;
        Ok(freed)
    }

    // Creation

    pub fn create_directory(&mut self, path: &str) -> FsResult<()> {
        let (parent, name) = self.resolve_new_entry(path)?;
        let dir = self.store.allocate_directory(&mut self.faults, Some(parent))?;
        self.attach_new(parent, name, dir)?;
        debug!(path, node = %dir, "created directory");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            path: path.to_string(),
        });
        Ok(())
    }

    pub fn create_file(&mut self, path: &str) -> FsResult<()> {
        let (parent, name) = self.resolve_new_entry(path)?;
        let file = self.store.allocate_regular(&mut self.faults, Vec::new())?;
        self.attach_new(parent, name, file)?;
        debug!(path, node = %file, "created file");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Give the node at `target_path` a second name at `dest_path`.
    pub fn create_hardlink(&mut self, dest_path: &str, target_path: &str) -> FsResult<()> {
        let target = self.resolve(target_path)?;
        if self.store.get(target)?.is_dir() {
            return Err(FsError::InvalidOperation);
        }
        let (parent, name) = self.resolve_new_entry(dest_path)?;
        self.link_entry(parent, name, target)?;
        debug!(dest_path, target_path, node = %target, "created hardlink");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            path: dest_path.to_string(),
        });
        Ok(())
    }

    /// Store `target_text` verbatim as a symlink at `dest_path`. The target
    /// need not exist.
    pub fn create_symlink(&mut self, dest_path: &str, target_text: &str) -> FsResult<()> {
        let (parent, name) = self.resolve_new_entry(dest_path)?;
        let link = self.store.allocate_symlink(&mut self.faults, target_text)?;
        self.attach_new(parent, name, link)?;
        debug!(dest_path, target_text, "created symlink");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            path: dest_path.to_string(),
        });
        Ok(())
    }

    // Deletion

    /// Remove the entry at `path`; directories are removed recursively.
    /// Other names of a hardlinked file keep its content alive.
    pub fn delete(&mut self, path: &str) -> FsResult<()> {
        let (parent, name, _) = self.resolve_existing_entry(path)?;
        let freed = self.remove_tree(parent, name)?;
        self.reset_cwd_if_freed();
        debug!(path, freed, "deleted");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Removed {
            path: path.to_string(),
        });
        Ok(())
    }

    // Content

    fn regular_target(&self, path: &str) -> FsResult<NodeId> {
        let id = self.resolve(path)?;
        match self.store.get(id)?.data {
            NodeData::Directory(_) => Err(FsError::IsADirectory),
            NodeData::Symlink(_) => Err(FsError::InvalidOperation),
            NodeData::Regular(_) => Ok(id),
        }
    }

    /// Replace the content of the file at `path` with `bytes`.
    pub fn write(&mut self, path: &str, bytes: &[u8]) -> FsResult<()> {
        let id = self.regular_target(path)?;
        let content = alloc_bytes(&mut self.faults, bytes)?;
        if let NodeData::Regular(old) = &mut self.store.get_mut(id)?.data {
            *old = content;
        }
        debug!(path, len = bytes.len(), "wrote file");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Modified {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Append `bytes` to the file at `path`.
    pub fn append(&mut self, path: &str, bytes: &[u8]) -> FsResult<()> {
        let id = self.regular_target(path)?;
        if let NodeData::Regular(content) = &mut self.store.get_mut(id)?.data {
            extend_bytes(&mut self.faults, content, bytes)?;
        }
        debug!(path, len = bytes.len(), "appended to file");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Modified {
            path: path.to_string(),
        });
        Ok(())
    }

    // Copy and move

    /// Deep-copy `src` to `dest`. File content is duplicated, never shared.
    pub fn copy(&mut self, src: &str, dest: &str) -> FsResult<()> {
        if let Err(e) = self.copy_entry(src, dest) {
            warn!(src, dest, error = %e, "copy failed");
            return Err(e);
        }
        debug!(src, dest, "copied");
        Ok(())
    }

    fn copy_entry(&mut self, src: &str, dest: &str) -> FsResult<()> {
        let src_id = self.resolve(src)?;
        match self.store.get(src_id)?.kind() {
            NodeKind::Directory => self.copy_directory(src_id, src, dest),
            NodeKind::Regular | NodeKind::Symlink => self.copy_leaf(src_id, dest),
        }
    }

    fn copy_leaf(&mut self, src_id: NodeId, dest: &str) -> FsResult<()> {
        let (parent, name) = self.resolve_parent(dest)?;
        if name.is_empty() {
            return Err(FsError::IsADirectory);
        }
        validate_name(name, self.config.limits.max_name_len)?;
        let existing = self.store.get(parent)?.table()?.lookup(name);
        if let Some(existing) = existing {
            if existing == src_id {
                return Err(FsError::InvalidOperation);
            }
            if self.store.get(existing)?.is_dir() {
                return Err(FsError::IsADirectory);
            }
        }

        let content = match &self.store.get(src_id)?.data {
            NodeData::Regular(bytes) => LeafContent::Bytes(alloc_bytes(&mut self.faults, bytes)?),
            NodeData::Symlink(target) => LeafContent::Target(target.clone()),
            NodeData::Directory(_) => return Err(FsError::IsADirectory),
        };
        let copy = match content {
            LeafContent::Bytes(bytes) => self.store.allocate_regular(&mut self.faults, bytes)?,
            LeafContent::Target(target) => self.store.allocate_symlink(&mut self.faults, &target)?,
        };
        if existing.is_some() {
            if let Err(e) = self.remove_tree(parent, name) {
                self.store.release(copy);
                return Err(e);
            }
        }
        self.attach_new(parent, name, copy)?;
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            path: dest.to_string(),
        });
        Ok(())
    }

    /// Directories announce themselves through `create_directory`.
    fn copy_directory(&mut self, src_id: NodeId, src: &str, dest: &str) -> FsResult<()> {
        let (parent, _) = self.resolve_parent(dest)?;
        if self.is_ancestor_or_self(src_id, parent)? {
            return Err(FsError::InvalidOperation);
        }
        self.create_directory(dest)?;
        let names = self.store.get(src_id)?.table()?.names();
        for name in names {
            self.copy_entry(&path::join(src, &name), &path::join(dest, &name))?;
        }
        Ok(())
    }

    /// Rename `src` to `dest`, keeping node identity and link count. Fails
    /// with `AlreadyExists` when `dest` is taken.
    pub fn rename(&mut self, src: &str, dest: &str) -> FsResult<()> {
        let (src_parent, src_name, node) = self.resolve_existing_entry(src)?;
        let (dest_parent, dest_name) = self.resolve_new_entry(dest)?;
        let is_dir = self.store.get(node)?.is_dir();
        if is_dir && self.is_ancestor_or_self(node, dest_parent)? {
            return Err(FsError::InvalidOperation);
        }

        let detached = self.store.get_mut(src_parent)?.table_mut()?.remove(src_name)?;
        debug_assert_eq!(detached, node);
        let inserted = self
            .store
            .get_mut(dest_parent)
            .and_then(|p| p.table_mut()?.insert(dest_name, node));
        if let Err(e) = inserted {
            // The slot just freed in the source table still has capacity.
            self.store.get_mut(src_parent)?.table_mut()?.insert(src_name, node)?;
            return Err(e);
        }
        if is_dir {
            self.store.get_mut(node)?.table_mut()?.set_parent(dest_parent);
        }
        debug!(src, dest, node = %node, "moved");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Renamed {
            from: src.to_string(),
            to: dest.to_string(),
        });
        Ok(())
    }

    /// Alias of [`FsCore::rename`].
    pub fn move_entry(&mut self, src: &str, dest: &str) -> FsResult<()> {
        self.rename(src, dest)
    }

    // Node accessors

    pub fn kind(&self, id: NodeId) -> FsResult<NodeKind> {
        Ok(self.store.get(id)?.kind())
    }

    pub fn link_count(&self, id: NodeId) -> FsResult<u32> {
        Ok(self.store.get(id)?.link_count)
    }

    pub fn content_bytes(&self, id: NodeId) -> FsResult<&[u8]> {
        match &self.store.get(id)?.data {
            NodeData::Regular(bytes) => Ok(bytes),
            NodeData::Directory(_) => Err(FsError::IsADirectory),
            NodeData::Symlink(_) => Err(FsError::InvalidOperation),
        }
    }

    pub fn symlink_target(&self, id: NodeId) -> FsResult<&str> {
        match &self.store.get(id)?.data {
            NodeData::Symlink(target) => Ok(target),
            _ => Err(FsError::InvalidOperation),
        }
    }

    /// Entries of a directory in table order. Reserved entries come first
    /// when requested.
    pub fn directory_entries(&self, id: NodeId, include_reserved: bool) -> FsResult<Vec<DirEntry>> {
        let table = self.store.get(id)?.table()?;
        let skip = if include_reserved { 0 } else { 2 };
        let mut entries = Vec::with_capacity(table.len() + 2 - skip);
        for (name, child) in table.iter_with_reserved().skip(skip) {
            entries.push(DirEntry {
                name: name.to_string(),
                kind: self.store.get(child)?.kind(),
            });
        }
        Ok(entries)
    }

    // Path-level conveniences

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn stat(&self, path: &str) -> FsResult<Attributes> {
        let node = self.store.get(self.resolve(path)?)?;
        Ok(Attributes {
            kind: node.kind(),
            len: node.len(),
            link_count: node.link_count,
        })
    }

    pub fn read(&self, path: &str) -> FsResult<Vec<u8>> {
        Ok(self.content_bytes(self.resolve(path)?)?.to_vec())
    }

    pub fn read_to_string(&self, path: &str) -> FsResult<String> {
        Ok(String::from_utf8_lossy(self.content_bytes(self.resolve(path)?)?).into_owned())
    }

    pub fn read_link(&self, path: &str) -> FsResult<String> {
        Ok(self.symlink_target(self.resolve(path)?)?.to_string())
    }

    pub fn list_dir(&self, path: &str, include_reserved: bool) -> FsResult<Vec<DirEntry>> {
        self.directory_entries(self.resolve(path)?, include_reserved)
    }

    /// `path` followed by every path below it, depth-first in name order.
    pub fn walk(&self, path: &str) -> FsResult<Vec<(String, NodeKind)>> {
        let start = self.resolve(path)?;
        let mut out = Vec::new();
        let mut pending = vec![(path.to_string(), start)];
        while let Some((current_path, id)) = pending.pop() {
            let node = self.store.get(id)?;
            if let NodeData::Directory(table) = &node.data {
                // Reverse so the smallest name is popped first.
                for (name, child) in table.iter().collect::<Vec<_>>().into_iter().rev() {
                    pending.push((path::join(&current_path, name), child));
                }
            }
            out.push((current_path, node.kind()));
        }
        Ok(out)
    }

    pub fn stats(&self) -> FsStats {
        let mut stats = FsStats::default();
        for node in self.store.iter() {
            stats.nodes += 1;
            match &node.data {
                NodeData::Directory(_) => stats.directories += 1,
                NodeData::Regular(bytes) => {
                    stats.regular_files += 1;
                    stats.content_bytes += bytes.len() as u64;
                }
                NodeData::Symlink(_) => stats.symlinks += 1,
            }
        }
        stats
    }

    // Events

    #[cfg(feature = "events")]
    pub fn subscribe_events(&mut self, cb: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription_id);
        self.next_subscription_id += 1;
        self.event_subscriptions.insert(id, cb);
        id
    }

    #[cfg(feature = "events")]
    pub fn unsubscribe_events(&mut self, sub: SubscriptionId) -> FsResult<()> {
        self.event_subscriptions.remove(&sub).map(|_| ()).ok_or(FsError::NotFound)
    }

    #[cfg(feature = "events")]
    fn emit_event(&self, event: EventKind) {
        if !self.config.track_events {
            return;
        }
        for sink in self.event_subscriptions.values() {
            sink.on_event(&event);
        }
    }
}
