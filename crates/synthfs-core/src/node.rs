// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node table: the owned store of every node in the engine

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::error::{FsError, FsResult};
use crate::types::{DirEntry, NodeId, NodeType, Owner, Stat};

/// Kind-specific node contents
#[derive(Clone, Debug)]
pub(crate) enum Payload {
    Directory {
        /// Insertion-ordered; enumeration order is creation order
        children: IndexMap<String, NodeId>,
    },
    Data {
        bytes: Vec<u8>,
    },
    /// Behaviour lives in the driver registry, keyed by this node's id
    Synthetic,
}

/// A node record
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    /// Hard-edge parent; `None` for namespace roots
    pub(crate) parent: Option<NodeId>,
    pub(crate) payload: Payload,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    /// Advisory size for synthetic nodes; data files report their buffer length
    pub(crate) advisory_size: u64,
    pub version: u64,
    pub atime: i64,
    pub mtime: i64,
}

impl Node {
    fn new(id: NodeId, parent: Option<NodeId>, kind: NodeType, owner: Owner, mode: u32) -> Self {
        let payload = match kind {
            NodeType::Directory => Payload::Directory {
                children: IndexMap::new(),
            },
            NodeType::DataFile => Payload::Data { bytes: Vec::new() },
            NodeType::Synthetic => Payload::Synthetic,
        };
        let now = now();
        Self {
            id,
            parent,
            payload,
            uid: owner.uid,
            gid: owner.gid,
            mode,
            advisory_size: 0,
            version: 0,
            atime: now,
            mtime: now,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn node_type(&self) -> NodeType {
        match self.payload {
            Payload::Directory { .. } => NodeType::Directory,
            Payload::Data { .. } => NodeType::DataFile,
            Payload::Synthetic => NodeType::Synthetic,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.payload, Payload::Directory { .. })
    }

    pub fn size(&self) -> u64 {
        match &self.payload {
            Payload::Data { bytes } => bytes.len() as u64,
            Payload::Directory { children } => children.len() as u64,
            Payload::Synthetic => self.advisory_size,
        }
    }

    pub(crate) fn children(&self) -> Option<&IndexMap<String, NodeId>> {
        match &self.payload {
            Payload::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub(crate) fn link_count(&self) -> u32 {
        match &self.payload {
            Payload::Directory { children } => children.len() as u32,
            _ => 1,
        }
    }

    pub(crate) fn stat(&self) -> Stat {
        Stat {
            node: self.id,
            kind: self.node_type(),
            uid: self.uid,
            gid: self.gid,
            mode: self.mode,
            size: self.size(),
            version: self.version,
            atime: self.atime,
            mtime: self.mtime,
            nlink: self.link_count(),
        }
    }

    pub(crate) fn touch_modified(&mut self) {
        self.version += 1;
        self.mtime = now();
    }

    pub(crate) fn touch_accessed(&mut self) {
        self.atime = now();
    }
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Reject names that cannot be stored as a child entry.
pub(crate) fn validate_name(name: &str, max_len: usize) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(FsError::InvalidName);
    }
    if name.len() > max_len {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slot arena holding every node.
///
/// Freed slots are reused with a bumped generation, so a [`NodeId`] held by a
/// stale handle never resolves to whatever later occupies its slot.
pub(crate) struct NodeTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: u32,
    max_name_len: usize,
}

impl NodeTable {
    pub(crate) fn new(max_name_len: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_name_len,
        }
    }

    fn allocate(&mut self, parent: Option<NodeId>, kind: NodeType, owner: Owner, mode: u32) -> NodeId {
        let id = match self.free.pop() {
            Some(index) => NodeId::new(index, self.slots[index as usize].generation),
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                NodeId::new(index, 0)
            }
        };
        self.slots[id.index as usize].node = Some(Node::new(id, parent, kind, owner, mode));
        self.live += 1;
        id
    }

    fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        self.live -= 1;
        // A slot whose generation would wrap is retired for good.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(id.index);
        }
        Some(node)
    }

    /// Create a parentless directory, the root of a namespace.
    pub(crate) fn insert_root(&mut self, owner: Owner, mode: u32) -> NodeId {
        self.allocate(None, NodeType::Directory, owner, mode)
    }

    pub(crate) fn create(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeType,
        owner: Owner,
        mode: u32,
    ) -> FsResult<NodeId> {
        validate_name(name, self.max_name_len)?;
        match self.get(parent)?.children() {
            None => return Err(FsError::NotADirectory),
            Some(children) if children.contains_key(name) => return Err(FsError::AlreadyExists),
            Some(_) => {}
        }

        let id = self.allocate(Some(parent), kind, owner, mode);
        let parent_node = self.get_mut(parent)?;
        if let Payload::Directory { children } = &mut parent_node.payload {
            children.insert(name.to_string(), id);
        }
        parent_node.touch_modified();
        Ok(id)
    }

    pub(crate) fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(FsError::NotFound)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(FsError::NotFound)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    pub(crate) fn lookup_child(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.get(parent)?
            .children()
            .ok_or(FsError::NotADirectory)?
            .get(name)
            .copied()
            .ok_or(FsError::NotFound)
    }

    /// Children of a directory in insertion order.
    pub(crate) fn children(&self, dir: NodeId) -> FsResult<Vec<DirEntry>> {
        let children = self.get(dir)?.children().ok_or(FsError::NotADirectory)?;
        let mut entries = Vec::with_capacity(children.len());
        for (name, &child) in children {
            let kind = self.get(child)?.node_type();
            entries.push(DirEntry {
                name: name.clone(),
                node: child,
                kind,
            });
        }
        Ok(entries)
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).ok().and_then(|node| node.parent)
    }

    /// `id` followed by every node below it, parents before children.
    pub(crate) fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Ok(Some(children)) = self.get(current).map(Node::children) {
                stack.extend(children.values().rev().copied());
            }
        }
        out
    }

    /// Nodes that `remove(parent, name, recursive)` would delete, without
    /// changing anything.
    pub(crate) fn plan_remove(&self, parent: NodeId, name: &str, recursive: bool) -> FsResult<Vec<NodeId>> {
        let target = self.lookup_child(parent, name)?;
        let node = self.get(target)?;
        if let Some(children) = node.children() {
            if !children.is_empty() && !recursive {
                return Err(FsError::NotEmpty);
            }
        }
        Ok(self.subtree(target))
    }

    /// Unlink `name` from `parent` and free it (and its subtree when
    /// `recursive`). Returns the freed ids, parents before children.
    pub(crate) fn remove(&mut self, parent: NodeId, name: &str, recursive: bool) -> FsResult<Vec<NodeId>> {
        let doomed = self.plan_remove(parent, name, recursive)?;
        let parent_node = self.get_mut(parent)?;
        if let Payload::Directory { children } = &mut parent_node.payload {
            children.shift_remove(name);
        }
        parent_node.touch_modified();
        for id in &doomed {
            self.release(*id);
        }
        Ok(doomed)
    }

    /// Free a parentless root and everything below it.
    pub(crate) fn remove_root(&mut self, root: NodeId) -> FsResult<Vec<NodeId>> {
        if self.get(root)?.parent.is_some() {
            return Err(FsError::InvalidArgument);
        }
        let doomed = self.subtree(root);
        for id in &doomed {
            self.release(*id);
        }
        Ok(doomed)
    }

    pub(crate) fn len(&self) -> u32 {
        self.live
    }
}
