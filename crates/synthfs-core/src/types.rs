// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for synthfs

use std::fmt;

/// Identifier of a node in the node table.
///
/// The slot index may be recycled once a node is removed, but the generation
/// is bumped every time, so an id that outlived its node never resolves to
/// the slot's new occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Client session that owns open handles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Owner and group recorded on a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Security identity the engine evaluates permissions against.
///
/// Authentication happens outside the engine; whatever identity the caller
/// hands in is taken at face value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, checked in addition to `gid`
    pub groups: Vec<u32>,
}

impl Subject {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = u32>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    pub fn owner(&self) -> Owner {
        Owner::new(self.uid, self.gid)
    }
}

/// Kind tag of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Directory,
    DataFile,
    Synthetic,
}

/// Node kinds that can be created directly; synthetic nodes come from
/// driver registration instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateKind {
    Directory,
    DataFile,
}

impl From<CreateKind> for NodeType {
    fn from(kind: CreateKind) -> Self {
        match kind {
            CreateKind::Directory => NodeType::Directory,
            CreateKind::DataFile => NodeType::DataFile,
        }
    }
}

/// Access mode fixed on a handle at open time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn readable(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Node attributes as reported by `stat`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub node: NodeId,
    pub kind: NodeType,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    /// Byte length for data files; advisory for synthetic files
    pub size: u64,
    /// Modification sequence, bumped on every content or entry change
    pub version: u64,
    pub atime: i64,
    pub mtime: i64,
    pub nlink: u32,
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub node: NodeId,
    pub kind: NodeType,
}

/// How a mount grafts its target onto the mount point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountPolicy {
    /// The mount point is hidden; walks continue inside the target root.
    Replace,
    /// Names are looked up in the target root first, then in the mount point.
    Union,
}

/// Active mount as reported by `Vfs::mounts`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: NodeId,
    pub target_root: NodeId,
    pub policy: MountPolicy,
}

/// Engine statistics
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsStats {
    pub nodes: u32,
    pub open_handles: u32,
    pub mounts: u32,
    pub drivers: u32,
}

/// Opaque event subscription identifier
#[cfg(feature = "events")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[cfg(feature = "events")]
impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Event kinds for namespace change notifications
#[cfg(feature = "events")]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created {
        parent: NodeId,
        node: NodeId,
        name: String,
    },
    Removed {
        parent: NodeId,
        node: NodeId,
        name: String,
    },
    Modified {
        node: NodeId,
    },
    Mounted {
        mount_point: NodeId,
        target_root: NodeId,
    },
    Unmounted {
        mount_point: NodeId,
    },
}

/// Event sink trait for receiving namespace change notifications
#[cfg(feature = "events")]
pub trait EventSink: Send + Sync {
    fn on_event(&self, evt: &EventKind);
}
