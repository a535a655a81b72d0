// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount table: grafts of one namespace onto a directory of another

use indexmap::IndexMap;

use crate::error::{FsError, FsResult};
use crate::types::{MountInfo, MountPolicy, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub(crate) mount_point: NodeId,
    pub(crate) target_root: NodeId,
    pub(crate) policy: MountPolicy,
}

/// Active mounts keyed by mount point, in mount order.
///
/// Each mount point carries at most one mount, so following mount points to
/// their targets forms chains; [`MountTable::insert`] keeps those chains
/// acyclic.
#[derive(Default)]
pub(crate) struct MountTable {
    entries: IndexMap<NodeId, MountEntry>,
}

impl MountTable {
    pub(crate) fn get(&self, mount_point: NodeId) -> Option<&MountEntry> {
        self.entries.get(&mount_point)
    }

    pub(crate) fn insert(&mut self, entry: MountEntry) -> FsResult<()> {
        if self.entries.contains_key(&entry.mount_point) {
            return Err(FsError::Busy);
        }
        let mut cursor = entry.target_root;
        loop {
            if cursor == entry.mount_point {
                return Err(FsError::InvalidArgument);
            }
            match self.entries.get(&cursor) {
                Some(next) => cursor = next.target_root,
                None => break,
            }
        }
        self.entries.insert(entry.mount_point, entry);
        Ok(())
    }

    pub(crate) fn remove(&mut self, mount_point: NodeId) -> FsResult<MountEntry> {
        self.entries
            .shift_remove(&mount_point)
            .ok_or(FsError::NotFound)
    }

    pub(crate) fn is_target_root(&self, node: NodeId) -> bool {
        self.entries.values().any(|e| e.target_root == node)
    }

    /// True if `node` is a mount point or the target of some mount.
    pub(crate) fn involves(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node) || self.is_target_root(node)
    }

    pub(crate) fn list(&self) -> Vec<MountInfo> {
        self.entries
            .values()
            .map(|e| MountInfo {
                mount_point: e.mount_point,
                target_root: e.target_root,
                policy: e.policy,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
