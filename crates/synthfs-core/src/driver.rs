// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Synthetic node drivers and the registry that binds them to nodes

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DriverResult;
use crate::types::{NodeId, OpenMode, Subject};

/// Per-open driver state. The engine stores it with the handle and passes
/// it back on every call; only the driver knows its concrete type.
pub type SessionState = Box<dyn Any + Send>;

/// Callback set implementing a synthetic node.
///
/// Every `open` that succeeds is paired with exactly one `close`, including
/// when the handle is torn down with its session or after the node was
/// removed. `read` and `write` may move fewer bytes than asked; returning
/// 0 from `read` means end of data.
///
/// Callbacks run without any engine lock held other than the handle's own,
/// so they may block.
#[cfg_attr(test, mockall::automock)]
pub trait Driver: Send + Sync {
    /// Start a session. Returning an error refuses the open regardless of
    /// what the permission bits allow.
    fn open(&self, node: NodeId, subject: &Subject, mode: OpenMode) -> DriverResult<SessionState>;

    fn read(&self, state: &mut SessionState, buf: &mut [u8], offset: u64) -> DriverResult<usize>;

    fn write(&self, state: &mut SessionState, data: &[u8], offset: u64) -> DriverResult<usize>;

    fn close(&self, state: SessionState);

    /// Size reported for `SeekFrom::End`; `None` falls back to the node's
    /// advisory size.
    fn size_hint(&self, _node: NodeId) -> Option<u64> {
        None
    }
}

/// Maps synthetic nodes to their drivers.
///
/// Lives under the same lock as the node table so that a synthetic node and
/// its driver entry appear and disappear together.
#[derive(Default)]
pub(crate) struct DriverRegistry {
    drivers: HashMap<NodeId, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub(crate) fn insert(&mut self, node: NodeId, driver: Arc<dyn Driver>) {
        self.drivers.insert(node, driver);
    }

    pub(crate) fn remove(&mut self, node: NodeId) -> Option<Arc<dyn Driver>> {
        self.drivers.remove(&node)
    }

    pub(crate) fn get(&self, node: NodeId) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&node).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.drivers.len()
    }
}
