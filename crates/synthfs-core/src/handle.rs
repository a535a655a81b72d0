// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open-handle table

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{Driver, SessionState};
use crate::error::{FsError, FsResult};
use crate::types::{DirEntry, HandleId, NodeId, OpenMode, SessionId};

/// What a handle reads from and writes to
pub(crate) enum HandleKind {
    Data,
    Directory {
        /// Snapshot taken at open, overlay entries first for union mounts
        entries: Vec<DirEntry>,
        position: usize,
    },
    Synthetic {
        driver: Arc<dyn Driver>,
        /// Taken when the handle is closed
        state: Option<SessionState>,
    },
}

/// Open handle state, serialized by its own mutex
pub(crate) struct OpenHandle {
    pub(crate) node: NodeId,
    pub(crate) mode: OpenMode,
    pub(crate) cursor: u64,
    pub(crate) kind: HandleKind,
}

impl OpenHandle {
    pub(crate) fn new(node: NodeId, mode: OpenMode, kind: HandleKind) -> Self {
        Self {
            node,
            mode,
            cursor: 0,
            kind,
        }
    }

    /// Run the driver's `close` if this is a synthetic handle that has not
    /// been closed yet.
    pub(crate) fn release(&mut self) {
        if let HandleKind::Synthetic { driver, state } = &mut self.kind {
            if let Some(state) = state.take() {
                driver.close(state);
            }
        }
    }
}

/// Table entry. `node`, `session` and `is_dir` never change after open, so
/// they can be inspected without taking the handle's mutex.
struct Slot {
    node: NodeId,
    session: SessionId,
    is_dir: bool,
    handle: Arc<Mutex<OpenHandle>>,
}

/// Live handles. The map lock is only held to look up, insert or remove an
/// entry, never across an operation on the handle itself.
pub(crate) struct HandleTable {
    slots: Mutex<HashMap<HandleId, Slot>>,
    next_id: AtomicU64,
    max_open: usize,
}

impl HandleTable {
    pub(crate) fn new(max_open: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_open,
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.slots.lock().len() < self.max_open
    }

    /// Register a handle under a fresh id; ids are never reused.
    pub(crate) fn insert(&self, session: SessionId, handle: OpenHandle) -> Result<HandleId, (FsError, OpenHandle)> {
        let mut slots = self.slots.lock();
        if slots.len() >= self.max_open {
            return Err((FsError::TooManyOpenFiles, handle));
        }
        let id = HandleId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Slot {
            node: handle.node,
            session,
            is_dir: matches!(handle.kind, HandleKind::Directory { .. }),
            handle: Arc::new(Mutex::new(handle)),
        };
        slots.insert(id, slot);
        Ok(id)
    }

    pub(crate) fn get(&self, id: HandleId) -> FsResult<Arc<Mutex<OpenHandle>>> {
        self.slots
            .lock()
            .get(&id)
            .map(|slot| slot.handle.clone())
            .ok_or(FsError::InvalidHandle)
    }

    pub(crate) fn remove(&self, id: HandleId) -> FsResult<Arc<Mutex<OpenHandle>>> {
        self.slots
            .lock()
            .remove(&id)
            .map(|slot| slot.handle)
            .ok_or(FsError::InvalidHandle)
    }

    pub(crate) fn ids_for_session(&self, session: SessionId) -> Vec<HandleId> {
        let mut ids: Vec<HandleId> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.session == session)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// True if any of `nodes` has an open handle of any kind.
    pub(crate) fn has_open(&self, nodes: &[NodeId]) -> bool {
        self.slots
            .lock()
            .values()
            .any(|slot| nodes.contains(&slot.node))
    }

    /// True if any of `nodes` has an open directory handle.
    pub(crate) fn has_open_dir(&self, nodes: &[NodeId]) -> bool {
        self.slots
            .lock()
            .values()
            .any(|slot| slot.is_dir && nodes.contains(&slot.node))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
