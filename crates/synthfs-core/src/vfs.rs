// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Namespace engine: the façade over nodes, mounts, drivers and handles

use std::io::SeekFrom;
use std::sync::Arc;

#[cfg(feature = "events")]
use std::collections::HashMap;
#[cfg(feature = "events")]
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;
#[cfg(feature = "events")]
use parking_lot::Mutex;

use crate::config::FsConfig;
use crate::driver::{Driver, DriverRegistry};
use crate::error::{FsError, FsResult};
use crate::handle::{HandleKind, HandleTable, OpenHandle};
use crate::mount::{MountEntry, MountTable};
use crate::node::{NodeTable, Payload};
use crate::permissions::{inherit_mode, Access, AccessCheck};
use crate::storage;
use crate::walk::{split_parent, split_path, Resolved, Walker};
use crate::{
    CreateKind, DirEntry, FsStats, HandleId, MountInfo, MountPolicy, NodeId, NodeType, OpenMode,
    Owner, SessionId, Stat, Subject,
};
#[cfg(feature = "events")]
use crate::{EventKind, EventSink, SubscriptionId};

/// Everything a walk must see consistently. Node table, mount table and
/// driver registry change together under one lock.
struct Namespace {
    nodes: NodeTable,
    mounts: MountTable,
    drivers: DriverRegistry,
}

impl Namespace {
    fn walker<'a>(&'a self, check: AccessCheck<'a>) -> Walker<'a> {
        Walker::new(&self.nodes, &self.mounts, check)
    }

    /// Directory entries visible at `at`, overlay layers first. A name
    /// already taken by a higher layer hides the lower entry.
    fn merged_entries(&self, at: &Resolved) -> FsResult<Vec<DirEntry>> {
        let mut merged: IndexMap<String, DirEntry> = IndexMap::new();
        for &layer in &at.layers {
            for entry in self.nodes.children(layer)? {
                merged.entry(entry.name.clone()).or_insert(entry);
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Find the layer holding `name` and the child it maps to.
    fn locate_child(&self, at: &Resolved, name: &str) -> FsResult<(NodeId, NodeId)> {
        for &layer in &at.layers {
            match self.nodes.lookup_child(layer, name) {
                Ok(child) => return Ok((layer, child)),
                Err(FsError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FsError::NotFound)
    }
}

fn no_visit(_: &str, _: NodeId) {}

fn check_mode_bits(mode: u32) -> FsResult<()> {
    if mode & !0o7777 != 0 {
        return Err(FsError::InvalidArgument);
    }
    Ok(())
}

/// The synthetic filesystem engine.
///
/// Every path-taking operation has an `_at` form that resolves from an
/// explicit start node; the plain form resolves from [`Vfs::root`].
///
/// Operations on one handle are serialized; callers that share a handle
/// across threads get no ordering guarantee between their reads and
/// writes beyond that.
pub struct Vfs {
    config: FsConfig,
    root: NodeId,
    ns: RwLock<Namespace>,
    handles: HandleTable,
    #[cfg(feature = "events")]
    next_subscription_id: AtomicU64,
    #[cfg(feature = "events")]
    event_subscriptions: Mutex<HashMap<SubscriptionId, Arc<dyn EventSink>>>,
}

impl Vfs {
    /// Create an engine with an empty root directory.
    pub fn new(config: FsConfig) -> FsResult<Self> {
        config.validate()?;

        let mut nodes = NodeTable::new(config.limits.max_name_len);
        let security = &config.security;
        let root = nodes.insert_root(
            Owner::new(security.root_uid, security.root_gid),
            security.root_mode,
        );
        let handles = HandleTable::new(config.limits.max_open_handles as usize);

        Ok(Self {
            root,
            ns: RwLock::new(Namespace {
                nodes,
                mounts: MountTable::default(),
                drivers: DriverRegistry::default(),
            }),
            handles,
            #[cfg(feature = "events")]
            next_subscription_id: AtomicU64::new(1),
            #[cfg(feature = "events")]
            event_subscriptions: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Root of the default namespace
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn subject_check<'a>(&'a self, subject: &'a Subject) -> AccessCheck<'a> {
        AccessCheck::Subject {
            subject,
            policy: &self.config.security,
        }
    }

    /// Create a detached namespace root, typically used as a mount target.
    pub fn create_namespace(&self, owner: Owner, mode: u32) -> FsResult<NodeId> {
        check_mode_bits(mode)?;
        let id = self.ns.write().nodes.insert_root(owner, mode);
        tracing::debug!(node = %id, "created namespace root");
        Ok(id)
    }

    /// Free a detached namespace root and everything under it.
    ///
    /// The default root cannot be destroyed, and a namespace that takes part
    /// in a mount or still has open handles is [`FsError::Busy`]. Ids that
    /// are not namespace roots are [`FsError::InvalidArgument`].
    pub fn destroy_namespace(&self, root: NodeId) -> FsResult<()> {
        if root == self.root {
            return Err(FsError::Busy);
        }
        let freed = {
            let mut ns = self.ns.write();
            if ns.nodes.parent(root).is_some() {
                return Err(FsError::InvalidArgument);
            }
            let doomed = ns.nodes.subtree(root);
            if doomed.iter().any(|&id| ns.mounts.involves(id)) || self.handles.has_open(&doomed) {
                return Err(FsError::Busy);
            }
            let freed = ns.nodes.remove_root(root)?;
            for id in &freed {
                ns.drivers.remove(*id);
            }
            freed.len()
        };
        tracing::debug!(node = %root, freed, "destroyed namespace");
        Ok(())
    }

    // Structural operations

    pub fn create(
        &self,
        subject: &Subject,
        parent_path: &str,
        name: &str,
        kind: CreateKind,
        mode: u32,
    ) -> FsResult<NodeId> {
        self.create_at(subject, self.root, parent_path, name, kind, mode)
    }

    /// Create a directory or data file owned by `subject`. Needs write
    /// permission on the parent directory.
    pub fn create_at(
        &self,
        subject: &Subject,
        start: NodeId,
        parent_path: &str,
        name: &str,
        kind: CreateKind,
        mode: u32,
    ) -> FsResult<NodeId> {
        self.install(
            self.subject_check(subject),
            start,
            parent_path,
            name,
            kind.into(),
            subject.owner(),
            mode,
            None,
        )
    }

    pub fn create_as_host(
        &self,
        parent_path: &str,
        name: &str,
        kind: CreateKind,
        owner: Owner,
        mode: u32,
    ) -> FsResult<NodeId> {
        self.create_as_host_at(self.root, parent_path, name, kind, owner, mode)
    }

    /// Host-side creation: no permission checks, explicit owner.
    pub fn create_as_host_at(
        &self,
        start: NodeId,
        parent_path: &str,
        name: &str,
        kind: CreateKind,
        owner: Owner,
        mode: u32,
    ) -> FsResult<NodeId> {
        self.install(
            AccessCheck::Host,
            start,
            parent_path,
            name,
            kind.into(),
            owner,
            mode,
            None,
        )
    }

    pub fn register_driver(
        &self,
        parent_path: &str,
        name: &str,
        owner: Owner,
        mode: u32,
        driver: Arc<dyn Driver>,
    ) -> FsResult<NodeId> {
        self.register_driver_at(self.root, parent_path, name, owner, mode, driver)
    }

    /// Install a synthetic file backed by `driver`. The node and its driver
    /// entry become visible together.
    pub fn register_driver_at(
        &self,
        start: NodeId,
        parent_path: &str,
        name: &str,
        owner: Owner,
        mode: u32,
        driver: Arc<dyn Driver>,
    ) -> FsResult<NodeId> {
        let id = self.install(
            AccessCheck::Host,
            start,
            parent_path,
            name,
            NodeType::Synthetic,
            owner,
            mode,
            Some(driver),
        )?;
        tracing::debug!(node = %id, name, "registered driver");
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn install(
        &self,
        check: AccessCheck<'_>,
        start: NodeId,
        parent_path: &str,
        name: &str,
        kind: NodeType,
        owner: Owner,
        mode: u32,
        driver: Option<Arc<dyn Driver>>,
    ) -> FsResult<NodeId> {
        check_mode_bits(mode)?;
        let components = split_path(parent_path);

        let (parent, id) = {
            let mut ns = self.ns.write();
            let at = ns
                .walker(check)
                .walk(start, &components, true, &mut no_visit)?;
            // New names land in the highest-priority layer of a union.
            let parent = at.layers[0];
            let parent_node = ns.nodes.get(parent)?;
            if !parent_node.is_dir() {
                return Err(FsError::NotADirectory);
            }
            check.require(parent_node, Access::WRITE)?;

            let mode = if self.config.inherit_permissions {
                let inherit_as = match kind {
                    NodeType::Directory => CreateKind::Directory,
                    NodeType::DataFile | NodeType::Synthetic => CreateKind::DataFile,
                };
                inherit_mode(mode, parent_node.mode, inherit_as)
            } else {
                mode
            };

            let id = ns.nodes.create(parent, name, kind, owner, mode)?;
            if let Some(driver) = driver {
                ns.drivers.insert(id, driver);
            }
            (parent, id)
        };

        tracing::debug!(parent = %parent, node = %id, name, kind = ?kind, "created node");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Created {
            parent,
            node: id,
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn remove(&self, subject: &Subject, path: &str, recursive: bool) -> FsResult<()> {
        self.remove_at(subject, self.root, path, recursive)
    }

    /// Remove the node at `path`; directories need `recursive` unless empty.
    ///
    /// Data and synthetic files may be removed while open; their handles
    /// then fail with [`FsError::Stale`]. Directories with open handles,
    /// subtrees containing a mount point or mount target, and namespace
    /// roots are [`FsError::Busy`].
    pub fn remove_at(
        &self,
        subject: &Subject,
        start: NodeId,
        path: &str,
        recursive: bool,
    ) -> FsResult<()> {
        if split_path(path).is_empty() {
            return Err(FsError::Busy);
        }
        let (components, name) = split_parent(path)?;
        if name == "." || name == ".." {
            return Err(FsError::InvalidName);
        }
        let check = self.subject_check(subject);

        let (parent, target, removed) = {
            let mut ns = self.ns.write();
            let at = ns
                .walker(check)
                .walk(start, &components, true, &mut no_visit)?;
            let (parent, target) = ns.locate_child(&at, name)?;
            check.require(ns.nodes.get(parent)?, Access::WRITE)?;

            let doomed = ns.nodes.plan_remove(parent, name, recursive)?;
            if doomed.iter().any(|&id| ns.mounts.involves(id)) {
                return Err(FsError::Busy);
            }
            if self.handles.has_open_dir(&doomed) {
                return Err(FsError::Busy);
            }

            let removed = ns.nodes.remove(parent, name, recursive)?;
            for id in &removed {
                ns.drivers.remove(*id);
            }
            (parent, target, removed.len())
        };

        tracing::debug!(parent = %parent, node = %target, name, removed, "removed node");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Removed {
            parent,
            node: target,
            name: name.to_string(),
        });
        Ok(())
    }

    // Mounts

    /// Graft `target_root` onto the directory at `mount_point_path` under
    /// `base_root`. Needs write permission on the mount point.
    pub fn mount(
        &self,
        subject: &Subject,
        base_root: NodeId,
        mount_point_path: &str,
        target_root: NodeId,
        policy: MountPolicy,
    ) -> FsResult<()> {
        let check = self.subject_check(subject);
        let components = split_path(mount_point_path);

        let mount_point = {
            let mut ns = self.ns.write();
            let mount_point = ns
                .walker(check)
                .walk(base_root, &components, false, &mut no_visit)?
                .node;
            let point = ns.nodes.get(mount_point)?;
            if !point.is_dir() {
                return Err(FsError::NotADirectory);
            }
            check.require(point, Access::WRITE)?;
            if !ns.nodes.get(target_root)?.is_dir() {
                return Err(FsError::NotADirectory);
            }
            ns.mounts.insert(MountEntry {
                mount_point,
                target_root,
                policy,
            })?;
            mount_point
        };

        tracing::debug!(mount_point = %mount_point, target_root = %target_root, policy = ?policy, "mounted");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Mounted {
            mount_point,
            target_root,
        });
        Ok(())
    }

    pub fn unmount(&self, subject: &Subject, base_root: NodeId, mount_point_path: &str) -> FsResult<()> {
        let check = self.subject_check(subject);
        let components = split_path(mount_point_path);

        let mount_point = {
            let mut ns = self.ns.write();
            let mount_point = ns
                .walker(check)
                .walk(base_root, &components, false, &mut no_visit)?
                .node;
            check.require(ns.nodes.get(mount_point)?, Access::WRITE)?;
            ns.mounts.remove(mount_point)?;
            mount_point
        };

        tracing::debug!(mount_point = %mount_point, "unmounted");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Unmounted { mount_point });
        Ok(())
    }

    /// Active mounts in the order they were made
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.ns.read().mounts.list()
    }

    // Resolution

    pub fn walk<S: AsRef<str>>(
        &self,
        start: NodeId,
        components: &[S],
        subject: &Subject,
    ) -> FsResult<NodeId> {
        self.walk_with(start, components, subject, no_visit)
    }

    /// Walk and report each resolved component with the node it reached.
    ///
    /// The visitor runs after the namespace lock is released, so it may
    /// call back into the engine. On failure it has seen the components
    /// resolved before the failing one.
    pub fn walk_with<S, F>(
        &self,
        start: NodeId,
        components: &[S],
        subject: &Subject,
        mut visitor: F,
    ) -> FsResult<NodeId>
    where
        S: AsRef<str>,
        F: FnMut(&str, NodeId),
    {
        let mut steps: Vec<(String, NodeId)> = Vec::new();
        let result = {
            let ns = self.ns.read();
            ns.walker(self.subject_check(subject)).walk(
                start,
                components,
                true,
                &mut |name, node| steps.push((name.to_string(), node)),
            )
        };
        for (name, node) in &steps {
            visitor(name, *node);
        }
        result.map(|at| at.node)
    }

    pub fn lookup(&self, subject: &Subject, path: &str) -> FsResult<NodeId> {
        self.lookup_at(subject, self.root, path)
    }

    pub fn lookup_at(&self, subject: &Subject, start: NodeId, path: &str) -> FsResult<NodeId> {
        self.walk(start, &split_path(path), subject)
    }

    pub fn stat(&self, subject: &Subject, path: &str) -> FsResult<Stat> {
        self.stat_at(subject, self.root, path)
    }

    pub fn stat_at(&self, subject: &Subject, start: NodeId, path: &str) -> FsResult<Stat> {
        let ns = self.ns.read();
        let at = ns
            .walker(self.subject_check(subject))
            .walk(start, &split_path(path), true, &mut no_visit)?;
        Ok(ns.nodes.get(at.node)?.stat())
    }

    pub fn stat_node(&self, node: NodeId) -> FsResult<Stat> {
        Ok(self.ns.read().nodes.get(node)?.stat())
    }

    // Handles

    pub fn open(
        &self,
        session: SessionId,
        subject: &Subject,
        path: &str,
        mode: OpenMode,
    ) -> FsResult<HandleId> {
        self.open_at(session, subject, self.root, path, mode)
    }

    /// Open the node at `path`. The access mode is fixed for the handle's
    /// lifetime. Synthetic nodes additionally consult their driver, which
    /// may refuse.
    pub fn open_at(
        &self,
        session: SessionId,
        subject: &Subject,
        start: NodeId,
        path: &str,
        mode: OpenMode,
    ) -> FsResult<HandleId> {
        if !self.handles.has_capacity() {
            return Err(FsError::TooManyOpenFiles);
        }
        let check = self.subject_check(subject);
        let mut wanted = Access::NONE;
        if mode.readable() {
            wanted = wanted | Access::READ;
        }
        if mode.writable() {
            wanted = wanted | Access::WRITE;
        }

        let (node, driver) = {
            let ns = self.ns.read();
            let at = ns
                .walker(check)
                .walk(start, &split_path(path), true, &mut no_visit)?;
            let target = ns.nodes.get(at.node)?;
            check.require(target, wanted)?;

            if target.node_type() == NodeType::Synthetic {
                let driver = ns.drivers.get(at.node).ok_or(FsError::NotFound)?;
                (at.node, driver)
            } else {
                let kind = if target.is_dir() {
                    if mode.writable() {
                        return Err(FsError::IsADirectory);
                    }
                    HandleKind::Directory {
                        entries: ns.merged_entries(&at)?,
                        position: 0,
                    }
                } else {
                    HandleKind::Data
                };
                // Registered before the namespace lock is released, so a
                // concurrent remove sees the handle.
                let id = self
                    .handles
                    .insert(session, OpenHandle::new(at.node, mode, kind))
                    .map_err(|(e, _)| e)?;
                tracing::trace!(handle = %id, node = %at.node, mode = ?mode, "opened handle");
                return Ok(id);
            }
        };

        let state = driver.open(node, subject, mode).map_err(|e| {
            tracing::debug!(node = %node, error = %e, "driver refused open");
            FsError::Driver(e)
        })?;
        let handle = OpenHandle::new(
            node,
            mode,
            HandleKind::Synthetic {
                driver,
                state: Some(state),
            },
        );
        match self.handles.insert(session, handle) {
            Ok(id) => {
                tracing::trace!(handle = %id, node = %node, mode = ?mode, "opened synthetic handle");
                Ok(id)
            }
            Err((e, mut handle)) => {
                handle.release();
                Err(e)
            }
        }
    }

    fn ensure_live(&self, node: NodeId) -> FsResult<()> {
        if self.ns.read().nodes.contains(node) {
            Ok(())
        } else {
            Err(FsError::Stale)
        }
    }

    /// Read at the handle's cursor and advance it by the amount read.
    ///
    /// Data files return 0 at end of data. Directory handles produce one
    /// `name\n` entry per call and 0 once enumeration is exhausted; a buffer
    /// too small for the next entry is [`FsError::InvalidArgument`].
    /// Synthetic handles return exactly what the driver produced.
    pub fn read(&self, handle: HandleId, buf: &mut [u8]) -> FsResult<usize> {
        let handle_ref = self.handles.get(handle)?;
        let mut guard = handle_ref.lock();
        let h = &mut *guard;
        if !h.mode.readable() {
            return Err(FsError::PermissionDenied);
        }

        let n = match &mut h.kind {
            HandleKind::Data => {
                let n = {
                    let ns = self.ns.read();
                    let node = ns.nodes.get(h.node).map_err(|_| FsError::Stale)?;
                    let Payload::Data { bytes } = &node.payload else {
                        return Err(FsError::Stale);
                    };
                    storage::read_at(bytes, h.cursor, buf)
                };
                if let Ok(node) = self.ns.write().nodes.get_mut(h.node) {
                    node.touch_accessed();
                }
                n
            }
            HandleKind::Directory { entries, position } => {
                self.ensure_live(h.node)?;
                let Some(entry) = entries.get(*position) else {
                    return Ok(0);
                };
                let line = format!("{}\n", entry.name);
                if line.len() > buf.len() {
                    return Err(FsError::InvalidArgument);
                }
                buf[..line.len()].copy_from_slice(line.as_bytes());
                *position += 1;
                h.cursor = *position as u64;
                tracing::trace!(handle = %handle, "read directory entry");
                return Ok(line.len());
            }
            HandleKind::Synthetic { driver, state } => {
                self.ensure_live(h.node)?;
                // The cursor must be able to absorb a full read.
                h.cursor
                    .checked_add(buf.len() as u64)
                    .ok_or(FsError::InvalidArgument)?;
                let state = state.as_mut().ok_or(FsError::InvalidHandle)?;
                let n = driver.read(state, buf, h.cursor).map_err(|e| {
                    tracing::warn!(handle = %handle, node = %h.node, error = %e, "driver read failed");
                    FsError::Driver(e)
                })?;
                n.min(buf.len())
            }
        };

        h.cursor += n as u64;
        tracing::trace!(handle = %handle, bytes = n, cursor = h.cursor, "read");
        Ok(n)
    }

    /// Write at the handle's cursor and advance it by the amount written.
    /// Needs a handle opened for writing, whatever the node's mode bits now say.
    pub fn write(&self, handle: HandleId, data: &[u8]) -> FsResult<usize> {
        let handle_ref = self.handles.get(handle)?;
        let mut guard = handle_ref.lock();
        let h = &mut *guard;
        if !h.mode.writable() {
            return Err(FsError::PermissionDenied);
        }

        let n = match &mut h.kind {
            HandleKind::Data => {
                let mut ns = self.ns.write();
                let node = ns.nodes.get_mut(h.node).map_err(|_| FsError::Stale)?;
                let n = match &mut node.payload {
                    Payload::Data { bytes } => storage::write_at(
                        bytes,
                        h.cursor,
                        data,
                        self.config.limits.max_file_size,
                    )?,
                    _ => return Err(FsError::Stale),
                };
                node.touch_modified();
                n
            }
            HandleKind::Directory { .. } => return Err(FsError::IsADirectory),
            HandleKind::Synthetic { driver, state } => {
                self.ensure_live(h.node)?;
                h.cursor
                    .checked_add(data.len() as u64)
                    .ok_or(FsError::InvalidArgument)?;
                let state = state.as_mut().ok_or(FsError::InvalidHandle)?;
                let n = driver.write(state, data, h.cursor).map_err(|e| {
                    tracing::warn!(handle = %handle, node = %h.node, error = %e, "driver write failed");
                    FsError::Driver(e)
                })?;
                let n = n.min(data.len());
                let end = h.cursor + n as u64;
                let mut ns = self.ns.write();
                if let Ok(node) = ns.nodes.get_mut(h.node) {
                    node.advisory_size = node.advisory_size.max(end);
                    node.touch_modified();
                }
                n
            }
        };

        h.cursor += n as u64;
        let node = h.node;
        drop(guard);

        tracing::trace!(handle = %handle, bytes = n, "write");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Modified { node });
        #[cfg(not(feature = "events"))]
        let _ = node;
        Ok(n)
    }

    /// Move the handle's cursor. Directory handles only support rewinding
    /// with `SeekFrom::Start(0)`.
    pub fn seek(&self, handle: HandleId, pos: SeekFrom) -> FsResult<u64> {
        let handle_ref = self.handles.get(handle)?;
        let mut guard = handle_ref.lock();
        let h = &mut *guard;

        let end = match &mut h.kind {
            HandleKind::Directory { position, .. } => {
                if pos != SeekFrom::Start(0) {
                    return Err(FsError::InvalidArgument);
                }
                self.ensure_live(h.node)?;
                *position = 0;
                h.cursor = 0;
                return Ok(0);
            }
            HandleKind::Data => {
                let ns = self.ns.read();
                ns.nodes.get(h.node).map_err(|_| FsError::Stale)?.size()
            }
            HandleKind::Synthetic { driver, .. } => {
                let advisory = {
                    let ns = self.ns.read();
                    ns.nodes.get(h.node).map_err(|_| FsError::Stale)?.size()
                };
                match pos {
                    SeekFrom::End(_) => driver.size_hint(h.node).unwrap_or(advisory),
                    _ => advisory,
                }
            }
        };

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => h.cursor.checked_add_signed(delta),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
        };
        h.cursor = target.ok_or(FsError::InvalidArgument)?;
        Ok(h.cursor)
    }

    /// Next entry of a directory handle, or `None` when exhausted. Shares
    /// the cursor with [`Vfs::read`].
    pub fn read_dir(&self, handle: HandleId) -> FsResult<Option<DirEntry>> {
        let handle_ref = self.handles.get(handle)?;
        let mut guard = handle_ref.lock();
        let h = &mut *guard;
        let HandleKind::Directory { entries, position } = &mut h.kind else {
            return Err(FsError::NotADirectory);
        };
        self.ensure_live(h.node)?;

        let entry = entries.get(*position).cloned();
        if entry.is_some() {
            *position += 1;
            h.cursor = *position as u64;
        }
        Ok(entry)
    }

    pub fn fstat(&self, handle: HandleId) -> FsResult<Stat> {
        let handle_ref = self.handles.get(handle)?;
        let node = handle_ref.lock().node;
        let ns = self.ns.read();
        ns.nodes
            .get(node)
            .map(|n| n.stat())
            .map_err(|_| FsError::Stale)
    }

    /// Resize a data file through a handle opened for writing.
    pub fn truncate(&self, handle: HandleId, len: u64) -> FsResult<()> {
        let handle_ref = self.handles.get(handle)?;
        let guard = handle_ref.lock();
        if !guard.mode.writable() {
            return Err(FsError::PermissionDenied);
        }
        match guard.kind {
            HandleKind::Data => {}
            HandleKind::Directory { .. } => return Err(FsError::IsADirectory),
            HandleKind::Synthetic { .. } => return Err(FsError::InvalidArgument),
        }
        let node = guard.node;

        {
            let mut ns = self.ns.write();
            let target = ns.nodes.get_mut(node).map_err(|_| FsError::Stale)?;
            if let Payload::Data { bytes } = &mut target.payload {
                storage::truncate(bytes, len, self.config.limits.max_file_size)?;
            }
            target.touch_modified();
        }
        drop(guard);

        tracing::trace!(handle = %handle, len, "truncate");
        #[cfg(feature = "events")]
        self.emit_event(EventKind::Modified { node });
        Ok(())
    }

    /// Close a handle, running the driver's `close` for synthetic nodes.
    /// Works on stale handles too; closing twice is [`FsError::InvalidHandle`].
    pub fn close(&self, handle: HandleId) -> FsResult<()> {
        let handle_ref = self.handles.remove(handle)?;
        handle_ref.lock().release();
        tracing::trace!(handle = %handle, "closed handle");
        Ok(())
    }

    /// Close every handle owned by `session`. Returns how many were closed.
    pub fn close_session(&self, session: SessionId) -> usize {
        let mut closed = 0;
        for id in self.handles.ids_for_session(session) {
            if let Ok(handle_ref) = self.handles.remove(id) {
                handle_ref.lock().release();
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::debug!(session = session.0, closed, "closed session handles");
        }
        closed
    }

    // Event subscription operations
    #[cfg(feature = "events")]
    pub fn subscribe_events(&self, cb: Arc<dyn EventSink>) -> FsResult<SubscriptionId> {
        let id = SubscriptionId::new(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.event_subscriptions.lock().insert(id, cb);
        Ok(id)
    }

    #[cfg(feature = "events")]
    pub fn unsubscribe_events(&self, sub: SubscriptionId) -> FsResult<()> {
        if self.event_subscriptions.lock().remove(&sub).is_none() {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    // Statistics
    pub fn stats(&self) -> FsStats {
        let ns = self.ns.read();
        FsStats {
            nodes: ns.nodes.len(),
            open_handles: self.handles.len() as u32,
            mounts: ns.mounts.len() as u32,
            drivers: ns.drivers.len() as u32,
        }
    }

    // Sinks are called without any engine lock held.
    #[cfg(feature = "events")]
    fn emit_event(&self, event: EventKind) {
        if !self.config.track_events {
            return;
        }

        let sinks: Vec<Arc<dyn EventSink>> =
            self.event_subscriptions.lock().values().cloned().collect();
        for sink in sinks {
            sink.on_event(&event);
        }
    }
}
