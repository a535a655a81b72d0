// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path resolution across the node table and mount table

use crate::error::{FsError, FsResult};
use crate::mount::MountTable;
use crate::node::NodeTable;
use crate::permissions::{Access, AccessCheck};
use crate::types::{MountPolicy, NodeId};

/// Split a `/`-separated path into components. Empty components from
/// leading, doubled or trailing separators are dropped.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Split a path into its parent components and final name.
pub(crate) fn split_parent(path: &str) -> FsResult<(Vec<&str>, &str)> {
    let mut components = split_path(path);
    let name = components.pop().ok_or(FsError::InvalidName)?;
    Ok((components, name))
}

/// A directory position reached by a walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    /// Node reported to callers. A union mount point reports itself; a
    /// replace mount point reports the end of its redirection chain.
    pub(crate) node: NodeId,
    /// Directories searched for child names, highest priority first
    pub(crate) layers: Vec<NodeId>,
    /// Reached through a replace mount; `..` does not climb out of it
    boundary: bool,
}

impl Resolved {
    fn plain(node: NodeId) -> Self {
        Self {
            node,
            layers: vec![node],
            boundary: false,
        }
    }
}

/// Resolves paths against one consistent view of the namespace. Borrowing
/// the tables for the walker's lifetime is what keeps a walk from seeing a
/// concurrent structural change.
pub(crate) struct Walker<'a> {
    nodes: &'a NodeTable,
    mounts: &'a MountTable,
    check: AccessCheck<'a>,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(nodes: &'a NodeTable, mounts: &'a MountTable, check: AccessCheck<'a>) -> Self {
        Self {
            nodes,
            mounts,
            check,
        }
    }

    /// Follow mounts on `node` until reaching a directory that is not itself
    /// mounted on.
    pub(crate) fn enter(&self, node: NodeId) -> FsResult<Resolved> {
        let mut budget = self.mounts.len();
        self.enter_bounded(node, &mut budget)
    }

    fn enter_bounded(&self, node: NodeId, budget: &mut usize) -> FsResult<Resolved> {
        let mut current = node;
        let mut boundary = false;
        loop {
            let Some(entry) = self.mounts.get(current) else {
                return Ok(Resolved {
                    node: current,
                    layers: vec![current],
                    boundary,
                });
            };
            // Each mount can be followed at most once per chain.
            if *budget == 0 {
                return Err(FsError::InvalidArgument);
            }
            *budget -= 1;

            match entry.policy {
                MountPolicy::Replace => {
                    current = entry.target_root;
                    boundary = true;
                }
                MountPolicy::Union => {
                    let overlay = self.enter_bounded(entry.target_root, budget)?;
                    let mut layers = overlay.layers;
                    layers.push(current);
                    return Ok(Resolved {
                        node: current,
                        layers,
                        boundary,
                    });
                }
            }
        }
    }

    /// Look `name` up in each layer in priority order.
    pub(crate) fn lookup(&self, at: &Resolved, name: &str) -> FsResult<NodeId> {
        for &layer in &at.layers {
            match self.nodes.lookup_child(layer, name) {
                Ok(child) => return Ok(child),
                Err(FsError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FsError::NotFound)
    }

    /// Resolve `components` starting at `start`.
    ///
    /// With `follow_final` unset, a mount on the node named by the last
    /// component is not followed, which is how mount points themselves are
    /// addressed. `visit` sees every component together with the node it
    /// resolved to.
    pub(crate) fn walk<S: AsRef<str>>(
        &self,
        start: NodeId,
        components: &[S],
        follow_final: bool,
        visit: &mut dyn FnMut(&str, NodeId),
    ) -> FsResult<Resolved> {
        self.nodes.get(start)?;
        let components: Vec<&str> = components
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| !c.is_empty())
            .collect();
        if components.is_empty() {
            return Ok(Resolved::plain(start));
        }

        let mut current = self.enter(start)?;
        let mut trail: Vec<Resolved> = Vec::new();

        for (i, &component) in components.iter().enumerate() {
            for &layer in &current.layers {
                let dir = self.nodes.get(layer)?;
                if !dir.is_dir() {
                    return Err(FsError::NotADirectory);
                }
                self.check.require(dir, Access::TRAVERSE)?;
            }

            match component {
                "." => {}
                ".." => {
                    if current.boundary {
                        // stays at the mount's target root
                    } else if let Some(previous) = trail.pop() {
                        current = previous;
                    } else if !self.mounts.is_target_root(current.node) {
                        if let Some(parent) = self.nodes.parent(current.node) {
                            current = self.enter(parent)?;
                        }
                    }
                }
                name => {
                    let child = self.lookup(&current, name)?;
                    let last = i + 1 == components.len();
                    let next = if last && !follow_final {
                        Resolved::plain(child)
                    } else {
                        self.enter(child)?
                    };
                    trail.push(std::mem::replace(&mut current, next));
                }
            }
            visit(component, current.node);
        }
        Ok(current)
    }
}
