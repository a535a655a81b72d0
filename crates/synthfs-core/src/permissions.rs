// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Owner/group/other permission model
//!
//! [`can_access`] is a pure function of its inputs. Policy switches such as
//! disabling enforcement or letting uid 0 bypass checks live in the engine,
//! not here.

use std::ops::BitOr;

use crate::config::SecurityPolicy;
use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::types::{CreateKind, NodeType, Stat, Subject};

/// Requested access, combinable with `|`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Access(u8);

impl Access {
    pub const NONE: Access = Access(0);
    pub const READ: Access = Access(0b0001);
    pub const WRITE: Access = Access(0b0010);
    pub const EXECUTE: Access = Access(0b0100);
    /// Entering a directory during a walk; needs the execute bit on a directory
    pub const TRAVERSE: Access = Access(0b1000);

    pub fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

const READ_BIT: u32 = 0o4;
const WRITE_BIT: u32 = 0o2;
const EXEC_BIT: u32 = 0o1;

/// Select the rwx triad that applies to `subject` for a node.
fn effective_bits(subject: &Subject, uid: u32, gid: u32, mode: u32) -> u32 {
    if subject.uid == uid {
        (mode >> 6) & 0o7
    } else if subject.in_group(gid) {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    }
}

/// Decide whether `subject` may perform `requested` on the node `stat`
/// describes.
///
/// Total over all inputs: unknown subjects simply fall into the "other"
/// triad, and asking to traverse something that is not a directory is a
/// denial rather than an error.
pub fn can_access(subject: &Subject, stat: &Stat, requested: Access) -> bool {
    check_bits(subject, stat.uid, stat.gid, stat.mode, stat.kind, requested)
}

pub(crate) fn check_bits(
    subject: &Subject,
    uid: u32,
    gid: u32,
    mode: u32,
    kind: NodeType,
    requested: Access,
) -> bool {
    let bits = effective_bits(subject, uid, gid, mode);

    if requested.contains(Access::READ) && bits & READ_BIT == 0 {
        return false;
    }
    if requested.contains(Access::WRITE) && bits & WRITE_BIT == 0 {
        return false;
    }
    if requested.contains(Access::EXECUTE) && bits & EXEC_BIT == 0 {
        return false;
    }
    if requested.contains(Access::TRAVERSE) && (kind != NodeType::Directory || bits & EXEC_BIT == 0)
    {
        return false;
    }
    true
}

/// How the engine gates one operation
#[derive(Clone, Copy, Debug)]
pub(crate) enum AccessCheck<'a> {
    /// Host-side installation; there is no subject to check
    Host,
    Subject {
        subject: &'a Subject,
        policy: &'a SecurityPolicy,
    },
}

impl AccessCheck<'_> {
    pub(crate) fn allows(&self, node: &Node, requested: Access) -> bool {
        match self {
            AccessCheck::Host => true,
            AccessCheck::Subject { subject, policy } => {
                if !policy.enforce_permissions {
                    return true;
                }
                if policy.root_bypass_permissions && subject.uid == 0 {
                    return true;
                }
                check_bits(subject, node.uid, node.gid, node.mode, node.node_type(), requested)
            }
        }
    }

    pub(crate) fn require(&self, node: &Node, requested: Access) -> FsResult<()> {
        if self.allows(node, requested) {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }
}

/// Permissions a new node actually receives under a parent directory.
///
/// Files drop any read/write bit the parent lacks, directories any
/// read/write/execute bit. Bits above the rwx triads pass through.
pub fn inherit_mode(requested: u32, parent_mode: u32, kind: CreateKind) -> u32 {
    let base = match kind {
        CreateKind::DataFile => 0o666,
        CreateKind::Directory => 0o777,
    };
    requested & (!base | (parent_mode & base))
}
