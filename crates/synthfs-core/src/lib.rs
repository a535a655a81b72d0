// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SynthFS Core - in-memory synthetic namespace engine
//!
//! A namespace of directories, data files and driver-backed synthetic files,
//! addressed by path walks and accessed through open handles. Namespaces can
//! be grafted onto each other with replace or union mounts, and every
//! operation is gated by owner/group/other permission bits evaluated for the
//! subject the caller supplies.

pub mod config;
pub mod driver;
pub mod error;
mod handle;
mod mount;
pub mod node;
pub mod permissions;
mod storage;
pub mod types;
pub mod vfs;
pub mod walk;


#[cfg(test)]
mod test_engine;

pub use config::{FsConfig, FsLimits, SecurityPolicy};
pub use driver::{Driver, SessionState};
pub use error::{DriverError, DriverResult, FsError, FsResult};
pub use node::Node;
pub use permissions::{can_access, inherit_mode, Access};
pub use types::*;
pub use vfs::Vfs;
pub use walk::split_path;

pub use std::io::SeekFrom;
