// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// Top-level engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub security: SecurityPolicy,
    pub limits: FsLimits,
    /// Mask the permissions of new nodes with those of their parent directory
    pub inherit_permissions: bool,
    /// Deliver change events to subscribers
    pub track_events: bool,
}

/// Permission enforcement policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub enforce_permissions: bool,
    /// Subjects with uid 0 pass every permission check
    pub root_bypass_permissions: bool,
    pub root_uid: u32,
    pub root_gid: u32,
    pub root_mode: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enforce_permissions: true,
            root_bypass_permissions: false,
            root_uid: 0,
            root_gid: 0,
            root_mode: 0o755,
        }
    }
}

/// Resource limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    pub max_open_handles: u32,
    pub max_name_len: usize,
    /// Largest size a data file may grow to, in bytes
    pub max_file_size: u64,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_handles: 4096,
            max_name_len: 255,
            max_file_size: 1 << 30,
        }
    }
}

impl FsConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_json_bytes(&bytes)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.limits.max_open_handles == 0
            || self.limits.max_name_len == 0
            || self.limits.max_file_size == 0
        {
            return Err(FsError::InvalidArgument);
        }
        if self.security.root_mode & !0o7777 != 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            security: SecurityPolicy::default(),
            limits: FsLimits::default(),
            inherit_permissions: true,
            track_events: true,
        }
    }
}
