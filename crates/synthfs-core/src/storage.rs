// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte storage for data-file payloads

use crate::error::{FsError, FsResult};

/// Resize `content` to `new_len`, refusing growth past `max_len` or beyond
/// what the allocator will hand out.
fn resize_within(content: &mut Vec<u8>, new_len: u64, max_len: u64) -> FsResult<()> {
    if new_len > max_len {
        return Err(FsError::NoSpace);
    }
    let new_len = usize::try_from(new_len).map_err(|_| FsError::NoSpace)?;
    if new_len > content.len() {
        content
            .try_reserve_exact(new_len - content.len())
            .map_err(|_| FsError::NoSpace)?;
    }
    content.resize(new_len, 0);
    Ok(())
}

/// Copy from `content` at `offset` into `buf`. Reading at or past the end
/// yields 0.
pub(crate) fn read_at(content: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = match usize::try_from(offset) {
        Ok(start) if start < content.len() => start,
        _ => return 0,
    };
    let end = std::cmp::min(start.saturating_add(buf.len()), content.len());
    let n = end - start;
    buf[..n].copy_from_slice(&content[start..end]);
    n
}

/// Write `data` at `offset`, zero-filling any gap past the current end.
/// The file may not grow past `max_len` bytes.
pub(crate) fn write_at(
    content: &mut Vec<u8>,
    offset: u64,
    data: &[u8],
    max_len: u64,
) -> FsResult<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let end = offset
        .checked_add(data.len() as u64)
        .ok_or(FsError::InvalidArgument)?;
    if end > content.len() as u64 {
        resize_within(content, end, max_len)?;
    }

    // Both bounds fit in usize now that content covers them.
    let start = offset as usize;
    content[start..start + data.len()].copy_from_slice(data);
    Ok(data.len())
}

pub(crate) fn truncate(content: &mut Vec<u8>, new_len: u64, max_len: u64) -> FsResult<()> {
    resize_within(content, new_len, max_len)
}
