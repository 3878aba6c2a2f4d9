//! Free-space preflight for the destination volume.

use std::io;
use std::path::Path;

use crate::retry::TransferError;

/// Source of free-space figures for a directory's volume.
pub trait FreeSpace: Send + Sync {
    fn available(&self, dir: &Path) -> io::Result<u64>;
}

/// Asks the OS (statvfs / GetDiskFreeSpaceEx) via `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeSpace;

impl FreeSpace for VolumeSpace {
    fn available(&self, dir: &Path) -> io::Result<u64> {
        fs2::available_space(dir)
    }
}

/// Bytes required for `remote_size` with `margin` headroom (1.2 = 20%).
pub fn required_space(remote_size: u64, margin: f64) -> u64 {
    let required = (remote_size as f64 * margin.max(1.0)).ceil();
    if required >= u64::MAX as f64 {
        u64::MAX
    } else {
        required as u64
    }
}

/// Fail with `InsufficientSpace` when the volume holding `dir` cannot take
/// `remote_size` plus headroom. A failed free-space query skips the check.
pub fn check(
    space: &dyn FreeSpace,
    dir: &Path,
    remote_size: u64,
    margin: f64,
) -> Result<(), TransferError> {
    let required = required_space(remote_size, margin);
    match space.available(dir) {
        Ok(available) if available < required => Err(TransferError::InsufficientSpace {
            required,
            available,
        }),
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "free-space query failed, skipping preflight: {}", e);
            Ok(())
        }
    }
}
