//! Mount-time configuration.

use crate::error::{HgfsError, HgfsResult};

/// Number of request slots when the mount does not ask for another size.
pub const DEFAULT_POOL_SIZE: usize = 4;
/// Request ids must fit the id space the pool hands out.
pub const MAX_POOL_SIZE: usize = 255;

/// Options accepted by [`SuperInfo::mount`](crate::SuperInfo::mount).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountOptions {
    /// Number of preallocated requests. Bounds the number of operations in
    /// flight against the host.
    pub pool_size: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl MountOptions {
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn validate(&self) -> HgfsResult<()> {
        if (1..=MAX_POOL_SIZE).contains(&self.pool_size) {
            Ok(())
        } else {
            log::error!("hgfs: invalid pool size {}", self.pool_size);
            Err(HgfsError::InvalidArgument)
        }
    }
}
