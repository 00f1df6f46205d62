//! Pool sizing

use serde::Deserialize;

use crate::error::{Error, Result};

/// Pool configuration.
///
/// `batch_size` drives everything else: the buffer holds `2 × batch_size`
/// tcerts and the filler refills once occupancy drops below `batch_size`.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl PoolConfig {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Buffer capacity, fixed for the lifetime of the pool.
    pub fn capacity(&self) -> usize {
        self.batch_size * 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
