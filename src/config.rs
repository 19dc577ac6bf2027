//! Construction parameters and the device selector.

use crate::error::{HashmapError, Result};
use core::fmt;
use core::str::FromStr;

/// Which backend executes the batched operations.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Device {
    /// Single-threaded, processes keys in batch order.
    #[default]
    Sequential,
    /// One logical worker per key, dispatched on a rayon pool.
    Parallel,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Sequential => f.write_str("sequential"),
            Device::Parallel => f.write_str("parallel"),
        }
    }
}

impl FromStr for Device {
    type Err = HashmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "cpu" => Ok(Device::Sequential),
            "parallel" | "gpu" => Ok(Device::Parallel),
            other => Err(HashmapError::invalid(format!("unsupported device: {other:?}"))),
        }
    }
}

pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.75;

/// Largest total slot count; slot indices must fit a [`Handle`](crate::Handle).
pub(crate) const MAX_SLOTS: usize = 1 << 31;

#[derive(Clone, Debug, PartialEq)]
pub struct HashmapConfig {
    pub initial_buckets: usize,
    pub dsize_key: usize,
    pub dsize_value: usize,
    pub device: Device,
    /// Growth is triggered once `len` would exceed `buckets * max_load_factor`.
    pub max_load_factor: f32,
    /// Worker threads for [`Device::Parallel`]; `None` uses rayon's global pool.
    pub threads: Option<usize>,
}

impl HashmapConfig {
    pub fn new(initial_buckets: usize, dsize_key: usize, dsize_value: usize) -> Self {
        Self {
            initial_buckets,
            dsize_key,
            dsize_value,
            device: Device::default(),
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            threads: None,
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn max_load_factor(mut self, factor: f32) -> Self {
        self.max_load_factor = factor;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_buckets == 0 {
            return Err(HashmapError::invalid("initial bucket count must be positive"));
        }
        if self.bucket_count() > MAX_SLOTS {
            return Err(HashmapError::invalid(format!(
                "initial bucket count {} exceeds {MAX_SLOTS}",
                self.initial_buckets
            )));
        }
        if self.dsize_key == 0 {
            return Err(HashmapError::invalid("dsize_key must be positive"));
        }
        if !(self.max_load_factor > 0.0 && self.max_load_factor <= 1.0) {
            return Err(HashmapError::invalid(format!(
                "max_load_factor {} is outside (0, 1]",
                self.max_load_factor
            )));
        }
        if self.threads == Some(0) {
            return Err(HashmapError::invalid("thread count must be positive"));
        }
        Ok(())
    }

    /// Bucket count actually allocated: the next power of two.
    pub(crate) fn bucket_count(&self) -> usize {
        self.initial_buckets
            .checked_next_power_of_two()
            .unwrap_or(usize::MAX)
    }
}
