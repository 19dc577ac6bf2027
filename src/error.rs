//! Structural errors. Per-key outcomes are reported through masks instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashmapError {
    /// Rejected before any mutation took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocating the slot pool (or the parallel device) failed.
    #[error("failed to allocate {slots} slots ({bytes} bytes)")]
    ResourceExhausted { slots: usize, bytes: usize },

    /// The parallel device's worker pool could not be started.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A previous rehash failed; the instance must not be used again.
    #[error("hashmap is unusable after a failed allocation")]
    Poisoned,
}

impl HashmapError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HashmapError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = core::result::Result<T, HashmapError>;

/// Checks that `buf` holds a whole number of `width`-byte records and returns
/// how many.
pub(crate) fn record_count(what: &str, buf: &[u8], width: usize) -> Result<usize> {
    if width == 0 {
        return if buf.is_empty() {
            Ok(0)
        } else {
            Err(HashmapError::invalid(format!(
                "{what} buffer is non-empty but the record width is zero"
            )))
        };
    }
    if buf.len() % width != 0 {
        return Err(HashmapError::invalid(format!(
            "{what} buffer has {} bytes, not a multiple of {width}",
            buf.len()
        )));
    }
    Ok(buf.len() / width)
}

/// Checks that `buf` holds exactly `n` records of `width` bytes.
pub(crate) fn expect_bytes(what: &str, buf: &[u8], n: usize, width: usize) -> Result<()> {
    let expected = n.checked_mul(width).ok_or_else(|| {
        HashmapError::invalid(format!("{what} size overflows for {n} records of {width} bytes"))
    })?;
    if buf.len() != expected {
        return Err(HashmapError::invalid(format!(
            "{what} buffer has {} bytes, expected {expected} ({n} x {width})",
            buf.len()
        )));
    }
    Ok(())
}

pub(crate) fn expect_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(HashmapError::invalid(format!(
            "{what} has {actual} elements, expected {expected}"
        )));
    }
    Ok(())
}
