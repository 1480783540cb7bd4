//! Mixed-radix addressing over a combination space
//!
//! A global index is read as a mixed-radix number whose digits are the local
//! indices into each pool. The first pool is the most significant digit, so
//! it varies slowest when the global index counts up.

use thiserror::Error;
use tracing::debug;

/// Errors from index arithmetic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadixError {
    #[error("Combination count overflows u64")]
    Overflow,

    #[error("Pool at position {position} has size 0")]
    ZeroRadix { position: usize },

    #[error("Index {index} is outside the combination space of {total}")]
    OutOfRange { index: u64, total: u64 },

    #[error("Expected {expected} digits, got {actual}")]
    DigitCount { expected: usize, actual: usize },
}

/// Number of points in the space spanned by `pool_sizes`
///
/// An empty list spans a single point; any zero-size pool empties the space.
pub fn total_combinations(pool_sizes: &[u64]) -> Result<u64, RadixError> {
    pool_sizes
        .iter()
        .try_fold(1u64, |acc, &size| acc.checked_mul(size).ok_or(RadixError::Overflow))
}

/// Split `global_index` into one local index per pool, aligned with `pool_sizes`
pub fn decompose(global_index: u64, pool_sizes: &[u64]) -> Result<Vec<u64>, RadixError> {
    if let Some(position) = pool_sizes.iter().position(|&s| s == 0) {
        return Err(RadixError::ZeroRadix { position });
    }

    let total = total_combinations(pool_sizes)?;
    if global_index >= total {
        return Err(RadixError::OutOfRange {
            index: global_index,
            total,
        });
    }

    let mut remaining = global_index;
    let mut local = Vec::with_capacity(pool_sizes.len());
    for &size in pool_sizes.iter().rev() {
        local.push(remaining % size);
        remaining /= size;
    }
    local.reverse();

    debug!(global_index, ?pool_sizes, ?local, "decompose: mapped");
    Ok(local)
}

/// Inverse of [`decompose`]
pub fn compose(local: &[u64], pool_sizes: &[u64]) -> Result<u64, RadixError> {
    if local.len() != pool_sizes.len() {
        return Err(RadixError::DigitCount {
            expected: pool_sizes.len(),
            actual: local.len(),
        });
    }

    let mut index = 0u64;
    for (position, (&digit, &size)) in local.iter().zip(pool_sizes).enumerate() {
        if size == 0 {
            return Err(RadixError::ZeroRadix { position });
        }
        if digit >= size {
            return Err(RadixError::OutOfRange {
                index: digit,
                total: size,
            });
        }
        index = index
            .checked_mul(size)
            .and_then(|i| i.checked_add(digit))
            .ok_or(RadixError::Overflow)?;
    }
    Ok(index)
}
