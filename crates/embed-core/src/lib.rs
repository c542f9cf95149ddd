//! Shared foundations for the embedkit crates.
//!
//! This crate holds the pieces every other component leans on:
//! - [`fnv1a`] and friends: the 32-bit FNV-1a hash used for vocabulary words,
//!   header checksums and parameter-buffer fingerprints.
//! - [`zeroed`] and [`reserve_pow2`]: fallible allocation with overflow-checked
//!   size arithmetic. Allocation failure is always reported as [`AllocError`],
//!   never as a panic or abort.
//! - [`format`]: the checksummed binary container used to persist
//!   vocabularies, corpora, models and embeddings.

use std::mem::size_of;

use thiserror::Error;

pub mod format;

/// FNV-1a offset basis (32-bit).
pub const FNV_OFFSET: u32 = 2_166_136_261;

/// FNV-1a prime (32-bit).
pub const FNV_PRIME: u32 = 16_777_619;

/// Feed `bytes` into a running FNV-1a state.
#[inline]
pub fn fnv1a_update(mut hash: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        hash = (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 32-bit FNV-1a hash of a byte string.
#[inline]
pub fn fnv1a(bytes: &[u8]) -> u32 {
    fnv1a_update(FNV_OFFSET, bytes)
}

/// Hash a word the way the vocabulary index does.
#[inline]
pub fn hash_word(word: &str) -> u32 {
    fnv1a(word.as_bytes())
}

/// Content hash of a float buffer, taken over its little-endian bytes.
///
/// Two buffers hash equal iff (barring collisions) they are bit-identical,
/// which is what save/load round-trip checks want.
pub fn hash_f32s(values: &[f32]) -> u32 {
    values
        .iter()
        .fold(FNV_OFFSET, |h, v| fnv1a_update(h, &v.to_le_bytes()))
}

/// Errors from fallible allocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("allocation of {len} elements of {size} bytes overflows the address space")]
    Overflow { len: usize, size: usize },
    #[error("out of memory reserving {len} elements")]
    OutOfMemory { len: usize },
}

/// Multiply two element counts, rejecting overflow.
///
/// Used for `rows * cols` shapes before anything is allocated.
#[inline]
pub fn checked_len(rows: usize, cols: usize) -> Result<usize, AllocError> {
    rows.checked_mul(cols).ok_or(AllocError::Overflow {
        len: rows,
        size: cols,
    })
}

/// Reject element counts whose byte size would not fit the address space.
fn check_bytes<T>(len: usize) -> Result<(), AllocError> {
    let size = size_of::<T>();
    match len.checked_mul(size) {
        Some(bytes) if bytes <= isize::MAX as usize => Ok(()),
        _ => Err(AllocError::Overflow { len, size }),
    }
}

/// Allocate a vector of `len` default (zero) values without aborting on OOM.
pub fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, AllocError> {
    check_bytes::<T>(len)?;
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| AllocError::OutOfMemory { len })?;
    v.resize(len, T::default());
    Ok(v)
}

/// Capacity to grow to so that at least `needed` elements fit.
///
/// Growth is 4x the current capacity at a time, rounded up to a power of two.
pub fn next_capacity(current: usize, needed: usize) -> Result<usize, AllocError> {
    let target = current
        .checked_mul(4)
        .ok_or(AllocError::Overflow {
            len: current,
            size: 4,
        })?
        .max(needed)
        .max(1);
    target
        .checked_next_power_of_two()
        .ok_or(AllocError::Overflow {
            len: target,
            size: 1,
        })
}

/// Make room for `additional` more elements, growing by the power-of-two policy.
///
/// Does nothing when the spare capacity already suffices. Existing contents
/// are preserved; on failure the vector is left untouched.
pub fn reserve_pow2<T>(v: &mut Vec<T>, additional: usize) -> Result<(), AllocError> {
    let needed = v.len().checked_add(additional).ok_or(AllocError::Overflow {
        len: v.len(),
        size: additional,
    })?;
    if needed <= v.capacity() {
        return Ok(());
    }
    let cap = next_capacity(v.capacity(), needed)?;
    check_bytes::<T>(cap)?;
    v.try_reserve_exact(cap - v.len())
        .map_err(|_| AllocError::OutOfMemory { len: cap })
}
