//! The backing byte region, reserved from the host once and returned once.

use std::{ptr::NonNull, slice};

use libc::{c_void, calloc, free};
use log::debug;

use crate::error::{Error, Result};

/// A fixed-size, zero-initialised region obtained from `calloc`.
///
/// The arena never grows or shrinks. It is returned to the host either by
/// [`Arena::release`] or when dropped.
pub struct Arena {
  base: NonNull<u8>,
  capacity: usize,
}

impl Arena {
  pub fn acquire(capacity: usize) -> Result<Self> {
    // SAFETY: calloc has no preconditions; a null result is handled below.
    let raw = unsafe { calloc(capacity, 1) } as *mut u8;

    let base = NonNull::new(raw).ok_or(Error::ArenaAcquisition { capacity })?;

    debug!("arena reserved: {} bytes at {:p}", capacity, base);

    Ok(Self { base, capacity })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  /// Translates a raw pointer into an arena offset, if it points inside.
  pub fn offset_of(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    let addr = ptr as usize;
    let base = self.base.as_ptr() as usize;

    if addr < base || addr >= base + self.capacity {
      return None;
    }

    Some(addr - base)
  }

  /// Callers must keep `offset + len` within the capacity.
  pub fn bytes(
    &self,
    offset: usize,
    len: usize,
  ) -> &[u8] {
    assert!(offset + len <= self.capacity);
    // SAFETY: the range is in bounds and the memory was zeroed by calloc.
    unsafe { slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
  }

  pub fn bytes_mut(
    &mut self,
    offset: usize,
    len: usize,
  ) -> &mut [u8] {
    assert!(offset + len <= self.capacity);
    // SAFETY: as in `bytes`; `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len) }
  }

  /// Returns the region to the host.
  pub fn release(self) {
    drop(self);
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    debug!("arena released: {} bytes at {:p}", self.capacity, self.base);
    // SAFETY: `base` came from calloc and is freed exactly once, here.
    unsafe { free(self.base.as_ptr() as *mut c_void) };
  }
}
