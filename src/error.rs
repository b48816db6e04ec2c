//! Error type shared by every allocator operation.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while managing the arena.
///
/// Every failing operation leaves the allocator exactly as it was before the
/// call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// The host refused the initial bulk reservation.
  #[error("could not reserve an arena of {capacity} bytes from the host")]
  ArenaAcquisition { capacity: usize },

  /// The arena cannot even hold the header of its first block.
  #[error("arena capacity {capacity} is too small, at least {minimum} bytes are required")]
  CapacityTooSmall { capacity: usize, minimum: usize },

  /// Allocation requests must be for at least one byte.
  #[error("zero-sized allocation requested")]
  ZeroSize,

  /// No free block is large enough for the request.
  #[error("out of memory: requested {requested} bytes, largest free block is {largest_free} bytes")]
  OutOfMemory { requested: usize, largest_free: usize },

  /// The handle does not name a block that is currently in use.
  #[error("invalid handle for payload offset {offset}")]
  InvalidHandle { offset: usize },

  /// The allocator has been destroyed.
  #[error("allocator has been torn down")]
  TornDown,

  /// Internal metadata failed validation.
  #[error("allocator metadata corrupted: {0}")]
  Corrupted(String),
}
