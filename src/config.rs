//! Construction parameters.

/// Arena size used when nothing else is asked for: 2 KiB.
pub const DEFAULT_POOL_SIZE: usize = 2048;

/// Allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Total arena size in bytes, headers included.
  pub capacity: usize,
}

impl Config {
  pub const fn with_capacity(capacity: usize) -> Self {
    Self { capacity }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_POOL_SIZE,
    }
  }
}
