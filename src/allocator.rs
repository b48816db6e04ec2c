use std::{
  collections::HashMap,
  sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, trace, warn};

use crate::{
  arena::Arena,
  block::{Block, BlockId, HEADER_SIZE, Ledger},
  config::Config,
  error::{Error, Result},
  index::SizeIndex,
  tree::UnbalancedTree,
};

/// Source of allocator identities, so a handle is only ever accepted by the
/// allocator that issued it.
static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

/// Lifecycle of an allocator. A value only exists once its arena is
/// reserved, so it starts out `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Ready,
  TornDown,
}

/// Proof of a live allocation.
///
/// Handles are plain values and may be copied, but only the copy used first
/// in [`Allocator::release`] is accepted: every allocation stamps a fresh
/// generation, so stale and repeated releases are rejected. Handles also
/// carry the identity of the issuing allocator and are refused elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
  owner: u64,
  offset: usize,
  size: usize,
  generation: u64,
}

impl Handle {
  /// Arena offset of the first payload byte.
  pub fn offset(&self) -> usize {
    self.offset
  }

  /// Payload bytes granted. May exceed the request by up to a header when
  /// the chosen block was too small to split.
  pub fn size(&self) -> usize {
    self.size
  }
}

/// Address-order view of one block, as returned by [`Allocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the header.
  pub offset: usize,
  /// Payload size, header excluded.
  pub size: usize,
  pub is_free: bool,
}

/// Occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
  pub capacity: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub used_blocks: usize,
  pub free_bytes: usize,
  pub used_bytes: usize,
  pub largest_free: usize,
}

#[derive(Debug, Clone, Copy)]
struct Live {
  block: BlockId,
  generation: u64,
}

/// Best-fit allocator over a single fixed arena.
///
/// Free blocks are found through the size index `I`; address neighbours are
/// found through the block ledger. Not thread-safe: every mutating call takes
/// `&mut self`, and the owned arena pointer keeps the type `!Send + !Sync`.
pub struct Allocator<I: SizeIndex = UnbalancedTree> {
  owner: u64,
  arena: Option<Arena>,
  ledger: Ledger,
  index: I,
  live: HashMap<usize, Live>,
  generation: u64,
}

impl Allocator<UnbalancedTree> {
  /// Reserves the arena described by `config`, indexed by an unbalanced tree.
  pub fn new(config: Config) -> Result<Self> {
    Self::with_index(config)
  }

  pub fn with_capacity(capacity: usize) -> Result<Self> {
    Self::new(Config::with_capacity(capacity))
  }
}

impl<I: SizeIndex> Allocator<I> {
  /// Reserves the arena described by `config` with a chosen index policy.
  pub fn with_index(config: Config) -> Result<Self> {
    let ledger = Ledger::new(config.capacity)?;
    let arena = Arena::acquire(config.capacity)?;

    let mut index = I::default();
    for (id, block) in ledger.iter() {
      index.insert(block.size, id);
    }

    debug!(
      "allocator ready: capacity {} bytes, header {} bytes",
      config.capacity, HEADER_SIZE
    );

    Ok(Self {
      owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
      arena: Some(arena),
      ledger,
      index,
      live: HashMap::new(),
      generation: 0,
    })
  }

  pub fn state(&self) -> State {
    match self.arena {
      Some(_) => State::Ready,
      None => State::TornDown,
    }
  }

  pub fn capacity(&self) -> usize {
    self.ledger.capacity()
  }

  fn ready(&self) -> Result<&Arena> {
    self.arena.as_ref().ok_or(Error::TornDown)
  }

  fn block(
    &self,
    id: BlockId,
  ) -> Result<&Block> {
    self
      .ledger
      .get(id)
      .ok_or_else(|| Error::Corrupted(format!("no block {:?}", id)))
  }

  fn unindex(
    &mut self,
    size: usize,
    id: BlockId,
  ) -> Result<()> {
    if !self.index.remove(size, id) {
      return Err(Error::Corrupted(format!(
        "free block {:?} of {} bytes missing from size index",
        id, size
      )));
    }
    Ok(())
  }

  /// Resolves a handle to its block, rejecting anything not currently used.
  fn live_block(
    &self,
    handle: &Handle,
  ) -> Result<BlockId> {
    if handle.owner != self.owner {
      return Err(Error::InvalidHandle {
        offset: handle.offset,
      });
    }

    self
      .live
      .get(&handle.offset)
      .filter(|live| live.generation == handle.generation)
      .map(|live| live.block)
      .ok_or(Error::InvalidHandle {
        offset: handle.offset,
      })
  }

  /// Hands out `size` bytes from the smallest free block that can hold them.
  ///
  /// The payload is not cleared. On failure nothing changes.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Handle> {
    self.ready()?;

    if size == 0 {
      warn!("rejected zero-sized allocation");
      return Err(Error::ZeroSize);
    }

    let Some((found, id)) = self.index.best_fit(size) else {
      let largest_free = self.index.largest().unwrap_or(0);
      warn!(
        "out of memory: requested {} bytes, largest free block {} bytes",
        size, largest_free
      );
      return Err(Error::OutOfMemory {
        requested: size,
        largest_free,
      });
    };

    self.unindex(found, id)?;

    if let Some(remainder) = self.ledger.split(id, size) {
      let remainder_size = self.block(remainder)?.size;
      self.index.insert(remainder_size, remainder);
    }

    let block = self
      .ledger
      .get_mut(id)
      .ok_or_else(|| Error::Corrupted(format!("no block {:?}", id)))?;
    block.is_free = false;

    let handle = Handle {
      owner: self.owner,
      offset: block.payload_offset(),
      size: block.size,
      generation: self.generation,
    };
    self.generation += 1;

    self.live.insert(
      handle.offset,
      Live {
        block: id,
        generation: handle.generation,
      },
    );

    trace!(
      "allocate({}) -> offset {}, granted {} bytes",
      size, handle.offset, handle.size
    );

    Ok(handle)
  }

  /// Returns a block to the free pool, merging it with free neighbours.
  pub fn release(
    &mut self,
    handle: Handle,
  ) -> Result<()> {
    self.ready()?;

    let id = match self.live_block(&handle) {
      Ok(id) => id,
      Err(err) => {
        warn!("release of invalid handle at offset {}", handle.offset);
        return Err(err);
      }
    };

    self.live.remove(&handle.offset);
    self.free_block(id)?;

    trace!("release(offset {}) done", handle.offset);

    Ok(())
  }

  /// Releases by payload pointer, as obtained from [`Allocator::as_ptr`].
  ///
  /// A null pointer is ignored. The pointer is mapped back to its header by
  /// the fixed header offset and must name a block that is currently used.
  pub fn release_ptr(
    &mut self,
    ptr: *mut u8,
  ) -> Result<()> {
    let arena = self.ready()?;

    if ptr.is_null() {
      return Ok(());
    }

    let offset = arena.offset_of(ptr).ok_or(Error::InvalidHandle {
      offset: ptr as usize,
    })?;

    let Some(live) = self.live.get(&offset).copied() else {
      warn!("release of untracked pointer {:p}", ptr);
      return Err(Error::InvalidHandle { offset });
    };

    let header = offset - HEADER_SIZE;
    let block = self.block(live.block)?;
    if block.offset != header {
      return Err(Error::Corrupted(format!(
        "live table maps offset {} to a block not headed at {}",
        offset, header
      )));
    }

    let handle = Handle {
      owner: self.owner,
      offset,
      size: block.size,
      generation: live.generation,
    };
    self.release(handle)
  }

  fn free_block(
    &mut self,
    id: BlockId,
  ) -> Result<()> {
    // Neighbours about to be swallowed leave the index with their old sizes.
    for (neighbour, size) in self.ledger.free_neighbours(id).into_iter().flatten() {
      self.unindex(size, neighbour)?;
    }

    self
      .ledger
      .get_mut(id)
      .ok_or_else(|| Error::Corrupted(format!("no block {:?}", id)))?
      .is_free = true;

    let survivor = self.ledger.coalesce(id);
    let size = self.block(survivor)?.size;
    self.index.insert(size, survivor);

    Ok(())
  }

  /// Raw pointer to the first payload byte.
  pub fn as_ptr(
    &self,
    handle: &Handle,
  ) -> Result<*mut u8> {
    let arena = self.ready()?;
    self.live_block(handle)?;

    Ok(arena.base().wrapping_add(handle.offset))
  }

  pub fn payload(
    &self,
    handle: &Handle,
  ) -> Result<&[u8]> {
    let arena = self.ready()?;
    let size = self.block(self.live_block(handle)?)?.size;

    Ok(arena.bytes(handle.offset, size))
  }

  pub fn payload_mut(
    &mut self,
    handle: &Handle,
  ) -> Result<&mut [u8]> {
    self.ready()?;
    let size = self.block(self.live_block(handle)?)?.size;

    let arena = self.arena.as_mut().ok_or(Error::TornDown)?;
    Ok(arena.bytes_mut(handle.offset, size))
  }

  /// Returns the arena to the host and forgets every block.
  ///
  /// Every later call, including a second `destroy`, fails with
  /// [`Error::TornDown`]; [`Allocator::blocks`] yields nothing.
  pub fn destroy(&mut self) -> Result<()> {
    let arena = self.arena.take().ok_or(Error::TornDown)?;

    debug!(
      "allocator torn down: {} bytes returned, {} live allocation(s) discarded",
      arena.capacity(),
      self.live.len()
    );

    arena.release();
    self.ledger.clear();
    self.index.clear();
    self.live.clear();

    Ok(())
  }

  /// Blocks in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.ledger.iter().map(|(_, block)| BlockInfo {
      offset: block.offset,
      size: block.size,
      is_free: block.is_free,
    })
  }

  pub fn stats(&self) -> Result<Stats> {
    self.ready()?;

    let mut stats = Stats {
      capacity: self.capacity(),
      largest_free: self.index.largest().unwrap_or(0),
      ..Stats::default()
    };

    for info in self.blocks() {
      stats.blocks += 1;
      if info.is_free {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
      } else {
        stats.used_blocks += 1;
        stats.used_bytes += info.size;
      }
    }

    Ok(stats)
  }

  /// Cross-checks ledger, size index and live table.
  pub fn validate(&self) -> Result<()> {
    self.ready()?;
    self.ledger.validate()?;

    let mut free = 0;
    let mut used = 0;

    for (id, block) in self.ledger.iter() {
      let indexed = self.index.contains(block.size, id);

      if block.is_free {
        free += 1;
        if !indexed {
          return Err(Error::Corrupted(format!(
            "free block at {} is not indexed",
            block.offset
          )));
        }
      } else {
        used += 1;
        if indexed {
          return Err(Error::Corrupted(format!(
            "used block at {} is indexed",
            block.offset
          )));
        }
        match self.live.get(&block.payload_offset()) {
          Some(live) if live.block == id => {}
          _ => {
            return Err(Error::Corrupted(format!(
              "used block at {} is not tracked as live",
              block.offset
            )));
          }
        }
      }
    }

    if self.index.len() != free {
      return Err(Error::Corrupted(format!(
        "size index holds {} entries for {} free blocks",
        self.index.len(),
        free
      )));
    }

    if self.live.len() != used {
      return Err(Error::Corrupted(format!(
        "{} live handles for {} used blocks",
        self.live.len(),
        used
      )));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::index::OrderedIndex;

  fn layout(allocator: &Allocator<impl SizeIndex>) -> Vec<(usize, bool)> {
    allocator.blocks().map(|b| (b.size, b.is_free)).collect()
  }

  #[test]
  fn test_new_single_free_block() {
    let allocator = Allocator::with_capacity(2048).unwrap();

    assert_eq!(allocator.state(), State::Ready);
    assert_eq!(layout(&allocator), vec![(2048 - HEADER_SIZE, true)]);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_capacity_too_small() {
    assert!(matches!(
      Allocator::with_capacity(HEADER_SIZE),
      Err(Error::CapacityTooSmall { .. })
    ));
  }

  #[test]
  fn test_arena_acquisition_failure() {
    assert!(matches!(
      Allocator::with_capacity(usize::MAX),
      Err(Error::ArenaAcquisition { capacity: usize::MAX })
    ));
  }

  #[test]
  fn test_allocate_splits_and_tracks() {
    let mut allocator = Allocator::with_capacity(2048).unwrap();

    let a = allocator.allocate(200).unwrap();
    let b = allocator.allocate(300).unwrap();

    assert_eq!(a.offset(), HEADER_SIZE);
    assert_eq!(b.offset(), 2 * HEADER_SIZE + 200);
    assert_eq!(
      layout(&allocator),
      vec![
        (200, false),
        (300, false),
        (2048 - 3 * HEADER_SIZE - 500, true)
      ]
    );
    allocator.validate().unwrap();
  }

  #[test]
  fn test_zero_size_rejected() {
    let mut allocator = Allocator::with_capacity(256).unwrap();

    assert_eq!(allocator.allocate(0), Err(Error::ZeroSize));
  }

  #[test]
  fn test_best_fit_selects_150() {
    let mut allocator = Allocator::with_capacity(4096).unwrap();

    // Carve free holes of 500, 150 and 100 bytes separated by used guards.
    let big = allocator.allocate(500).unwrap();
    let _g1 = allocator.allocate(8).unwrap();
    let mid = allocator.allocate(150).unwrap();
    let _g2 = allocator.allocate(8).unwrap();
    let small = allocator.allocate(100).unwrap();
    let _g3 = allocator.allocate(8).unwrap();
    let rest = allocator.stats().unwrap().largest_free;
    let _tail = allocator.allocate(rest).unwrap();

    allocator.release(big).unwrap();
    allocator.release(mid).unwrap();
    allocator.release(small).unwrap();

    let chosen = allocator.allocate(120).unwrap();

    assert_eq!(chosen.offset(), mid.offset());
    assert!(chosen.size() >= 120 && chosen.size() <= 150);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_no_split_grants_whole_block() {
    let mut allocator = Allocator::with_capacity(HEADER_SIZE + 100).unwrap();

    let handle = allocator.allocate(100 - HEADER_SIZE).unwrap();

    assert_eq!(handle.size(), 100);
    assert_eq!(allocator.stats().unwrap().blocks, 1);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_coalesce_three_way() {
    let mut allocator = Allocator::with_capacity(2048).unwrap();

    let a = allocator.allocate(100).unwrap();
    let b = allocator.allocate(200).unwrap();
    let c = allocator.allocate(300).unwrap();
    let _d = allocator.allocate(50).unwrap();

    allocator.release(a).unwrap();
    allocator.release(c).unwrap();
    allocator.release(b).unwrap();

    let first = allocator.blocks().next().unwrap();
    assert_eq!(first.size, 600 + 2 * HEADER_SIZE);
    assert!(first.is_free);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_exhaustion_leaves_state_unchanged() {
    let mut allocator = Allocator::with_capacity(HEADER_SIZE + 200).unwrap();

    let _only = allocator.allocate(200).unwrap();
    let before = layout(&allocator);

    assert_eq!(
      allocator.allocate(1),
      Err(Error::OutOfMemory {
        requested: 1,
        largest_free: 0,
      })
    );
    assert_eq!(layout(&allocator), before);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_double_release_rejected() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let handle = allocator.allocate(64).unwrap();

    allocator.release(handle).unwrap();

    assert_eq!(
      allocator.release(handle),
      Err(Error::InvalidHandle {
        offset: handle.offset()
      })
    );
    allocator.validate().unwrap();
  }

  #[test]
  fn test_stale_handle_after_reuse() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let old = allocator.allocate(64).unwrap();
    allocator.release(old).unwrap();

    let new = allocator.allocate(64).unwrap();
    assert_eq!(new.offset(), old.offset());

    assert!(allocator.release(old).is_err());
    assert!(allocator.payload(&old).is_err());
    allocator.release(new).unwrap();
  }

  #[test]
  fn test_release_ptr() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let handle = allocator.allocate(32).unwrap();
    let ptr = allocator.as_ptr(&handle).unwrap();

    allocator.release_ptr(std::ptr::null_mut()).unwrap();
    allocator.release_ptr(ptr).unwrap();

    assert_eq!(
      allocator.release_ptr(ptr),
      Err(Error::InvalidHandle {
        offset: handle.offset()
      })
    );
    assert_eq!(layout(&allocator), vec![(1024 - HEADER_SIZE, true)]);
  }

  #[test]
  fn test_payload_write_read() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(16).unwrap();

    allocator.payload_mut(&a).unwrap().fill(0xAB);
    allocator.payload_mut(&b).unwrap().fill(0xCD);

    assert!(allocator.payload(&a).unwrap().iter().all(|&x| x == 0xAB));
    assert!(allocator.payload(&b).unwrap().iter().all(|&x| x == 0xCD));
    assert_eq!(allocator.payload(&a).unwrap().len(), 16);
  }

  #[test]
  fn test_destroy() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let handle = allocator.allocate(64).unwrap();

    allocator.destroy().unwrap();

    assert_eq!(allocator.state(), State::TornDown);
    assert_eq!(allocator.allocate(1), Err(Error::TornDown));
    assert_eq!(allocator.release(handle), Err(Error::TornDown));
    assert_eq!(allocator.release_ptr(std::ptr::null_mut()), Err(Error::TornDown));
    assert_eq!(allocator.destroy(), Err(Error::TornDown));
    assert_eq!(allocator.stats(), Err(Error::TornDown));
    assert_eq!(allocator.blocks().count(), 0);
    assert_eq!(allocator.payload(&handle), Err(Error::TornDown));
  }

  #[test]
  fn test_handle_from_other_allocator_rejected() {
    let mut a = Allocator::with_capacity(1024).unwrap();
    let mut b = Allocator::with_capacity(1024).unwrap();

    let from_a = a.allocate(64).unwrap();
    let from_b = b.allocate(64).unwrap();
    assert_eq!(from_a.offset(), from_b.offset());

    assert_eq!(
      b.release(from_a),
      Err(Error::InvalidHandle {
        offset: from_a.offset()
      })
    );
    assert!(b.payload(&from_a).is_err());

    // B's own allocation is untouched.
    assert_eq!(
      layout(&b),
      vec![(64, false), (1024 - 2 * HEADER_SIZE - 64, true)]
    );
    b.validate().unwrap();
    b.release(from_b).unwrap();
    a.release(from_a).unwrap();
  }

  #[test]
  fn test_ordered_index_policy() {
    let mut allocator = Allocator::<OrderedIndex>::with_index(Config::default()).unwrap();

    let a = allocator.allocate(200).unwrap();
    let b = allocator.allocate(300).unwrap();
    let c = allocator.allocate(100).unwrap();

    allocator.release(b).unwrap();
    allocator.release(a).unwrap();
    allocator.release(c).unwrap();

    assert_eq!(layout(&allocator), vec![(2048 - HEADER_SIZE, true)]);
    allocator.validate().unwrap();
  }

  #[test]
  fn test_stats() {
    let mut allocator = Allocator::with_capacity(1024).unwrap();
    let _a = allocator.allocate(100).unwrap();

    assert_eq!(
      allocator.stats(),
      Ok(Stats {
        capacity: 1024,
        blocks: 2,
        free_blocks: 1,
        used_blocks: 1,
        free_bytes: 1024 - 2 * HEADER_SIZE - 100,
        used_bytes: 100,
        largest_free: 1024 - 2 * HEADER_SIZE - 100,
      })
    );
  }
}
