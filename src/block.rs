use std::mem;

use log::trace;

use crate::error::{Error, Result};

const WORD: usize = mem::size_of::<usize>();

/// Bytes reserved in front of every payload: a size word, a status flag and
/// two link words, padded so the next header after a word-multiple payload
/// starts on a word boundary.
pub const HEADER_SIZE: usize = word_padded(3 * WORD + mem::size_of::<bool>());

/// Smallest multiple of the machine word that is at least `len`.
const fn word_padded(len: usize) -> usize {
  len.div_ceil(WORD) * WORD
}

/// Stable name of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

/// Header of one region of the arena.
///
/// `offset` is where the header starts; the payload follows at
/// `offset + HEADER_SIZE` and spans `size` bytes.
#[derive(Debug, Clone)]
pub(crate) struct Block {
  pub offset: usize,
  pub size: usize,
  pub is_free: bool,
  pub next: Option<BlockId>,
  pub prev: Option<BlockId>,
}

impl Block {
  pub fn new(
    offset: usize,
    size: usize,
    is_free: bool,
  ) -> Self {
    Self {
      offset,
      size,
      is_free,
      next: None,
      prev: None,
    }
  }

  pub fn payload_offset(&self) -> usize {
    self.offset + HEADER_SIZE
  }

  /// One past the last byte of the payload.
  pub fn end(&self) -> usize {
    self.payload_offset() + self.size
  }
}

/// Address-ordered, doubly linked partition of the arena into blocks.
///
/// Headers live in a side table instead of inside the arena; slots of
/// excised blocks are recycled.
#[derive(Debug)]
pub(crate) struct Ledger {
  slots: Vec<Option<Block>>,
  vacant: Vec<BlockId>,
  head: Option<BlockId>,
  capacity: usize,
}

impl Ledger {
  /// Lays a single free block over the whole arena.
  pub fn new(capacity: usize) -> Result<Self> {
    if capacity <= HEADER_SIZE {
      return Err(Error::CapacityTooSmall {
        capacity,
        minimum: HEADER_SIZE + 1,
      });
    }

    Ok(Self {
      slots: vec![Some(Block::new(0, capacity - HEADER_SIZE, true))],
      vacant: Vec::new(),
      head: Some(BlockId(0)),
      capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn first(&self) -> Option<BlockId> {
    self.head
  }

  pub fn get(
    &self,
    id: BlockId,
  ) -> Option<&Block> {
    self.slots.get(id.0).and_then(Option::as_ref)
  }

  pub fn get_mut(
    &mut self,
    id: BlockId,
  ) -> Option<&mut Block> {
    self.slots.get_mut(id.0).and_then(Option::as_mut)
  }

  fn block(
    &self,
    id: BlockId,
  ) -> &Block {
    match self.get(id) {
      Some(block) => block,
      None => unreachable!("dangling block link {:?}", id),
    }
  }

  fn block_mut(
    &mut self,
    id: BlockId,
  ) -> &mut Block {
    match self.get_mut(id) {
      Some(block) => block,
      None => unreachable!("dangling block link {:?}", id),
    }
  }

  /// Number of live blocks.
  pub fn len(&self) -> usize {
    self.slots.len() - self.vacant.len()
  }

  /// Walks the blocks in ascending address order.
  pub fn iter(&self) -> Iter<'_> {
    Iter {
      ledger: self,
      current: self.first(),
    }
  }

  /// Forgets every block. The ledger stays empty until dropped.
  pub fn clear(&mut self) {
    self.slots.clear();
    self.vacant.clear();
    self.head = None;
  }

  fn store(
    &mut self,
    block: Block,
  ) -> BlockId {
    match self.vacant.pop() {
      Some(id) => {
        self.slots[id.0] = Some(block);
        id
      }
      None => {
        self.slots.push(Some(block));
        BlockId(self.slots.len() - 1)
      }
    }
  }

  fn excise(
    &mut self,
    id: BlockId,
  ) {
    self.slots[id.0] = None;
    self.vacant.push(id);
  }

  /// Carves `requested` payload bytes off the front of `id`.
  ///
  /// Returns the free remainder block, or `None` when the surplus cannot hold
  /// a header plus at least one byte and the whole block is kept.
  pub fn split(
    &mut self,
    id: BlockId,
    requested: usize,
  ) -> Option<BlockId> {
    let (offset, size, next) = {
      let block = self.block(id);
      (block.offset, block.size, block.next)
    };

    if size <= requested + HEADER_SIZE {
      return None;
    }

    let mut remainder = Block::new(
      offset + HEADER_SIZE + requested,
      size - requested - HEADER_SIZE,
      true,
    );
    remainder.prev = Some(id);
    remainder.next = next;

    let remainder_id = self.store(remainder);

    if let Some(next) = next {
      self.block_mut(next).prev = Some(remainder_id);
    }

    let block = self.block_mut(id);
    block.size = requested;
    block.next = Some(remainder_id);

    trace!(
      "split block at {}: kept {} bytes, remainder {:?} of {} bytes",
      offset,
      requested,
      remainder_id,
      size - requested - HEADER_SIZE
    );

    Some(remainder_id)
  }

  /// Free address neighbours of `id` with their current sizes, previous
  /// first. These are exactly the blocks [`Ledger::coalesce`] will swallow.
  pub fn free_neighbours(
    &self,
    id: BlockId,
  ) -> [Option<(BlockId, usize)>; 2] {
    let block = self.block(id);

    let free = |link: Option<BlockId>| {
      link
        .map(|other| (other, self.block(other)))
        .filter(|(_, other)| other.is_free)
        .map(|(other, block)| (other, block.size))
    };

    [free(block.prev), free(block.next)]
  }

  /// Merges `id` with its free address neighbours and returns the block that
  /// now spans every merged extent.
  ///
  /// The next neighbour is folded in first; the previous neighbour then
  /// absorbs the already grown block.
  pub fn coalesce(
    &mut self,
    id: BlockId,
  ) -> BlockId {
    let mut survivor = id;
    let mut merged = 0;

    if let Some(next) = self.block(id).next {
      let neighbour = self.block(next);

      if neighbour.is_free {
        let (size, after) = (neighbour.size, neighbour.next);

        let block = self.block_mut(id);
        block.size += size + HEADER_SIZE;
        block.next = after;

        if let Some(after) = after {
          self.block_mut(after).prev = Some(id);
        }

        self.excise(next);
        merged += 1;
      }
    }

    if let Some(prev) = self.block(id).prev {
      if self.block(prev).is_free {
        let (size, after) = {
          let block = self.block(id);
          (block.size, block.next)
        };

        let block = self.block_mut(prev);
        block.size += size + HEADER_SIZE;
        block.next = after;

        if let Some(after) = after {
          self.block_mut(after).prev = Some(prev);
        }

        self.excise(id);
        survivor = prev;
        merged += 1;
      }
    }

    if merged > 0 {
      trace!(
        "coalesced {} neighbour(s) into block at {}, now {} bytes",
        merged,
        self.block(survivor).offset,
        self.block(survivor).size
      );
    }

    survivor
  }

  /// Checks that the blocks tile the arena and that links are symmetric.
  pub fn validate(&self) -> Result<()> {
    let mut expected_offset = 0;
    let mut prev: Option<BlockId> = None;
    let mut seen = 0;
    let mut current = self.head;

    while let Some(id) = current {
      let block = self
        .get(id)
        .ok_or_else(|| Error::Corrupted(format!("link to vacant slot {:?}", id)))?;

      if block.offset != expected_offset {
        return Err(Error::Corrupted(format!(
          "block {:?} starts at {}, expected {}",
          id, block.offset, expected_offset
        )));
      }

      if block.prev != prev {
        return Err(Error::Corrupted(format!(
          "block {:?} prev is {:?}, expected {:?}",
          id, block.prev, prev
        )));
      }

      seen += 1;
      if seen > self.len() {
        return Err(Error::Corrupted("cycle in block links".into()));
      }

      expected_offset = block.end();
      prev = Some(id);
      current = block.next;
    }

    if expected_offset != self.capacity {
      return Err(Error::Corrupted(format!(
        "blocks cover {} bytes of a {} byte arena",
        expected_offset, self.capacity
      )));
    }

    if seen != self.len() {
      return Err(Error::Corrupted(format!(
        "{} blocks reachable, {} stored",
        seen,
        self.len()
      )));
    }

    Ok(())
  }
}

/// Address-order iterator over the ledger.
pub(crate) struct Iter<'a> {
  ledger: &'a Ledger,
  current: Option<BlockId>,
}

impl<'a> Iterator for Iter<'a> {
  type Item = (BlockId, &'a Block);

  fn next(&mut self) -> Option<Self::Item> {
    let id = self.current?;
    let block = self.ledger.get(id)?;
    self.current = block.next;
    Some((id, block))
  }
}
