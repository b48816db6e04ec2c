//! Size-keyed lookup over the free blocks.
//!
//! The allocator is generic over [`SizeIndex`] so the search structure is a
//! policy: [`UnbalancedTree`](crate::UnbalancedTree) is a plain binary search
//! tree whose height depends on the insertion order, [`OrderedIndex`] keeps a
//! balanced ordered set and never degrades.

use std::collections::BTreeSet;

use crate::block::BlockId;

/// Index entries are `(size, block)` pairs; the size is the block's payload
/// size at insertion time and stays valid while the block sits in the index.
pub trait SizeIndex: Default {
  /// Adds a free block.
  fn insert(
    &mut self,
    size: usize,
    id: BlockId,
  );

  /// The free block with the smallest size that is at least `size`.
  fn best_fit(
    &self,
    size: usize,
  ) -> Option<(usize, BlockId)>;

  /// Removes exactly this entry. Returns `false` if it was not present.
  fn remove(
    &mut self,
    size: usize,
    id: BlockId,
  ) -> bool;

  fn contains(
    &self,
    size: usize,
    id: BlockId,
  ) -> bool;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The largest indexed size, if any.
  fn largest(&self) -> Option<usize>;

  /// All entries in ascending size order.
  fn entries(&self) -> Vec<(usize, BlockId)>;

  /// Drops every entry.
  fn clear(&mut self);
}

/// Ordered multi-map from size to free block, backed by a `BTreeSet`.
///
/// Ties on size are broken by block id, so every entry is unique.
#[derive(Debug, Default)]
pub struct OrderedIndex {
  set: BTreeSet<(usize, BlockId)>,
}

impl SizeIndex for OrderedIndex {
  fn insert(
    &mut self,
    size: usize,
    id: BlockId,
  ) {
    self.set.insert((size, id));
  }

  fn best_fit(
    &self,
    size: usize,
  ) -> Option<(usize, BlockId)> {
    self.set.range((size, BlockId(0))..).next().copied()
  }

  fn remove(
    &mut self,
    size: usize,
    id: BlockId,
  ) -> bool {
    self.set.remove(&(size, id))
  }

  fn contains(
    &self,
    size: usize,
    id: BlockId,
  ) -> bool {
    self.set.contains(&(size, id))
  }

  fn len(&self) -> usize {
    self.set.len()
  }

  fn largest(&self) -> Option<usize> {
    self.set.last().map(|&(size, _)| size)
  }

  fn entries(&self) -> Vec<(usize, BlockId)> {
    self.set.iter().copied().collect()
  }

  fn clear(&mut self) {
    self.set.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_best_fit_smallest_sufficient() {
    let mut index = OrderedIndex::default();
    index.insert(500, BlockId(0));
    index.insert(150, BlockId(1));
    index.insert(100, BlockId(2));

    assert_eq!(index.best_fit(120), Some((150, BlockId(1))));
    assert_eq!(index.best_fit(100), Some((100, BlockId(2))));
    assert_eq!(index.best_fit(501), None);
    assert_eq!(index.largest(), Some(500));
  }

  #[test]
  fn test_duplicates_removed_exactly() {
    let mut index = OrderedIndex::default();
    index.insert(64, BlockId(3));
    index.insert(64, BlockId(7));

    assert!(index.remove(64, BlockId(7)));
    assert!(!index.remove(64, BlockId(7)));
    assert!(index.contains(64, BlockId(3)));
    assert_eq!(index.len(), 1);
  }
}
