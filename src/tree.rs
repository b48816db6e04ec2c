use crate::{block::BlockId, index::SizeIndex};

#[derive(Debug, Clone, Copy)]
enum Side {
  Left,
  Right,
}

#[derive(Debug)]
struct Node {
  size: usize,
  block: BlockId,
  left: Option<usize>,
  right: Option<usize>,
}

/// Binary search tree over free blocks with no rebalancing.
///
/// Every node keeps `left < node <= right` by size: equal sizes always go to
/// the right subtree. Nodes live in a slab and all walks are loops, so a
/// degenerate (list-shaped) tree costs time but never stack depth.
#[derive(Debug, Default)]
pub struct UnbalancedTree {
  nodes: Vec<Option<Node>>,
  vacant: Vec<usize>,
  root: Option<usize>,
  len: usize,
}

impl UnbalancedTree {
  fn node(
    &self,
    at: usize,
  ) -> &Node {
    match &self.nodes[at] {
      Some(node) => node,
      None => unreachable!("tree link to vacant node {}", at),
    }
  }

  fn node_mut(
    &mut self,
    at: usize,
  ) -> &mut Node {
    match &mut self.nodes[at] {
      Some(node) => node,
      None => unreachable!("tree link to vacant node {}", at),
    }
  }

  fn alloc_node(
    &mut self,
    size: usize,
    block: BlockId,
  ) -> usize {
    let node = Node {
      size,
      block,
      left: None,
      right: None,
    };

    match self.vacant.pop() {
      Some(at) => {
        self.nodes[at] = Some(node);
        at
      }
      None => {
        self.nodes.push(Some(node));
        self.nodes.len() - 1
      }
    }
  }

  fn free_node(
    &mut self,
    at: usize,
  ) {
    self.nodes[at] = None;
    self.vacant.push(at);
  }

  fn set_link(
    &mut self,
    parent: Option<(usize, Side)>,
    child: Option<usize>,
  ) {
    match parent {
      None => self.root = child,
      Some((at, Side::Left)) => self.node_mut(at).left = child,
      Some((at, Side::Right)) => self.node_mut(at).right = child,
    }
  }

  /// Locates the node holding exactly `(size, id)` and the link pointing at it.
  fn find(
    &self,
    size: usize,
    id: BlockId,
  ) -> Option<(Option<(usize, Side)>, usize)> {
    let mut parent = None;
    let mut current = self.root;

    while let Some(at) = current {
      let node = self.node(at);

      if size < node.size {
        parent = Some((at, Side::Left));
        current = node.left;
      } else if size == node.size && node.block == id {
        return Some((parent, at));
      } else {
        parent = Some((at, Side::Right));
        current = node.right;
      }
    }

    None
  }

  /// Longest root-to-leaf path, counted in nodes.
  pub fn height(&self) -> usize {
    let mut height = 0;
    let mut stack: Vec<(usize, usize)> = self.root.map(|at| (at, 1)).into_iter().collect();

    while let Some((at, depth)) = stack.pop() {
      height = height.max(depth);
      let node = self.node(at);
      stack.extend(node.left.map(|child| (child, depth + 1)));
      stack.extend(node.right.map(|child| (child, depth + 1)));
    }

    height
  }
}

impl SizeIndex for UnbalancedTree {
  fn insert(
    &mut self,
    size: usize,
    id: BlockId,
  ) {
    let fresh = self.alloc_node(size, id);
    self.len += 1;

    let mut parent = None;
    let mut current = self.root;

    while let Some(at) = current {
      let node = self.node(at);

      if size < node.size {
        parent = Some((at, Side::Left));
        current = node.left;
      } else {
        parent = Some((at, Side::Right));
        current = node.right;
      }
    }

    self.set_link(parent, Some(fresh));
  }

  fn best_fit(
    &self,
    size: usize,
  ) -> Option<(usize, BlockId)> {
    let mut best: Option<(usize, BlockId)> = None;
    let mut current = self.root;

    while let Some(at) = current {
      let node = self.node(at);

      if node.size >= size {
        // Everything on the left is strictly smaller than this candidate.
        if best.is_none_or(|(best_size, _)| node.size < best_size) {
          best = Some((node.size, node.block));
        }
        current = node.left;
      } else {
        current = node.right;
      }
    }

    best
  }

  fn remove(
    &mut self,
    size: usize,
    id: BlockId,
  ) -> bool {
    let Some((parent, at)) = self.find(size, id) else {
      return false;
    };

    let (left, right) = {
      let node = self.node(at);
      (node.left, node.right)
    };

    match (left, right) {
      (None, child) | (child, None) => {
        self.set_link(parent, child);
        self.free_node(at);
      }
      (Some(_), Some(right)) => {
        // Promote the in-order successor: leftmost node of the right subtree.
        let mut successor_parent = (at, Side::Right);
        let mut successor = right;

        while let Some(left) = self.node(successor).left {
          successor_parent = (successor, Side::Left);
          successor = left;
        }

        let (successor_size, successor_block, successor_right) = {
          let node = self.node(successor);
          (node.size, node.block, node.right)
        };

        self.set_link(Some(successor_parent), successor_right);
        self.free_node(successor);

        let node = self.node_mut(at);
        node.size = successor_size;
        node.block = successor_block;
      }
    }

    self.len -= 1;
    true
  }

  fn contains(
    &self,
    size: usize,
    id: BlockId,
  ) -> bool {
    self.find(size, id).is_some()
  }

  fn len(&self) -> usize {
    self.len
  }

  fn largest(&self) -> Option<usize> {
    let mut current = self.root?;

    while let Some(right) = self.node(current).right {
      current = right;
    }

    Some(self.node(current).size)
  }

  fn entries(&self) -> Vec<(usize, BlockId)> {
    let mut entries = Vec::with_capacity(self.len);
    let mut stack = Vec::new();
    let mut current = self.root;

    loop {
      while let Some(at) = current {
        stack.push(at);
        current = self.node(at).left;
      }

      let Some(at) = stack.pop() else {
        break;
      };

      let node = self.node(at);
      entries.push((node.size, node.block));
      current = node.right;
    }

    entries
  }

  fn clear(&mut self) {
    self.nodes.clear();
    self.vacant.clear();
    self.root = None;
    self.len = 0;
  }
}
