//! # arenalloc - A Best-Fit Arena Allocator
//!
//! This crate provides a **best-fit allocator** over a single fixed-size byte
//! arena. The arena is reserved from the host once (`calloc`) and returned
//! once; everything in between is served from it.
//!
//! ## Overview
//!
//! ```text
//!   Arena (capacity bytes):
//!
//!   ┌────────┬──────────┬────────┬──────────────┬────────┬───────────────┐
//!   │ header │ payload  │ header │   payload    │ header │   payload     │
//!   │  used  │  200 B   │  free  │    300 B     │  used  │    rest       │
//!   └────────┴──────────┴────────┴──────────────┴────────┴───────────────┘
//!        ▲ ◄──────────── next / prev (address order) ──────────► ▲
//!        └─────────────────────── Block Ledger ──────────────────┘
//!
//!   Size Index (free blocks only, keyed by payload size):
//!
//!                 [300]
//!                /     \
//!            [120]     [812]
//! ```
//!
//! Two structures cooperate:
//!
//! - the **block ledger** partitions the arena into blocks in
//!   address order, with no gaps;
//! - the **size index** ([`SizeIndex`]) holds exactly the free blocks and
//!   answers "smallest free block of at least N bytes".
//!
//! ## Crate Structure
//!
//! ```text
//!   arenalloc
//!   ├── arena      - Host-backed byte region
//!   ├── block      - Block headers and the address-ordered ledger
//!   ├── index      - SizeIndex policy trait, OrderedIndex
//!   ├── tree       - UnbalancedTree, the default policy
//!   ├── allocator  - Allocator facade, handles, stats
//!   ├── config     - Construction parameters
//!   └── error      - Error and Result
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use arenalloc::Allocator;
//!
//! fn main() -> arenalloc::Result<()> {
//!     let mut allocator = Allocator::with_capacity(2048)?;
//!
//!     let handle = allocator.allocate(200)?;
//!     allocator.payload_mut(&handle)?.fill(0);
//!
//!     allocator.release(handle)?;
//!
//!     // Releasing twice is caught instead of corrupting the ledger.
//!     assert!(allocator.release(handle).is_err());
//!
//!     allocator.destroy()
//! }
//! ```
//!
//! ## How It Works
//!
//! Allocation asks the size index for the best fit, takes the block out of
//! the index and splits it when the surplus can hold another header plus at
//! least one byte:
//!
//! ```text
//!   Before:  ┌────────┬───────────────────────────────────────┐
//!            │ header │             free, 900 B               │
//!            └────────┴───────────────────────────────────────┘
//!
//!   allocate(200):
//!
//!   After:   ┌────────┬──────────┬────────┬───────────────────┐
//!            │ header │ used 200 │ header │ free, 900-200-H   │
//!            └────────┴──────────┴────────┴───────────────────┘
//!                     ▲                   (back into the index)
//!                     └── handle
//! ```
//!
//! Release marks the block free and merges it with free address neighbours
//! before putting the result back into the index:
//!
//! ```text
//!   ┌──────┬──────┬──────┐         ┌────────────────────────┐
//!   │ free │ used │ free │  ────►  │   one free block:      │
//!   │  A   │  B   │  C   │ release │   A + B + C + 2 * H    │
//!   └──────┴──────┴──────┘    B    └────────────────────────┘
//! ```
//!
//! ## Index Policies
//!
//! - [`UnbalancedTree`]: plain binary search tree, the default. Cheap, but a
//!   monotone sequence of free sizes degrades it to a list.
//! - [`OrderedIndex`]: ordered set keyed by `(size, block)`, logarithmic in
//!   every case.
//!
//! ```rust
//! use arenalloc::{Allocator, Config, OrderedIndex};
//!
//! let allocator = Allocator::<OrderedIndex>::with_index(Config::default()).unwrap();
//! assert_eq!(allocator.capacity(), 2048);
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Fixed arena**: never grows or shrinks
//! - **Header alignment only**: payloads are not aligned beyond the header
//!   layout
//!
//! ## Logging
//!
//! Diagnostics go through the `log` facade: `debug` for arena lifecycle,
//! `trace` for every allocate, split, release and coalesce, `warn` for
//! rejected calls. Install any logger to see them.

mod allocator;
mod arena;
mod block;
mod config;
mod error;
mod index;
mod tree;

pub use allocator::{Allocator, BlockInfo, Handle, State, Stats};
pub use block::{BlockId, HEADER_SIZE};
pub use config::{Config, DEFAULT_POOL_SIZE};
pub use error::{Error, Result};
pub use index::{OrderedIndex, SizeIndex};
pub use tree::UnbalancedTree;
