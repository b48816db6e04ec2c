use arenalloc::{Allocator, DEFAULT_POOL_SIZE, HEADER_SIZE};

/// Prints every block of the ledger in address order.
fn print_ledger(
  label: &str,
  allocator: &Allocator,
) {
  println!("[{}]", label);
  for block in allocator.blocks() {
    println!(
      "  header @ {:>5}  payload {:>5} bytes  {}",
      block.offset,
      block.size,
      if block.is_free { "free" } else { "used" }
    );
  }
}

fn main() -> arenalloc::Result<()> {
  // A 2 KiB pool, one free block to start with.
  let mut allocator = Allocator::with_capacity(DEFAULT_POOL_SIZE)?;
  println!("header size = {} bytes", HEADER_SIZE);
  print_ledger("start", &allocator);

  // --------------------------------------------------------------------
  // 1) Three allocations carved off the front of the pool.
  // --------------------------------------------------------------------
  let first = allocator.allocate(200)?;
  let second = allocator.allocate(300)?;
  let third = allocator.allocate(100)?;
  print_ledger("after allocating 200, 300, 100", &allocator);

  // Payloads are not cleared; fill them before use.
  allocator.payload_mut(&first)?.fill(0);
  allocator.payload_mut(&second)?.fill(0);
  allocator.payload_mut(&third)?.fill(0);

  // --------------------------------------------------------------------
  // 2) Release in the middle first: neighbours are used, nothing merges.
  // --------------------------------------------------------------------
  allocator.release(second)?;
  print_ledger("after releasing the 300 byte block", &allocator);

  // --------------------------------------------------------------------
  // 3) Releasing the first block merges it with the freed second one.
  // --------------------------------------------------------------------
  allocator.release(first)?;
  print_ledger("after releasing the 200 byte block", &allocator);

  // --------------------------------------------------------------------
  // 4) The last release folds everything back into one block.
  // --------------------------------------------------------------------
  allocator.release(third)?;
  print_ledger("after releasing the 100 byte block", &allocator);

  // A second release of the same handle is refused.
  if let Err(err) = allocator.release(third) {
    println!("double release rejected: {}", err);
  }

  let stats = allocator.stats()?;
  println!(
    "blocks = {}, free bytes = {}, largest free = {}",
    stats.blocks, stats.free_bytes, stats.largest_free
  );

  allocator.destroy()
}
