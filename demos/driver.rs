use tagalloc::{FreeListAllocator, OVERHEAD, program_break};

/// Prints the current program break.
/// The allocator extends it with `sbrk` in fixed increments; watch it move.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn main() {
  env_logger::init();

  let mut allocator = FreeListAllocator::new();
  let mut mismatches = 0;

  print_program_break("start");

  // --------------------------------------------------------------------
  // 1) Allocate 16, 24, ..., 1592 bytes without releasing anything.
  //    Every block must start right where the previous one ends.
  // --------------------------------------------------------------------
  let mut previous: Option<*mut u8> = None;

  for i in 2..200 {
    let ptr = allocator.allocate(i << 3);

    if ptr.is_null() {
      println!("allocate({}) failed", i << 3);
      return;
    }

    if let Some(previous) = previous {
      let size = unsafe { allocator.usable_size(previous) };
      let expected = previous.wrapping_add(size + OVERHEAD);

      if ptr != expected {
        println!(
          "prev: {:?}, prev size: {}, block: {:?} size: {}",
          previous,
          size,
          ptr,
          unsafe { allocator.usable_size(ptr) }
        );
        mismatches += 1;
      }
    }

    previous = Some(ptr);
  }

  print_program_break("after contiguous allocations");

  // --------------------------------------------------------------------
  // 2) Allocate, release and allocate again: the freed block comes back.
  // --------------------------------------------------------------------
  for i in (2..200).rev() {
    let ptr1 = allocator.allocate(i << 3);
    unsafe { allocator.release(ptr1) };
    let ptr2 = allocator.allocate(i << 3);
    unsafe { allocator.release(ptr2) };

    if ptr1 != ptr2 {
      println!("ptr1: {:?}, ptr2: {:?}", ptr1, ptr2);
      mismatches += 1;
    }
  }

  print_program_break("after reuse");

  if let Err(violation) = allocator.verify() {
    println!("heap is corrupt: {}", violation);
    mismatches += 1;
  }

  println!(
    "\n{} blocks, {} free, {} bytes of heap, {} mismatches",
    allocator.blocks().count(),
    allocator.free_blocks().count(),
    allocator.heap_size(),
    mismatches
  );
}
