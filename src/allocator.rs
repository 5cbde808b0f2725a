use std::ptr::{self, NonNull};

use crate::{
  HeapError,
  block::{self, Block, MIN_BLOCK, OVERHEAD, Tag},
  free_list::FreeList,
  heap::{HEAP_INCREMENT, Heap},
  source::{HeapSource, Sbrk},
};

/// Explicit free-list allocator with boundary-tag coalescing.
///
/// All state lives in this value: independent allocators manage independent
/// heaps. It is single-threaded; share it across threads only behind your own
/// lock.
#[derive(Debug)]
pub struct FreeListAllocator<S: HeapSource = Sbrk> {
  pub(crate) heap: Heap<S>,
  pub(crate) free: FreeList,
  pub(crate) first: Option<Block>,
  pub(crate) last: Option<Block>,
}

impl FreeListAllocator<Sbrk> {
  /// An allocator growing the process program break.
  pub fn new() -> Self {
    Self::with_source(Sbrk)
  }
}

impl Default for FreeListAllocator<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: HeapSource> FreeListAllocator<S> {
  pub fn with_source(source: S) -> Self {
    Self::with_increment(source, HEAP_INCREMENT)
  }

  /// Uses `increment` bytes for bootstrap and every growth step.
  ///
  /// # Panics
  ///
  /// If `increment` is zero or not a multiple of 8.
  pub fn with_increment(
    source: S,
    increment: usize,
  ) -> Self {
    Self {
      heap: Heap::new(source, increment),
      free: FreeList::default(),
      first: None,
      last: None,
    }
  }

  /// Allocates at least `size` bytes, 8-byte aligned.
  ///
  /// Returns a null pointer if the heap cannot grow enough.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(ptr) => ptr.as_ptr(),
      Err(_) => ptr::null_mut(),
    }
  }

  /// Like [`allocate`](Self::allocate), reporting why the heap could not
  /// satisfy the request.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    self.heap.bootstrap()?;

    let result = match block::request_size(size) {
      Some(usable) => match self.free.first_fit(self.heap.region(), usable) {
        Some(found) => Ok(self.take(found, usable)),
        None => self.carve(usable),
      },
      None => Err(HeapError::Refused { requested: size }),
    };

    match &result {
      Ok(ptr) => log::trace!("allocate({}) -> {:?}", size, ptr),
      Err(err) => log::warn!("allocate({}) failed: {}", size, err),
    }

    result
  }

  /// Hands out a block found on the free list, splitting off the tail when
  /// it can stand as a block of its own.
  fn take(
    &mut self,
    found: Block,
    usable: usize,
  ) -> NonNull<u8> {
    let region = self.heap.region_mut();
    self.free.remove(region, found);

    let total = block::framed(region.tag(found).size());
    let needed = block::framed(usable);

    if total - needed >= MIN_BLOCK {
      let rest = Block::at(found.header() + needed);

      region.set_tags(found, Tag::used(usable));
      region.set_tags(rest, Tag::free(total - needed - OVERHEAD));
      self.free.insert(region, rest);

      if self.last == Some(found) {
        self.last = Some(rest);
      }

      log::debug!(
        "split {:?}: kept {} bytes, {} bytes left free",
        found,
        usable,
        total - needed - OVERHEAD
      );
    }

    region.address(found.payload())
  }

  /// Carves a new block from the untouched tail, growing the heap as needed.
  fn carve(
    &mut self,
    usable: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let at = match self.last {
      Some(last) => self.heap.region().right_neighbour(last).header(),
      None => 0,
    };

    let end = usable
      .checked_add(OVERHEAD)
      .and_then(|framed| at.checked_add(framed))
      .ok_or(HeapError::Refused { requested: usable })?;

    while end > self.heap.region().end() {
      self.heap.grow(usable)?;
    }

    let block = Block::at(at);
    let region = self.heap.region_mut();
    region.set_tags(block, Tag::used(usable));

    if self.first.is_none() {
      self.first = Some(block);
    }
    self.last = Some(block);

    Ok(region.address(block.payload()))
  }

  /// Releases a block, merging it with any free neighbour.
  ///
  /// A null pointer is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or have been returned by this allocator and not
  /// released since. Anything else corrupts the heap.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };

    let region = self.heap.region_mut();
    let block = Block::from_payload(region.offset_of(ptr));

    debug_assert!(!region.tag(block).is_free(), "double release of {ptr:?}");
    debug_assert_eq!(
      region.tag(block),
      region.footer_tag(block),
      "released block {ptr:?} is corrupt"
    );

    let left = (self.first != Some(block))
      .then(|| region.left_neighbour(block))
      .filter(|&left| region.tag(left).is_free());

    let right = (self.last != Some(block))
      .then(|| region.right_neighbour(block))
      .filter(|&right| region.tag(right).is_free());

    let size = region.tag(block).size();

    let merged = match (left, right) {
      (Some(left), Some(right)) => {
        self.free.remove(region, right);
        self.free.remove(region, left);

        if self.last == Some(right) {
          self.last = Some(left);
        }

        let merged = region.tag(left).size() + size + region.tag(right).size() + 2 * OVERHEAD;
        region.set_tags(left, Tag::used(merged));
        left
      },
      (Some(left), None) => {
        self.free.remove(region, left);

        if self.last == Some(block) {
          self.last = Some(left);
        }

        let merged = region.tag(left).size() + size + OVERHEAD;
        region.set_tags(left, Tag::used(merged));
        left
      },
      (None, Some(right)) => {
        self.free.remove(region, right);

        if self.last == Some(right) {
          self.last = Some(block);
        }

        let merged = size + region.tag(right).size() + OVERHEAD;
        region.set_tags(block, Tag::used(merged));
        block
      },
      (None, None) => block,
    };

    self.free.insert(region, merged);

    log::trace!(
      "release({:?}) -> free block {:?} of {} bytes",
      ptr,
      merged,
      region.tag(merged).size()
    );
  }

  /// Usable payload size of a live allocation.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation of this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *const u8,
  ) -> usize {
    let Some(ptr) = NonNull::new(ptr as *mut u8) else {
      return 0;
    };

    let region = self.heap.region();
    region.tag(Block::from_payload(region.offset_of(ptr))).size()
  }

  /// Bytes obtained from the source so far.
  pub fn heap_size(&self) -> usize {
    self.heap.region().end()
  }

  pub fn source(&self) -> &S {
    self.heap.source()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    block::{FOOTER_SIZE, HEADER_SIZE, MIN_PAYLOAD},
    source::Arena,
  };

  use test_log::test;

  fn allocator(capacity: usize) -> FreeListAllocator<Arena> {
    FreeListAllocator::with_source(Arena::new(capacity))
  }

  fn offset(
    allocator: &FreeListAllocator<Arena>,
    ptr: *mut u8,
  ) -> usize {
    allocator.heap.region().offset_of(NonNull::new(ptr).unwrap())
  }

  #[test]
  fn test_first_allocation_bootstraps_heap() {
    let mut allocator = allocator(4096);

    assert_eq!(allocator.heap_size(), 0);

    let ptr = allocator.allocate(1);

    assert!(!ptr.is_null());
    assert_eq!(allocator.heap_size(), HEAP_INCREMENT);
    assert_eq!(offset(&allocator, ptr), HEADER_SIZE);
    assert_eq!(allocator.first, Some(Block::at(0)));
    assert_eq!(allocator.last, Some(Block::at(0)));
    assert_eq!(unsafe { allocator.usable_size(ptr) }, MIN_PAYLOAD);
  }

  #[test]
  fn test_refused_bootstrap_fails_every_allocation() {
    let mut allocator = allocator(HEAP_INCREMENT / 2);

    assert!(allocator.allocate(8).is_null());
    assert_eq!(allocator.try_allocate(8), Err(HeapError::Unusable));
  }

  #[test]
  fn test_growth_refusal_does_not_poison_heap() {
    let mut allocator = allocator(2 * HEAP_INCREMENT);

    assert_eq!(
      allocator.try_allocate(4 * HEAP_INCREMENT),
      Err(HeapError::Refused { requested: 4 * HEAP_INCREMENT })
    );
    assert_eq!(allocator.heap_size(), 2 * HEAP_INCREMENT);
    assert_eq!(allocator.first, None);

    assert!(!allocator.allocate(1500).is_null());
  }

  #[test]
  fn test_oversized_request_fails() {
    let mut allocator = allocator(HEAP_INCREMENT);

    for size in usize::MAX - 7..=usize::MAX {
      assert!(allocator.allocate(size).is_null(), "allocate({size})");
      assert_eq!(
        allocator.try_allocate(size),
        Err(HeapError::Refused { requested: size })
      );
    }

    assert_eq!(allocator.heap_size(), HEAP_INCREMENT);
    assert!(!allocator.allocate(16).is_null());
  }

  #[test]
  fn test_carve_grows_in_increments() {
    let mut allocator = allocator(8 * HEAP_INCREMENT);

    let ptr = allocator.allocate(3000);

    assert!(!ptr.is_null());
    assert_eq!(allocator.heap_size(), 3 * HEAP_INCREMENT);
    assert_eq!(unsafe { allocator.usable_size(ptr) }, 3000);
  }

  #[test]
  fn test_split_leaves_free_remainder() {
    let mut allocator = allocator(4 * HEAP_INCREMENT);

    let big = allocator.allocate(200);
    let guard = allocator.allocate(16);
    unsafe { allocator.release(big) };

    let small = allocator.allocate(40);

    assert_eq!(small, big);
    assert_eq!(unsafe { allocator.usable_size(small) }, 40);

    let rest = allocator.free.head().unwrap();
    let region = allocator.heap.region();

    assert_eq!(rest.header(), offset(&allocator, small) - HEADER_SIZE + 40 + OVERHEAD);
    assert_eq!(region.tag(rest), Tag::free(200 - 40 - OVERHEAD));
    assert_eq!(region.footer_tag(rest), Tag::free(200 - 40 - OVERHEAD));

    unsafe { allocator.release(guard) };
  }

  #[test]
  fn test_leftover_below_minimum_block_stays_attached() {
    let mut allocator = allocator(4 * HEAP_INCREMENT);

    let block = allocator.allocate(64);
    let _guard = allocator.allocate(16);
    unsafe { allocator.release(block) };

    // 64 - 40 leaves 24 framed bytes, below the 32-byte minimum block.
    let reused = allocator.allocate(40);

    assert_eq!(reused, block);
    assert_eq!(unsafe { allocator.usable_size(reused) }, 64);
    assert_eq!(allocator.free.head(), None);

    // 64 - 32 leaves exactly one minimum block.
    unsafe { allocator.release(reused) };
    let reused = allocator.allocate(32);

    assert_eq!(unsafe { allocator.usable_size(reused) }, 32);
    let rest = allocator.free.head().unwrap();
    assert_eq!(allocator.heap.region().tag(rest), Tag::free(MIN_PAYLOAD));
  }

  #[test]
  fn test_split_of_last_block_moves_last_marker() {
    let mut allocator = allocator(4 * HEAP_INCREMENT);

    let _a = allocator.allocate(16);
    let b = allocator.allocate(256);
    unsafe { allocator.release(b) };

    let b = allocator.allocate(16);
    let rest = allocator.free.head().unwrap();

    assert_eq!(allocator.last, Some(rest));

    // The next carve starts after the remainder, not inside it.
    let c = allocator.allocate(512);
    assert_eq!(
      offset(&allocator, c),
      rest.end(allocator.heap.region().tag(rest).size()) + HEADER_SIZE
    );
    assert!(!b.is_null());
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut allocator = allocator(HEAP_INCREMENT);

    unsafe { allocator.release(ptr::null_mut()) };

    assert_eq!(allocator.heap_size(), 0);
    assert_eq!(allocator.free.head(), None);
  }

  #[test]
  fn test_release_without_free_neighbours() {
    let mut allocator = allocator(HEAP_INCREMENT);

    let a = allocator.allocate(16);
    let b = allocator.allocate(16);
    let _c = allocator.allocate(16);

    unsafe { allocator.release(b) };

    let block = Block::from_payload(offset(&allocator, b));
    assert_eq!(allocator.free.head(), Some(block));
    assert_eq!(allocator.heap.region().tag(block), Tag::free(16));

    unsafe { allocator.release(a) };
    let merged = Block::from_payload(offset(&allocator, a));
    assert_eq!(allocator.heap.region().tag(merged), Tag::free(32 + OVERHEAD));
  }

  #[test]
  fn test_release_merges_left() {
    let mut allocator = allocator(HEAP_INCREMENT);

    let a = allocator.allocate(16);
    let b = allocator.allocate(24);

    unsafe {
      allocator.release(a);
      allocator.release(b);
    }

    let first = Block::at(0);

    assert_eq!(allocator.last, Some(first));
    assert_eq!(allocator.free.head(), Some(first));
    assert_eq!(allocator.heap.region().tag(first), Tag::free(16 + 24 + OVERHEAD));
    assert_eq!(allocator.heap.region().footer_tag(first), Tag::free(16 + 24 + OVERHEAD));
  }

  #[test]
  fn test_release_merges_right() {
    let mut allocator = allocator(HEAP_INCREMENT);

    let a = allocator.allocate(16);
    let b = allocator.allocate(24);

    unsafe {
      allocator.release(b);
      allocator.release(a);
    }

    let first = Block::at(0);

    assert_eq!(allocator.last, Some(first));
    assert_eq!(allocator.free.iter(allocator.heap.region()).count(), 1);
    assert_eq!(allocator.heap.region().tag(first), Tag::free(16 + 24 + OVERHEAD));
  }

  #[test]
  fn test_release_merges_both_sides() {
    let mut allocator = allocator(HEAP_INCREMENT);

    let a = allocator.allocate(16);
    let b = allocator.allocate(32);
    let c = allocator.allocate(48);
    let d = allocator.allocate(16);

    unsafe {
      allocator.release(a);
      allocator.release(c);
      allocator.release(b);
    }

    let first = Block::at(0);
    let merged = 16 + 32 + 48 + 2 * (HEADER_SIZE + FOOTER_SIZE);

    assert_eq!(allocator.free.iter(allocator.heap.region()).collect::<Vec<_>>(), vec![first]);
    assert_eq!(allocator.heap.region().tag(first), Tag::free(merged));
    assert_eq!(allocator.heap.region().right_neighbour(first), Block::from_payload(offset(&allocator, d)));
    assert_eq!(allocator.last, Some(Block::from_payload(offset(&allocator, d))));

    unsafe { allocator.release(d) };

    assert_eq!(allocator.last, Some(first));
    assert_eq!(allocator.heap.region().tag(first), Tag::free(merged + 16 + OVERHEAD));
  }

  #[test]
  fn test_both_sides_merge_retargets_last() {
    let mut allocator = allocator(4 * HEAP_INCREMENT);

    let a = allocator.allocate(16);
    let b = allocator.allocate(16);
    let c = allocator.allocate(16);

    unsafe {
      allocator.release(a);
      allocator.release(c);
      allocator.release(b);
    }

    assert_eq!(allocator.first, Some(Block::at(0)));
    assert_eq!(allocator.last, Some(Block::at(0)));

    // The tail after the merged block is carved next.
    let d = allocator.allocate(HEAP_INCREMENT);
    assert_eq!(offset(&allocator, d), 3 * (16 + OVERHEAD) + HEADER_SIZE);
  }
}
