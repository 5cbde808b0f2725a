//! Heap-growth primitives.
//!
//! A [`HeapSource`] extends one contiguous region by a requested number of
//! bytes, the way `sbrk(2)` extends the program break:
//!
//! ```text
//!   before:  [ ... owned ... )                 extend(n) returns ▼
//!   after:   [ ... owned ... | ..... n new bytes ..... )
//!                            ▲
//!                        previous end
//! ```

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::align::ALIGNMENT;

/// Something the allocator can grow its heap from.
///
/// # Safety
///
/// On success, `extend` must return the start of `increment` bytes that are
/// valid for reads and writes and that nothing else touches for as long as the
/// source is alive. Successive extensions should be contiguous; the heap
/// detects and refuses those that are not.
pub unsafe trait HeapSource {
  /// Grows the region by `increment` bytes and returns its previous end, or
  /// `None` if the request is refused.
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;
}

/// The process program break, moved with `sbrk(2)`.
///
/// Other code in the process may extend the break too (the system allocator
/// does); the heap notices such gaps and stops growing. Nothing may lower the
/// break below memory this allocator has been given.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

/// Returns the current program break.
pub fn program_break() -> *mut u8 {
  unsafe { sbrk(0) as *mut u8 }
}

unsafe impl HeapSource for Sbrk {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let increment = intptr_t::try_from(increment).ok()?;

    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    NonNull::new(address as *mut u8)
  }
}

/// A fixed reservation from the global allocator, handed out one increment
/// at a time.
///
/// Once the reservation is used up every further extension is refused, which
/// makes exhaustion easy to reproduce. Independent arenas never share memory,
/// so each one can back its own heap.
#[derive(Debug)]
pub struct Arena {
  base: NonNull<u8>,
  layout: Layout,
  brk: usize,
}

impl Arena {
  /// Reserves `capacity` bytes, rounded up to [`ALIGNMENT`].
  ///
  /// # Panics
  ///
  /// If the rounded capacity does not fit a [`Layout`].
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(ALIGNMENT);
    let layout = capacity
      .checked_add(ALIGNMENT - 1)
      .and_then(|_| Layout::from_size_align(crate::align!(capacity), ALIGNMENT).ok())
      .expect("arena capacity is too large");
    let size = layout.size();

    let base = unsafe { alloc::alloc(layout) };
    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };

    log::debug!("arena reserved {} bytes at {:?}", size, base);

    Self { base, layout, brk: 0 }
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

unsafe impl HeapSource for Arena {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let brk = self.brk.checked_add(increment)?;

    if brk > self.capacity() {
      return None;
    }

    let previous = unsafe { self.base.add(self.brk) };
    self.brk = brk;

    Some(previous)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
  }
}
