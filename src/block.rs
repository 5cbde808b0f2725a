use std::{cmp, mem};

use crate::{align, align::ALIGNMENT};

/// Width of a header or footer word. Fixed at 8 bytes on every target.
pub const WORD: usize = mem::size_of::<u64>();

pub const HEADER_SIZE: usize = WORD;
pub const FOOTER_SIZE: usize = WORD;

/// Bytes of metadata framing every payload.
pub const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Smallest usable size of any block. Must hold the two free-list links.
pub const MIN_PAYLOAD: usize = 2 * WORD;

/// Smallest framed size of any block; a split leftover below this stays
/// attached to the block being handed out.
pub const MIN_BLOCK: usize = HEADER_SIZE + MIN_PAYLOAD + FOOTER_SIZE;

const FREE_BIT: u64 = 1;

/// A size/flag word as stored in both the header and the footer of a block.
///
/// The usable size is always a multiple of 8, which leaves the low bit free to
/// carry the free flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag(u64);

impl Tag {
  pub fn used(size: usize) -> Self {
    debug_assert_eq!(size % 8, 0, "usable size {size} is not a multiple of 8");
    Self(size as u64)
  }

  pub fn free(size: usize) -> Self {
    Self::used(size).with_free(true)
  }

  pub fn from_raw(raw: u64) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }

  pub fn size(self) -> usize {
    (self.0 & !FREE_BIT) as usize
  }

  pub fn is_free(self) -> bool {
    self.0 & FREE_BIT == FREE_BIT
  }

  /// Returns the same size with the free flag set or cleared.
  pub fn with_free(
    self,
    free: bool,
  ) -> Self {
    if free {
      Self(self.0 | FREE_BIT)
    } else {
      Self(self.0 & !FREE_BIT)
    }
  }
}

/// A block, named by the heap offset of its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub fn at(offset: usize) -> Self {
    debug_assert_eq!(offset % WORD, 0, "block header at unaligned offset {offset}");
    Self(offset)
  }

  /// Recovers the block from the offset of its payload.
  pub fn from_payload(payload: usize) -> Self {
    Self::at(payload - HEADER_SIZE)
  }

  pub fn header(self) -> usize {
    self.0
  }

  pub fn payload(self) -> usize {
    self.0 + HEADER_SIZE
  }

  pub fn footer(
    self,
    size: usize,
  ) -> usize {
    self.0 + HEADER_SIZE + size
  }

  /// Offset one past the footer, which is where the right neighbour starts.
  pub fn end(
    self,
    size: usize,
  ) -> usize {
    self.footer(size) + FOOTER_SIZE
  }
}

/// Usable size for a request: rounded up to 8 and floored at [`MIN_PAYLOAD`].
///
/// Returns `None` when rounding overflows, which no heap could satisfy.
pub fn request_size(requested: usize) -> Option<usize> {
  requested.checked_add(ALIGNMENT - 1)?;

  Some(cmp::max(align!(requested), MIN_PAYLOAD))
}

/// Framed footprint of a block with the given usable size.
pub fn framed(size: usize) -> usize {
  size + OVERHEAD
}
