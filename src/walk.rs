//! Read-only inspection of a heap: walking its blocks and checking that the
//! allocator's invariants hold.

use std::ptr::NonNull;

use crate::{
  FreeListAllocator,
  Violation,
  block::{self, Block, MIN_PAYLOAD},
  free_list,
  heap::Region,
  source::HeapSource,
};

/// One block as seen from outside the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address, as returned by `allocate` while the block is in use.
  pub payload: NonNull<u8>,
  /// Usable payload size in bytes.
  pub size: usize,
  pub free: bool,
}

impl BlockInfo {
  fn read(
    region: &Region,
    block: Block,
  ) -> Self {
    let tag = region.tag(block);

    Self {
      payload: region.address(block.payload()),
      size: tag.size(),
      free: tag.is_free(),
    }
  }

  /// Header, payload and footer together.
  pub fn framed_size(&self) -> usize {
    block::framed(self.size)
  }
}

/// Heap blocks in address order, from the first carved to the last.
pub struct Blocks<'a> {
  region: &'a Region,
  next: Option<Block>,
  last: Option<Block>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.next?;

    self.next = if Some(block) == self.last {
      None
    } else {
      Some(self.region.right_neighbour(block))
    };

    Some(BlockInfo::read(self.region, block))
  }
}

/// Free blocks in free-list order, most recently inserted first.
pub struct FreeBlocks<'a> {
  region: &'a Region,
  inner: free_list::Iter<'a>,
}

impl Iterator for FreeBlocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|block| BlockInfo::read(self.region, block))
  }
}

impl<S: HeapSource> FreeListAllocator<S> {
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      region: self.heap.region(),
      next: self.first,
      last: self.last,
    }
  }

  pub fn free_blocks(&self) -> FreeBlocks<'_> {
    let region = self.heap.region();

    FreeBlocks {
      region,
      inner: self.free.iter(region),
    }
  }

  /// Walks the heap and the free list and reports the first broken
  /// invariant.
  ///
  /// Takes time linear in the number of blocks; meant for tests and debugging.
  pub fn verify(&self) -> Result<(), Violation> {
    let region = self.heap.region();

    let (Some(first), Some(last)) = (self.first, self.last) else {
      return match self.free.head() {
        Some(block) => Err(Violation::FreeListMismatch { block: block.header() }),
        None => Ok(()),
      };
    };

    let mut flagged_free = 0;
    let mut previous_free: Option<Block> = None;
    let mut block = first;

    loop {
      let header = region.tag(block);
      let footer = region.footer_tag(block);

      if header != footer {
        return Err(Violation::TagMismatch {
          block: block.header(),
          header: header.raw(),
          footer: footer.raw(),
        });
      }

      if header.size() < MIN_PAYLOAD {
        return Err(Violation::Undersized {
          block: block.header(),
          size: header.size(),
        });
      }

      if header.is_free() {
        flagged_free += 1;

        if let Some(left) = previous_free {
          return Err(Violation::AdjacentFree {
            left: left.header(),
            right: block.header(),
          });
        }
      }

      previous_free = header.is_free().then_some(block);

      let end = block.end(header.size());

      if block == last {
        break;
      }

      if block > last || end > region.end() {
        return Err(Violation::TilingGap {
          expected: last.header(),
          found: end,
        });
      }

      block = Block::at(end);
    }

    self.verify_free_list(region, flagged_free)
  }

  fn verify_free_list(
    &self,
    region: &Region,
    flagged_free: usize,
  ) -> Result<(), Violation> {
    let mut listed = 0;

    // Stops early on a cycle: it would list more blocks than are flagged.
    for block in self.free.iter(region) {
      if !region.tag(block).is_free() || listed >= flagged_free {
        return Err(Violation::FreeListMismatch { block: block.header() });
      }

      listed += 1;
    }

    if listed != flagged_free {
      return Err(Violation::FreeListMismatch {
        block: self.free.head().map_or(0, Block::header),
      });
    }

    Ok(())
  }
}
