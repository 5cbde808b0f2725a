use crate::{
  block::{Block, WORD},
  heap::Region,
};

const NIL: u64 = u64::MAX;

/// Intrusive, unordered, doubly linked list of free blocks.
///
/// The links live in the first two payload words of each free block:
///
/// ```text
///   ┌────────┬────────┬────────┬─────────────┬────────┐
///   │ header │  next  │  prev  │     ...     │ footer │
///   └────────┴────────┴────────┴─────────────┴────────┘
/// ```
#[derive(Debug, Default)]
pub struct FreeList {
  head: Option<Block>,
}

fn encode(block: Option<Block>) -> u64 {
  block.map_or(NIL, |block| block.header() as u64)
}

fn decode(raw: u64) -> Option<Block> {
  (raw != NIL).then(|| Block::at(raw as usize))
}

fn next_slot(block: Block) -> usize {
  block.payload()
}

fn prev_slot(block: Block) -> usize {
  block.payload() + WORD
}

impl FreeList {
  pub fn head(&self) -> Option<Block> {
    self.head
  }

  pub fn next(
    region: &Region,
    block: Block,
  ) -> Option<Block> {
    decode(region.read(next_slot(block)))
  }

  fn prev(
    region: &Region,
    block: Block,
  ) -> Option<Block> {
    decode(region.read(prev_slot(block)))
  }

  /// Marks `block` free in both tags and pushes it at the head.
  pub fn insert(
    &mut self,
    region: &mut Region,
    block: Block,
  ) {
    region.set_free(block, true);

    region.write(next_slot(block), encode(self.head));
    region.write(prev_slot(block), NIL);

    if let Some(head) = self.head {
      region.write(prev_slot(head), encode(Some(block)));
    }

    self.head = Some(block);
  }

  /// Unlinks `block` wherever it sits and marks it used in both tags.
  pub fn remove(
    &mut self,
    region: &mut Region,
    block: Block,
  ) {
    let next = Self::next(region, block);
    let prev = Self::prev(region, block);

    if let Some(next) = next {
      region.write(prev_slot(next), encode(prev));
    }

    if let Some(prev) = prev {
      region.write(next_slot(prev), encode(next));
    }

    if self.head == Some(block) {
      self.head = next;
    }

    region.set_free(block, false);
  }

  /// First block, from the head, whose usable size is at least `size`.
  pub fn first_fit(
    &self,
    region: &Region,
    size: usize,
  ) -> Option<Block> {
    self.iter(region).find(|&block| region.tag(block).size() >= size)
  }

  pub fn iter<'a>(
    &self,
    region: &'a Region,
  ) -> Iter<'a> {
    Iter {
      region,
      current: self.head,
    }
  }
}

pub struct Iter<'a> {
  region: &'a Region,
  current: Option<Block>,
}

impl Iterator for Iter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.current?;
    self.current = FreeList::next(self.region, block);
    Some(block)
  }
}
