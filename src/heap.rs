use std::ptr::NonNull;

use crate::{
  HeapError,
  align::ALIGNMENT,
  block::{Block, FOOTER_SIZE, Tag, WORD},
  source::HeapSource,
};

/// Bytes requested from the source at bootstrap and on every growth step.
pub const HEAP_INCREMENT: usize = 1024;

/// The heap bytes `[base, base + end)`, addressed by offset from `base`.
///
/// All block metadata is read and written through this view, so every access
/// can be checked against the current heap end in debug builds.
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  end: usize,
}

impl Region {
  fn empty() -> Self {
    Self {
      base: NonNull::<u64>::dangling().cast(),
      end: 0,
    }
  }

  /// Offset one past the last byte of the heap.
  pub fn end(&self) -> usize {
    self.end
  }

  pub fn read(
    &self,
    offset: usize,
  ) -> u64 {
    self.check(offset);
    unsafe { self.base.add(offset).cast::<u64>().read() }
  }

  pub fn write(
    &mut self,
    offset: usize,
    value: u64,
  ) {
    self.check(offset);
    unsafe { self.base.add(offset).cast::<u64>().write(value) }
  }

  fn check(
    &self,
    offset: usize,
  ) {
    debug_assert!(
      offset % WORD == 0 && offset + WORD <= self.end,
      "word at {offset:#x} is outside the heap (end {:#x})",
      self.end
    );
  }

  /// Header tag of `block`.
  pub fn tag(
    &self,
    block: Block,
  ) -> Tag {
    Tag::from_raw(self.read(block.header()))
  }

  /// Footer tag of `block`, located through its header size.
  pub fn footer_tag(
    &self,
    block: Block,
  ) -> Tag {
    Tag::from_raw(self.read(block.footer(self.tag(block).size())))
  }

  /// Writes `tag` to the header of `block` and to the footer its size implies.
  pub fn set_tags(
    &mut self,
    block: Block,
    tag: Tag,
  ) {
    self.write(block.header(), tag.raw());
    self.write(block.footer(tag.size()), tag.raw());
  }

  /// Flips the free flag in both copies, keeping the size.
  pub fn set_free(
    &mut self,
    block: Block,
    free: bool,
  ) {
    let tag = self.tag(block).with_free(free);
    self.set_tags(block, tag);
  }

  /// The block ending right before `block`, found through its footer.
  ///
  /// Only meaningful when `block` is not the first block.
  pub fn left_neighbour(
    &self,
    block: Block,
  ) -> Block {
    let footer = block.header() - FOOTER_SIZE;
    let size = Tag::from_raw(self.read(footer)).size();
    let left = Block::at(footer - size - WORD);

    debug_assert_eq!(self.tag(left).size(), size, "left neighbour of {block:?} is corrupt");
    left
  }

  /// The block starting right after `block`.
  ///
  /// Only meaningful when `block` is not the last block.
  pub fn right_neighbour(
    &self,
    block: Block,
  ) -> Block {
    Block::at(block.end(self.tag(block).size()))
  }

  pub fn address(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset <= self.end);
    unsafe { self.base.add(offset) }
  }

  /// Offset of a pointer previously produced by [`Region::address`].
  pub fn offset_of(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
    debug_assert!(offset < self.end, "{ptr:?} does not belong to this heap");
    offset
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Fresh,
  Live,
  Unusable,
}

/// The contiguous heap extent and the source it grows from.
#[derive(Debug)]
pub struct Heap<S> {
  source: S,
  region: Region,
  increment: usize,
  state: State,
}

impl<S: HeapSource> Heap<S> {
  pub fn new(
    source: S,
    increment: usize,
  ) -> Self {
    assert!(
      increment > 0 && increment % ALIGNMENT == 0,
      "heap increment {increment} must be a non-zero multiple of {ALIGNMENT}"
    );

    Self {
      source,
      region: Region::empty(),
      increment,
      state: State::Fresh,
    }
  }

  /// Requests the initial capacity on first use.
  ///
  /// A refusal here is final: the heap stays unusable.
  pub fn bootstrap(&mut self) -> Result<(), HeapError> {
    match self.state {
      State::Live => return Ok(()),
      State::Unusable => return Err(HeapError::Unusable),
      State::Fresh => {},
    }

    let Some(start) = self.source.extend(self.increment) else {
      log::warn!("heap bootstrap refused ({} bytes)", self.increment);
      self.state = State::Unusable;
      return Err(HeapError::Unusable);
    };

    let padding = start.as_ptr().align_offset(ALIGNMENT);

    self.region = Region {
      base: unsafe { start.add(padding) },
      end: self.increment - padding,
    };
    self.state = State::Live;

    log::debug!(
      "heap bootstrapped at {:?} with {} bytes",
      self.region.base,
      self.region.end
    );

    Ok(())
  }

  /// Extends the heap end by one increment.
  ///
  /// `requested` only labels the error when the source refuses.
  pub fn grow(
    &mut self,
    requested: usize,
  ) -> Result<(), HeapError> {
    let expected = self.region.base.as_ptr().wrapping_add(self.region.end);

    let Some(previous) = self.source.extend(self.increment) else {
      log::warn!(
        "heap growth refused at {} bytes while fitting {} bytes",
        self.region.end,
        requested
      );
      return Err(HeapError::Refused { requested });
    };

    if previous.as_ptr() != expected {
      log::warn!("heap extension at {:?} does not continue {:?}", previous, expected);
      return Err(HeapError::Discontiguous);
    }

    self.region.end += self.increment;
    log::debug!("heap grown to {} bytes", self.region.end);

    Ok(())
  }

  pub fn region(&self) -> &Region {
    &self.region
  }

  pub fn region_mut(&mut self) -> &mut Region {
    &mut self.region
  }

  pub fn source(&self) -> &S {
    &self.source
  }
}
