/// Alignment of every payload handed out by the allocator, in bytes.
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(16, 8), 16);
/// assert_eq!(align_to!(1, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + ($align - 1)) & !($align - 1)
  };
}

/// Rounds `value` up to the allocator's [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(9), 16);
/// assert_eq!(align!(24), 24);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}
