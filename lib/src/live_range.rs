/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Half-open ranges over the linear instruction position space.

use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A `[start, end)` range of instruction positions.
///
/// The range with `start == u32::MAX` and `end == 0` is the "unset" range: it
/// contains no position and is never a real interval.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct LiveRange {
  pub start: u32,
  pub end: u32,
}

impl LiveRange {
  pub fn new(start: u32, end: u32) -> Self {
    debug_assert!(start <= end, "inverted live range");
    Self { start, end }
  }

  pub fn empty() -> Self {
    Self { start: u32::max_value(), end: 0 }
  }

  #[inline]
  pub fn in_range(&self, pos: u32) -> bool {
    pos >= self.start && pos < self.end
  }

  pub fn len(&self) -> u32 {
    if self.is_empty() {
      0
    } else {
      self.end - self.start
    }
  }

  pub fn is_empty(&self) -> bool {
    self.start == u32::max_value() && self.end == 0
  }

  /// Grows the range so that it covers `pos`. An unset range becomes the
  /// unit range `[pos, pos + 1)`.
  pub fn extend_to(&mut self, pos: u32) {
    if pos < self.start {
      self.start = pos;
    }
    if pos >= self.end {
      self.end = pos + 1;
    }
  }

  pub fn overlaps(&self, other: &LiveRange) -> bool {
    self.start < other.end && other.start < self.end
  }
}

impl fmt::Debug for LiveRange {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if self.is_empty() {
      write!(fmt, "[empty)")
    } else {
      write!(fmt, "[{}, {})", self.start, self.end)
    }
  }
}

impl fmt::Display for LiveRange {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    fmt::Debug::fmt(self, fmt)
  }
}
