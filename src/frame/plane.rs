// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt::{Debug, Formatter};
use std::ops::{Index, IndexMut};

use crate::error::CodecError;
use crate::util::*;

/// Plane-specific configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneConfig {
  /// Data stride.
  pub stride: usize,
  /// Width in pixels.
  pub width: usize,
  /// Height in pixels.
  pub height: usize,
  /// Decimator along the X axis.
  ///
  /// For example, for chroma planes in a 4:2:0 configuration this would be 1.
  pub xdec: usize,
  /// Decimator along the Y axis.
  pub ydec: usize,
}

impl PlaneConfig {
  #[inline]
  pub const fn new(
    width: usize, height: usize, xdec: usize, ydec: usize,
  ) -> Self {
    PlaneConfig { stride: width, width, height, xdec, ydec }
  }
}

/// Absolute offset in pixels inside a plane
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaneOffset {
  pub x: isize,
  pub y: isize,
}

/// One data plane of a frame.
///
/// For example, a plane can be a Y luma plane or a U or V chroma plane.
/// Samples are stored row-major without padding; reads outside the plane go
/// through [`Plane::clamped`], which replicates the edge.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane<T: Pixel> {
  pub data: Vec<T>,
  /// Plane configuration.
  pub cfg: PlaneConfig,
}

impl<T: Pixel> Debug for Plane<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Plane {{ data: [{:?}, ...], cfg: {:?} }}", self.data.first(), self.cfg)
  }
}

impl<T: Pixel> Plane<T> {
  /// Allocates and returns a new plane filled with mid-gray.
  ///
  /// # Errors
  ///
  /// Returns `ResourceExhausted` if the sample buffer cannot be allocated.
  pub fn try_new(
    width: usize, height: usize, xdec: usize, ydec: usize,
  ) -> Result<Self, CodecError> {
    let cfg = PlaneConfig::new(width, height, xdec, ydec);
    let mut data = try_alloc_zeroed::<T>(cfg.stride * height, "plane")?;
    data.iter_mut().for_each(|v| *v = T::cast_from(128u32));
    Ok(Plane { data, cfg })
  }

  /// Allocates and returns a new plane filled with mid-gray.
  ///
  /// # Panics
  ///
  /// Panics if the allocation fails.
  pub fn new(width: usize, height: usize, xdec: usize, ydec: usize) -> Self {
    let cfg = PlaneConfig::new(width, height, xdec, ydec);
    Plane { data: vec![T::cast_from(128u32); cfg.stride * height], cfg }
  }

  #[inline(always)]
  pub fn width(&self) -> usize {
    self.cfg.width
  }

  #[inline(always)]
  pub fn height(&self) -> usize {
    self.cfg.height
  }

  /// Sample at `(x, y)` with the plane edge replicated outwards.
  #[inline(always)]
  pub fn clamped(&self, x: isize, y: isize) -> T {
    let x = x.clamp(0, self.cfg.width as isize - 1) as usize;
    let y = y.clamp(0, self.cfg.height as isize - 1) as usize;
    self.data[y * self.cfg.stride + x]
  }

  pub fn fill(&mut self, value: T) {
    self.data.iter_mut().for_each(|v| *v = value);
  }

  pub fn rows_iter(&self) -> impl Iterator<Item = &[T]> {
    let width = self.cfg.width;
    self.data.chunks(self.cfg.stride).map(move |row| &row[..width])
  }

  pub fn rows_iter_mut(&mut self) -> impl Iterator<Item = &mut [T]> {
    let width = self.cfg.width;
    self.data.chunks_mut(self.cfg.stride).map(move |row| &mut row[..width])
  }

  /// Copies the rectangle starting at `po` from `src`, which must share this
  /// plane's geometry.
  pub fn copy_rect(
    &mut self, src: &Plane<T>, po: PlaneOffset, width: usize, height: usize,
  ) {
    debug_assert_eq!(self.cfg, src.cfg);
    let x0 = po.x.max(0) as usize;
    let y0 = po.y.max(0) as usize;
    let x1 = (x0 + width).min(self.cfg.width);
    let y1 = (y0 + height).min(self.cfg.height);
    for y in y0..y1 {
      let base = y * self.cfg.stride;
      self.data[base + x0..base + x1]
        .copy_from_slice(&src.data[base + x0..base + x1]);
    }
  }
}

impl<T: Pixel> Index<usize> for Plane<T> {
  type Output = [T];
  #[inline(always)]
  fn index(&self, y: usize) -> &Self::Output {
    let base = y * self.cfg.stride;
    &self.data[base..base + self.cfg.width]
  }
}

impl<T: Pixel> IndexMut<usize> for Plane<T> {
  #[inline(always)]
  fn index_mut(&mut self, y: usize) -> &mut Self::Output {
    let base = y * self.cfg.stride;
    &mut self.data[base..base + self.cfg.width]
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn clamped_reads_replicate_edges() {
    let mut plane = Plane::<u8>::new(4, 3, 0, 0);
    for (y, row) in plane.rows_iter_mut().enumerate() {
      for (x, v) in row.iter_mut().enumerate() {
        *v = (y * 10 + x) as u8;
      }
    }
    assert_eq!(plane.clamped(-3, -1), 0);
    assert_eq!(plane.clamped(7, 1), 13);
    assert_eq!(plane.clamped(2, 9), 22);
    assert_eq!(plane[1][2], 12);
  }

  #[test]
  fn copy_rect_is_bounded() {
    let mut a = Plane::<u16>::new(8, 8, 0, 0);
    let mut b = Plane::<u16>::new(8, 8, 0, 0);
    b.fill(7);
    a.copy_rect(&b, PlaneOffset { x: 6, y: 6 }, 4, 4);
    assert_eq!(a[7][7], 7);
    assert_eq!(a[5][5], 128);
  }
}
