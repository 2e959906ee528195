// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_camel_case_types)]

pub use self::rust::*;

use crate::context::{MV_LOW, MV_UPP};
use crate::frame::*;
use crate::tiling::*;
use crate::util::*;

use arg_enum_proc_macro::ArgEnum;
use num_derive::FromPrimitive;
use std::ops;

/// Motion vector in 1/8 luma pel units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MotionVector {
  pub row: i16,
  pub col: i16,
}

impl MotionVector {
  #[inline]
  pub const fn quantize_to_fullpel(self) -> Self {
    Self { row: (self.row / 8) * 8, col: (self.col / 8) * 8 }
  }

  #[inline]
  pub const fn is_zero(self) -> bool {
    self.row == 0 && self.col == 0
  }

  #[inline]
  pub const fn is_valid(self) -> bool {
    ((MV_LOW as i16) < self.row && self.row < (MV_UPP as i16))
      && ((MV_LOW as i16) < self.col && self.col < (MV_UPP as i16))
  }
}

impl ops::Mul<i16> for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn mul(self, rhs: i16) -> MotionVector {
    MotionVector { row: self.row * rhs, col: self.col * rhs }
  }
}

impl ops::Shr<u8> for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn shr(self, rhs: u8) -> MotionVector {
    MotionVector { row: self.row >> rhs, col: self.col >> rhs }
  }
}

impl ops::Shl<u8> for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn shl(self, rhs: u8) -> MotionVector {
    MotionVector { row: self.row << rhs, col: self.col << rhs }
  }
}

impl ops::Add<MotionVector> for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn add(self, rhs: MotionVector) -> MotionVector {
    MotionVector { row: self.row + rhs.row, col: self.col + rhs.col }
  }
}

impl ops::Sub<MotionVector> for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn sub(self, rhs: MotionVector) -> MotionVector {
    MotionVector { row: self.row - rhs.row, col: self.col - rhs.col }
  }
}

impl ops::Neg for MotionVector {
  type Output = MotionVector;

  #[inline]
  fn neg(self) -> MotionVector {
    MotionVector { row: -self.row, col: -self.col }
  }
}

/// Sub-pixel interpolation kernel.
#[derive(
  ArgEnum, Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, FromPrimitive,
)]
pub enum InterpFilter {
  #[default]
  EIGHTTAP_REGULAR = 0,
  EIGHTTAP_SMOOTH = 1,
  MULTITAP_SHARP = 2,
  BILINEAR = 3,
  /// Chosen per block among the first three kernels.
  SWITCHABLE = 4,
}

/// How the two predictions of a compound block are combined.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompoundType {
  #[default]
  Average,
  /// Blend along wedge `index` of the block's codebook; `sign` swaps the
  /// two sides.
  Wedge { index: u8, sign: bool },
  /// Weight follows the difference of the two predictions; the larger
  /// share goes to the first one unless `inverse` is set.
  Diff { inverse: bool },
}

pub const COMPOUND_TYPES: usize = 3;

impl CompoundType {
  /// Index of the type among the [`COMPOUND_TYPES`] coded symbols.
  pub const fn symbol(self) -> usize {
    match self {
      CompoundType::Average => 0,
      CompoundType::Wedge { .. } => 1,
      CompoundType::Diff { .. } => 2,
    }
  }

  pub const fn is_masked(self) -> bool {
    !matches!(self, CompoundType::Average)
  }
}

/// Number of kernels selectable per block when the frame filter is
/// [`InterpFilter::SWITCHABLE`].
pub const SWITCHABLE_FILTERS: usize = 3;

pub const SUBPEL_FILTER_SIZE: usize = 8;
pub const SUBPEL_BITS: usize = 4;
pub const SUBPEL_SHIFTS: usize = 1 << SUBPEL_BITS;
pub const SUBPEL_MASK: usize = SUBPEL_SHIFTS - 1;
pub const FILTER_BITS: usize = 7;

pub type Kernel = [i32; SUBPEL_FILTER_SIZE];

const SUB_PEL_FILTERS_8: [Kernel; SUBPEL_SHIFTS] = [
  [0, 0, 0, 128, 0, 0, 0, 0],
  [0, 1, -5, 126, 8, -3, 1, 0],
  [-1, 3, -10, 122, 18, -6, 2, 0],
  [-1, 4, -13, 118, 27, -9, 3, -1],
  [-1, 4, -16, 112, 37, -11, 4, -1],
  [-1, 5, -18, 105, 48, -14, 4, -1],
  [-1, 5, -19, 97, 58, -16, 5, -1],
  [-1, 6, -19, 88, 68, -18, 5, -1],
  [-1, 6, -19, 78, 78, -19, 6, -1],
  [-1, 5, -18, 68, 88, -19, 6, -1],
  [-1, 5, -16, 58, 97, -19, 5, -1],
  [-1, 4, -14, 48, 105, -18, 5, -1],
  [-1, 4, -11, 37, 112, -16, 4, -1],
  [-1, 3, -9, 27, 118, -13, 4, -1],
  [0, 2, -6, 18, 122, -10, 3, -1],
  [0, 1, -3, 8, 126, -5, 1, 0],
];

const SUB_PEL_FILTERS_8LP: [Kernel; SUBPEL_SHIFTS] = [
  [0, 0, 0, 128, 0, 0, 0, 0],
  [-3, -1, 32, 64, 38, 1, -3, 0],
  [-2, -2, 29, 63, 41, 2, -3, 0],
  [-2, -2, 26, 63, 43, 4, -4, 0],
  [-2, -3, 24, 62, 46, 5, -4, 0],
  [-2, -3, 21, 60, 49, 7, -4, 0],
  [-1, -4, 18, 59, 51, 9, -4, 0],
  [-1, -4, 16, 57, 53, 12, -4, -1],
  [-1, -4, 14, 55, 55, 14, -4, -1],
  [-1, -4, 12, 53, 57, 16, -4, -1],
  [0, -4, 9, 51, 59, 18, -4, -1],
  [0, -4, 7, 49, 60, 21, -3, -2],
  [0, -4, 5, 46, 62, 24, -3, -2],
  [0, -4, 4, 43, 63, 26, -2, -2],
  [0, -3, 2, 41, 63, 29, -2, -2],
  [0, -3, 1, 38, 64, 32, -1, -3],
];

const SUB_PEL_FILTERS_8S: [Kernel; SUBPEL_SHIFTS] = [
  [0, 0, 0, 128, 0, 0, 0, 0],
  [-1, 3, -7, 127, 8, -3, 1, 0],
  [-2, 5, -13, 125, 17, -6, 3, -1],
  [-3, 7, -17, 121, 27, -10, 5, -2],
  [-4, 9, -20, 115, 37, -13, 6, -2],
  [-4, 10, -23, 108, 48, -16, 8, -3],
  [-4, 10, -24, 100, 59, -19, 9, -3],
  [-4, 11, -24, 90, 70, -21, 10, -4],
  [-4, 11, -23, 80, 80, -23, 11, -4],
  [-4, 10, -21, 70, 90, -24, 11, -4],
  [-3, 9, -19, 59, 100, -24, 10, -4],
  [-3, 8, -16, 48, 108, -23, 10, -4],
  [-2, 6, -13, 37, 115, -20, 9, -4],
  [-2, 5, -10, 27, 121, -17, 7, -3],
  [-1, 3, -6, 17, 125, -13, 5, -2],
  [0, 1, -3, 8, 127, -7, 3, -1],
];

const BILINEAR_FILTERS: [Kernel; SUBPEL_SHIFTS] = {
  let mut k = [[0; SUBPEL_FILTER_SIZE]; SUBPEL_SHIFTS];
  let mut i = 0;
  while i < SUBPEL_SHIFTS {
    k[i][3] = 128 - 8 * i as i32;
    k[i][4] = 8 * i as i32;
    i += 1;
  }
  k
};

/// Selects the filter taps used for a sub-pixel phase.
///
/// Motion compensation is generic over this so alternative kernel sets can be
/// plugged in without touching the filtering loops.
pub trait InterpolationStrategy: Send + Sync {
  /// Taps for `filter` at the 1/16 phase `frac`; they sum to 128.
  fn kernel(&self, filter: InterpFilter, frac: usize) -> &Kernel;
}

/// The standard kernel set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Av1Kernels;

impl InterpolationStrategy for Av1Kernels {
  #[inline]
  fn kernel(&self, filter: InterpFilter, frac: usize) -> &Kernel {
    let table = match filter {
      InterpFilter::EIGHTTAP_REGULAR | InterpFilter::SWITCHABLE => {
        &SUB_PEL_FILTERS_8
      }
      InterpFilter::EIGHTTAP_SMOOTH => &SUB_PEL_FILTERS_8LP,
      InterpFilter::MULTITAP_SHARP => &SUB_PEL_FILTERS_8S,
      InterpFilter::BILINEAR => &BILINEAR_FILTERS,
    };
    &table[frac & SUBPEL_MASK]
  }
}

pub(crate) mod rust {
  use super::*;

  /// Extra precision of the predictions `prep_8tap` produces.
  #[inline(always)]
  pub fn intermediate_bits(bit_depth: usize) -> usize {
    4 - if bit_depth == 12 { 2 } else { 0 }
  }

  // Gathers the (w + 7) × (h + 7) window around the integer position with
  // the plane edges replicated.
  fn gather<T: Pixel>(
    src: &Plane<T>, x: isize, y: isize, width: usize, height: usize,
  ) -> Vec<i32> {
    let ww = width + SUBPEL_FILTER_SIZE - 1;
    let wh = height + SUBPEL_FILTER_SIZE - 1;
    let mut win = Vec::with_capacity(ww * wh);
    for r in 0..wh as isize {
      for c in 0..ww as isize {
        win.push(i32::cast_from(src.clamped(x - 3 + c, y - 3 + r)));
      }
    }
    win
  }

  #[inline(always)]
  fn run_filter(src: &[i32], stride: usize, filter: &Kernel) -> i32 {
    filter.iter().enumerate().map(|(i, &f)| f * src[i * stride]).sum()
  }

  // Two-pass separable filter into an unrounded intermediate of
  // `7 + intermediate_bits` fractional bits.
  fn filter_2d<T: Pixel, S: InterpolationStrategy + ?Sized>(
    src: &Plane<T>, x: isize, y: isize, width: usize, height: usize,
    col_frac: usize, row_frac: usize, filter: InterpFilter, bit_depth: usize,
    kernels: &S,
  ) -> Vec<i32> {
    let ib = intermediate_bits(bit_depth);
    let win = gather(src, x, y, width, height);
    let ww = width + SUBPEL_FILTER_SIZE - 1;
    let x_filter = kernels.kernel(filter, col_frac);
    let y_filter = kernels.kernel(filter, row_frac);
    let th = height + SUBPEL_FILTER_SIZE - 1;
    let mut horiz = vec![0i32; th * width];
    for r in 0..th {
      for c in 0..width {
        horiz[r * width + c] = round_shift(
          run_filter(&win[r * ww + c..], 1, x_filter),
          FILTER_BITS - ib,
        );
      }
    }
    let mut tmp = vec![0i32; width * height];
    for r in 0..height {
      for c in 0..width {
        tmp[r * width + c] = run_filter(&horiz[r * width + c..], width, y_filter);
      }
    }
    tmp
  }

  /// Motion compensated prediction of a `width`×`height` block whose
  /// top-left sample sits at the integer position `(x, y)` of `src` plus a
  /// sub-pixel phase in 1/16 units.
  #[profiling::function]
  pub fn put_8tap<T: Pixel, S: InterpolationStrategy + ?Sized>(
    dst: &mut PlaneRegionMut<'_, T>, src: &Plane<T>, x: isize, y: isize,
    width: usize, height: usize, col_frac: usize, row_frac: usize,
    filter: InterpFilter, bit_depth: usize, kernels: &S,
  ) {
    if col_frac == 0 && row_frac == 0 {
      for r in 0..height {
        let dst_slice = &mut dst[r];
        for c in 0..width {
          dst_slice[c] = src.clamped(x + c as isize, y + r as isize);
        }
      }
      return;
    }
    let ib = intermediate_bits(bit_depth);
    let tmp = filter_2d(
      src, x, y, width, height, col_frac, row_frac, filter, bit_depth, kernels,
    );
    for r in 0..height {
      let dst_slice = &mut dst[r];
      for c in 0..width {
        dst_slice[c] =
          T::clip(round_shift(tmp[r * width + c], FILTER_BITS + ib), bit_depth);
      }
    }
  }

  /// Same as [`put_8tap`] but keeps `intermediate_bits` of extra precision
  /// for compound averaging.
  pub fn prep_8tap<T: Pixel, S: InterpolationStrategy + ?Sized>(
    tmp: &mut [i16], src: &Plane<T>, x: isize, y: isize, width: usize,
    height: usize, col_frac: usize, row_frac: usize, filter: InterpFilter,
    bit_depth: usize, kernels: &S,
  ) {
    let ib = intermediate_bits(bit_depth);
    if col_frac == 0 && row_frac == 0 {
      for r in 0..height {
        for c in 0..width {
          let p = i32::cast_from(src.clamped(x + c as isize, y + r as isize));
          tmp[r * width + c] = (p << ib) as i16;
        }
      }
      return;
    }
    let f = filter_2d(
      src, x, y, width, height, col_frac, row_frac, filter, bit_depth, kernels,
    );
    for (t, &v) in tmp[..width * height].iter_mut().zip(f.iter()) {
      *t = round_shift(v, FILTER_BITS) as i16;
    }
  }

  /// Averages two intermediate predictions.
  pub fn mc_avg<T: Pixel>(
    dst: &mut PlaneRegionMut<'_, T>, tmp1: &[i16], tmp2: &[i16], width: usize,
    height: usize, bit_depth: usize,
  ) {
    let ib = intermediate_bits(bit_depth);
    for r in 0..height {
      let dst_slice = &mut dst[r];
      for c in 0..width {
        dst_slice[c] = T::clip(
          round_shift(
            tmp1[r * width + c] as i32 + tmp2[r * width + c] as i32,
            ib + 1,
          ),
          bit_depth,
        );
      }
    }
  }

  /// Blends two intermediate predictions with `mask`, the weight of
  /// `tmp1` in 1/64. The mask covers the luma block; on subsampled planes
  /// each weight is the rounded mean of the luma weights it covers.
  pub fn mc_mask<T: Pixel>(
    dst: &mut PlaneRegionMut<'_, T>, tmp1: &[i16], tmp2: &[i16], width: usize,
    height: usize, mask: &[u8], mask_stride: usize, xdec: usize,
    ydec: usize, bit_depth: usize,
  ) {
    let ib = intermediate_bits(bit_depth);
    for r in 0..height {
      let dst_slice = &mut dst[r];
      for c in 0..width {
        let mut m = 0;
        for dy in 0..1 << ydec {
          let row = &mask[((r << ydec) + dy) * mask_stride..];
          for dx in 0..1 << xdec {
            m += row[(c << xdec) + dx] as i32;
          }
        }
        let m = round_shift(m, xdec + ydec);
        let i = r * width + c;
        let v = m * tmp1[i] as i32 + (64 - m) * tmp2[i] as i32;
        dst_slice[c] = T::clip(round_shift(v, ib + 6), bit_depth);
      }
    }
  }

  /// Prediction from a reference of a different resolution.
  ///
  /// `pos_x`/`pos_y` are the scaled position of the top-left sample in 1/16
  /// reference pels and `x_step`/`y_step` the per-sample advance in the same
  /// unit (16 when unscaled).
  #[profiling::function]
  pub fn put_8tap_scaled<T: Pixel, S: InterpolationStrategy + ?Sized>(
    dst: &mut PlaneRegionMut<'_, T>, src: &Plane<T>, pos_x: isize,
    pos_y: isize, x_step: usize, y_step: usize, width: usize, height: usize,
    filter: InterpFilter, bit_depth: usize, kernels: &S,
  ) {
    let ib = intermediate_bits(bit_depth);
    let y0 = (pos_y >> SUBPEL_BITS) - 3;
    let y1 = ((pos_y + ((height - 1) * y_step) as isize) >> SUBPEL_BITS) + 4;
    let rows = (y1 - y0 + 1) as usize;
    let mut horiz = vec![0i32; rows * width];
    for r in 0..rows {
      let sy = y0 + r as isize;
      for c in 0..width {
        let px = pos_x + (c * x_step) as isize;
        let ix = px >> SUBPEL_BITS;
        let taps = kernels.kernel(filter, (px & SUBPEL_MASK as isize) as usize);
        let sum: i32 = taps
          .iter()
          .enumerate()
          .map(|(k, &t)| {
            t * i32::cast_from(src.clamped(ix - 3 + k as isize, sy))
          })
          .sum();
        horiz[r * width + c] = round_shift(sum, FILTER_BITS - ib);
      }
    }
    for r in 0..height {
      let py = pos_y + (r * y_step) as isize;
      let iy = (py >> SUBPEL_BITS) - 3 - y0;
      let taps = kernels.kernel(filter, (py & SUBPEL_MASK as isize) as usize);
      let dst_slice = &mut dst[r];
      for c in 0..width {
        let sum: i32 = taps
          .iter()
          .enumerate()
          .map(|(k, &t)| t * horiz[(iy as usize + k) * width + c])
          .sum();
        dst_slice[c] = T::clip(round_shift(sum, FILTER_BITS + ib), bit_depth);
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use interpolate_name::interpolate_test;

  fn ramp_plane(w: usize, h: usize) -> Plane<u16> {
    let mut p = Plane::new(w, h, 0, 0);
    for (y, row) in p.rows_iter_mut().enumerate() {
      for (x, v) in row.iter_mut().enumerate() {
        *v = (x * 4 + y * 2) as u16;
      }
    }
    p
  }

  #[test]
  fn kernels_sum_to_unity() {
    for f in [
      InterpFilter::EIGHTTAP_REGULAR,
      InterpFilter::EIGHTTAP_SMOOTH,
      InterpFilter::MULTITAP_SHARP,
      InterpFilter::BILINEAR,
    ] {
      for frac in 0..SUBPEL_SHIFTS {
        assert_eq!(Av1Kernels.kernel(f, frac).iter().sum::<i32>(), 128);
      }
    }
  }

  #[interpolate_test(regular, InterpFilter::EIGHTTAP_REGULAR)]
  #[interpolate_test(smooth, InterpFilter::EIGHTTAP_SMOOTH)]
  #[interpolate_test(sharp, InterpFilter::MULTITAP_SHARP)]
  fn unscaled_matches_scaled_with_unit_step(filter: InterpFilter) {
    let src = ramp_plane(32, 32);
    let mut a = Plane::<u16>::new(8, 8, 0, 0);
    let mut b = Plane::<u16>::new(8, 8, 0, 0);
    let rect = Rect { x: 0, y: 0, width: 8, height: 8 };
    put_8tap(
      &mut PlaneRegionMut::new(&mut a, rect),
      &src,
      10,
      6,
      8,
      8,
      5,
      9,
      filter,
      10,
      &Av1Kernels,
    );
    put_8tap_scaled(
      &mut PlaneRegionMut::new(&mut b, rect),
      &src,
      10 * 16 + 5,
      6 * 16 + 9,
      16,
      16,
      8,
      8,
      filter,
      10,
      &Av1Kernels,
    );
    assert_eq!(a, b);
  }

  #[test]
  fn compound_average_of_identical_predictions() {
    let src = ramp_plane(16, 16);
    let mut tmp1 = vec![0i16; 64];
    let mut tmp2 = vec![0i16; 64];
    prep_8tap(
      &mut tmp1,
      &src,
      2,
      2,
      8,
      8,
      0,
      0,
      InterpFilter::EIGHTTAP_REGULAR,
      8,
      &Av1Kernels,
    );
    tmp2.copy_from_slice(&tmp1);
    let mut out = Plane::<u16>::new(8, 8, 0, 0);
    mc_avg(
      &mut PlaneRegionMut::new(
        &mut out,
        Rect { x: 0, y: 0, width: 8, height: 8 },
      ),
      &tmp1,
      &tmp2,
      8,
      8,
      8,
    );
    assert_eq!(out[3][5], src[5][7]);
  }
}
