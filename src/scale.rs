// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::error::CodecError;
use crate::mc::{SUBPEL_BITS, SUBPEL_MASK};

pub const REF_SCALE_SHIFT: u32 = 14;
pub const REF_NO_SCALE: i32 = 1 << REF_SCALE_SHIFT;

const fn fixed_point_scale_factor(other: usize, this: usize) -> i32 {
  ((other << REF_SCALE_SHIFT) / this) as i32
}

/// Mapping from positions in the current frame to positions in a
/// reference frame of possibly different dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleFactors {
  x_scale_fp: i32,
  y_scale_fp: i32,
  /// Horizontal advance per output sample, in 1/16 reference pels.
  pub x_step_q4: usize,
  pub y_step_q4: usize,
}

impl Default for ScaleFactors {
  fn default() -> Self {
    ScaleFactors {
      x_scale_fp: REF_NO_SCALE,
      y_scale_fp: REF_NO_SCALE,
      x_step_q4: 1 << SUBPEL_BITS,
      y_step_q4: 1 << SUBPEL_BITS,
    }
  }
}

impl ScaleFactors {
  /// Scale factors from a `this_w`×`this_h` frame into an
  /// `other_w`×`other_h` reference.
  ///
  /// # Errors
  ///
  /// Returns `UnsupportedBitstream` when the reference is more than twice
  /// as large or more than sixteen times smaller than the current frame in
  /// either dimension.
  pub fn new(
    other_w: usize, other_h: usize, this_w: usize, this_h: usize,
  ) -> Result<Self, CodecError> {
    if !valid_ref_frame_size(other_w, other_h, this_w, this_h) {
      log::error!(
        "reference of {}x{} cannot predict a {}x{} frame",
        other_w,
        other_h,
        this_w,
        this_h
      );
      return Err(CodecError::UnsupportedBitstream(format!(
        "reference frame has invalid dimensions {other_w}x{other_h} for a \
         {this_w}x{this_h} frame"
      )));
    }
    let x_scale_fp = fixed_point_scale_factor(other_w, this_w);
    let y_scale_fp = fixed_point_scale_factor(other_h, this_h);
    let mut sf = ScaleFactors { x_scale_fp, y_scale_fp, ..Default::default() };
    sf.x_step_q4 = sf.scaled_x(1 << SUBPEL_BITS) as usize;
    sf.y_step_q4 = sf.scaled_y(1 << SUBPEL_BITS) as usize;
    Ok(sf)
  }

  #[inline]
  pub const fn is_scaled(&self) -> bool {
    self.x_scale_fp != REF_NO_SCALE || self.y_scale_fp != REF_NO_SCALE
  }

  #[inline]
  pub const fn scaled_x(&self, val: i32) -> i32 {
    ((val as i64 * self.x_scale_fp as i64) >> REF_SCALE_SHIFT) as i32
  }

  #[inline]
  pub const fn scaled_y(&self, val: i32) -> i32 {
    ((val as i64 * self.y_scale_fp as i64) >> REF_SCALE_SHIFT) as i32
  }

  /// Position in the reference, in 1/16 pels, of the sample at integer
  /// position `(x, y)` displaced by `mv_q4` (row, col in 1/16 pels).
  pub const fn scaled_position(
    &self, x: i32, y: i32, mv_q4: (i32, i32),
  ) -> (isize, isize) {
    if !self.is_scaled() {
      return (
        ((x << SUBPEL_BITS) + mv_q4.1) as isize,
        ((y << SUBPEL_BITS) + mv_q4.0) as isize,
      );
    }
    let x_off_q4 = self.scaled_x(x << SUBPEL_BITS) & SUBPEL_MASK as i32;
    let y_off_q4 = self.scaled_y(y << SUBPEL_BITS) & SUBPEL_MASK as i32;
    let px = (self.scaled_x(x) << SUBPEL_BITS)
      + self.scaled_x(mv_q4.1)
      + x_off_q4;
    let py = (self.scaled_y(y) << SUBPEL_BITS)
      + self.scaled_y(mv_q4.0)
      + y_off_q4;
    (px as isize, py as isize)
  }
}

/// Whether a reference of the given size may predict the current frame.
#[inline]
pub const fn valid_ref_frame_size(
  ref_w: usize, ref_h: usize, this_w: usize, this_h: usize,
) -> bool {
  this_w > 0
    && this_h > 0
    && 2 * this_w >= ref_w
    && 2 * this_h >= ref_h
    && this_w <= 16 * ref_w
    && this_h <= 16 * ref_h
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn same_size_is_unscaled() {
    let sf = ScaleFactors::new(64, 48, 64, 48).unwrap();
    assert!(!sf.is_scaled());
    assert_eq!(sf.x_step_q4, 16);
    assert_eq!(sf.scaled_position(8, 4, (-3, 5)), (8 * 16 + 5, 4 * 16 - 3));
  }

  #[test]
  fn half_size_reference_steps_by_eight() {
    let sf = ScaleFactors::new(32, 24, 64, 48).unwrap();
    assert!(sf.is_scaled());
    assert_eq!(sf.x_step_q4, 8);
    assert_eq!(sf.y_step_q4, 8);
    assert_eq!(sf.scaled_position(16, 16, (0, 0)), (8 * 16, 8 * 16));
  }

  #[test]
  fn invalid_scale_is_unsupported() {
    // More than twice as large.
    assert!(matches!(
      ScaleFactors::new(130, 48, 64, 48),
      Err(CodecError::UnsupportedBitstream(_))
    ));
    // More than sixteen times smaller.
    assert!(ScaleFactors::new(64, 2, 64, 48).is_err());
    assert!(ScaleFactors::new(128, 96, 64, 48).is_ok());
  }
}
