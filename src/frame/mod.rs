// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::MI_SIZE_LOG2;
use crate::error::CodecError;
use crate::util::*;

mod plane;
pub use plane::*;

/// One video frame in 4:2:0 layout.
///
/// Luma dimensions are rounded up to a whole number of 8×8 mode-info units;
/// callers are expected to replicate the right and bottom edges of
/// narrower content into the alignment area.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<T: Pixel> {
  /// Planes constituting the frame.
  pub planes: [Plane<T>; 3],
}

impl<T: Pixel> Frame<T> {
  /// Creates a new frame with the given parameters.
  ///
  /// # Errors
  ///
  /// Returns `ResourceExhausted` when a plane cannot be allocated.
  pub fn try_new(width: usize, height: usize) -> Result<Self, CodecError> {
    let luma_width = width.align_power_of_two(MI_SIZE_LOG2);
    let luma_height = height.align_power_of_two(MI_SIZE_LOG2);
    let chroma_width = luma_width >> 1;
    let chroma_height = luma_height >> 1;

    Ok(Frame {
      planes: [
        Plane::try_new(luma_width, luma_height, 0, 0)?,
        Plane::try_new(chroma_width, chroma_height, 1, 1)?,
        Plane::try_new(chroma_width, chroma_height, 1, 1)?,
      ],
    })
  }

  /// Creates a new frame with the given parameters.
  ///
  /// # Panics
  ///
  /// Panics if the planes cannot be allocated.
  pub fn new(width: usize, height: usize) -> Self {
    let luma_width = width.align_power_of_two(MI_SIZE_LOG2);
    let luma_height = height.align_power_of_two(MI_SIZE_LOG2);
    Frame {
      planes: [
        Plane::new(luma_width, luma_height, 0, 0),
        Plane::new(luma_width >> 1, luma_height >> 1, 1, 1),
        Plane::new(luma_width >> 1, luma_height >> 1, 1, 1),
      ],
    }
  }

  #[inline(always)]
  pub fn width(&self) -> usize {
    self.planes[0].cfg.width
  }

  #[inline(always)]
  pub fn height(&self) -> usize {
    self.planes[0].cfg.height
  }
}
