// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

use crate::context::*;
use crate::encoder::FrameState;
use crate::entropymode::FrameCounts;
use crate::frame::*;
use crate::segmentation::SegmentationState;
use crate::util::*;

/// Tiled view of `FrameState`
///
/// Some fields (like `counts`) are only written during tile-encoding, so
/// they are owned by the tile and merged once all tiles are done.
///
/// Some other fields (like `input` or `segmentation`) are not written
/// tile-wise, so they just reference the matching field in `FrameState`.
///
/// `rec` is written tile-wise, but must be accessible frame-wise once the
/// tile views vanish (for the deringing and restoration passes).
#[derive(Debug)]
pub struct TileStateMut<'a, T: Pixel> {
  /// First superblock of the tile, in frame superblock units.
  pub sbo: SuperBlockOffset,
  pub sb_width: usize,
  pub sb_height: usize,
  pub mi_width: usize,
  pub mi_height: usize,
  pub width: usize,
  pub height: usize,
  pub input: &'a Frame<T>,     // the whole frame
  pub input_tile: Tile<'a, T>, // the current tile
  pub rec: TileMut<'a, T>,
  pub segmentation: &'a SegmentationState,
  pub counts: FrameCounts,
}

impl<'a, T: Pixel> TileStateMut<'a, T> {
  /// `width` and `height` are the tile dimensions in luma pixels, clipped to
  /// the frame.
  pub fn new(
    fs: &'a mut FrameState<T>, sbo: SuperBlockOffset, width: usize,
    height: usize,
  ) -> Self {
    debug_assert!(
      width % MI_SIZE == 0,
      "Tile width must be a multiple of MI_SIZE"
    );
    debug_assert!(
      height % MI_SIZE == 0,
      "Tile height must be a multiple of MI_SIZE"
    );

    let luma_rect = TileRect {
      x: sbo.x << SB_SIZE_LOG2,
      y: sbo.y << SB_SIZE_LOG2,
      width,
      height,
    };

    Self {
      sbo,
      sb_width: width.align_power_of_two_and_shift(SB_SIZE_LOG2),
      sb_height: height.align_power_of_two_and_shift(SB_SIZE_LOG2),
      mi_width: width >> MI_SIZE_LOG2,
      mi_height: height >> MI_SIZE_LOG2,
      width,
      height,
      input: &fs.input,
      input_tile: Tile::new(&fs.input, luma_rect),
      rec: TileMut::new(&mut fs.rec, luma_rect),
      segmentation: &fs.segmentation,
      counts: FrameCounts::default(),
    }
  }

  #[inline(always)]
  pub fn tile_rect(&self) -> TileRect {
    TileRect {
      x: self.sbo.x << SB_SIZE_LOG2,
      y: self.sbo.y << SB_SIZE_LOG2,
      width: self.width,
      height: self.height,
    }
  }

  #[inline(always)]
  pub fn to_frame_block_offset(&self, tile_bo: TileBlockOffset) -> BlockOffset {
    self.tile_rect().to_frame_block_offset(tile_bo)
  }
}
