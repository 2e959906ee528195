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
use crate::util::*;

use std::marker::PhantomData;

/// Narrowest tile column, in superblocks.
pub const MIN_TILE_WIDTH_SB: usize = 4;
/// Widest tile column, in superblocks.
pub const MAX_TILE_WIDTH_SB: usize = 64;
pub const MAX_TILE_ROWS_LOG2: usize = 2;

/// Tiling information
///
/// Tiles are column strips spanning the whole frame height. They are coded
/// independently of each other: no context crosses a column boundary.
/// Tile rows only split the bitstream; coding contexts flow from one tile
/// row into the next.
///
/// The method tile_iter_mut() actually provides tiled views of FrameState
/// and FrameBlocks.
#[derive(Debug, Clone, Copy)]
pub struct TilingInfo {
  pub frame_width: usize,
  pub frame_height: usize,
  pub cols_log2: usize,
  pub rows_log2: usize,
  pub cols: usize, // number of columns of tiles within the whole frame
  pub rows: usize, // number of rows of tiles within the whole frame
}

impl TilingInfo {
  pub fn new(
    frame_width: usize, frame_height: usize, tile_cols_log2: usize,
    tile_rows_log2: usize,
  ) -> Self {
    // Frame::new() aligns to the next multiple of 8
    let frame_width = frame_width.align_power_of_two(MI_SIZE_LOG2);
    let frame_height = frame_height.align_power_of_two(MI_SIZE_LOG2);
    let sb_cols = frame_width.align_power_of_two_and_shift(SB_SIZE_LOG2);

    let (min_log2, max_log2) = Self::tile_cols_log2_range(sb_cols);
    let cols_log2 = tile_cols_log2.clamp(min_log2, max_log2);
    if cols_log2 != tile_cols_log2 {
      log::warn!(
        "{} tile columns requested for {} superblock columns, using {}",
        1 << tile_cols_log2,
        sb_cols,
        1 << cols_log2
      );
    }
    let rows_log2 = tile_rows_log2.min(MAX_TILE_ROWS_LOG2);

    Self {
      frame_width,
      frame_height,
      cols_log2,
      rows_log2,
      cols: 1 << cols_log2,
      rows: 1 << rows_log2,
    }
  }

  /// Allowed range of `log2(tile columns)` for a frame `sb_cols` superblocks
  /// wide.
  pub fn tile_cols_log2_range(sb_cols: usize) -> (usize, usize) {
    let min_log2 = Self::tile_log2(MAX_TILE_WIDTH_SB, sb_cols);
    let mut max_log2 = 1;
    while (sb_cols >> max_log2) >= MIN_TILE_WIDTH_SB {
      max_log2 += 1;
    }
    (min_log2, (max_log2 - 1).max(min_log2))
  }

  /// Return the smallest value for `k` such that `blk_size << k` is greater
  /// than or equal to `target`.
  pub fn tile_log2(blk_size: usize, target: usize) -> usize {
    let mut k = 0;
    while (blk_size << k) < target {
      k += 1;
    }
    k
  }

  /// Start of tile `idx` out of `1 << log2`, in mode-info units, for a
  /// dimension of `mis` mode-info units.
  fn tile_offset(idx: usize, mis: usize, log2: usize) -> usize {
    let sbs = mis.align_power_of_two_and_shift(MIB_SIZE_LOG2);
    let offset = ((idx * sbs) >> log2) << MIB_SIZE_LOG2;
    offset.min(mis)
  }

  #[inline(always)]
  pub const fn tile_count(&self) -> usize {
    self.cols * self.rows
  }

  /// Mode-info column range of tile column `col`.
  pub fn tile_col_range(&self, col: usize) -> (usize, usize) {
    let mi_cols = self.frame_width >> MI_SIZE_LOG2;
    (
      Self::tile_offset(col, mi_cols, self.cols_log2),
      Self::tile_offset(col + 1, mi_cols, self.cols_log2),
    )
  }

  /// Split the frame state and the block grid into one view per tile
  /// column.
  pub fn tile_iter_mut<'a, T: Pixel>(
    &self, fs: &'a mut FrameState<T>, fb: &'a mut FrameBlocks,
  ) -> TileContextIterMut<'a, T> {
    TileContextIterMut { ti: *self, fs, fb, next: 0, phantom: PhantomData }
  }
}

/// Container for all tiled views
pub struct TileContextMut<'a, T: Pixel> {
  pub ts: TileStateMut<'a, T>,
  pub tb: TileBlocksMut<'a>,
}

/// Iterator over tiled views
pub struct TileContextIterMut<'a, T: Pixel> {
  ti: TilingInfo,
  fs: *mut FrameState<T>,
  fb: *mut FrameBlocks,
  next: usize,
  phantom: PhantomData<(&'a mut FrameState<T>, &'a mut FrameBlocks)>,
}

impl<'a, T: Pixel> Iterator for TileContextIterMut<'a, T> {
  type Item = TileContextMut<'a, T>;

  fn next(&mut self) -> Option<Self::Item> {
    while self.next < self.ti.cols {
      let col = self.next;
      self.next += 1;

      let (mi_start, mi_end) = self.ti.tile_col_range(col);
      if mi_start == mi_end {
        // more tile columns than superblock columns
        continue;
      }
      let mi_rows = self.ti.frame_height >> MI_SIZE_LOG2;
      let sbo = SuperBlockOffset { x: mi_start >> MIB_SIZE_LOG2, y: 0 };
      let width = (mi_end - mi_start) << MI_SIZE_LOG2;

      // Each column only touches its own strip of the frame state and of
      // the block grid, so the views never alias.
      let ctx = TileContextMut {
        ts: {
          let fs = unsafe { &mut *self.fs };
          TileStateMut::new(fs, sbo, width, self.ti.frame_height)
        },
        tb: {
          let fb = unsafe { &mut *self.fb };
          TileBlocksMut::new(fb, mi_start, 0, mi_end - mi_start, mi_rows)
        },
      };
      return Some(ctx);
    }
    None
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.ti.cols - self.next;
    (0, Some(remaining))
  }
}

#[cfg(test)]
pub mod test {
  use super::*;
  use crate::encoder::FrameState;
  use crate::frame::*;
  use crate::segmentation::SegmentationState;

  fn frame_state(width: usize, height: usize) -> FrameState<u8> {
    FrameState::new(
      Frame::new(width, height),
      SegmentationState::default(),
    )
  }

  #[test]
  fn test_tile_cols_log2_range() {
    // 1920 pixels: 30 superblocks
    assert_eq!(TilingInfo::tile_cols_log2_range(30), (0, 2));
    // 64 superblocks or fewer may be a single tile
    assert_eq!(TilingInfo::tile_cols_log2_range(64).0, 0);
    assert_eq!(TilingInfo::tile_cols_log2_range(65).0, 1);
    // tiny frames cannot be split at all
    assert_eq!(TilingInfo::tile_cols_log2_range(3), (0, 0));
  }

  #[test]
  fn test_tile_count_is_clamped() {
    let ti = TilingInfo::new(1920, 1080, 4, 5);
    assert_eq!(ti.cols, 4);
    assert_eq!(ti.rows, 4);
    let ti = TilingInfo::new(160, 90, 2, 0);
    assert_eq!(ti.cols, 1);
    assert_eq!(ti.tile_count(), 1);
  }

  #[test]
  fn test_tile_col_ranges_cover_frame() {
    let ti = TilingInfo::new(1920, 1080, 2, 0);
    let mut expected = 0;
    for col in 0..ti.cols {
      let (start, end) = ti.tile_col_range(col);
      assert_eq!(start, expected);
      assert_eq!(start % MIB_SIZE, 0);
      expected = end;
    }
    assert_eq!(expected, 1920 >> MI_SIZE_LOG2);
  }

  #[test]
  fn test_tile_iter_views() {
    let mut fs = frame_state(1024, 200);
    let mut fb = FrameBlocks::new(1024 >> 3, 200 >> 3);
    let ti = TilingInfo::new(1024, 200, 1, 0);
    assert_eq!(ti.cols, 2);

    {
      let tiles = ti.tile_iter_mut(&mut fs, &mut fb).collect::<Vec<_>>();
      assert_eq!(tiles.len(), 2);
      assert_eq!(tiles[0].ts.sbo, SuperBlockOffset { x: 0, y: 0 });
      assert_eq!(tiles[1].ts.sbo, SuperBlockOffset { x: 8, y: 0 });
      for ctx in &tiles {
        assert_eq!(ctx.ts.width, 512);
        assert_eq!(ctx.ts.height, 200);
        assert_eq!(ctx.ts.sb_height, 4);
        assert_eq!(ctx.tb.cols(), 64);
        assert_eq!(ctx.tb.rows(), 25);
        assert_eq!(ctx.ts.rec.planes[1].rect().width, 256);
      }
      assert_eq!(tiles[1].tb.x(), 64);
    }

    // writes through one view land in the right part of the frame
    {
      let mut tiles = ti.tile_iter_mut(&mut fs, &mut fb).collect::<Vec<_>>();
      tiles[1].ts.rec.planes[0][3][5] = 7;
      tiles[1].tb[2][1].skip = true;
    }
    assert_eq!(fs.rec.planes[0].data[3 * fs.rec.planes[0].cfg.stride + 517], 7);
    assert!(fb[2][65].skip);
  }
}
