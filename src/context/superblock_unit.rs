// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

pub const SB_SIZE_LOG2: usize = 6;
pub const SB_SIZE: usize = 1 << SB_SIZE_LOG2;

/// Mode info is stored per 8×8 luma unit.
pub const MI_SIZE_LOG2: usize = 3;
pub const MI_SIZE: usize = 1 << MI_SIZE_LOG2;
pub const MIB_SIZE_LOG2: usize = SB_SIZE_LOG2 - MI_SIZE_LOG2;
pub const MIB_SIZE: usize = 1 << MIB_SIZE_LOG2;
pub const MIB_MASK: usize = MIB_SIZE - 1;

pub const SUPERBLOCK_TO_PLANE_SHIFT: usize = SB_SIZE_LOG2;
pub const SUPERBLOCK_TO_BLOCK_SHIFT: usize = MIB_SIZE_LOG2;
pub const BLOCK_TO_PLANE_SHIFT: usize = MI_SIZE_LOG2;

/// Absolute offset in superblocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SuperBlockOffset {
  pub x: usize,
  pub y: usize,
}

/// Offset in superblocks inside a tile.
///
/// Tiles are vertical strips of the frame, so `x` is relative to the tile's
/// first superblock column while `y` is the frame superblock row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileSuperBlockOffset(pub SuperBlockOffset);

impl SuperBlockOffset {
  /// Offset of a block inside the current superblock.
  #[inline]
  pub const fn block_offset(
    self, block_x: usize, block_y: usize,
  ) -> BlockOffset {
    BlockOffset {
      x: (self.x << SUPERBLOCK_TO_BLOCK_SHIFT) + block_x,
      y: (self.y << SUPERBLOCK_TO_BLOCK_SHIFT) + block_y,
    }
  }

  /// Offset of the top-left pixel of this superblock.
  #[inline]
  pub const fn plane_offset(self, plane: &PlaneConfig) -> PlaneOffset {
    PlaneOffset {
      x: (self.x as isize) << (SUPERBLOCK_TO_PLANE_SHIFT - plane.xdec),
      y: (self.y as isize) << (SUPERBLOCK_TO_PLANE_SHIFT - plane.ydec),
    }
  }
}

impl TileSuperBlockOffset {
  #[inline]
  pub const fn block_offset(
    self, block_x: usize, block_y: usize,
  ) -> TileBlockOffset {
    TileBlockOffset(self.0.block_offset(block_x, block_y))
  }

  #[inline]
  pub const fn plane_offset(self, plane: &PlaneConfig) -> PlaneOffset {
    self.0.plane_offset(plane)
  }
}
