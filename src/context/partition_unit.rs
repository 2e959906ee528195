// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

use crate::ec::WriterCounter;

/// Above and left partition context bits left behind by a block of each
/// size. Bit `n` is set when the block is narrower (above) or shorter
/// (left) than `8 << n` pixels.
static partition_context_lookup: [[u8; 2]; BlockSize::BLOCK_SIZES_ALL] = [
  [15, 15], // 4X4   - {0b1111, 0b1111}
  [15, 14], // 4X8   - {0b1111, 0b1110}
  [14, 15], // 8X4   - {0b1110, 0b1111}
  [14, 14], // 8X8   - {0b1110, 0b1110}
  [14, 12], // 8X16  - {0b1110, 0b1100}
  [12, 14], // 16X8  - {0b1100, 0b1110}
  [12, 12], // 16X16 - {0b1100, 0b1100}
  [12, 8],  // 16X32 - {0b1100, 0b1000}
  [8, 12],  // 32X16 - {0b1000, 0b1100}
  [8, 8],   // 32X32 - {0b1000, 0b1000}
  [8, 0],   // 32X64 - {0b1000, 0b0000}
  [0, 8],   // 64X32 - {0b0000, 0b1000}
  [0, 0],   // 64X64 - {0b0000, 0b0000}
];

impl<'a> BlockContext<'a> {
  /// Context of the partition symbol of the square block `bsize` at `bo`.
  pub fn partition_plane_context(
    &self, bo: TileBlockOffset, bsize: BlockSize,
  ) -> usize {
    debug_assert!(bsize.is_sqr() && bsize >= BLOCK_8X8);
    let bsl = bsize.width_mi_log2();
    let above = (self.above_partition_context[bo.0.x] >> bsl) & 1;
    let left = (self.left_partition_context[bo.y_in_sb()] >> bsl) & 1;
    (left * 2 + above) as usize + bsl * PARTITION_PLOFFSET
  }

  /// Record the partition of a `bsize` block whose first child is
  /// `subsize`.
  pub fn update_partition_context(
    &mut self, bo: TileBlockOffset, subsize: BlockSize, bsize: BlockSize,
  ) {
    let bs = bsize.width_mi();
    let [above, left] = partition_context_lookup[subsize as usize];
    let x = bo.0.x;
    let end = (x + bs).min(self.above_partition_context.len());
    self.above_partition_context[x..end].fill(above);
    let y = bo.y_in_sb();
    let end = (y + bs).min(MIB_SIZE);
    self.left_partition_context[y..end].fill(left);
  }
}

impl<'a> ContextWriter<'a> {
  /// Partition symbol of a square block. Blocks crossing the right or
  /// bottom frame edge only code the choices still open to them.
  pub fn write_partition<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, p: PartitionType, bsize: BlockSize,
  ) {
    let hbs = bsize.width_mi() >> 1;
    let has_cols = bo.0.x + hbs < self.bc.blocks.cols();
    let has_rows = bo.0.y + hbs < self.bc.blocks.rows();
    let ctx = self.bc.partition_plane_context(bo, bsize);
    let probs = &self.fc.partition[ctx];

    if has_rows && has_cols {
      w.tree(&partition_tree, probs, p as usize);
    } else if !has_rows && has_cols {
      debug_assert!(p == PARTITION_SPLIT || p == PARTITION_HORZ);
      w.bit(p == PARTITION_SPLIT, probs[1]);
    } else if has_rows && !has_cols {
      debug_assert!(p == PARTITION_SPLIT || p == PARTITION_VERT);
      w.bit(p == PARTITION_SPLIT, probs[2]);
    } else {
      debug_assert!(p == PARTITION_SPLIT);
    }
  }

  /// Rate of a partition symbol under the same edge rules.
  pub fn partition_rate(
    &self, bo: TileBlockOffset, p: PartitionType, bsize: BlockSize,
  ) -> u32 {
    let mut w = WriterCounter::new();
    if bsize >= BLOCK_8X8 {
      self.write_partition(&mut w, bo, p, bsize);
    }
    w.tell_frac() as u32
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ec::cost_bit;

  #[test]
  fn partition_context_tracks_neighbours() {
    let mut fb = FrameBlocks::new(16, 16);
    let mut tb = fb.as_tile_blocks_mut();
    let mut bc = BlockContext::new(&mut tb);
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });
    assert_eq!(bc.partition_plane_context(bo, BLOCK_64X64), 12);
    bc.update_partition_context(bo, BLOCK_32X32, BLOCK_64X64);
    let right = TileBlockOffset(BlockOffset { x: 8, y: 0 });
    // Left neighbour was split down to 32x32: the left bit is set at 64x64
    // and clear at 32x32.
    assert_eq!(bc.partition_plane_context(right, BLOCK_64X64), 12 + 2);
    bc.left_partition_context = [0; MIB_SIZE];
    bc.update_partition_context(bo, BLOCK_8X8, BLOCK_16X16);
    let below = TileBlockOffset(BlockOffset { x: 0, y: 2 });
    assert_eq!(bc.partition_plane_context(below, BLOCK_16X16), 4 + 1);
  }

  #[test]
  fn edge_partitions_code_one_bit() {
    let fc = FrameContext::default();
    // 12 units wide: the second 64x64 crosses the right edge.
    let mut fb = FrameBlocks::new(12, 16);
    let mut tb = fb.as_tile_blocks_mut();
    let cw = ContextWriter::new(&fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 8, y: 0 });
    let mut w = WriterCounter::new();
    cw.write_partition(&mut w, bo, PARTITION_VERT, BLOCK_64X64);
    let ctx = cw.bc.partition_plane_context(bo, BLOCK_64X64);
    assert_eq!(w.tell_frac(), cost_bit(fc.partition[ctx][2], false) as u64);
  }
}
