// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::partition::*;

use std::cmp;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice;

/// Tiled view of `FrameBlocks`
///
/// A tile spans whole frame rows: `y` of a [`TileBlockOffset`] is a frame
/// row while `x` counts from the first column of the tile.
#[derive(Debug)]
pub struct TileBlocks<'a> {
  data: *const Block,
  x: usize,
  y: usize,
  cols: usize,
  rows: usize,
  frame_cols: usize,
  frame_rows: usize,
  phantom: PhantomData<&'a Block>,
}

/// Mutable tiled view of `FrameBlocks`
#[derive(Debug)]
pub struct TileBlocksMut<'a> {
  data: *mut Block,
  // private to guarantee borrowing rules
  x: usize,
  y: usize,
  cols: usize,
  rows: usize,
  frame_cols: usize,
  frame_rows: usize,
  phantom: PhantomData<&'a mut Block>,
}

// common impl for TileBlocks and TileBlocksMut
macro_rules! tile_blocks_common {
  // $name: TileBlocks or TileBlocksMut
  // $opt_mut: nothing or mut
  ($name:ident $(,$opt_mut:tt)?) => {
    impl<'a> $name<'a> {

      #[inline(always)]
      pub fn new(
        frame_blocks: &'a $($opt_mut)? FrameBlocks,
        x: usize,
        y: usize,
        cols: usize,
        rows: usize,
      ) -> Self {
        Self {
          data: & $($opt_mut)? frame_blocks[y][x],
          x,
          y,
          cols,
          rows,
          frame_cols: frame_blocks.cols,
          frame_rows: frame_blocks.rows,
          phantom: PhantomData,
        }
      }

      #[inline(always)]
      pub const fn x(&self) -> usize {
        self.x
      }

      #[inline(always)]
      pub const fn y(&self) -> usize {
        self.y
      }

      #[inline(always)]
      pub const fn cols(&self) -> usize {
        self.cols
      }

      #[inline(always)]
      pub const fn rows(&self) -> usize {
        self.rows
      }

      #[inline(always)]
      pub const fn frame_cols(&self) -> usize {
        self.frame_cols
      }

      #[inline(always)]
      pub const fn frame_rows(&self) -> usize {
        self.frame_rows
      }

      #[inline(always)]
      pub fn above_of(&self, bo: TileBlockOffset) -> &Block {
        &self[bo.0.y - 1][bo.0.x]
      }

      #[inline(always)]
      pub fn left_of(&self, bo: TileBlockOffset) -> &Block {
        &self[bo.0.y][bo.0.x - 1]
      }

      /// Dering gain index stored on the first unit of a superblock.
      pub fn get_dering_gain(&self, sbo: TileSuperBlockOffset) -> u8 {
        let bo = sbo.block_offset(0, 0).0;
        self[bo.y][bo.x].dering_gain
      }

      /// Whether every unit of the superblock inside the tile is skipped.
      pub fn sb_all_skip(&self, sbo: TileSuperBlockOffset) -> bool {
        let bo = sbo.block_offset(0, 0).0;
        let x_end = cmp::min(bo.x + MIB_SIZE, self.cols);
        let y_end = cmp::min(bo.y + MIB_SIZE, self.rows);
        (bo.y..y_end).all(|y| self[y][bo.x..x_end].iter().all(|b| b.skip))
      }
    }

    unsafe impl Send for $name<'_> {}
    unsafe impl Sync for $name<'_> {}

    impl Index<usize> for $name<'_> {
      type Output = [Block];
      #[inline(always)]
      fn index(&self, index: usize) -> &Self::Output {
        assert!(index < self.rows);
        // SAFETY: The above assert ensures we do not access OOB data.
        unsafe {
          let ptr = self.data.add(index * self.frame_cols);
          slice::from_raw_parts(ptr, self.cols)
        }
      }
    }

    // for convenience, also index by TileBlockOffset
    impl Index<TileBlockOffset> for $name<'_> {
      type Output = Block;
      #[inline(always)]
      fn index(&self, bo: TileBlockOffset) -> &Self::Output {
        &self[bo.0.y][bo.0.x]
      }
    }
  }
}

tile_blocks_common!(TileBlocks);
tile_blocks_common!(TileBlocksMut, mut);

impl TileBlocksMut<'_> {
  #[inline(always)]
  pub const fn as_const(&self) -> TileBlocks<'_> {
    TileBlocks {
      data: self.data,
      x: self.x,
      y: self.y,
      cols: self.cols,
      rows: self.rows,
      frame_cols: self.frame_cols,
      frame_rows: self.frame_rows,
      phantom: PhantomData,
    }
  }

  #[inline(always)]
  pub fn for_each<F>(&mut self, bo: TileBlockOffset, bsize: BlockSize, f: F)
  where
    F: Fn(&mut Block),
  {
    let mut bw = bsize.width_mi();
    let bh = bsize.height_mi();

    if bo.0.x + bw >= self.cols {
      bw = self.cols - bo.0.x;
    }
    for y in 0..bh {
      if bo.0.y + y >= self.rows {
        continue;
      }
      for block in self[bo.0.y + y][bo.0.x..bo.0.x + bw].iter_mut() {
        f(block);
      }
    }
  }

  #[inline(always)]
  pub fn set_block_size(&mut self, bo: TileBlockOffset, bsize: BlockSize) {
    self.for_each(bo, bsize, |block| block.bsize = bsize);
  }

  /// Commit the whole decision of a block to every unit it covers.
  #[inline(always)]
  pub fn set_block(&mut self, bo: TileBlockOffset, bsize: BlockSize, b: &Block) {
    let b = *b;
    self.for_each(bo, bsize, |block| *block = b);
  }

  #[inline(always)]
  pub fn set_dering_gain(&mut self, sbo: TileSuperBlockOffset, gain: u8) {
    let bo = sbo.block_offset(0, 0).0;
    let bw = cmp::min(bo.x + MIB_SIZE, self.cols);
    let bh = cmp::min(bo.y + MIB_SIZE, self.rows);
    for y in bo.y..bh {
      for x in bo.x..bw {
        self[y][x].dering_gain = gain;
      }
    }
  }
}

impl IndexMut<usize> for TileBlocksMut<'_> {
  #[inline(always)]
  fn index_mut(&mut self, index: usize) -> &mut Self::Output {
    assert!(index < self.rows);
    // SAFETY: The above assert ensures we do not access OOB data.
    unsafe {
      let ptr = self.data.add(index * self.frame_cols);
      slice::from_raw_parts_mut(ptr, self.cols)
    }
  }
}

impl IndexMut<TileBlockOffset> for TileBlocksMut<'_> {
  #[inline(always)]
  fn index_mut(&mut self, bo: TileBlockOffset) -> &mut Self::Output {
    &mut self[bo.0.y][bo.0.x]
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn committed_block_covers_its_footprint() {
    let mut fb = FrameBlocks::new(16, 8);
    let mut tb = TileBlocksMut::new(&mut fb, 8, 0, 8, 8);
    let b = Block { bsize: BLOCK_16X16, skip: true, ..Default::default() };
    let bo = TileBlockOffset(BlockOffset { x: 2, y: 4 });
    tb.set_block(bo, BLOCK_16X16, &b);
    assert_eq!(tb[5][3].bsize, BLOCK_16X16);
    assert!(tb[4][2].skip && tb[5][3].skip);
    assert!(!tb[4][4].skip);
    // The tile starts at frame column 8.
    assert!(fb[5][11].skip);
    assert!(!fb[5][3].skip);
  }

  #[test]
  fn superblock_skip_summary() {
    let mut fb = FrameBlocks::new(12, 8);
    let mut tb = fb.as_tile_blocks_mut();
    let sbo = TileSuperBlockOffset(SuperBlockOffset { x: 1, y: 0 });
    let bo = sbo.block_offset(0, 0);
    tb.for_each(bo, BLOCK_64X64, |b| b.skip = true);
    assert!(tb.sb_all_skip(sbo));
    tb[bo.with_offset(1, 7)].skip = false;
    assert!(!tb.sb_all_skip(sbo));
    tb.set_dering_gain(sbo, 2);
    assert_eq!(tb.get_dering_gain(sbo), 2);
  }
}
