// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

use crate::mc::{CompoundType, InterpFilter, SWITCHABLE_FILTERS};
use crate::wedge::{is_wedge_used, WEDGE_BITS};

use std::ops::{Index, IndexMut};

pub const ZEROMV_OFFSET: usize = 3;
pub const REFMV_OFFSET: usize = 4;
pub const NEWMV_CTX_MASK: u16 = (1 << ZEROMV_OFFSET) - 1;
pub const ZEROMV_CTX_MASK: u16 = (1 << (REFMV_OFFSET - ZEROMV_OFFSET)) - 1;
pub const REFMV_CTX_MASK: u16 = (1 << (8 - REFMV_OFFSET)) - 1;
pub const ALL_ZERO_FLAG_OFFSET: usize = 8;
pub const SKIP_NEARESTMV_OFFSET: usize = 9;
pub const SKIP_NEARMV_OFFSET: usize = 10;
pub const SKIP_NEARESTMV_SUB8X8_OFFSET: usize = 11;

/// Absolute offset in blocks, where a block is defined
/// to be an `N*N` square where `N == (1 << BLOCK_TO_PLANE_SHIFT)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockOffset {
  pub x: usize,
  pub y: usize,
}

/// Offset in blocks inside a tile. `x` counts from the first column of the
/// tile, `y` is the frame row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileBlockOffset(pub BlockOffset);

impl BlockOffset {
  /// Offset of the superblock in which this block is located.
  #[inline]
  const fn sb_offset(self) -> SuperBlockOffset {
    SuperBlockOffset {
      x: self.x >> SUPERBLOCK_TO_BLOCK_SHIFT,
      y: self.y >> SUPERBLOCK_TO_BLOCK_SHIFT,
    }
  }

  /// Offset of the top-left pixel of this block.
  #[inline]
  pub const fn plane_offset(self, plane: &PlaneConfig) -> PlaneOffset {
    PlaneOffset {
      x: ((self.x << BLOCK_TO_PLANE_SHIFT) >> plane.xdec) as isize,
      y: ((self.y << BLOCK_TO_PLANE_SHIFT) >> plane.ydec) as isize,
    }
  }

  #[inline]
  pub const fn x_in_sb(self) -> usize {
    self.x & MIB_MASK
  }

  #[inline]
  pub const fn y_in_sb(self) -> usize {
    self.y & MIB_MASK
  }

  #[inline]
  pub fn with_offset(self, col_offset: isize, row_offset: isize) -> BlockOffset {
    let x = self.x as isize + col_offset;
    let y = self.y as isize + row_offset;
    debug_assert!(x >= 0);
    debug_assert!(y >= 0);

    BlockOffset { x: x as usize, y: y as usize }
  }
}

impl TileBlockOffset {
  /// Offset of the superblock in which this block is located.
  #[inline]
  pub const fn sb_offset(self) -> TileSuperBlockOffset {
    TileSuperBlockOffset(self.0.sb_offset())
  }

  /// Offset of the top-left pixel of this block, relative to the tile.
  #[inline]
  pub const fn plane_offset(self, plane: &PlaneConfig) -> PlaneOffset {
    self.0.plane_offset(plane)
  }

  #[inline]
  pub const fn x_in_sb(self) -> usize {
    self.0.x_in_sb()
  }

  #[inline]
  pub const fn y_in_sb(self) -> usize {
    self.0.y_in_sb()
  }

  #[inline]
  pub fn with_offset(
    self, col_offset: isize, row_offset: isize,
  ) -> TileBlockOffset {
    Self(self.0.with_offset(col_offset, row_offset))
  }
}

/// An entry of the motion vector candidate stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CandidateMV {
  pub this_mv: MotionVector,
  pub comp_mv: MotionVector,
  pub weight: u32,
}

/// Mode and motion of one 4×4 quarter of an 8×8 unit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubBlockInfo {
  pub mode: PredictionMode,
  pub mv: [MotionVector; 2],
}

/// Mode info of one 8×8 unit. Every unit covered by a block holds a copy of
/// the block's decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Block {
  pub mode: PredictionMode,
  pub uv_mode: PredictionMode,
  pub partition: PartitionType,
  pub bsize: BlockSize,
  pub skip: bool,
  pub ref_frames: [RefType; 2],
  /// Motion of the block, equal to `bmi[3].mv` below 8×8.
  pub mv: [MotionVector; 2],
  /// Per-4×4 modes and vectors; all four equal the block's for 8×8 and up.
  pub bmi: [SubBlockInfo; 4],
  pub ref_mv_idx: u8,
  pub txsize: TxSize,
  pub tx_type: TxType,
  pub interp_filter: InterpFilter,
  /// Blending of the two predictions; always averaging for single
  /// reference blocks.
  pub compound: CompoundType,
  pub segmentation_idx: u8,
  pub dering_gain: u8,
}

impl Block {
  #[inline]
  pub fn is_inter(&self) -> bool {
    self.ref_frames[0] > INTRA_FRAME
  }
  #[inline]
  pub fn has_second_ref(&self) -> bool {
    self.ref_frames[1] > INTRA_FRAME && self.ref_frames[1] != NONE_FRAME
  }
  /// Whether the blend of the two predictions is coded, which needs a
  /// size that may use a wedge.
  #[inline]
  pub fn codes_compound_type(&self) -> bool {
    self.has_second_ref() && is_wedge_used(self.bsize)
  }
  /// Motion vector of the 4×4 quarter `b` for reference slot `list`.
  #[inline]
  pub fn sub_mv(&self, list: usize, b: usize) -> MotionVector {
    if self.bsize.is_sub8x8() {
      self.bmi[b].mv[list]
    } else {
      self.mv[list]
    }
  }
}

impl Default for Block {
  fn default() -> Block {
    Block {
      mode: PredictionMode::DC_PRED,
      uv_mode: PredictionMode::DC_PRED,
      partition: PartitionType::PARTITION_NONE,
      bsize: BLOCK_64X64,
      skip: false,
      ref_frames: [INTRA_FRAME, NONE_FRAME],
      mv: [MotionVector::default(); 2],
      bmi: [SubBlockInfo::default(); 4],
      ref_mv_idx: 0,
      txsize: TX_4X4,
      tx_type: DCT_DCT,
      interp_filter: InterpFilter::EIGHTTAP_REGULAR,
      compound: CompoundType::Average,
      segmentation_idx: 0,
      dering_gain: 0,
    }
  }
}

/// Snapshot of the above and left contexts of one superblock, taken before
/// a speculative partition hypothesis and restored after it.
#[derive(Clone, Debug)]
pub struct BlockContextCheckpoint {
  x: usize,
  above_partition_context: [u8; MIB_SIZE],
  left_partition_context: [u8; MIB_SIZE],
  above_coeff_context: [[u8; MIB_SIZE * 2]; MAX_PLANES],
  left_coeff_context: [[u8; MIB_SIZE * 2]; MAX_PLANES],
}

pub struct BlockContext<'a> {
  pub above_partition_context: [u8; MAX_TILE_WIDTH_MI],
  pub left_partition_context: [u8; MIB_SIZE],
  /// Nonzero flags per 4×4 column, per plane.
  pub above_coeff_context: [[u8; MAX_TILE_WIDTH >> 2]; MAX_PLANES],
  pub left_coeff_context: [[u8; MIB_SIZE * 2]; MAX_PLANES],
  pub blocks: &'a mut TileBlocksMut<'a>,
}

impl<'a> BlockContext<'a> {
  pub fn new(blocks: &'a mut TileBlocksMut<'a>) -> Self {
    BlockContext {
      above_partition_context: [0; MAX_TILE_WIDTH_MI],
      left_partition_context: [0; MIB_SIZE],
      above_coeff_context: [[0; MAX_TILE_WIDTH >> 2]; MAX_PLANES],
      left_coeff_context: [[0; MIB_SIZE * 2]; MAX_PLANES],
      blocks,
    }
  }

  pub fn checkpoint(&self, tile_bo: &TileBlockOffset) -> BlockContextCheckpoint {
    let x = tile_bo.0.x & !MIB_MASK;
    let mut checkpoint = BlockContextCheckpoint {
      x,
      above_partition_context: [0; MIB_SIZE],
      left_partition_context: self.left_partition_context,
      above_coeff_context: [[0; MIB_SIZE * 2]; MAX_PLANES],
      left_coeff_context: self.left_coeff_context,
    };
    checkpoint
      .above_partition_context
      .copy_from_slice(&self.above_partition_context[x..][..MIB_SIZE]);
    for (p, (dst, src)) in checkpoint
      .above_coeff_context
      .iter_mut()
      .zip(self.above_coeff_context.iter())
      .enumerate()
    {
      let xdec = (p > 0) as usize;
      let n = (MIB_SIZE * 2) >> xdec;
      dst[..n].copy_from_slice(&src[((x * 2) >> xdec)..][..n]);
    }
    checkpoint
  }

  pub fn rollback(&mut self, checkpoint: &BlockContextCheckpoint) {
    let x = checkpoint.x;
    self.above_partition_context[x..][..MIB_SIZE]
      .copy_from_slice(&checkpoint.above_partition_context);
    self.left_partition_context = checkpoint.left_partition_context;
    for (p, (dst, src)) in self
      .above_coeff_context
      .iter_mut()
      .zip(checkpoint.above_coeff_context.iter())
      .enumerate()
    {
      let xdec = (p > 0) as usize;
      let n = (MIB_SIZE * 2) >> xdec;
      dst[((x * 2) >> xdec)..][..n].copy_from_slice(&src[..n]);
    }
    self.left_coeff_context = checkpoint.left_coeff_context;
  }

  /// Clear the left contexts at the start of a superblock row.
  pub fn reset_left_contexts(&mut self) {
    self.left_partition_context = [0; MIB_SIZE];
    self.left_coeff_context = [[0; MIB_SIZE * 2]; MAX_PLANES];
  }

  /// Clear the above contexts at the start of a tile.
  pub fn reset_above_contexts(&mut self) {
    self.above_partition_context = [0; MAX_TILE_WIDTH_MI];
    for ctx in self.above_coeff_context.iter_mut() {
      ctx.fill(0);
    }
  }

  #[inline]
  pub fn has_above(&self, bo: TileBlockOffset) -> bool {
    bo.0.y > 0
  }

  #[inline]
  pub fn has_left(&self, bo: TileBlockOffset) -> bool {
    bo.0.x > 0
  }

  #[inline]
  pub fn above_block(&self, bo: TileBlockOffset) -> Option<&Block> {
    self.has_above(bo).then(|| self.blocks.above_of(bo))
  }

  #[inline]
  pub fn left_block(&self, bo: TileBlockOffset) -> Option<&Block> {
    self.has_left(bo).then(|| self.blocks.left_of(bo))
  }

  /// Coefficient context of a transform block: the number of neighbouring
  /// 4×4 columns and rows that carried nonzero coefficients, capped to 2.
  pub fn coeff_context(
    &self, plane: usize, bo: TileBlockOffset, tx_x4: usize, tx_y4: usize,
    tx_size: TxSize, xdec: usize, ydec: usize,
  ) -> usize {
    let n4 = tx_size.width() >> 2;
    let ax = ((bo.0.x << 1) >> xdec) + tx_x4;
    let ly = ((bo.y_in_sb() << 1) >> ydec) + tx_y4;
    let above = self.above_coeff_context[plane][ax..]
      .iter()
      .take(n4)
      .any(|&c| c != 0);
    let left =
      self.left_coeff_context[plane][ly..].iter().take(n4).any(|&c| c != 0);
    above as usize + left as usize
  }

  /// Record whether a transform block at the given 4×4 position had
  /// nonzero coefficients.
  pub fn set_coeff_context(
    &mut self, plane: usize, bo: TileBlockOffset, tx_x4: usize, tx_y4: usize,
    tx_size: TxSize, xdec: usize, ydec: usize, nonzero: bool,
  ) {
    let n4 = tx_size.width() >> 2;
    let ax = ((bo.0.x << 1) >> xdec) + tx_x4;
    let ly = ((bo.y_in_sb() << 1) >> ydec) + tx_y4;
    let above = &mut self.above_coeff_context[plane];
    let aend = (ax + n4).min(above.len());
    above[ax..aend].fill(nonzero as u8);
    let left = &mut self.left_coeff_context[plane];
    let lend = (ly + n4).min(left.len());
    left[ly..lend].fill(nonzero as u8);
  }

  /// Mark a skipped block as having no coefficients in any plane.
  pub fn reset_skip_context(&mut self, bo: TileBlockOffset, bsize: BlockSize) {
    for p in 0..MAX_PLANES {
      let dec = (p > 0) as usize;
      let w4 = (bsize.width() >> 2 >> dec).max(1);
      let h4 = (bsize.height() >> 2 >> dec).max(1);
      let ax = (bo.0.x << 1) >> dec;
      let ly = (bo.y_in_sb() << 1) >> dec;
      let above = &mut self.above_coeff_context[p];
      let aend = (ax + w4).min(above.len());
      above[ax..aend].fill(0);
      let left = &mut self.left_coeff_context[p];
      let lend = (ly + h4).min(left.len());
      left[ly..lend].fill(0);
    }
  }

  pub fn skip_context(&self, bo: TileBlockOffset) -> usize {
    let above_skip = self.above_block(bo).map_or(0, |b| b.skip as usize);
    let left_skip = self.left_block(bo).map_or(0, |b| b.skip as usize);
    above_skip + left_skip
  }

  pub fn intra_inter_context(&self, bo: TileBlockOffset) -> usize {
    match (self.above_block(bo), self.left_block(bo)) {
      (Some(above), Some(left)) => {
        let above_intra = !above.is_inter();
        let left_intra = !left.is_inter();
        if above_intra && left_intra {
          3
        } else {
          (above_intra || left_intra) as usize
        }
      }
      (Some(edge), None) | (None, Some(edge)) => 2 * !edge.is_inter() as usize,
      (None, None) => 0,
    }
  }

  /// Context of the single/compound choice; ALTREF is the fixed compound
  /// reference.
  pub fn comp_inter_context(&self, bo: TileBlockOffset) -> usize {
    let fixed = |b: &Block| b.ref_frames[0] == ALTREF_FRAME;
    match (self.above_block(bo), self.left_block(bo)) {
      (Some(above), Some(left)) => {
        if !above.has_second_ref() && !left.has_second_ref() {
          (fixed(above) ^ fixed(left)) as usize
        } else if !above.has_second_ref() {
          2 + (fixed(above) || !above.is_inter()) as usize
        } else if !left.has_second_ref() {
          2 + (fixed(left) || !left.is_inter()) as usize
        } else {
          4
        }
      }
      (Some(edge), None) | (None, Some(edge)) => {
        if !edge.has_second_ref() {
          fixed(edge) as usize
        } else {
          3
        }
      }
      (None, None) => 1,
    }
  }

  /// Neighbour evidence for a binary reference choice: intra neighbours
  /// count one, inter neighbours on the `1` side of the choice count two.
  fn ref_context<F: Fn(&Block) -> bool>(
    &self, bo: TileBlockOffset, one_side: F,
  ) -> usize {
    let score = |b: &Block| {
      if !b.is_inter() {
        1
      } else if one_side(b) {
        2
      } else {
        0
      }
    };
    match (self.above_block(bo), self.left_block(bo)) {
      (Some(above), Some(left)) => score(above) + score(left),
      (Some(edge), None) | (None, Some(edge)) => 2 * score(edge),
      (None, None) => 2,
    }
  }

  /// Context of the LAST versus {GOLDEN, ALTREF} choice.
  pub fn single_ref_p1_context(&self, bo: TileBlockOffset) -> usize {
    self.ref_context(bo, |b| b.ref_frames[0] != LAST_FRAME)
  }

  /// Context of the GOLDEN versus ALTREF choice.
  pub fn single_ref_p2_context(&self, bo: TileBlockOffset) -> usize {
    self.ref_context(bo, |b| b.ref_frames[0] == ALTREF_FRAME)
  }

  /// Context of the variable compound reference, LAST versus GOLDEN.
  pub fn comp_ref_context(&self, bo: TileBlockOffset) -> usize {
    self.ref_context(bo, |b| b.ref_frames[0] == GOLDEN_FRAME)
  }

  pub fn switchable_interp_context(&self, bo: TileBlockOffset) -> usize {
    let filter_of = |b: Option<&Block>| match b {
      Some(b) if b.is_inter() => b.interp_filter as usize,
      _ => SWITCHABLE_FILTERS,
    };
    let left_type = filter_of(self.left_block(bo));
    let above_type = filter_of(self.above_block(bo));
    if left_type == above_type {
      left_type
    } else if left_type == SWITCHABLE_FILTERS {
      above_type
    } else if above_type == SWITCHABLE_FILTERS {
      left_type
    } else {
      SWITCHABLE_FILTERS
    }
  }

  /// Modes above and left of the 4×4 quarter `b` of a key frame block,
  /// given the quarters of the current block decided so far.
  pub fn kf_mode_context(
    &self, bo: TileBlockOffset, b: usize, cur: &[SubBlockInfo; 4],
  ) -> (PredictionMode, PredictionMode) {
    let neighbour_mode = |blk: Option<&Block>, idx: usize| match blk {
      Some(blk) if !blk.is_inter() => blk.bmi[idx].mode,
      _ => PredictionMode::DC_PRED,
    };
    let above = if b < 2 {
      neighbour_mode(self.above_block(bo), b + 2)
    } else {
      cur[b - 2].mode
    };
    let left = if b & 1 == 0 {
      neighbour_mode(self.left_block(bo), b + 1)
    } else {
      cur[b - 1].mode
    };
    (above, left)
  }
}

/// Mode info for the whole frame, one entry per 8×8 unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBlocks {
  blocks: Box<[Block]>,
  pub cols: usize,
  pub rows: usize,
}

impl FrameBlocks {
  pub fn new(cols: usize, rows: usize) -> Self {
    Self {
      blocks: vec![Block::default(); cols * rows].into_boxed_slice(),
      cols,
      rows,
    }
  }

  #[inline(always)]
  pub fn as_tile_blocks(&self) -> TileBlocks<'_> {
    TileBlocks::new(self, 0, 0, self.cols, self.rows)
  }

  #[inline(always)]
  pub fn as_tile_blocks_mut(&mut self) -> TileBlocksMut<'_> {
    TileBlocksMut::new(self, 0, 0, self.cols, self.rows)
  }
}

impl Index<usize> for FrameBlocks {
  type Output = [Block];
  #[inline]
  fn index(&self, index: usize) -> &Self::Output {
    &self.blocks[index * self.cols..(index + 1) * self.cols]
  }
}

impl IndexMut<usize> for FrameBlocks {
  #[inline]
  fn index_mut(&mut self, index: usize) -> &mut Self::Output {
    &mut self.blocks[index * self.cols..(index + 1) * self.cols]
  }
}

// for convenience, also index by BlockOffset
impl Index<BlockOffset> for FrameBlocks {
  type Output = Block;
  #[inline]
  fn index(&self, bo: BlockOffset) -> &Self::Output {
    &self[bo.y][bo.x]
  }
}

impl IndexMut<BlockOffset> for FrameBlocks {
  #[inline]
  fn index_mut(&mut self, bo: BlockOffset) -> &mut Self::Output {
    &mut self[bo.y][bo.x]
  }
}

impl<'a> ContextWriter<'a> {
  pub fn write_intra_mode_kf<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, b: usize, cur: &[SubBlockInfo; 4],
    mode: PredictionMode,
  ) {
    let (above, left) = self.bc.kf_mode_context(bo, b, cur);
    w.tree(
      &intra_mode_tree,
      &kf_y_mode_prob[above as usize][left as usize],
      mode as usize,
    );
  }

  pub fn write_intra_mode<W: Writer>(
    &self, w: &mut W, bsize: BlockSize, mode: PredictionMode,
  ) {
    w.tree(&intra_mode_tree, &self.fc.y_mode[y_mode_group(bsize)], mode as usize);
  }

  pub fn write_intra_uv_mode<W: Writer>(
    &self, w: &mut W, uv_mode: PredictionMode, y_mode: PredictionMode,
  ) {
    w.tree(&intra_mode_tree, &self.fc.uv_mode[y_mode as usize], uv_mode as usize);
  }

  pub fn write_skip<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, skip: bool,
  ) {
    let ctx = self.bc.skip_context(bo);
    w.bit(skip, self.fc.skip[ctx]);
  }

  pub fn write_is_inter<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, is_inter: bool,
  ) {
    let ctx = self.bc.intra_inter_context(bo);
    w.bit(is_inter, self.fc.intra_inter[ctx]);
  }

  /// Reference frames of an inter block. `select` is set when the frame
  /// allows both single and compound prediction.
  pub fn write_ref_frames<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, rf: [RefType; 2], select: bool,
  ) {
    let compound = rf[1].is_inter();
    if select {
      let ctx = self.bc.comp_inter_context(bo);
      w.bit(compound, self.fc.comp_inter[ctx]);
    }
    if compound {
      let ctx = self.bc.comp_ref_context(bo);
      w.bit(rf[0] == GOLDEN_FRAME, self.fc.comp_ref[ctx]);
    } else {
      let ctx1 = self.bc.single_ref_p1_context(bo);
      w.bit(rf[0] != LAST_FRAME, self.fc.single_ref[ctx1][0]);
      if rf[0] != LAST_FRAME {
        let ctx2 = self.bc.single_ref_p2_context(bo);
        w.bit(rf[0] == ALTREF_FRAME, self.fc.single_ref[ctx2][1]);
      }
    }
  }

  pub fn write_inter_mode<W: Writer>(
    &self, w: &mut W, mode: PredictionMode, mode_context: u16,
  ) {
    let newmv_ctx = (mode_context & NEWMV_CTX_MASK) as usize;
    w.bit(mode != PredictionMode::NEWMV, self.fc.newmv[newmv_ctx]);
    if mode == PredictionMode::NEWMV
      || mode_context & (1 << ALL_ZERO_FLAG_OFFSET) != 0
    {
      return;
    }
    let zeromv_ctx =
      ((mode_context >> ZEROMV_OFFSET) & ZEROMV_CTX_MASK) as usize;
    w.bit(mode != PredictionMode::ZEROMV, self.fc.zeromv[zeromv_ctx]);
    if mode == PredictionMode::ZEROMV {
      return;
    }
    let refmv_ctx = refmv_context(mode_context);
    w.bit(mode != PredictionMode::NEARESTMV, self.fc.refmv[refmv_ctx]);
  }

  /// Index of the predictor used by NEWMV and NEARMV among the candidates.
  pub fn write_drl_mode<W: Writer>(
    &self, w: &mut W, mode: PredictionMode, ref_mv_idx: usize,
    stack: &[CandidateMV],
  ) {
    let range = match mode {
      PredictionMode::NEWMV => 0..2,
      PredictionMode::NEARMV => 1..3,
      _ => return,
    };
    let base = range.start;
    for idx in range {
      if stack.len() > idx + 1 {
        let ctx = drl_context(stack, idx);
        let stop = ref_mv_idx + base == idx;
        w.bit(!stop, self.fc.drl[ctx]);
        if stop {
          return;
        }
      }
    }
  }

  pub fn write_switchable_interp<W: Writer>(
    &self, w: &mut W, bo: TileBlockOffset, filter: InterpFilter,
  ) {
    let ctx = self.bc.switchable_interp_context(bo);
    w.tree(
      &switchable_interp_tree,
      &self.fc.switchable_interp[ctx],
      filter as usize,
    );
  }

  /// Blend of a compound block of wedge-capable size: the type, then the
  /// wedge index and sign or the difference mask polarity.
  pub fn write_compound_type<W: Writer>(
    &self, w: &mut W, bsize: BlockSize, compound: CompoundType,
  ) {
    w.tree(
      &compound_type_tree,
      &self.fc.compound_type[bsize as usize],
      compound.symbol(),
    );
    match compound {
      CompoundType::Average => {}
      CompoundType::Wedge { index, sign } => {
        w.literal(WEDGE_BITS, index as u32);
        w.literal(1, sign as u32);
      }
      CompoundType::Diff { inverse } => w.literal(1, inverse as u32),
    }
  }

  pub fn write_tx_type<W: Writer>(
    &self, w: &mut W, tx_size: TxSize, tx_type: TxType, is_inter: bool,
    y_mode: PredictionMode,
  ) {
    if let Some(s) = ext_tx_size(tx_size) {
      let probs = if is_inter {
        &self.fc.inter_ext_tx[s]
      } else {
        &self.fc.intra_ext_tx[s][y_mode.intra_tx_type() as usize]
      };
      w.tree(&ext_tx_tree, probs, tx_type as usize);
    }
  }
}

/// Context of the NEARESTMV/NEARMV choice.
#[inline]
pub fn refmv_context(mode_context: u16) -> usize {
  let mut ctx = ((mode_context >> REFMV_OFFSET) & REFMV_CTX_MASK) as usize;
  if mode_context & (1 << SKIP_NEARESTMV_OFFSET) != 0 {
    ctx = 6;
  }
  if mode_context & (1 << SKIP_NEARMV_OFFSET) != 0 {
    ctx = 7;
  }
  if mode_context & (1 << SKIP_NEARESTMV_SUB8X8_OFFSET) != 0 {
    ctx = 8;
  }
  ctx
}

/// Context of the candidate index symbol at `idx`, from how much the two
/// adjacent candidates were supported by the nearest neighbours.
pub fn drl_context(stack: &[CandidateMV], idx: usize) -> usize {
  let w0 = stack[idx].weight;
  let w1 = stack[idx + 1].weight;
  match (w0 >= REF_CAT_LEVEL, w1 >= REF_CAT_LEVEL) {
    (true, true) => (w0 != w1) as usize,
    (true, false) => 2,
    (false, false) => 3 + (w0 != w1) as usize,
    (false, true) => 0,
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ec::{cost_bit, WriterCounter};
  use pretty_assertions::assert_eq;

  #[test]
  fn drl_contexts() {
    let c = |weight| CandidateMV { weight, ..Default::default() };
    let stack = [c(4 * REF_CAT_LEVEL), c(4 * REF_CAT_LEVEL), c(2), c(2), c(1)];
    assert_eq!(drl_context(&stack, 0), 0);
    assert_eq!(drl_context(&stack, 1), 2);
    assert_eq!(drl_context(&stack, 2), 3);
    assert_eq!(drl_context(&stack, 3), 4);
  }

  #[test]
  fn checkpoint_restores_contexts() {
    let mut fb = FrameBlocks::new(16, 16);
    let mut tb = fb.as_tile_blocks_mut();
    let mut bc = BlockContext::new(&mut tb);
    let bo = TileBlockOffset(BlockOffset { x: 8, y: 8 });
    let cp = bc.checkpoint(&bo);
    bc.set_coeff_context(0, bo, 0, 0, TX_16X16, 0, 0, true);
    bc.above_partition_context[9] = 14;
    bc.left_partition_context[3] = 12;
    assert_eq!(bc.coeff_context(0, bo, 0, 0, TX_4X4, 0, 0), 2);
    bc.rollback(&cp);
    assert_eq!(bc.coeff_context(0, bo, 0, 0, TX_16X16, 0, 0), 0);
    assert_eq!(bc.above_partition_context[9], 0);
    assert_eq!(bc.left_partition_context[3], 0);
  }

  #[test]
  fn neighbour_contexts_at_frame_corner() {
    let mut fb = FrameBlocks::new(4, 4);
    let mut tb = fb.as_tile_blocks_mut();
    let bc = BlockContext::new(&mut tb);
    let bo = TileBlockOffset::default();
    assert_eq!(bc.skip_context(bo), 0);
    assert_eq!(bc.intra_inter_context(bo), 0);
    assert_eq!(bc.comp_inter_context(bo), 1);
    assert_eq!(bc.single_ref_p1_context(bo), 2);
    assert_eq!(bc.switchable_interp_context(bo), SWITCHABLE_FILTERS);
  }

  #[test]
  fn inter_neighbours_shift_contexts() {
    let mut fb = FrameBlocks::new(4, 4);
    for b in fb[0].iter_mut() {
      b.ref_frames = [GOLDEN_FRAME, NONE_FRAME];
      b.skip = true;
      b.interp_filter = InterpFilter::EIGHTTAP_SMOOTH;
    }
    fb[1][0] = fb[0][0];
    let mut tb = fb.as_tile_blocks_mut();
    let bc = BlockContext::new(&mut tb);
    let bo = TileBlockOffset(BlockOffset { x: 1, y: 1 });
    assert_eq!(bc.skip_context(bo), 2);
    assert_eq!(bc.intra_inter_context(bo), 0);
    assert_eq!(bc.single_ref_p1_context(bo), 4);
    assert_eq!(bc.single_ref_p2_context(bo), 0);
    assert_eq!(
      bc.switchable_interp_context(bo),
      InterpFilter::EIGHTTAP_SMOOTH as usize
    );
  }

  #[test]
  fn inter_mode_symbols_match_context_bits() {
    let fc = FrameContext::default();
    let mut fb = FrameBlocks::new(4, 4);
    let mut tb = fb.as_tile_blocks_mut();
    let cw = ContextWriter::new(&fc, BlockContext::new(&mut tb));
    let all_zero = 1 << ALL_ZERO_FLAG_OFFSET;
    let mut w = WriterCounter::new();
    cw.write_inter_mode(&mut w, PredictionMode::ZEROMV, all_zero);
    assert_eq!(w.tell_frac(), cost_bit(fc.newmv[0], true) as u64);

    let mut w = WriterCounter::new();
    cw.write_inter_mode(&mut w, PredictionMode::NEARMV, 1 << SKIP_NEARMV_OFFSET);
    let expected = cost_bit(fc.newmv[0], true)
      + cost_bit(fc.zeromv[0], true)
      + cost_bit(fc.refmv[7], true);
    assert_eq!(w.tell_frac(), expected as u64);
  }
}
