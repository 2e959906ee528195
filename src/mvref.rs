// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Motion vector reference candidates.
//!
//! For every reference frame (and compound pair) a block builds a weighted
//! stack of candidate vectors from its spatial neighbours and the
//! co-located motion of the previous frame, and a packed mode context that
//! drives the inter mode symbols.

use crate::context::*;
use crate::mc::MotionVector;
use crate::partition::BlockSize::*;
use crate::partition::RefType::*;
use crate::partition::*;
use crate::predict::PredictionMode;
use crate::tiling::*;

use arrayvec::ArrayVec;

pub const MAX_MV_REF_CANDIDATES: usize = 2;
/// Candidates may point up to 16 pels outside the frame, in 1/8 pel.
const MV_BORDER: i32 = 16 << 3;

/// Quarter of a sub-8×8 neighbour next to quarter `block` of the current
/// 8×8 unit, `[block][neighbour is above]`.
const IDX_N_COLUMN_TO_SUBBLOCK: [[usize; 2]; 4] =
  [[1, 2], [1, 3], [3, 2], [3, 3]];

pub type MvStack = ArrayVec<CandidateMV, MAX_REF_MV_STACK_SIZE>;

/// Frame-level inputs of the candidate search.
#[derive(Clone, Copy, Debug, Default)]
pub struct MvRefParams<'a> {
  /// Motion of the previous frame, when it may be used.
  pub prev_frame_mvs: Option<&'a FrameMvs>,
  pub allow_high_precision_mv: bool,
  pub ref_frame_sign_bias: [bool; TOTAL_REFS_PER_FRAME],
}

/// Distances from a block to the frame edges, in 1/8 pel. Negative values
/// point left or up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEdges {
  pub left: i32,
  pub right: i32,
  pub top: i32,
  pub bottom: i32,
}

impl BlockEdges {
  pub fn new(
    frame_bo: BlockOffset, bsize: BlockSize, frame_cols: usize,
    frame_rows: usize,
  ) -> Self {
    let to_eighth_pel = |mi: isize| (mi * MI_SIZE as isize * 8) as i32;
    BlockEdges {
      left: -to_eighth_pel(frame_bo.x as isize),
      right: to_eighth_pel(
        frame_cols as isize - bsize.width_mi() as isize - frame_bo.x as isize,
      ),
      top: -to_eighth_pel(frame_bo.y as isize),
      bottom: to_eighth_pel(
        frame_rows as isize - bsize.height_mi() as isize - frame_bo.y as isize,
      ),
    }
  }

  fn of(blocks: &TileBlocks<'_>, bo: TileBlockOffset, bsize: BlockSize) -> Self {
    let frame_bo = BlockOffset { x: blocks.x() + bo.0.x, y: bo.0.y };
    BlockEdges::new(frame_bo, bsize, blocks.frame_cols(), blocks.frame_rows())
  }
}

/// Candidates of one reference frame type for one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvRefResult {
  pub stack: MvStack,
  pub mv_list: [MotionVector; MAX_MV_REF_CANDIDATES],
  pub nearest: MotionVector,
  pub near: MotionVector,
  pub context: u16,
}

/// Candidates of every reference frame type for one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockMvRefs {
  pub refs: [MvRefResult; MODE_CTX_REF_FRAMES],
  allow_high_precision_mv: bool,
}

impl BlockMvRefs {
  #[inline]
  pub fn get(&self, rf: [RefType; 2]) -> &MvRefResult {
    &self.refs[ref_frame_type(rf)]
  }

  pub fn mode_contexts(&self) -> [u16; MODE_CTX_REF_FRAMES] {
    let mut ctx = [0; MODE_CTX_REF_FRAMES];
    for (c, r) in ctx.iter_mut().zip(self.refs.iter()) {
      *c = r.context;
    }
    ctx
  }

  pub fn mode_context(
    &self, rf: [RefType; 2], bsize: BlockSize, block: Option<usize>,
  ) -> u16 {
    mode_context_analyzer(&self.mode_contexts(), rf, bsize, block)
  }

  /// Vectors implied by `mode` for a block of 8×8 or larger. For NEWMV
  /// this is the predictor the coded difference is taken against.
  pub fn mode_mv(
    &self, rf: [RefType; 2], mode: PredictionMode, ref_mv_idx: usize,
  ) -> [MotionVector; 2] {
    use PredictionMode::*;

    let allow_hp = self.allow_high_precision_mv;
    let lower = |mv| lower_mv_precision(mv, allow_hp);
    let compound = rf[1].is_inter();
    let lists = if compound { 2 } else { 1 };
    let mut out = [MotionVector::default(); 2];
    let stack = &self.get(rf).stack;

    match mode {
      ZEROMV => {}
      NEARESTMV => {
        if compound && !stack.is_empty() {
          out = [lower(stack[0].this_mv), lower(stack[0].comp_mv)];
        } else {
          for (o, &r) in out.iter_mut().zip(rf.iter()).take(lists) {
            *o = self.refs[r as usize].nearest;
          }
        }
      }
      NEARMV => {
        if compound && stack.len() > 1 {
          if let Some(c) = stack.get(1 + ref_mv_idx) {
            out = [lower(c.this_mv), lower(c.comp_mv)];
          }
        } else {
          for (o, &r) in out.iter_mut().zip(rf.iter()).take(lists) {
            *o = self.refs[r as usize].near;
          }
          if ref_mv_idx > 0 {
            if let Some(c) = self.refs[rf[0] as usize].stack.get(1 + ref_mv_idx)
            {
              out[0] = lower(c.this_mv);
            }
          }
        }
      }
      NEWMV => {
        if stack.len() > 1 {
          let c = stack[ref_mv_idx.min(stack.len() - 1)];
          out[0] = lower(c.this_mv);
          if compound {
            out[1] = lower(c.comp_mv);
          }
        } else {
          for (o, &r) in out.iter_mut().zip(rf.iter()).take(lists) {
            *o = self.refs[r as usize].nearest;
          }
        }
      }
      _ => {}
    }
    out
  }
}

/// Result of the candidate search for one 4×4 quarter of a sub-8×8 block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubMvRefs {
  pub nearest: MotionVector,
  pub near: MotionVector,
  pub stack: MvStack,
}

/// Drop the 1/8 pel bit when high precision is off or the vector is too
/// large for it.
#[inline]
pub fn lower_mv_precision(mv: MotionVector, allow_hp: bool) -> MotionVector {
  if allow_hp && use_mv_hp(mv) {
    return mv;
  }
  let lower = |v: i16| {
    if v & 1 != 0 {
      v - v.signum()
    } else {
      v
    }
  };
  MotionVector { row: lower(mv.row), col: lower(mv.col) }
}

/// Clamp a candidate to at most `MV_BORDER` beyond the frame, for a block of
/// `bw`×`bh` pixels.
#[inline]
pub fn clamp_mv_ref(
  mv: MotionVector, bw: usize, bh: usize, edges: &BlockEdges,
) -> MotionVector {
  let bw = bw as i32 * 8;
  let bh = bh as i32 * 8;
  MotionVector {
    row: (mv.row as i32)
      .clamp(edges.top - bh - MV_BORDER, edges.bottom + bh + MV_BORDER)
      as i16,
    col: (mv.col as i32)
      .clamp(edges.left - bw - MV_BORDER, edges.right + bw + MV_BORDER)
      as i16,
  }
}

/// Whether the block above and to the right of a block at `(mi_row,
/// mi_col)` has already been coded, following the recursive partition
/// order within the superblock.
pub fn has_top_right(mi_row: usize, mi_col: usize, bsize: BlockSize) -> bool {
  let n8_w = bsize.width_mi();
  let n8_h = bsize.height_mi();
  let mut bs = n8_w.max(n8_h);
  let mask_row = mi_row & MIB_MASK;
  let mask_col = mi_col & MIB_MASK;

  // In a split partition every block but the top-left one of each quad is
  // missing its top-right neighbour once the right half has been reached.
  let mut has_tr = !((mask_row & bs) != 0 && (mask_col & bs) != 0);

  while bs < MIB_SIZE {
    if mask_col & bs == 0 {
      break;
    }
    if (mask_col & (2 * bs)) != 0 && (mask_row & (2 * bs)) != 0 {
      has_tr = false;
      break;
    }
    bs <<= 1;
  }

  // The left of two vertical rectangles always has its top-right; the
  // bottom of two horizontal ones never does.
  if n8_w < n8_h && mi_col & (n8_h - 1) == 0 {
    has_tr = true;
  }
  if n8_w > n8_h && mi_row & (n8_w - 1) != 0 {
    has_tr = false;
  }

  has_tr
}

#[inline]
fn is_inside(
  blocks: &TileBlocks<'_>, bo: TileBlockOffset, row: isize, col: isize,
) -> bool {
  let y = bo.0.y as isize + row;
  let x = bo.0.x as isize + col;
  y >= 0 && x >= 0 && (y as usize) < blocks.rows() && (x as usize) < blocks.cols()
}

#[inline]
fn candidate<'b>(
  blocks: &'b TileBlocks<'_>, bo: TileBlockOffset, row: isize, col: isize,
) -> Option<&'b Block> {
  if is_inside(blocks, bo, row, col) {
    Some(&blocks[(bo.0.y as isize + row) as usize]
      [(bo.0.x as isize + col) as usize])
  } else {
    None
  }
}

/// Vector of the candidate facing quarter `block` of the current unit, or
/// the candidate's block vector.
#[inline]
fn sub_block_mv(
  cand: &Block, list: usize, search_col: isize, block: Option<usize>,
) -> MotionVector {
  match block {
    Some(b) if cand.bsize.is_sub8x8() => {
      cand.bmi[IDX_N_COLUMN_TO_SUBBLOCK[b][(search_col == 0) as usize]].mv
        [list]
    }
    _ => cand.mv[list],
  }
}

/// Merge a vector into the stack. Returns true when it opened a new entry.
fn add_or_weigh(
  stack: &mut MvStack, this_mv: MotionVector, comp_mv: MotionVector,
  weight: u32,
) -> bool {
  if let Some(c) =
    stack.iter_mut().find(|c| c.this_mv == this_mv && c.comp_mv == comp_mv)
  {
    c.weight += weight;
    false
  } else if !stack.is_full() {
    stack.push(CandidateMV { this_mv, comp_mv, weight });
    true
  } else {
    false
  }
}

/// Add the motion of one neighbour spanning `len` units of the current
/// block edge. Returns the number of new entries coded as NEWMV.
fn add_ref_mv_candidate(
  stack: &mut MvStack, cand: &Block, rf: [RefType; 2], allow_hp: bool,
  len: usize, block: Option<usize>, col: isize,
) -> usize {
  if !cand.is_inter() {
    return 0;
  }
  let weight = 2 * len as u32;
  let alt_block = block.filter(|_| cand.bsize.is_sub8x8()).map(|b| 3 - b);
  let is_newmv = cand.mode == PredictionMode::NEWMV;
  let lower = |mv| lower_mv_precision(mv, allow_hp);
  let mut newmv_count = 0;

  if rf[1] == NONE_FRAME {
    for list in 0..2 {
      if cand.ref_frames[list] != rf[0] {
        continue;
      }
      let mv = lower(sub_block_mv(cand, list, col, block));
      if add_or_weigh(stack, mv, MotionVector::default(), weight) && is_newmv
      {
        newmv_count += 1;
      }
      if let Some(alt) = alt_block {
        let mv = lower(sub_block_mv(cand, list, col, Some(alt)));
        if add_or_weigh(stack, mv, MotionVector::default(), len as u32)
          && is_newmv
        {
          newmv_count += 1;
        }
      }
    }
  } else if cand.ref_frames == rf {
    let pair = |b| {
      [lower(sub_block_mv(cand, 0, col, b)), lower(sub_block_mv(cand, 1, col, b))]
    };
    let [this_mv, comp_mv] = pair(block);
    if add_or_weigh(stack, this_mv, comp_mv, weight) && is_newmv {
      newmv_count += 1;
    }
    if let Some(alt) = alt_block {
      let [this_mv, comp_mv] = pair(Some(alt));
      if add_or_weigh(stack, this_mv, comp_mv, len as u32) && is_newmv {
        newmv_count += 1;
      }
    }
  }
  newmv_count
}

struct Scan<'a, 'b> {
  blocks: &'a TileBlocks<'b>,
  bo: TileBlockOffset,
  bsize: BlockSize,
  rf: [RefType; 2],
  block: Option<usize>,
  allow_hp: bool,
}

impl Scan<'_, '_> {
  /// Walk the row `row_offset` units above the block, left to right.
  fn row(&self, stack: &mut MvStack, row_offset: isize) -> usize {
    let n8_w = self.bsize.width_mi();
    let use_step_16 = n8_w >= 8;
    let mut newmv_count = 0;
    let mut i = 0;
    while i < n8_w && !stack.is_full() {
      if let Some(cand) = candidate(self.blocks, self.bo, row_offset, i as isize)
      {
        let mut len = n8_w.min(cand.bsize.width_mi());
        if use_step_16 {
          len = len.max(2);
        }
        newmv_count += add_ref_mv_candidate(
          stack,
          cand,
          self.rf,
          self.allow_hp,
          len,
          self.block,
          i as isize,
        );
        i += len;
      } else {
        i += if use_step_16 { 2 } else { 1 };
      }
    }
    newmv_count
  }

  /// Walk the column `col_offset` units left of the block, top to bottom.
  fn col(&self, stack: &mut MvStack, col_offset: isize) -> usize {
    let n8_h = self.bsize.height_mi();
    let use_step_16 = n8_h >= 8;
    let mut newmv_count = 0;
    let mut i = 0;
    while i < n8_h && !stack.is_full() {
      if let Some(cand) = candidate(self.blocks, self.bo, i as isize, col_offset)
      {
        let mut len = n8_h.min(cand.bsize.height_mi());
        if use_step_16 {
          len = len.max(2);
        }
        newmv_count += add_ref_mv_candidate(
          stack,
          cand,
          self.rf,
          self.allow_hp,
          len,
          self.block,
          col_offset,
        );
        i += len;
      } else {
        i += if use_step_16 { 2 } else { 1 };
      }
    }
    newmv_count
  }

  fn blk(&self, stack: &mut MvStack, row: isize, col: isize) -> usize {
    match candidate(self.blocks, self.bo, row, col) {
      Some(cand) if !stack.is_full() => add_ref_mv_candidate(
        stack,
        cand,
        self.rf,
        self.allow_hp,
        1,
        self.block,
        col,
      ),
      _ => 0,
    }
  }
}

/// Add the co-located motion of the previous frame at `(blk_row, blk_col)`
/// units into the block. Returns the number of matching vectors.
fn add_col_ref_mv(
  stack: &mut MvStack, prev: &FrameMvs, blocks: &TileBlocks<'_>,
  bo: TileBlockOffset, ref_frame: RefType, blk_row: usize, blk_col: usize,
  allow_hp: bool, context: &mut u16,
) -> usize {
  if !is_inside(blocks, bo, blk_row as isize, blk_col as isize) {
    return 0;
  }
  let prev_row = prev.wait_row(bo.0.y + blk_row);
  let mv_ref = prev_row[blocks.x() + bo.0.x + blk_col];
  let mut count = 0;
  for list in 0..2 {
    if mv_ref.ref_frames[list] != ref_frame {
      continue;
    }
    let mv = lower_mv_precision(mv_ref.mv[list], allow_hp);
    if (mv.row as i32).abs() >= 16 || (mv.col as i32).abs() >= 16 {
      *context |= 1 << ZEROMV_OFFSET;
    }
    add_or_weigh(stack, mv, MotionVector::default(), 2);
    count += 1;
  }
  count
}

/// Stable descending sort by weight.
fn sort_by_weight(stack: &mut [CandidateMV]) {
  let mut len = stack.len();
  while len > 0 {
    let mut nr_len = 0;
    for idx in 1..len {
      if stack[idx - 1].weight < stack[idx].weight {
        stack.swap(idx - 1, idx);
        nr_len = idx;
      }
    }
    len = nr_len;
  }
}

/// Build the weighted candidate stack of `rf_type` and its mode context.
/// The first entries of `mv_list` are replaced by the clamped stack head
/// for single references.
#[profiling::function]
pub fn setup_ref_mv_list(
  blocks: &TileBlocks<'_>, params: &MvRefParams<'_>, bo: TileBlockOffset,
  bsize: BlockSize, rf_type: usize,
  mv_list: &mut [MotionVector; MAX_MV_REF_CANDIDATES],
) -> (MvStack, u16) {
  let rf = set_ref_frame(rf_type);
  let n8_w = bsize.width_mi();
  let n8_h = bsize.height_mi();
  let allow_hp = params.allow_high_precision_mv;
  let scan = Scan { blocks, bo, bsize, rf, block: None, allow_hp };

  let mut stack = MvStack::new();
  let mut context: u16 = 0;
  let mut newmv_count = 0;

  // Nearest row and column
  newmv_count += scan.row(&mut stack, -1);
  newmv_count += scan.col(&mut stack, -1);
  if has_top_right(bo.0.y, bo.0.x, bsize) {
    newmv_count += scan.blk(&mut stack, -1, n8_w as isize);
  }

  let nearest_count = stack.len();
  for c in stack.iter_mut() {
    c.weight += REF_CAT_LEVEL;
  }

  match params.prev_frame_mvs {
    Some(prev) if !rf[1].is_inter() => {
      let mut coll_blk_count = 0;
      for blk_row in (0..n8_h).step_by(2) {
        for blk_col in (0..n8_w).step_by(2) {
          coll_blk_count += add_col_ref_mv(
            &mut stack,
            prev,
            blocks,
            bo,
            rf[0],
            blk_row,
            blk_col,
            allow_hp,
            &mut context,
          );
        }
      }
      if coll_blk_count == 0 {
        context |= 1 << ZEROMV_OFFSET;
      }
    }
    _ => context |= 1 << ZEROMV_OFFSET,
  }

  // Outer ring
  scan.blk(&mut stack, -1, -1);
  for idx in 2..=3 {
    scan.row(&mut stack, -idx);
    scan.col(&mut stack, -idx);
  }
  scan.col(&mut stack, -4);

  let count = stack.len();
  context |= match nearest_count {
    0 => {
      (count >= 1) as u16
        | match count {
          0 => 0,
          1 => 1 << REFMV_OFFSET,
          _ => 2 << REFMV_OFFSET,
        }
    }
    1 => {
      (if newmv_count > 0 { 2 } else { 3 })
        | if count == 1 { 3 << REFMV_OFFSET } else { 4 << REFMV_OFFSET }
    }
    _ => {
      (match newmv_count {
        0 => 6,
        1 => 5,
        _ => 4,
      }) | 5 << REFMV_OFFSET
    }
  };

  // Candidates of the nearest ring always come first.
  sort_by_weight(&mut stack[..nearest_count]);
  sort_by_weight(&mut stack[nearest_count..]);

  let edges = BlockEdges::of(blocks, bo, bsize);
  let (bw, bh) = (n8_w << 3, n8_h << 3);
  if rf[1].is_inter() {
    for c in stack.iter_mut() {
      c.this_mv = clamp_mv_ref(c.this_mv, bw, bh, &edges);
      c.comp_mv = clamp_mv_ref(c.comp_mv, bw, bh, &edges);
    }
  } else {
    for (dst, c) in mv_list.iter_mut().zip(stack.iter()) {
      *dst = clamp_mv_ref(c.this_mv, bw, bh, &edges);
    }
  }

  log::trace!(
    "mv stack at ({}, {}) {:?} rf {}: {} entries, context {:#x}",
    blocks.x() + bo.0.x,
    bo.0.y,
    bsize,
    rf_type,
    stack.len(),
    context
  );

  (stack, context)
}

/// Two-entry list of distinct candidates kept in insertion order.
struct MvList {
  list: [MotionVector; MAX_MV_REF_CANDIDATES],
  count: usize,
  edges: BlockEdges,
  bw: usize,
  bh: usize,
}

impl MvList {
  /// Returns true once the list holds two distinct vectors.
  fn add(&mut self, mv: MotionVector) -> bool {
    self.list[self.count] = clamp_mv_ref(mv, self.bw, self.bh, &self.edges);
    if self.count > 0 {
      if self.list[1] != self.list[0] {
        self.count = 2;
        return true;
      }
    } else {
      self.count = 1;
    }
    false
  }
}

/// Offsets (row, col) of the neighbours searched for the two-entry list.
fn mv_ref_search(bsize: BlockSize) -> [(isize, isize); 9] {
  let w = bsize.width_mi() as isize;
  let h = bsize.height_mi() as isize;
  [
    (h - 1, -1),
    (-1, w - 1),
    (-1, (w - 1) >> 1),
    ((h - 1) >> 1, -1),
    (-1, -1),
    (-1, w),
    (h, -1),
    (-1, -3),
    (h - 1, -3),
  ]
}

fn scale_mv(
  cand_ref: RefType, mv: MotionVector, ref_frame: RefType,
  sign_bias: &[bool; TOTAL_REFS_PER_FRAME],
) -> MotionVector {
  if sign_bias[cand_ref as usize] != sign_bias[ref_frame as usize] {
    -mv
  } else {
    mv
  }
}

fn fill_mv_list(
  list: &mut MvList, blocks: &TileBlocks<'_>, params: &MvRefParams<'_>,
  bo: TileBlockOffset, bsize: BlockSize, ref_frame: RefType,
  block: Option<usize>,
) {
  let search = mv_ref_search(bsize);
  let in_sb = |i: usize, (row, col): (isize, isize)| {
    i < 2
      || ((bo.0.y & MIB_MASK) as isize + row < MIB_SIZE as isize
        && (bo.0.x & MIB_MASK) as isize + col < MIB_SIZE as isize)
  };
  let mut different_ref_found = false;

  // Neighbours with the same reference
  for (i, &(row, col)) in search.iter().enumerate() {
    if !in_sb(i, (row, col)) {
      continue;
    }
    let Some(cand) = candidate(blocks, bo, row, col) else {
      continue;
    };
    different_ref_found = true;
    let mv = |list| {
      if i < 2 {
        sub_block_mv(cand, list, col, block)
      } else {
        cand.mv[list]
      }
    };
    if cand.ref_frames[0] == ref_frame {
      if list.add(mv(0)) {
        return;
      }
    } else if cand.ref_frames[1] == ref_frame && list.add(mv(1)) {
      return;
    }
  }

  let prev = params.prev_frame_mvs.map(|prev| {
    prev.wait_row(bo.0.y)[blocks.x() + bo.0.x]
  });

  if let Some(prev) = prev {
    if prev.ref_frames[0] == ref_frame {
      if list.add(prev.mv[0]) {
        return;
      }
    } else if prev.ref_frames[1] == ref_frame && list.add(prev.mv[1]) {
      return;
    }
  }

  // Neighbours with a different reference, sign-corrected
  if different_ref_found {
    let sign_bias = &params.ref_frame_sign_bias;
    for &(row, col) in search.iter() {
      if !in_sb(usize::MAX, (row, col)) {
        continue;
      }
      let Some(cand) = candidate(blocks, bo, row, col) else {
        continue;
      };
      if !cand.is_inter() {
        continue;
      }
      if cand.ref_frames[0] != ref_frame
        && list.add(scale_mv(cand.ref_frames[0], cand.mv[0], ref_frame, sign_bias))
      {
        return;
      }
      if cand.has_second_ref()
        && cand.ref_frames[1] != ref_frame
        && cand.mv[1] != cand.mv[0]
        && list.add(scale_mv(cand.ref_frames[1], cand.mv[1], ref_frame, sign_bias))
      {
        return;
      }
    }
  }

  if let Some(prev) = prev {
    let sign_bias = &params.ref_frame_sign_bias;
    if prev.ref_frames[0] != ref_frame
      && prev.ref_frames[0].is_inter()
      && list.add(scale_mv(prev.ref_frames[0], prev.mv[0], ref_frame, sign_bias))
    {
      return;
    }
    if prev.ref_frames[1].is_inter()
      && prev.ref_frames[1] != ref_frame
      && prev.mv[1] != prev.mv[0]
      && list.add(scale_mv(prev.ref_frames[1], prev.mv[1], ref_frame, sign_bias))
    {
      return;
    }
  }
}

/// The two-entry candidate list of a single reference, from nine fixed
/// neighbours and the previous frame. Unfilled entries are zero.
pub fn find_mv_refs_idx(
  blocks: &TileBlocks<'_>, params: &MvRefParams<'_>, bo: TileBlockOffset,
  bsize: BlockSize, ref_frame: RefType, block: Option<usize>,
) -> [MotionVector; MAX_MV_REF_CANDIDATES] {
  let mut list = MvList {
    list: [MotionVector::default(); MAX_MV_REF_CANDIDATES],
    count: 0,
    edges: BlockEdges::of(blocks, bo, bsize),
    bw: bsize.width_mi() << 3,
    bh: bsize.height_mi() << 3,
  };
  fill_mv_list(&mut list, blocks, params, bo, bsize, ref_frame, block);
  for mv in list.list.iter_mut().skip(list.count) {
    *mv = MotionVector::default();
  }
  list.list
}

/// Nearest and near vectors of a two-entry list.
#[inline]
pub fn find_best_ref_mvs(
  allow_hp: bool, mv_list: &[MotionVector; MAX_MV_REF_CANDIDATES],
) -> (MotionVector, MotionVector) {
  (
    lower_mv_precision(mv_list[0], allow_hp),
    lower_mv_precision(mv_list[1], allow_hp),
  )
}

/// All candidates of reference frame type `rf_type` for a block.
pub fn find_mv_refs(
  blocks: &TileBlocks<'_>, params: &MvRefParams<'_>, bo: TileBlockOffset,
  bsize: BlockSize, rf_type: usize,
) -> MvRefResult {
  let rf = set_ref_frame(rf_type);
  let compound = rf[1].is_inter();
  let mut mv_list = if compound {
    [MotionVector::default(); MAX_MV_REF_CANDIDATES]
  } else {
    find_mv_refs_idx(blocks, params, bo, bsize, rf[0], None)
  };

  let (stack, mut context) =
    setup_ref_mv_list(blocks, params, bo, bsize, rf_type, &mut mv_list);

  let all_zero = if stack.len() >= 2 {
    stack
      .iter()
      .take(3)
      .all(|c| c.this_mv.is_zero() && (!compound || c.comp_mv.is_zero()))
  } else {
    compound || mv_list.iter().all(|mv| mv.is_zero())
  };
  if all_zero {
    context |= 1 << ALL_ZERO_FLAG_OFFSET;
  }

  let (nearest, near) =
    find_best_ref_mvs(params.allow_high_precision_mv, &mv_list);
  MvRefResult { stack, mv_list, nearest, near, context }
}

/// Candidates of every single reference, and of the compound pairs when
/// `compound` is set.
#[profiling::function]
pub fn find_block_mv_refs(
  blocks: &TileBlocks<'_>, params: &MvRefParams<'_>, bo: TileBlockOffset,
  bsize: BlockSize, compound: bool,
) -> BlockMvRefs {
  let allow_hp = params.allow_high_precision_mv;
  let mut out = BlockMvRefs {
    allow_high_precision_mv: allow_hp,
    ..Default::default()
  };
  for rf in ALL_INTER_REFS {
    out.refs[rf as usize] = find_mv_refs(blocks, params, bo, bsize, rf as usize);
  }
  if compound {
    for rf_type in TOTAL_REFS_PER_FRAME..MODE_CTX_REF_FRAMES {
      let mut r = find_mv_refs(blocks, params, bo, bsize, rf_type);
      if r.stack.len() < 2 {
        // Few compound candidates: zero is only certain when both single
        // lists agree.
        let nonzero = set_ref_frame(rf_type).iter().any(|&f| {
          out.refs[f as usize]
            .mv_list
            .iter()
            .any(|&mv| !lower_mv_precision(mv, allow_hp).is_zero())
        });
        if nonzero {
          r.context &= !(1 << ALL_ZERO_FLAG_OFFSET);
        }
      }
      out.refs[rf_type] = r;
    }
  }
  out
}

/// Mode context of the inter mode symbol of a block, or of quarter `block`
/// of a sub-8×8 block.
pub fn mode_context_analyzer(
  mode_context: &[u16; MODE_CTX_REF_FRAMES], rf: [RefType; 2],
  bsize: BlockSize, block: Option<usize>,
) -> u16 {
  match block {
    Some(b) => {
      let mut ctx = mode_context[rf[0] as usize] & 0xff;
      if b > 0 && (bsize == BLOCK_4X8 || bsize == BLOCK_8X4) {
        ctx |= 1 << SKIP_NEARESTMV_SUB8X8_OFFSET;
      }
      ctx
    }
    None => mode_context[ref_frame_type(rf)],
  }
}

/// Nearest and near vectors for quarter `block` of a sub-8×8 block coded
/// with reference `ref_frame` in slot `list`. `bmi` holds the quarters
/// decided so far.
pub fn append_sub8x8_mvs_for_idx(
  blocks: &TileBlocks<'_>, params: &MvRefParams<'_>, bo: TileBlockOffset,
  bsize: BlockSize, ref_frame: RefType, list: usize, block: usize,
  bmi: &[SubBlockInfo; 4],
) -> SubMvRefs {
  debug_assert!(block < 4);
  let mut mv_list =
    find_mv_refs_idx(blocks, params, bo, bsize, ref_frame, Some(block));

  let scan = Scan {
    blocks,
    bo,
    bsize,
    rf: [ref_frame, NONE_FRAME],
    block: Some(block),
    allow_hp: params.allow_high_precision_mv,
  };
  let mut stack = MvStack::new();
  scan.blk(&mut stack, -1, 0);
  let above_count = stack.len();
  scan.blk(&mut stack, 0, -1);
  let left_count = stack.len() - above_count;

  if above_count > 1 && left_count > 0 {
    stack.swap(1, above_count);
  }

  let edges = BlockEdges::of(blocks, bo, bsize);
  let (bw, bh) = (bsize.width_mi() << 3, bsize.height_mi() << 3);
  for c in stack.iter_mut() {
    c.this_mv = clamp_mv_ref(c.this_mv, bw, bh, &edges);
  }
  for (dst, c) in mv_list.iter_mut().zip(stack.iter()) {
    *dst = c.this_mv;
  }

  let first_other = |nearest: MotionVector, cands: &[MotionVector]| {
    cands.iter().copied().find(|&mv| mv != nearest).unwrap_or_default()
  };
  let (nearest, near) = match block {
    0 => (mv_list[0], mv_list[1]),
    1 | 2 => {
      let nearest = bmi[0].mv[list];
      (nearest, first_other(nearest, &mv_list))
    }
    _ => {
      let cands = [bmi[1].mv[list], bmi[0].mv[list], mv_list[0], mv_list[1]];
      let nearest = bmi[2].mv[list];
      (nearest, first_other(nearest, &cands))
    }
  };

  SubMvRefs { nearest, near, stack }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::predict::PredictionMode::*;
  use pretty_assertions::assert_eq;
  use rand::{Rng, SeedableRng};

  fn bo(y: usize, x: usize) -> TileBlockOffset {
    TileBlockOffset(BlockOffset { x, y })
  }

  fn inter(rf: RefType, row: i16, col: i16) -> Block {
    let mv = MotionVector { row, col };
    Block {
      mode: NEARESTMV,
      bsize: BLOCK_8X8,
      ref_frames: [rf, NONE_FRAME],
      mv: [mv, MotionVector::default()],
      bmi: [SubBlockInfo { mode: NEARESTMV, mv: [mv, MotionVector::default()] };
        4],
      ..Default::default()
    }
  }

  fn mv(row: i16, col: i16) -> MotionVector {
    MotionVector { row, col }
  }

  #[test]
  fn identical_neighbours_merge() {
    let mut fb = FrameBlocks::new(8, 8);
    fb[1][2] = inter(LAST_FRAME, 4, -2);
    fb[2][1] = inter(LAST_FRAME, 4, -2);
    let tb = fb.as_tile_blocks();
    let params = MvRefParams::default();

    let r = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, LAST_FRAME as usize);
    assert_eq!(r.stack.len(), 1);
    assert_eq!(r.stack[0].this_mv, mv(4, -2));
    assert_eq!(r.stack[0].weight, 2 + 2 + REF_CAT_LEVEL);
    assert_eq!(r.nearest, mv(4, -2));
    assert_eq!(r.near, MotionVector::default());
    // one nearest candidate, no NEWMV, no temporal candidates
    assert_eq!(r.context, 3 | (3 << REFMV_OFFSET) | (1 << ZEROMV_OFFSET));

    // other references only borrow the vector, sign-corrected
    let g = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, GOLDEN_FRAME as usize);
    assert!(g.stack.is_empty());
    assert_eq!(g.context, 1 << ZEROMV_OFFSET);
    assert_eq!(g.nearest, mv(4, -2));
  }

  #[test]
  fn heavier_candidates_sort_first() {
    let mut fb = FrameBlocks::new(8, 8);
    fb[1][2] = inter(LAST_FRAME, 8, 8);
    fb[2][1] = inter(LAST_FRAME, -8, 0);
    let tb = fb.as_tile_blocks();
    let params = MvRefParams::default();

    // equal weights keep discovery order: above before left
    let r = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, LAST_FRAME as usize);
    assert_eq!(r.stack[0].this_mv, mv(8, 8));
    assert_eq!(r.stack[1].this_mv, mv(-8, 0));
    assert_eq!(r.mv_list, [mv(8, 8), mv(-8, 0)]);

    // a left neighbour spanning the whole block edge outweighs the above one
    let mut fb = FrameBlocks::new(8, 8);
    fb[1][2] = inter(LAST_FRAME, 8, 8);
    fb[2][1] = inter(LAST_FRAME, -8, 0);
    fb[3][1] = inter(LAST_FRAME, -8, 0);
    let tb = fb.as_tile_blocks();
    let r = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X16, LAST_FRAME as usize);
    assert_eq!(r.stack[0].this_mv, mv(-8, 0));
    assert_eq!(r.stack[0].weight, 4 + REF_CAT_LEVEL);
    assert_eq!(r.stack[1].this_mv, mv(8, 8));
  }

  #[test]
  fn outer_ring_stays_behind_nearest() {
    let mut fb = FrameBlocks::new(8, 8);
    fb[2][3] = inter(LAST_FRAME, 2, 2); // above
    fb[2][2] = inter(LAST_FRAME, 6, 6); // above-left
    fb[1][3] = inter(LAST_FRAME, 4, 4); // two rows up
    fb[0][3] = inter(LAST_FRAME, 4, 4); // three rows up
    let tb = fb.as_tile_blocks();
    let params = MvRefParams::default();

    let r = find_mv_refs(&tb, &params, bo(3, 3), BLOCK_8X8, LAST_FRAME as usize);
    let order: Vec<_> = r.stack.iter().map(|c| (c.this_mv, c.weight)).collect();
    assert_eq!(
      order,
      vec![(mv(2, 2), 2 + REF_CAT_LEVEL), (mv(4, 4), 4), (mv(6, 6), 2)]
    );
  }

  #[test]
  fn temporal_candidates() {
    let fb = FrameBlocks::new(8, 8);
    let tb = fb.as_tile_blocks();

    let mut prev_fb = FrameBlocks::new(8, 8);
    prev_fb[2][2] = inter(LAST_FRAME, 2, 0);
    let prev = FrameMvs::from_blocks(&prev_fb);
    let params =
      MvRefParams { prev_frame_mvs: Some(&prev), ..Default::default() };

    let r = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, LAST_FRAME as usize);
    assert_eq!(r.stack.len(), 1);
    assert_eq!(r.stack[0].weight, 2);
    // a near-zero co-located vector leaves the zero-likely bit clear
    assert_eq!(r.context, 1 | (1 << REFMV_OFFSET));
    assert_eq!(r.nearest, mv(2, 0));

    let mut prev_fb = FrameBlocks::new(8, 8);
    prev_fb[2][2] = inter(LAST_FRAME, 40, 0);
    let prev = FrameMvs::from_blocks(&prev_fb);
    let params =
      MvRefParams { prev_frame_mvs: Some(&prev), ..Default::default() };
    let r = find_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, LAST_FRAME as usize);
    assert_ne!(r.context & (1 << ZEROMV_OFFSET), 0);
  }

  #[test]
  fn compound_all_zero_follows_single_lists() {
    let params = MvRefParams::default();
    let fb = FrameBlocks::new(8, 8);
    let tb = fb.as_tile_blocks();
    let refs = find_block_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, true);
    for rf in [[LAST_FRAME, ALTREF_FRAME], [GOLDEN_FRAME, ALTREF_FRAME]] {
      assert_ne!(refs.get(rf).context & (1 << ALL_ZERO_FLAG_OFFSET), 0);
    }

    let mut fb = FrameBlocks::new(8, 8);
    fb[1][2] = inter(LAST_FRAME, 4, 4);
    let tb = fb.as_tile_blocks();
    let refs = find_block_mv_refs(&tb, &params, bo(2, 2), BLOCK_8X8, true);
    for rf in [[LAST_FRAME, ALTREF_FRAME], [GOLDEN_FRAME, ALTREF_FRAME]] {
      let comp = refs.get(rf);
      assert!(comp.stack.is_empty());
      assert_eq!(comp.context & (1 << ALL_ZERO_FLAG_OFFSET), 0);
    }

    assert_eq!(
      refs.mode_mv([LAST_FRAME, NONE_FRAME], NEARESTMV, 0),
      [mv(4, 4), MotionVector::default()]
    );
    assert_eq!(
      refs.mode_mv([LAST_FRAME, NONE_FRAME], ZEROMV, 0),
      [MotionVector::default(); 2]
    );
  }

  #[test]
  fn precision_lowering() {
    assert_eq!(lower_mv_precision(mv(5, -3), false), mv(4, -2));
    assert_eq!(lower_mv_precision(mv(5, -3), true), mv(5, -3));
    // too large for the high precision bit
    assert_eq!(lower_mv_precision(mv(521, -64), true), mv(520, -64));
  }

  #[test]
  fn clamp_to_frame_border() {
    let edges = BlockEdges::new(BlockOffset { x: 0, y: 0 }, BLOCK_8X8, 8, 8);
    assert_eq!(clamp_mv_ref(mv(-1000, -1000), 8, 8, &edges), mv(-192, -192));
    // 8 units wide: 7 units to the right edge, plus block and border
    assert_eq!(clamp_mv_ref(mv(1000, 1000), 8, 8, &edges), mv(640, 640));
  }

  #[test]
  fn sub8x8_newmv_neighbour_counts_both_quarters() {
    let quarters = [mv(8, 0), mv(16, 0), mv(24, 0), mv(32, 0)];
    let mut cand = Block {
      mode: NEWMV,
      bsize: BLOCK_4X4,
      ref_frames: [LAST_FRAME, NONE_FRAME],
      mv: [quarters[3], MotionVector::default()],
      ..Default::default()
    };
    for (b, &q) in quarters.iter().enumerate() {
      cand.bmi[b] = SubBlockInfo { mode: NEWMV, mv: [q, mv(-q.row, 4)] };
    }

    let single = [LAST_FRAME, NONE_FRAME];
    let mut stack = MvStack::new();
    let n = add_ref_mv_candidate(&mut stack, &cand, single, true, 1, Some(0), -1);
    assert_eq!(n, 2);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].this_mv, quarters[1]);
    assert_eq!(stack[0].weight, 2);
    assert_eq!(stack[1].this_mv, quarters[3]);
    assert_eq!(stack[1].weight, 1);

    // The same neighbour again only adds weight.
    let n = add_ref_mv_candidate(&mut stack, &cand, single, true, 1, Some(0), -1);
    assert_eq!(n, 0);
    assert_eq!(stack.len(), 2);

    cand.ref_frames = [LAST_FRAME, ALTREF_FRAME];
    let mut stack = MvStack::new();
    let n = add_ref_mv_candidate(
      &mut stack,
      &cand,
      [LAST_FRAME, ALTREF_FRAME],
      true,
      1,
      Some(0),
      -1,
    );
    assert_eq!(n, 2);
    assert_eq!(stack[1].comp_mv, mv(-32, 4));

    // Without NEWMV nothing is counted.
    cand.mode = NEARESTMV;
    let mut stack = MvStack::new();
    let n = add_ref_mv_candidate(
      &mut stack,
      &cand,
      [LAST_FRAME, ALTREF_FRAME],
      true,
      1,
      Some(0),
      -1,
    );
    assert_eq!(n, 0);
    assert_eq!(stack.len(), 2);
  }

  #[test]
  fn top_right_availability() {
    assert!(has_top_right(0, 0, BLOCK_8X8));
    assert!(!has_top_right(1, 1, BLOCK_8X8));
    assert!(has_top_right(1, 0, BLOCK_8X8));
    assert!(has_top_right(0, 1, BLOCK_8X8));
    assert!(!has_top_right(2, 3, BLOCK_8X8));
    assert!(has_top_right(0, 0, BLOCK_64X64));
    // second of two horizontal rectangles
    assert!(!has_top_right(1, 0, BLOCK_16X8));
    // first of two vertical rectangles
    assert!(has_top_right(2, 2, BLOCK_8X16));
  }

  #[test]
  fn sub8x8_quarters() {
    let fb = FrameBlocks::new(8, 8);
    let tb = fb.as_tile_blocks();
    let params = MvRefParams::default();
    let mut bmi = [SubBlockInfo::default(); 4];
    bmi[0].mv[0] = mv(8, 0);
    bmi[1].mv[0] = mv(0, 8);
    bmi[2].mv[0] = mv(0, 8);

    let r = append_sub8x8_mvs_for_idx(
      &tb, &params, bo(2, 2), BLOCK_4X4, LAST_FRAME, 0, 0, &bmi,
    );
    assert_eq!((r.nearest, r.near), (MotionVector::default(), MotionVector::default()));

    let r = append_sub8x8_mvs_for_idx(
      &tb, &params, bo(2, 2), BLOCK_4X4, LAST_FRAME, 0, 1, &bmi,
    );
    assert_eq!((r.nearest, r.near), (mv(8, 0), MotionVector::default()));

    // quarter 3 skips candidates equal to its nearest
    let r = append_sub8x8_mvs_for_idx(
      &tb, &params, bo(2, 2), BLOCK_4X4, LAST_FRAME, 0, 3, &bmi,
    );
    assert_eq!((r.nearest, r.near), (mv(0, 8), mv(8, 0)));
  }

  #[test]
  fn sub8x8_neighbour_quarters() {
    let mut fb = FrameBlocks::new(8, 8);
    let mut above = inter(LAST_FRAME, 0, 0);
    above.bsize = BLOCK_4X4;
    for (i, b) in above.bmi.iter_mut().enumerate() {
      b.mv[0] = mv(2 * i as i16, 0);
    }
    fb[1][2] = above;
    let tb = fb.as_tile_blocks();
    let params =
      MvRefParams { allow_high_precision_mv: true, ..Default::default() };

    // quarter 0 sees the bottom-left quarter above it, plus the other
    // bottom quarter with half weight
    let r = append_sub8x8_mvs_for_idx(
      &tb,
      &params,
      bo(2, 2),
      BLOCK_4X4,
      LAST_FRAME,
      0,
      0,
      &[SubBlockInfo::default(); 4],
    );
    let got: Vec<_> = r.stack.iter().map(|c| (c.this_mv, c.weight)).collect();
    assert_eq!(got, vec![(mv(4, 0), 2), (mv(6, 0), 1)]);
    assert_eq!(r.nearest, mv(4, 0));
  }

  #[test]
  fn mode_context_of_sub8x8() {
    let mut ctx = [0u16; MODE_CTX_REF_FRAMES];
    ctx[LAST_FRAME as usize] = 0x1f3 | (1 << ALL_ZERO_FLAG_OFFSET);
    let rf = [LAST_FRAME, NONE_FRAME];
    assert_eq!(mode_context_analyzer(&ctx, rf, BLOCK_8X8, None), ctx[1]);
    assert_eq!(mode_context_analyzer(&ctx, rf, BLOCK_4X8, Some(0)), 0xf3);
    assert_eq!(
      mode_context_analyzer(&ctx, rf, BLOCK_4X8, Some(1)),
      0xf3 | (1 << SKIP_NEARESTMV_SUB8X8_OFFSET)
    );
    assert_eq!(mode_context_analyzer(&ctx, rf, BLOCK_4X4, Some(1)), 0xf3);
  }

  #[test]
  fn search_is_deterministic() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut fb = FrameBlocks::new(16, 16);
    let refs = [INTRA_FRAME, LAST_FRAME, GOLDEN_FRAME, ALTREF_FRAME];
    for y in 0..16 {
      for x in 0..16 {
        let rf = refs[rng.gen_range(0..refs.len())];
        fb[y][x] = inter(rf, rng.gen_range(-64..64), rng.gen_range(-64..64));
      }
    }
    let prev = FrameMvs::from_blocks(&fb);
    let tb = fb.as_tile_blocks();
    let params = MvRefParams {
      prev_frame_mvs: Some(&prev),
      allow_high_precision_mv: true,
      ..Default::default()
    };
    for &(y, x, bsize) in
      &[(4, 4, BLOCK_8X8), (8, 0, BLOCK_16X16), (2, 6, BLOCK_16X8), (8, 8, BLOCK_64X64)]
    {
      let a = find_block_mv_refs(&tb, &params, bo(y, x), bsize, true);
      let b = find_block_mv_refs(&tb, &params, bo(y, x), bsize, true);
      assert_eq!(a, b);
      for r in a.refs.iter().skip(1) {
        assert!(r.stack.len() <= MAX_REF_MV_STACK_SIZE);
      }
    }
  }
}
