// Copyright (c) 2001-2016, Alliance for Open Media. All rights reserved
// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use arrayvec::ArrayVec;

use crate::api::{PartitionSearchType, RectangularCheck, SpeedSettings};
use crate::context::*;
use crate::ec::{Writer, WriterCounter, PROB_COST_SHIFT};
use crate::encoder::block::encode_b;
use crate::encoder::frame::FrameInvariants;
use crate::encoder::var_partition::choose_partitioning;
use crate::error::CodecError;
use crate::partition::*;
use crate::rdo::*;
use crate::tiling::*;
use crate::util::Pixel;

/// Block sizes the search may code at, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionRange {
  pub min: BlockSize,
  pub max: BlockSize,
}

impl PartitionRange {
  pub const FULL: PartitionRange =
    PartitionRange { min: BLOCK_4X4, max: BLOCK_64X64 };
}

/// Chosen partition of a square block together with the mode decisions
/// of its leaves.
#[derive(Clone, Debug)]
pub struct PcTree {
  pub bsize: BlockSize,
  pub partition: PartitionType,
  /// Coded blocks of a leaf: one for NONE, one or two for HORZ and VERT,
  /// and at 8×8 a single sub-8×8 block for every partition.
  pub blocks: ArrayVec<PickModeContext, 2>,
  /// Quadrants of a SPLIT above 8×8 in raster order, `None` outside the
  /// tile.
  pub children: Vec<Option<PcTree>>,
}

impl PcTree {
  fn leaf(
    bsize: BlockSize, partition: PartitionType,
    blocks: ArrayVec<PickModeContext, 2>,
  ) -> PcTree {
    PcTree { bsize, partition, blocks, children: Vec::new() }
  }

  /// Visits every coded block of the tree with its offset.
  pub fn for_each_block<F>(&self, bo: TileBlockOffset, f: &mut F)
  where
    F: FnMut(TileBlockOffset, &PickModeContext),
  {
    let hbs = self.bsize.width_mi() >> 1;
    if !self.children.is_empty() {
      for (i, child) in self.children.iter().enumerate() {
        if let Some(child) = child {
          child.for_each_block(quadrant_offset(bo, hbs, i), f);
        }
      }
      return;
    }
    for (i, ctx) in self.blocks.iter().enumerate() {
      let off = match (i, self.partition) {
        (1, PARTITION_HORZ) => BlockOffset { x: bo.0.x, y: bo.0.y + hbs },
        (1, _) => BlockOffset { x: bo.0.x + hbs, y: bo.0.y },
        _ => bo.0,
      };
      f(TileBlockOffset(off), ctx);
    }
  }
}

#[inline]
fn quadrant_offset(
  bo: TileBlockOffset, hbs: usize, i: usize,
) -> TileBlockOffset {
  TileBlockOffset(BlockOffset {
    x: bo.0.x + (i & 1) * hbs,
    y: bo.0.y + (i >> 1) * hbs,
  })
}

/// Whether partition `p` of the square `bsize` at `bo` leaves every coded
/// block fully inside a `cols`×`rows` tile. A half that lies wholly outside
/// is not coded and does not count against the partition.
pub fn partition_fits(
  cols: usize, rows: usize, bo: TileBlockOffset, bsize: BlockSize,
  p: PartitionType,
) -> bool {
  if bsize < BLOCK_8X8 {
    return false;
  }
  if bsize == BLOCK_8X8 {
    return p != PARTITION_INVALID;
  }
  let bs = bsize.width_mi();
  let hbs = bs >> 1;
  let (x, y) = (bo.0.x, bo.0.y);
  match p {
    PARTITION_NONE => x + bs <= cols && y + bs <= rows,
    PARTITION_HORZ => x + bs <= cols && (y + bs <= rows || y + hbs == rows),
    PARTITION_VERT => y + bs <= rows && (x + bs <= cols || x + hbs == cols),
    PARTITION_SPLIT => true,
    PARTITION_INVALID => false,
  }
}

/// Rate multiplier of the segment a block of `bsize` at `tile_bo` falls in.
fn partition_rdmult<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>, tile_bo: TileBlockOffset,
  bsize: BlockSize,
) -> u32 {
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  block_rdmult(fi, ts.segmentation, fi.segment_id(bsize, frame_bo))
}

/// Whether a skippable NONE is good enough to stop searching below it.
fn partition_breakout(
  sf: &SpeedSettings, bsize: BlockSize, ctx: &PickModeContext,
) -> bool {
  if sf.partition_breakout_dist_thr == 0 || !ctx.skippable {
    return false;
  }
  // Thresholds are given for a 64-sample area.
  let pels_log2 = bsize.num_pels_log2() as u32;
  let scale = |v: u64| (v << pels_log2) >> 6;
  let rate_thr = (sf.partition_breakout_rate_thr as u64) << PROB_COST_SHIFT;
  ctx.rdc.dist < scale(sf.partition_breakout_dist_thr)
    && (ctx.rdc.rate as u64) < scale(rate_thr)
}

/// How the quadrants of a SPLIT hypothesis are decided.
#[derive(Clone, Copy, Debug)]
enum ChildSearch {
  /// Full recursive search within the range.
  Search(PartitionRange),
  /// Follow the partition prescribed in the block grid.
  Prescribed { adjust: bool },
  /// Code each quadrant whole where it fits.
  Whole,
}

/// Codes the blocks of a leaf partition: NONE, HORZ and VERT at any size
/// and every partition at 8×8. The second half of HORZ and VERT is picked
/// after a dry run of the first.
fn try_blocks<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  p: PartitionType, bound: i64, rdmult: u32,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  let subsize = bsize.subsize(p);
  let mut sum = RDCost::new(cw.partition_rate(tile_bo, p, bsize), 0, rdmult);
  if sum.rdcost >= bound {
    return Ok(None);
  }

  let first =
    rd_pick_sb_modes(fi, ts, cw, tile_bo, subsize, bound - sum.rdcost)?;
  if first.rdc.is_infinite() {
    return Ok(None);
  }
  sum = sum.add(first.rdc, rdmult);
  let mut blocks = ArrayVec::new();

  let second_bo = if bsize > BLOCK_8X8 {
    let hbs = bsize.width_mi() >> 1;
    match p {
      PARTITION_HORZ => Some(BlockOffset { x: tile_bo.0.x, y: tile_bo.0.y + hbs }),
      PARTITION_VERT => Some(BlockOffset { x: tile_bo.0.x + hbs, y: tile_bo.0.y }),
      _ => None,
    }
  } else {
    None
  };

  match second_bo {
    Some(bo)
      if bo.x < cw.bc.blocks.cols() && bo.y < cw.bc.blocks.rows() =>
    {
      let bo = TileBlockOffset(bo);
      let mut wc = WriterCounter::new();
      encode_b(fi, ts, cw, &mut wc, tile_bo, &first.mic, &first.mv_refs, false);
      blocks.push(first);
      if sum.rdcost >= bound {
        return Ok(None);
      }
      let second =
        rd_pick_sb_modes(fi, ts, cw, bo, subsize, bound - sum.rdcost)?;
      if second.rdc.is_infinite() {
        return Ok(None);
      }
      sum = sum.add(second.rdc, rdmult);
      blocks.push(second);
    }
    _ => blocks.push(first),
  }

  Ok(Some((sum, PcTree::leaf(bsize, p, blocks))))
}

/// Codes a square above 8×8 as four quadrants decided by `search`.
fn try_split<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  bound: i64, rdmult: u32, search: ChildSearch,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  debug_assert!(bsize > BLOCK_8X8);
  let subsize = bsize.subsize(PARTITION_SPLIT);
  let hbs = bsize.width_mi() >> 1;
  let mut sum = RDCost::new(
    cw.partition_rate(tile_bo, PARTITION_SPLIT, bsize),
    0,
    rdmult,
  );
  let mut children = Vec::with_capacity(4);

  for i in 0..4 {
    if sum.rdcost >= bound {
      return Ok(None);
    }
    let child_bo = quadrant_offset(tile_bo, hbs, i);
    if child_bo.0.x >= cw.bc.blocks.cols() || child_bo.0.y >= cw.bc.blocks.rows()
    {
      children.push(None);
      continue;
    }
    let child_bound = bound - sum.rdcost;
    let child = match search {
      ChildSearch::Search(range) => rd_pick_partition(
        fi, ts, cw, child_bo, subsize, child_bound, range,
      )?,
      ChildSearch::Prescribed { adjust } => {
        rd_use_partition(fi, ts, cw, child_bo, subsize, child_bound, adjust)?
      }
      ChildSearch::Whole => {
        code_whole(fi, ts, cw, child_bo, subsize, child_bound)?
      }
    };
    let Some((rd, tree)) = child else {
      return Ok(None);
    };
    sum = sum.add(rd, rdmult);
    children.push(Some(tree));
  }

  Ok(Some((
    sum,
    PcTree { bsize, partition: PARTITION_SPLIT, blocks: ArrayVec::new(), children },
  )))
}

/// Codes a square as a single block where it fits, splitting at the frame
/// edge as prescribed.
fn code_whole<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  bound: i64,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  let (cols, rows) = (cw.bc.blocks.cols(), cw.bc.blocks.rows());
  if !partition_fits(cols, rows, tile_bo, bsize, PARTITION_NONE) {
    return rd_use_partition(fi, ts, cw, tile_bo, bsize, bound, false);
  }
  let rdmult = partition_rdmult(fi, ts, tile_bo, bsize);
  let checkpoint = cw.bc.checkpoint(&tile_bo);
  let best =
    try_blocks(fi, ts, cw, tile_bo, bsize, PARTITION_NONE, bound, rdmult)?;
  finish(fi, ts, cw, tile_bo, &checkpoint, best)
}

/// Restores the contexts and, below the superblock level, replays the
/// winner so that later neighbours see its reconstruction and modes.
fn finish<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset,
  checkpoint: &BlockContextCheckpoint, best: Option<(RDCost, PcTree)>,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  cw.bc.rollback(checkpoint);
  if let Some((_, tree)) = &best {
    if tree.bsize < BLOCK_64X64 {
      encode_sb(fi, ts, cw, &mut WriterCounter::new(), tile_bo, tree, false);
    }
  }
  Ok(best)
}

/// Keeps `candidate` when it is cheaper than both `best` and `bound`.
/// Returns whether it was kept.
fn keep_best(
  best: &mut Option<(RDCost, PcTree)>, candidate: Option<(RDCost, PcTree)>,
  bound: i64,
) -> bool {
  let Some((rd, tree)) = candidate else {
    return false;
  };
  let limit = best.as_ref().map_or(bound, |(b, _)| b.rdcost.min(bound));
  if rd.is_infinite() || rd.rdcost >= limit {
    return false;
  }
  *best = Some((rd, tree));
  true
}

/// Exhaustive RD search over NONE, SPLIT, HORZ and VERT of the square
/// `bsize` at `tile_bo`, bounded by `best_rd`.
///
/// Returns `None` when no hypothesis costs less than `best_rd`. Below the
/// superblock level the winner is replayed without output before
/// returning.
#[profiling::function]
pub fn rd_pick_partition<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  best_rd: i64, range: PartitionRange,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  debug_assert!(bsize.is_sqr() && bsize >= BLOCK_8X8);
  let sf = &fi.config.speed_settings;
  let (cols, rows) = (cw.bc.blocks.cols(), cw.bc.blocks.rows());
  let fits = |p| partition_fits(cols, rows, tile_bo, bsize, p);
  let rdmult = partition_rdmult(fi, ts, tile_bo, bsize);
  let checkpoint = cw.bc.checkpoint(&tile_bo);

  let do_none = fits(PARTITION_NONE) && bsize <= range.max;
  let mut do_split = bsize > range.min || !do_none;
  let mut do_rect = !sf.use_square_partition_only
    && bsize > range.min
    && bsize <= range.max;

  let mut best: Option<(RDCost, PcTree)> = None;
  let mut none_skippable = false;

  if do_none {
    let none =
      try_blocks(fi, ts, cw, tile_bo, bsize, PARTITION_NONE, best_rd, rdmult)?;
    if let Some((_, tree)) = &none {
      let ctx = &tree.blocks[0];
      none_skippable = ctx.skippable;
      if partition_breakout(sf, bsize, ctx) {
        do_split = false;
        do_rect = false;
      }
    }
    keep_best(&mut best, none, best_rd);
  }

  if do_split {
    cw.bc.rollback(&checkpoint);
    let bound = best.as_ref().map_or(best_rd, |(rd, _)| rd.rdcost);
    let split = if bsize == BLOCK_8X8 {
      try_blocks(fi, ts, cw, tile_bo, bsize, PARTITION_SPLIT, bound, rdmult)?
    } else {
      try_split(
        fi,
        ts,
        cw,
        tile_bo,
        bsize,
        bound,
        rdmult,
        ChildSearch::Search(range),
      )?
    };
    let split_won = keep_best(&mut best, split, best_rd);
    if !split_won && do_none && best.is_some() {
      match sf.less_rectangular_check {
        RectangularCheck::Full => {}
        RectangularCheck::Reduced => do_rect = false,
        RectangularCheck::Minimal => do_rect = false,
      }
    }
  }
  if sf.less_rectangular_check == RectangularCheck::Minimal && none_skippable
  {
    do_rect = false;
  }

  if do_rect {
    for p in [PARTITION_HORZ, PARTITION_VERT] {
      if !fits(p) {
        continue;
      }
      cw.bc.rollback(&checkpoint);
      let bound = best.as_ref().map_or(best_rd, |(rd, _)| rd.rdcost);
      let rect = try_blocks(fi, ts, cw, tile_bo, bsize, p, bound, rdmult)?;
      keep_best(&mut best, rect, best_rd);
    }
  }

  if let Some((rd, tree)) = &best {
    log::trace!(
      "{} at ({}, {}): {:?} rate {} dist {}",
      bsize,
      tile_bo.0.x,
      tile_bo.0.y,
      tree.partition,
      rd.rate,
      rd.dist
    );
  }
  finish(fi, ts, cw, tile_bo, &checkpoint, best)
}

/// The partition of the square `bsize` at `tile_bo` described by the block
/// sizes already in the grid, or SPLIT if that partition does not fit.
pub fn prescribed_partition(
  blocks: &TileBlocksMut<'_>, tile_bo: TileBlockOffset, bsize: BlockSize,
) -> PartitionType {
  let b = blocks[tile_bo].bsize;
  if bsize == BLOCK_8X8 {
    return if b.is_sub8x8() { bsize.partition_for(b) } else { PARTITION_NONE };
  }
  let p = match (b.width() >= bsize.width(), b.height() >= bsize.height()) {
    (true, true) => PARTITION_NONE,
    (true, false) if b.height() == bsize.height() / 2 => PARTITION_HORZ,
    (false, true) if b.width() == bsize.width() / 2 => PARTITION_VERT,
    _ => PARTITION_SPLIT,
  };
  if partition_fits(blocks.cols(), blocks.rows(), tile_bo, bsize, p) {
    p
  } else {
    PARTITION_SPLIT
  }
}

/// Codes the square `bsize` at `tile_bo` with the partition prescribed by
/// the block grid. With `adjust`, NONE and a split into whole quadrants are
/// also tried against it.
#[profiling::function]
pub fn rd_use_partition<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  best_rd: i64, adjust: bool,
) -> Result<Option<(RDCost, PcTree)>, CodecError> {
  let p = prescribed_partition(cw.bc.blocks, tile_bo, bsize);
  let (cols, rows) = (cw.bc.blocks.cols(), cw.bc.blocks.rows());
  let rdmult = partition_rdmult(fi, ts, tile_bo, bsize);
  let checkpoint = cw.bc.checkpoint(&tile_bo);
  let mut best = None;

  let prescribed = if p == PARTITION_SPLIT && bsize > BLOCK_8X8 {
    try_split(
      fi,
      ts,
      cw,
      tile_bo,
      bsize,
      best_rd,
      rdmult,
      ChildSearch::Prescribed { adjust },
    )?
  } else {
    try_blocks(fi, ts, cw, tile_bo, bsize, p, best_rd, rdmult)?
  };
  keep_best(&mut best, prescribed, best_rd);

  if adjust {
    if p != PARTITION_NONE
      && partition_fits(cols, rows, tile_bo, bsize, PARTITION_NONE)
    {
      cw.bc.rollback(&checkpoint);
      let bound = best.as_ref().map_or(best_rd, |(rd, _)| rd.rdcost);
      let none = try_blocks(
        fi,
        ts,
        cw,
        tile_bo,
        bsize,
        PARTITION_NONE,
        bound,
        rdmult,
      )?;
      keep_best(&mut best, none, best_rd);
    }
    if p == PARTITION_NONE && bsize > BLOCK_8X8 {
      cw.bc.rollback(&checkpoint);
      let bound = best.as_ref().map_or(best_rd, |(rd, _)| rd.rdcost);
      let split = try_split(
        fi,
        ts,
        cw,
        tile_bo,
        bsize,
        bound,
        rdmult,
        ChildSearch::Whole,
      )?;
      keep_best(&mut best, split, best_rd);
    }
  }

  finish(fi, ts, cw, tile_bo, &checkpoint, best)
}

/// Writes `bsize` into every unit of the superblock at `tile_bo`.
pub fn set_fixed_partitioning(
  blocks: &mut TileBlocksMut<'_>, tile_bo: TileBlockOffset, bsize: BlockSize,
) {
  let x_end = (tile_bo.0.x + MIB_SIZE).min(blocks.cols());
  let y_end = (tile_bo.0.y + MIB_SIZE).min(blocks.rows());
  for y in tile_bo.0.y..y_end {
    for b in &mut blocks[y][tile_bo.0.x..x_end] {
      b.bsize = bsize;
    }
  }
}

/// Copies the block sizes of the co-located superblock of the previous
/// frame into the grid. Returns false if the frame sizes differ.
pub fn copy_partitioning(
  blocks: &mut TileBlocksMut<'_>, tile_bo: TileBlockOffset,
  prev: &FrameBlocks,
) -> bool {
  if prev.cols != blocks.frame_cols() || prev.rows != blocks.frame_rows() {
    return false;
  }
  let x_end = (tile_bo.0.x + MIB_SIZE).min(blocks.cols());
  let y_end = (tile_bo.0.y + MIB_SIZE).min(blocks.rows());
  let (x0, y0) = (blocks.x(), blocks.y());
  for y in tile_bo.0.y..y_end {
    for x in tile_bo.0.x..x_end {
      blocks[y][x].bsize = prev[y0 + y][x0 + x].bsize;
    }
  }
  true
}

/// Search range for the superblock at `tile_bo` derived from the block
/// sizes of the left and above superblocks, relaxed by one step each way.
pub fn rd_auto_partition_range(
  sf: &SpeedSettings, blocks: &TileBlocksMut<'_>, tile_bo: TileBlockOffset,
) -> PartitionRange {
  let (cols, rows) = (blocks.cols(), blocks.rows());
  let mut min = BLOCK_64X64;
  let mut max = BLOCK_4X4;
  let mut found = false;
  let mut scan = |x0: usize, y0: usize| {
    for y in y0..(y0 + MIB_SIZE).min(rows) {
      for b in &blocks[y][x0..(x0 + MIB_SIZE).min(cols)] {
        min = min.min(b.bsize);
        max = max.max(b.bsize);
      }
    }
    found = true;
  };
  let BlockOffset { x, y } = tile_bo.0;
  if x >= MIB_SIZE {
    scan(x - MIB_SIZE, y);
  }
  if y >= MIB_SIZE {
    scan(x, y - MIB_SIZE);
  }
  if !found {
    return PartitionRange::FULL;
  }

  let mut min = min.min_partition_size();
  let mut max = max.max_partition_size();
  let remaining = (cols - x).min(rows - y);
  let fit = [BLOCK_64X64, BLOCK_32X32, BLOCK_16X16]
    .into_iter()
    .find(|b| b.width_mi() <= remaining)
    .unwrap_or(BLOCK_8X8);
  max = max.min(fit);
  min = min.min(max);
  if sf.use_square_partition_only && max.next_square() < min {
    min = max.next_square();
  }
  PartitionRange { min, max }
}

/// Codes a partition tree into `w`. Counts are only gathered when
/// `output` is set.
#[profiling::function]
pub fn encode_sb<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, tile_bo: TileBlockOffset,
  tree: &PcTree, output: bool,
) {
  let bsize = tree.bsize;
  if tile_bo.0.x >= cw.bc.blocks.cols() || tile_bo.0.y >= cw.bc.blocks.rows()
  {
    return;
  }
  if bsize >= BLOCK_8X8 {
    cw.write_partition(w, tile_bo, tree.partition, bsize);
    if output {
      let ctx = cw.bc.partition_plane_context(tile_bo, bsize);
      ts.counts.partition[ctx][tree.partition as usize] += 1;
    }
  }

  if tree.children.is_empty() {
    tree.for_each_block(tile_bo, &mut |bo, ctx| {
      encode_b(fi, ts, cw, w, bo, &ctx.mic, &ctx.mv_refs, output);
    });
  } else {
    let hbs = bsize.width_mi() >> 1;
    for (i, child) in tree.children.iter().enumerate() {
      if let Some(child) = child {
        encode_sb(fi, ts, cw, w, quadrant_offset(tile_bo, hbs, i), child, output);
      }
    }
  }

  if bsize == BLOCK_8X8 || tree.partition != PARTITION_SPLIT {
    cw.bc.update_partition_context(
      tile_bo,
      bsize.subsize(tree.partition),
      bsize,
    );
  }
}

/// Picks and codes the partitions of every superblock of row `sby` of the
/// tile.
#[profiling::function]
pub fn encode_rd_sb_row<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, sby: usize,
) -> Result<(), CodecError> {
  let sf = &fi.config.speed_settings;
  cw.bc.reset_left_contexts();

  for sbx in 0..ts.sb_width {
    let tile_sbo = TileSuperBlockOffset(SuperBlockOffset { x: sbx, y: sby });
    let tile_bo = tile_sbo.block_offset(0, 0);

    let picked = match sf.partition_search_type {
      PartitionSearchType::FixedPartition(bsize) => {
        set_fixed_partitioning(cw.bc.blocks, tile_bo, bsize);
        rd_use_partition(fi, ts, cw, tile_bo, BLOCK_64X64, i64::MAX, false)?
      }
      PartitionSearchType::VarBased => {
        choose_partitioning(fi, ts, cw.bc.blocks, tile_sbo);
        rd_use_partition(fi, ts, cw, tile_bo, BLOCK_64X64, i64::MAX, false)?
      }
      PartitionSearchType::Search => {
        let from_last = sf.adjust_partitioning_from_last_frame
          && !fi.is_intra()
          && fi
            .prev_blocks
            .as_deref()
            .map_or(false, |prev| copy_partitioning(cw.bc.blocks, tile_bo, prev));
        if from_last {
          rd_use_partition(fi, ts, cw, tile_bo, BLOCK_64X64, i64::MAX, true)?
        } else {
          let range = if sf.auto_min_max_partition_size {
            rd_auto_partition_range(sf, cw.bc.blocks, tile_bo)
          } else {
            PartitionRange {
              min: sf.min_partition_size,
              max: sf.max_partition_size,
            }
          };
          rd_pick_partition(fi, ts, cw, tile_bo, BLOCK_64X64, i64::MAX, range)?
        }
      }
    };

    let Some((rd, tree)) = picked else {
      let (sbx, sby) = (ts.sbo.x + sbx, ts.sbo.y + sby);
      log::error!("no finite-cost partition for superblock ({}, {})", sbx, sby);
      return Err(CodecError::NoViablePartition { sbx, sby });
    };
    log::trace!(
      "sb ({}, {}): {:?} rdcost {}",
      ts.sbo.x + sbx,
      ts.sbo.y + sby,
      tree.partition,
      rd.rdcost
    );
    encode_sb(fi, ts, cw, w, tile_bo, &tree, true);
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::encoder::test_util::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn edge_fit_rules() {
    let bo = |x, y| TileBlockOffset(BlockOffset { x, y });
    // 9x5 units: a 64x64 at the origin straddles the bottom edge.
    assert!(!partition_fits(9, 5, bo(0, 0), BLOCK_64X64, PARTITION_NONE));
    assert!(!partition_fits(9, 5, bo(0, 0), BLOCK_64X64, PARTITION_HORZ));
    assert!(partition_fits(9, 5, bo(0, 0), BLOCK_64X64, PARTITION_SPLIT));
    // The bottom half lies wholly outside.
    assert!(partition_fits(9, 4, bo(0, 0), BLOCK_64X64, PARTITION_HORZ));
    assert!(!partition_fits(9, 4, bo(0, 0), BLOCK_64X64, PARTITION_VERT));
    assert!(partition_fits(8, 8, bo(4, 4), BLOCK_32X32, PARTITION_VERT));
    assert!(partition_fits(9, 5, bo(8, 4), BLOCK_8X8, PARTITION_HORZ));
  }

  #[test]
  fn prescribed_partition_follows_grid() {
    let mut fb = FrameBlocks::new(8, 8);
    let mut tb = fb.as_tile_blocks_mut();
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });
    set_fixed_partitioning(&mut tb, bo, BLOCK_64X32);
    assert_eq!(prescribed_partition(&tb, bo, BLOCK_64X64), PARTITION_HORZ);
    set_fixed_partitioning(&mut tb, bo, BLOCK_16X16);
    assert_eq!(prescribed_partition(&tb, bo, BLOCK_64X64), PARTITION_SPLIT);
    assert_eq!(prescribed_partition(&tb, bo, BLOCK_16X16), PARTITION_NONE);
    set_fixed_partitioning(&mut tb, bo, BLOCK_4X8);
    assert_eq!(prescribed_partition(&tb, bo, BLOCK_8X8), PARTITION_VERT);
  }

  #[test]
  fn auto_range_without_neighbours_is_full() {
    let mut fb = FrameBlocks::new(16, 16);
    let tb = fb.as_tile_blocks_mut();
    let sf = SpeedSettings::default();
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });
    assert_eq!(rd_auto_partition_range(&sf, &tb, bo), PartitionRange::FULL);
  }

  #[test]
  fn auto_range_relaxes_neighbour_sizes() {
    let mut fb = FrameBlocks::new(16, 16);
    let mut tb = fb.as_tile_blocks_mut();
    let sf = SpeedSettings::default();
    set_fixed_partitioning(
      &mut tb,
      TileBlockOffset(BlockOffset { x: 0, y: 0 }),
      BLOCK_16X16,
    );
    let range = rd_auto_partition_range(
      &sf,
      &tb,
      TileBlockOffset(BlockOffset { x: 8, y: 0 }),
    );
    assert_eq!(range, PartitionRange { min: BLOCK_8X8, max: BLOCK_32X32 });
  }

  #[test]
  fn partition_never_costs_more_than_none() {
    let fi = key_frame::<u8>(64, 64, 120);
    let mut fs = noise_frame_state(&fi, 7);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut ts = TileStateMut::new(&mut fs, Default::default(), 64, 64);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });

    let rdmult = partition_rdmult(&fi, &ts, bo, BLOCK_64X64);
    let none = try_blocks(
      &fi,
      &mut ts,
      &mut cw,
      bo,
      BLOCK_64X64,
      PARTITION_NONE,
      i64::MAX,
      rdmult,
    )
    .unwrap()
    .unwrap();
    let checkpoint = cw.bc.checkpoint(&bo);
    cw.bc.rollback(&checkpoint);
    let (rd, tree) = rd_pick_partition(
      &fi,
      &mut ts,
      &mut cw,
      bo,
      BLOCK_64X64,
      i64::MAX,
      PartitionRange::FULL,
    )
    .unwrap()
    .unwrap();
    assert!(rd.rdcost <= none.0.rdcost, "{:?} > {:?}", rd, none.0);
    assert_eq!(tree.bsize, BLOCK_64X64);
  }

  #[test]
  fn row_covers_every_unit() {
    // 72x40 leaves partial superblocks on both edges.
    let fi = key_frame::<u8>(72, 40, 100);
    let mut fs = noise_frame_state(&fi, 3);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    for y in 0..fi.mi_rows {
      for x in 0..fi.mi_cols {
        fb[y][x].bsize = BLOCK_INVALID;
      }
    }
    {
      let mut ts = TileStateMut::new(&mut fs, Default::default(), 72, 40);
      let mut tb = fb.as_tile_blocks_mut();
      let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
      let mut w = WriterCounter::new();
      encode_rd_sb_row(&fi, &mut ts, &mut cw, &mut w, 0).unwrap();
      assert!(w.tell_frac() > 0);
    }
    for y in 0..fi.mi_rows {
      for x in 0..fi.mi_cols {
        let b = fb[y][x].bsize;
        assert!(b != BLOCK_INVALID, "unit ({}, {}) not coded", x, y);
        let (w, h) = (b.width_mi().max(1), b.height_mi().max(1));
        let (x0, y0) = (x - x % w, y - y % h);
        for yy in y0..(y0 + h).min(fi.mi_rows) {
          for xx in x0..(x0 + w).min(fi.mi_cols) {
            assert_eq!(fb[yy][xx].bsize, b);
          }
        }
      }
    }
  }

  #[test]
  fn uniform_superblock_codes_whole() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fs = flat_frame_state(&fi, 90);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut ts = TileStateMut::new(&mut fs, Default::default(), 64, 64);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });
    let (_, tree) = rd_pick_partition(
      &fi,
      &mut ts,
      &mut cw,
      bo,
      BLOCK_64X64,
      i64::MAX,
      PartitionRange::FULL,
    )
    .unwrap()
    .unwrap();
    assert_eq!(tree.partition, PARTITION_NONE);
  }
}
