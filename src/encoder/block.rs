// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::ec::Writer;
use crate::encoder::frame::FrameInvariants;
use crate::encoder::motion_comp::motion_compensate;
use crate::encoder::reference::ReferenceMode;
use crate::encoder::transform::write_tx_blocks;
use crate::entropymode::{ext_tx_size, y_mode_group, FrameCounts};
use crate::mc::{InterpFilter, MotionVector};
use crate::mvref::BlockMvRefs;
use crate::partition::*;
use crate::predict::PredictionMode;
use crate::rdo::sub8x8_units;
use crate::segmentation::{SegLvl, SegmentationState};
use crate::tiling::*;
use crate::util::*;

/// Predictor a NEWMV vector of list `i` is coded against, and whether its
/// high precision bit is coded.
fn newmv_pred<T: Pixel>(
  fi: &FrameInvariants<T>, mv_refs: &BlockMvRefs, b: &Block, i: usize,
) -> (MotionVector, bool) {
  let pred = if b.bsize.is_sub8x8() {
    mv_refs.get(b.ref_frames).nearest
  } else {
    mv_refs.mode_mv(b.ref_frames, PredictionMode::NEWMV, b.ref_mv_idx as usize)
      [i]
  };
  (pred, fi.allow_high_precision_mv && use_mv_hp(pred))
}

/// Writes the mode info of `b`: skip flag, prediction modes, references,
/// motion vectors, interpolation kernel, compound blend and transform
/// type. Symbols implied by the block's segment are left out.
pub fn write_modes<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, cw: &ContextWriter, w: &mut W,
  tile_bo: TileBlockOffset, b: &Block, mv_refs: &BlockMvRefs,
  segmentation: &SegmentationState,
) {
  let seg = b.segmentation_idx;
  let seg_skip = segmentation.feature_active(seg, SegLvl::SEG_LVL_SKIP);
  let seg_ref = segmentation.ref_frame(seg);
  let sub8x8 = b.bsize.is_sub8x8();

  if !seg_skip {
    cw.write_skip(w, tile_bo, b.skip);
  }

  if fi.is_intra() {
    if sub8x8 {
      for &idx in sub8x8_units(b.bsize) {
        cw.write_intra_mode_kf(w, tile_bo, idx, &b.bmi, b.bmi[idx].mode);
      }
    } else {
      cw.write_intra_mode_kf(w, tile_bo, 0, &b.bmi, b.mode);
    }
    cw.write_intra_uv_mode(w, b.uv_mode, b.mode);
  } else {
    if seg_ref.is_none() {
      cw.write_is_inter(w, tile_bo, b.is_inter());
    }
    if !b.is_inter() {
      if sub8x8 {
        for &idx in sub8x8_units(b.bsize) {
          cw.write_intra_mode(w, b.bsize, b.bmi[idx].mode);
        }
      } else {
        cw.write_intra_mode(w, b.bsize, b.mode);
      }
      cw.write_intra_uv_mode(w, b.uv_mode, b.mode);
    } else {
      let rf = b.ref_frames;
      if seg_ref.is_none() {
        let select = fi.reference_mode == ReferenceMode::SELECT;
        cw.write_ref_frames(w, tile_bo, rf, select);
      }
      if !sub8x8 && !seg_skip {
        let ctx = mv_refs.mode_context(rf, b.bsize, None);
        cw.write_inter_mode(w, b.mode, ctx);
        cw.write_drl_mode(
          w,
          b.mode,
          b.ref_mv_idx as usize,
          &mv_refs.get(rf).stack,
        );
      }
      if fi.interp_filter == InterpFilter::SWITCHABLE {
        cw.write_switchable_interp(w, tile_bo, b.interp_filter);
      }
      if sub8x8 {
        for &idx in sub8x8_units(b.bsize) {
          let sub = &b.bmi[idx];
          let ctx = mv_refs.mode_context(rf, b.bsize, Some(idx));
          cw.write_inter_mode(w, sub.mode, ctx);
          if sub.mode == PredictionMode::NEWMV {
            let (pred, usehp) = newmv_pred(fi, mv_refs, b, 0);
            cw.write_mv(w, sub.mv[0], pred, usehp);
          }
        }
      } else if b.mode == PredictionMode::NEWMV {
        let lists = 1 + b.has_second_ref() as usize;
        for i in 0..lists {
          let (pred, usehp) = newmv_pred(fi, mv_refs, b, i);
          cw.write_mv(w, b.mv[i], pred, usehp);
        }
      }
      if b.codes_compound_type() {
        cw.write_compound_type(w, b.bsize, b.compound);
      }
    }
  }

  if !b.skip && !fi.lossless {
    cw.write_tx_type(w, b.txsize, b.tx_type, b.is_inter(), b.mode);
  }
}

/// Counts the symbols coding an inter mode under `mode_context`, the way
/// `write_inter_mode` codes them.
pub fn update_inter_mode_stats(
  counts: &mut FrameCounts, mode: PredictionMode, mode_context: u16,
) {
  let newmv_ctx = (mode_context & NEWMV_CTX_MASK) as usize;
  counts.newmv[newmv_ctx][(mode != PredictionMode::NEWMV) as usize] += 1;
  if mode == PredictionMode::NEWMV
    || mode_context & (1 << ALL_ZERO_FLAG_OFFSET) != 0
  {
    return;
  }
  let zeromv_ctx = ((mode_context >> ZEROMV_OFFSET) & ZEROMV_CTX_MASK) as usize;
  counts.zeromv[zeromv_ctx][(mode != PredictionMode::ZEROMV) as usize] += 1;
  if mode == PredictionMode::ZEROMV {
    return;
  }
  let refmv_ctx = refmv_context(mode_context);
  counts.refmv[refmv_ctx][(mode != PredictionMode::NEARESTMV) as usize] += 1;
}

fn update_drl_stats(
  counts: &mut FrameCounts, mode: PredictionMode, ref_mv_idx: usize,
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
      counts.drl[ctx][(!stop) as usize] += 1;
      if stop {
        return;
      }
    }
  }
}

fn update_ref_frame_stats(
  counts: &mut FrameCounts, bc: &BlockContext, tile_bo: TileBlockOffset,
  rf: [RefType; 2], select: bool,
) {
  let compound = rf[1].is_inter();
  if select {
    counts.comp_inter[bc.comp_inter_context(tile_bo)][compound as usize] += 1;
  }
  if compound {
    counts.comp_ref[bc.comp_ref_context(tile_bo)]
      [(rf[0] == GOLDEN_FRAME) as usize] += 1;
  } else {
    counts.single_ref[bc.single_ref_p1_context(tile_bo)][0]
      [(rf[0] != LAST_FRAME) as usize] += 1;
    if rf[0] != LAST_FRAME {
      counts.single_ref[bc.single_ref_p2_context(tile_bo)][1]
        [(rf[0] == ALTREF_FRAME) as usize] += 1;
    }
  }
}

/// Stores the decision `b` in the block grid and, when `output` is set,
/// counts its symbols for the probability adaptation at the end of the
/// frame.
pub fn update_state<T: Pixel>(
  fi: &FrameInvariants<T>, counts: &mut FrameCounts, cw: &mut ContextWriter,
  tile_bo: TileBlockOffset, b: &Block, mv_refs: &BlockMvRefs,
  segmentation: &SegmentationState, output: bool,
) {
  if output {
    count_modes(fi, counts, cw, tile_bo, b, mv_refs, segmentation);
  }
  cw.bc.blocks.set_block(tile_bo, b.bsize, b);
}

fn count_modes<T: Pixel>(
  fi: &FrameInvariants<T>, counts: &mut FrameCounts, cw: &ContextWriter,
  tile_bo: TileBlockOffset, b: &Block, mv_refs: &BlockMvRefs,
  segmentation: &SegmentationState,
) {
  let bc = &cw.bc;
  let seg = b.segmentation_idx;
  let seg_skip = segmentation.feature_active(seg, SegLvl::SEG_LVL_SKIP);
  let seg_ref = segmentation.ref_frame(seg);
  let sub8x8 = b.bsize.is_sub8x8();

  if !seg_skip {
    counts.skip[bc.skip_context(tile_bo)][b.skip as usize] += 1;
  }

  if !fi.is_intra() {
    if seg_ref.is_none() {
      counts.intra_inter[bc.intra_inter_context(tile_bo)]
        [b.is_inter() as usize] += 1;
    }
    if b.is_inter() {
      let rf = b.ref_frames;
      if seg_ref.is_none() {
        let select = fi.reference_mode == ReferenceMode::SELECT;
        update_ref_frame_stats(counts, bc, tile_bo, rf, select);
      }
      if !sub8x8 && !seg_skip {
        let ctx = mv_refs.mode_context(rf, b.bsize, None);
        update_inter_mode_stats(counts, b.mode, ctx);
        update_drl_stats(
          counts,
          b.mode,
          b.ref_mv_idx as usize,
          &mv_refs.get(rf).stack,
        );
      }
      if fi.interp_filter == InterpFilter::SWITCHABLE {
        counts.switchable_interp[bc.switchable_interp_context(tile_bo)]
          [b.interp_filter as usize] += 1;
      }
      if sub8x8 {
        for &idx in sub8x8_units(b.bsize) {
          let sub = &b.bmi[idx];
          let ctx = mv_refs.mode_context(rf, b.bsize, Some(idx));
          update_inter_mode_stats(counts, sub.mode, ctx);
          if sub.mode == PredictionMode::NEWMV {
            let (pred, usehp) = newmv_pred(fi, mv_refs, b, 0);
            counts.mv.inc_mv(sub.mv[0] - pred, usehp);
          }
        }
      } else if b.mode == PredictionMode::NEWMV {
        for i in 0..1 + b.has_second_ref() as usize {
          let (pred, usehp) = newmv_pred(fi, mv_refs, b, i);
          counts.mv.inc_mv(b.mv[i] - pred, usehp);
        }
      }
      if b.codes_compound_type() {
        counts.compound_type[b.bsize as usize][b.compound.symbol()] += 1;
      }
    } else {
      let group = y_mode_group(b.bsize);
      if sub8x8 {
        for &idx in sub8x8_units(b.bsize) {
          counts.y_mode[group][b.bmi[idx].mode as usize] += 1;
        }
      } else {
        counts.y_mode[group][b.mode as usize] += 1;
      }
    }
  }
  if !b.is_inter() {
    counts.uv_mode[b.mode as usize][b.uv_mode as usize] += 1;
  }

  if !b.skip && !fi.lossless {
    if let Some(s) = ext_tx_size(b.txsize) {
      if b.is_inter() {
        counts.inter_ext_tx[s][b.tx_type as usize] += 1;
      } else {
        counts.intra_ext_tx[s][b.mode.intra_tx_type() as usize]
          [b.tx_type as usize] += 1;
      }
    }
  }
}

/// Codes the decided block `b`: stores it in the grid, predicts, writes
/// its mode info and residual, and leaves its reconstruction in the tile.
///
/// With `output` unset the block is coded only to give the blocks after it
/// their neighbours, and no symbol is counted.
#[profiling::function]
pub fn encode_b<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, tile_bo: TileBlockOffset, b: &Block,
  mv_refs: &BlockMvRefs, output: bool,
) {
  let segmentation = ts.segmentation;
  update_state(fi, &mut ts.counts, cw, tile_bo, b, mv_refs, segmentation, output);
  if b.is_inter() {
    motion_compensate(fi, ts, tile_bo, b, false);
  }
  write_modes(fi, cw, w, tile_bo, b, mv_refs, segmentation);
  write_tx_blocks(fi, ts, cw, w, tile_bo, b, 0..MAX_PLANES, b.skip);
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ec::WriterCounter;
  use crate::encoder::test_util::*;
  use crate::transform::TxSize;
  use pretty_assertions::assert_eq;

  #[test]
  fn inter_mode_counts_follow_the_coded_symbols() {
    let mut counts = FrameCounts::default();
    update_inter_mode_stats(
      &mut counts,
      PredictionMode::ZEROMV,
      1 << ALL_ZERO_FLAG_OFFSET,
    );
    assert_eq!(counts.newmv[0], [0, 1]);
    assert_eq!(counts.zeromv, FrameCounts::default().zeromv);

    update_inter_mode_stats(&mut counts, PredictionMode::NEARMV, 0);
    assert_eq!(counts.newmv[0], [0, 2]);
    assert_eq!(counts.zeromv[0], [0, 1]);
    assert_eq!(counts.refmv[0], [0, 1]);
  }

  #[test]
  fn skipped_intra_block_codes_no_tx_type() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut tb = fb.as_tile_blocks_mut();
    let cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });
    let seg = SegmentationState::default();
    let coded = Block {
      bsize: BLOCK_16X16,
      txsize: TxSize::TX_16X16,
      ..Default::default()
    };
    let skipped = Block { skip: true, ..coded };

    let rate = |b: &Block| {
      let mut w = WriterCounter::new();
      write_modes(&fi, &cw, &mut w, bo, b, &BlockMvRefs::default(), &seg);
      w.tell_frac()
    };
    let mut tx = WriterCounter::new();
    cw.write_tx_type(
      &mut tx,
      coded.txsize,
      coded.tx_type,
      false,
      PredictionMode::DC_PRED,
    );
    let skip_ctx = cw.bc.skip_context(bo);
    let skip_bits = |s| crate::ec::cost_bit(fi.fc.skip[skip_ctx], s) as u64;
    assert_eq!(
      rate(&coded) - skip_bits(false),
      rate(&skipped) - skip_bits(true) + tx.tell_frac()
    );
  }

  #[test]
  fn update_state_fills_the_grid_and_counts() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut counts = FrameCounts::default();
    let seg = SegmentationState::default();
    let b = Block {
      bsize: BLOCK_16X8,
      mode: PredictionMode::V_PRED,
      uv_mode: PredictionMode::H_PRED,
      skip: true,
      ..Default::default()
    };
    {
      let mut tb = fb.as_tile_blocks_mut();
      let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
      let bo = TileBlockOffset(BlockOffset { x: 2, y: 4 });
      update_state(
        &fi,
        &mut counts,
        &mut cw,
        bo,
        &b,
        &BlockMvRefs::default(),
        &seg,
        true,
      );
    }
    assert_eq!(fb[4][2].mode, PredictionMode::V_PRED);
    assert_eq!(fb[4][3].bsize, BLOCK_16X8);
    assert_eq!(fb[5][2].mode, PredictionMode::DC_PRED);
    assert_eq!(counts.skip[0], [0, 1]);
    assert_eq!(
      counts.uv_mode[PredictionMode::V_PRED as usize]
        [PredictionMode::H_PRED as usize],
      1
    );
  }
}
