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

use crate::api::SpeedSettings;
use crate::context::*;
use crate::dist::get_sse;
use crate::ec::{Writer, WriterCounter, PROB_COST_SHIFT};
use crate::encoder::block::write_modes;
use crate::encoder::frame::FrameInvariants;
use crate::encoder::motion_comp::{
  blend_compound, motion_compensate, predict_inter_rect, prep_compound,
};
use crate::encoder::reference::ReferenceMode;
use crate::encoder::transform::*;
use crate::error::CodecError;
use crate::frame::*;
use crate::mc::{CompoundType, InterpFilter, MotionVector};
use crate::me::*;
use crate::mvref::*;
use crate::partition::*;
use crate::predict::*;
use crate::quantize::{dc_q, QuantizationContext};
use crate::segmentation::{SegLvl, SegmentationState};
use crate::tiling::*;
use crate::transform::*;
use crate::util::*;
use crate::wedge::WEDGE_TYPES;

/// Distortion is scaled up by this many bits before the rate term is
/// added.
pub const RDDIV_BITS: u32 = 7;

/// Rate and distortion of a coding choice and their combined cost.
///
/// Rates are in 1/512 bit. Distortions are sixteen times the squared
/// sample error, the scale of the transform domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RDCost {
  pub rate: u32,
  pub dist: u64,
  pub rdcost: i64,
}

impl RDCost {
  /// Marks a search that found nothing codable.
  pub const fn infinite() -> Self {
    RDCost { rate: u32::MAX, dist: u64::MAX, rdcost: i64::MAX }
  }

  pub const fn zero() -> Self {
    RDCost { rate: 0, dist: 0, rdcost: 0 }
  }

  pub fn new(rate: u32, dist: u64, rdmult: u32) -> Self {
    RDCost { rate, dist, rdcost: rdcost(rate, dist, rdmult) }
  }

  #[inline]
  pub const fn is_infinite(&self) -> bool {
    self.rdcost == i64::MAX
  }

  /// Cost of coding both choices. Infinite if either one is.
  pub fn add(self, other: RDCost, rdmult: u32) -> Self {
    if self.is_infinite() || other.is_infinite() {
      return Self::infinite();
    }
    Self::new(
      self.rate.saturating_add(other.rate),
      self.dist.saturating_add(other.dist),
      rdmult,
    )
  }
}

/// Combined cost of `rate` and `dist` at multiplier `rdmult`. Finite
/// inputs never reach the infinite sentinel.
#[inline]
pub fn rdcost(rate: u32, dist: u64, rdmult: u32) -> i64 {
  let r = (rate as i64).saturating_mul(rdmult as i64)
    + (1 << (PROB_COST_SHIFT - 1));
  let d = dist.min((i64::MAX >> RDDIV_BITS) as u64) as i64;
  (r >> PROB_COST_SHIFT).saturating_add(d << RDDIV_BITS).min(i64::MAX - 1)
}

/// Lagrangian multiplier of a quantizer index.
pub fn rd_mult(qindex: u8, bit_depth: usize) -> u32 {
  let q = dc_q(qindex, 0, bit_depth) as u64;
  let rdmult = 88 * q * q / 24;
  let rdmult = match bit_depth {
    8 => rdmult,
    10 => (rdmult + 8) >> 4,
    _ => (rdmult + 128) >> 8,
  };
  rdmult.clamp(1, u32::MAX as u64) as u32
}

/// Multiplier of the blocks of segment `segment_id`.
pub fn block_rdmult<T: Pixel>(
  fi: &FrameInvariants<T>, segmentation: &SegmentationState, segment_id: u8,
) -> u32 {
  rd_mult(segmentation.qindex(segment_id, fi.base_q_idx), fi.bit_depth)
}

/// The decision of the mode picker for one block.
#[derive(Clone, Debug)]
pub struct PickModeContext {
  pub mic: Block,
  /// Candidates the decision was coded against.
  pub mv_refs: BlockMvRefs,
  pub rdc: RDCost,
  /// The chosen prediction leaves no residual.
  pub skippable: bool,
}

/// Outcome of coding one candidate without committing it.
#[derive(Clone, Copy, Debug)]
struct Trial {
  rd: RDCost,
  skip: bool,
  skippable: bool,
}

impl Trial {
  #[inline]
  fn beats(&self, other: Option<&Trial>) -> bool {
    other.map_or(true, |o| self.rd.rdcost < o.rd.rdcost)
  }
}

/// Quarters of a sub-8×8 block that carry their own mode, in coding order.
pub fn sub8x8_units(bsize: BlockSize) -> &'static [usize] {
  match bsize {
    BLOCK_4X8 => &[0, 1],
    BLOCK_8X4 => &[0, 2],
    _ => &[0, 1, 2, 3],
  }
}

/// Luma rectangle `(x, y, w, h)` of unit `idx` inside its 8×8 unit.
#[inline]
fn sub8x8_rect(bsize: BlockSize, idx: usize) -> (usize, usize, usize, usize) {
  ((idx & 1) * 4, (idx >> 1) * 4, bsize.width(), bsize.height())
}

/// Copies the decided units of a 4×8 or 8×4 block onto the quarters they
/// cover.
pub fn replicate_sub8x8(bmi: &mut [SubBlockInfo; 4], bsize: BlockSize) {
  match bsize {
    BLOCK_4X8 => {
      bmi[2] = bmi[0];
      bmi[3] = bmi[1];
    }
    BLOCK_8X4 => {
      bmi[1] = bmi[0];
      bmi[3] = bmi[2];
    }
    _ => {}
  }
}

#[inline]
fn set_mode(b: &mut Block, mode: PredictionMode) {
  b.mode = mode;
  b.bmi = [SubBlockInfo { mode, mv: b.mv }; 4];
}

#[inline]
fn mv_diff_in_range(mv: MotionVector, pred: MotionVector) -> bool {
  let ok = |a: i16, b: i16| {
    let d = a as i32 - b as i32;
    MV_LOW < d && d < MV_UPP
  };
  ok(mv.row, pred.row) && ok(mv.col, pred.col)
}

/// Kernel used when the frame leaves the choice to each block but the
/// block does not search it.
#[inline]
fn default_filter<T: Pixel>(fi: &FrameInvariants<T>) -> InterpFilter {
  if fi.interp_filter == InterpFilter::SWITCHABLE {
    InterpFilter::EIGHTTAP_REGULAR
  } else {
    fi.interp_filter
  }
}

fn luma_rect_sse<T: Pixel>(
  ts: &TileStateMut<'_, T>, tile_bo: TileBlockOffset, x: usize, y: usize,
  w: usize, h: usize,
) -> u64 {
  let po = tile_bo.plane_offset(ts.rec.planes[0].plane_cfg);
  let area = Area::Rect {
    x: po.x + x as isize,
    y: po.y + y as isize,
    width: w,
    height: h,
  };
  get_sse(
    &ts.input_tile.planes[0].subregion(area),
    &ts.rec.planes[0].subregion(area),
    w,
    h,
  )
}

fn mode_rate<T: Pixel>(
  fi: &FrameInvariants<T>, cw: &ContextWriter, tile_bo: TileBlockOffset,
  b: &Block, mv_refs: &BlockMvRefs, segmentation: &SegmentationState,
) -> u32 {
  let mut w = WriterCounter::new();
  write_modes(fi, cw, &mut w, tile_bo, b, mv_refs, segmentation);
  w.tell_frac() as u32
}

/// Codes `b` on every plane, measures it and restores the contexts. Inter
/// blocks also try dropping the residual.
#[profiling::function]
fn rd_trial<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, b: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> Trial {
  let checkpoint = cw.bc.checkpoint(&tile_bo);
  let pred_dist = if b.is_inter() {
    motion_compensate(fi, ts, tile_bo, b, false);
    Some(block_sse(ts, tile_bo, b.bsize, 0..MAX_PLANES) << 4)
  } else {
    None
  };
  let mut w = WriterCounter::new();
  let nonzero =
    write_tx_blocks(fi, ts, cw, &mut w, tile_bo, b, 0..MAX_PLANES, false);
  let coef_rate = w.tell_frac() as u32;
  let dist = block_sse(ts, tile_bo, b.bsize, 0..MAX_PLANES) << 4;
  cw.bc.rollback(&checkpoint);

  let segmentation = ts.segmentation;
  let coded = Block { skip: false, ..*b };
  let skipped = Block { skip: true, ..*b };

  if !nonzero {
    let rate = mode_rate(fi, cw, tile_bo, &skipped, mv_refs, segmentation);
    return Trial {
      rd: RDCost::new(rate, dist, rdmult),
      skip: true,
      skippable: true,
    };
  }

  let rate = mode_rate(fi, cw, tile_bo, &coded, mv_refs, segmentation)
    .saturating_add(coef_rate);
  let mut best =
    Trial { rd: RDCost::new(rate, dist, rdmult), skip: false, skippable: false };
  if let Some(pred_dist) = pred_dist {
    let rate = mode_rate(fi, cw, tile_bo, &skipped, mv_refs, segmentation);
    let rd = RDCost::new(rate, pred_dist, rdmult);
    if rd.rdcost < best.rd.rdcost {
      best = Trial { rd, skip: true, skippable: false };
    }
  }
  best
}

fn intra_luma_trial<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, b: &Block, rdmult: u32,
) -> i64 {
  let checkpoint = cw.bc.checkpoint(&tile_bo);
  let mut w = WriterCounter::new();
  write_tx_blocks(fi, ts, cw, &mut w, tile_bo, b, 0..1, false);
  let dist = block_sse(ts, tile_bo, b.bsize, 0..1) << 4;
  cw.bc.rollback(&checkpoint);

  if fi.is_intra() {
    cw.write_intra_mode_kf(&mut w, tile_bo, 0, &b.bmi, b.mode);
  } else {
    cw.write_intra_mode(&mut w, b.bsize, b.mode);
  }
  if !fi.lossless {
    cw.write_tx_type(&mut w, b.txsize, b.tx_type, false, b.mode);
  }
  rdcost(w.tell_frac() as u32, dist, rdmult)
}

fn intra_chroma_trial<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, b: &Block, rdmult: u32,
) -> i64 {
  let checkpoint = cw.bc.checkpoint(&tile_bo);
  let mut w = WriterCounter::new();
  write_tx_blocks(fi, ts, cw, &mut w, tile_bo, b, 1..MAX_PLANES, false);
  let dist = block_sse(ts, tile_bo, b.bsize, 1..MAX_PLANES) << 4;
  cw.bc.rollback(&checkpoint);

  cw.write_intra_uv_mode(&mut w, b.uv_mode, b.mode);
  rdcost(w.tell_frac() as u32, dist, rdmult)
}

fn intra_mode_set(sf: &SpeedSettings) -> &'static [PredictionMode] {
  if sf.reduced_intra_modes {
    INTRA_MODES_MINIMAL
  } else {
    ALL_INTRA_MODES
  }
}

/// Transform types tried with an intra `mode`.
fn intra_tx_types<T: Pixel>(
  fi: &FrameInvariants<T>, tx_size: TxSize, mode: PredictionMode,
) -> ArrayVec<TxType, TX_TYPES> {
  let mut out = ArrayVec::new();
  if fi.lossless {
    out.push(TxType::DCT_DCT);
    return out;
  }
  let allowed = tx_types_for(tx_size, false);
  if fi.config.speed_settings.reduced_tx_type_search {
    for t in [mode.intra_tx_type(), TxType::DCT_DCT] {
      if allowed.contains(&t) && !out.contains(&t) {
        out.push(t);
      }
    }
  } else {
    out.extend(allowed.iter().copied());
  }
  out
}

fn pick_intra_uv<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, b: &Block, rdmult: u32,
) -> PredictionMode {
  let mut cand = *b;
  let mut best = (i64::MAX, PredictionMode::DC_PRED);
  for &uv_mode in intra_mode_set(&fi.config.speed_settings) {
    cand.uv_mode = uv_mode;
    let rd = intra_chroma_trial(fi, ts, cw, tile_bo, &cand, rdmult);
    if rd < best.0 {
      best = (rd, uv_mode);
    }
  }
  best.1
}

/// Best intra mode of a block of 8×8 or larger: luma mode and transform
/// type first, then the chroma mode, then the whole block.
#[profiling::function]
fn pick_intra_sb<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, template: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> (Block, Trial) {
  let mut b = Block {
    ref_frames: [INTRA_FRAME, NONE_FRAME],
    mv: [MotionVector::default(); 2],
    ..*template
  };

  let mut best = (i64::MAX, PredictionMode::DC_PRED, TxType::DCT_DCT);
  for &mode in intra_mode_set(&fi.config.speed_settings) {
    set_mode(&mut b, mode);
    for tx_type in intra_tx_types(fi, b.txsize, mode) {
      b.tx_type = tx_type;
      let rd = intra_luma_trial(fi, ts, cw, tile_bo, &b, rdmult);
      if rd < best.0 {
        best = (rd, mode, tx_type);
      }
    }
  }
  set_mode(&mut b, best.1);
  b.tx_type = best.2;
  b.uv_mode = pick_intra_uv(fi, ts, cw, tile_bo, &b, rdmult);

  let trial = rd_trial(fi, ts, cw, tile_bo, &b, mv_refs, rdmult);
  b.skip = trial.skip;
  (b, trial)
}

/// Codes the 4×4 transform blocks of unit `idx` of a sub-8×8 intra block.
fn encode_sub8x8_luma<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, qc: &QuantizationContext,
  tile_bo: TileBlockOffset, bsize: BlockSize, idx: usize,
  mode: PredictionMode, tx_type: TxType,
) {
  let (x, y, bw, bh) = sub8x8_rect(bsize, idx);
  for tx_y in (y..y + bh).step_by(4) {
    for tx_x in (x..x + bw).step_by(4) {
      encode_tx_block(
        fi,
        ts,
        cw,
        w,
        qc,
        0,
        tile_bo,
        mode,
        TxSize::TX_4X4,
        tx_type,
        tx_x,
        tx_y,
        8,
        false,
      );
    }
  }
}

/// Best intra modes of a 4×4, 4×8 or 8×4 block. Each unit is decided in
/// coding order against the reconstruction of the units before it.
#[profiling::function]
fn pick_intra_sub8x8<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, template: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> (Block, Trial) {
  let bsize = template.bsize;
  let mut b = Block {
    ref_frames: [INTRA_FRAME, NONE_FRAME],
    mv: [MotionVector::default(); 2],
    tx_type: TxType::DCT_DCT,
    ..*template
  };
  let qc = block_quantizer(fi, ts, &b);
  let start = cw.bc.checkpoint(&tile_bo);

  for &idx in sub8x8_units(bsize) {
    let (x, y, w, h) = sub8x8_rect(bsize, idx);
    let mut best = (i64::MAX, PredictionMode::DC_PRED);
    for &mode in intra_mode_set(&fi.config.speed_settings) {
      let checkpoint = cw.bc.checkpoint(&tile_bo);
      let mut wr = WriterCounter::new();
      encode_sub8x8_luma(
        fi,
        ts,
        cw,
        &mut wr,
        &qc,
        tile_bo,
        bsize,
        idx,
        mode,
        b.tx_type,
      );
      let dist = luma_rect_sse(ts, tile_bo, x, y, w, h) << 4;
      cw.bc.rollback(&checkpoint);

      b.bmi[idx].mode = mode;
      if fi.is_intra() {
        cw.write_intra_mode_kf(&mut wr, tile_bo, idx, &b.bmi, mode);
      } else {
        cw.write_intra_mode(&mut wr, bsize, mode);
      }
      let rd = rdcost(wr.tell_frac() as u32, dist, rdmult);
      if rd < best.0 {
        best = (rd, mode);
      }
    }
    b.bmi[idx].mode = best.1;
    replicate_sub8x8(&mut b.bmi, bsize);

    let mut wr = WriterCounter::new();
    encode_sub8x8_luma(
      fi, ts, cw, &mut wr, &qc, tile_bo, bsize, idx, best.1, b.tx_type,
    );
  }
  cw.bc.rollback(&start);

  b.mode = b.bmi[3].mode;
  b.uv_mode = pick_intra_uv(fi, ts, cw, tile_bo, &b, rdmult);
  let trial = rd_trial(fi, ts, cw, tile_bo, &b, mv_refs, rdmult);
  b.skip = trial.skip;
  (b, trial)
}

/// Reference frames an inter block may use under the frame's reference
/// mode and the segment's restriction.
fn ref_candidates<T: Pixel>(
  fi: &FrameInvariants<T>, segmentation: &SegmentationState, segment_id: u8,
) -> ArrayVec<[RefType; 2], 5> {
  let mut out = ArrayVec::new();
  let restricted = segmentation.ref_frame(segment_id).is_some();
  if fi.reference_mode != ReferenceMode::COMPOUND || restricted {
    for rf in fi.available_refs(segmentation, segment_id) {
      out.push([rf, NONE_FRAME]);
    }
  }
  if fi.reference_mode != ReferenceMode::SINGLE && !restricted {
    for rf in [LAST_FRAME, GOLDEN_FRAME] {
      if fi.reference(rf).is_some() && fi.reference(ALTREF_FRAME).is_some() {
        out.push([rf, ALTREF_FRAME]);
      }
    }
  }
  out
}

/// Motion search of a `w`×`h` luma rectangle at frame position `po`
/// against reference `rf`.
fn search_rect_motion<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>, po: PlaneOffset,
  w: usize, h: usize, rf: RefType, predictors: &[MotionVector],
  pmv: [MotionVector; 2], rdmult: u32,
) -> Option<MotionVector> {
  let reference = fi.reference(rf)?;
  let sf = &fi.config.speed_settings;
  let ms = MotionSearch {
    org: &ts.input.planes[0],
    reference: &reference.frame.planes[0],
    po,
    w,
    h,
    range: get_mv_range(fi.width, fi.height, po, w, h),
    pmv,
    lambda: me_lambda(rdmult),
    allow_high_precision_mv: fi.allow_high_precision_mv,
    bit_depth: fi.bit_depth,
    filter: default_filter(fi),
    kernels: &*fi.kernels,
  };
  let opts = SearchOptions {
    diamond: sf.diamond_search,
    range: sf.motion_search_range,
    subpel: sf.use_subpel_search,
  };
  Some(motion_estimation(&ms, predictors, opts).0)
}

/// Searched vector of every unscaled single reference.
fn single_ref_motion<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>, tile_bo: TileBlockOffset,
  bsize: BlockSize, mv_refs: &BlockMvRefs, segment_id: u8, rdmult: u32,
) -> [Option<MotionVector>; INTER_REFS_PER_FRAME] {
  let mut out = [None; INTER_REFS_PER_FRAME];
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  let po = frame_bo.plane_offset(&ts.input.planes[0].cfg);
  let prev_frame_mvs = fi.mv_ref_params().prev_frame_mvs;
  for rf in fi.available_refs(ts.segmentation, segment_id) {
    if fi.ref_scale[rf.to_index()].is_scaled() {
      continue;
    }
    let rfs = [rf, NONE_FRAME];
    let predictors = get_subset_predictors(
      &mv_refs.get(rfs).stack,
      frame_bo,
      prev_frame_mvs,
      rf,
    );
    let pmv = [
      mv_refs.mode_mv(rfs, PredictionMode::NEWMV, 0)[0],
      mv_refs.get(rfs).nearest,
    ];
    out[rf.to_index()] = search_rect_motion(
      fi,
      ts,
      po,
      bsize.width(),
      bsize.height(),
      rf,
      &predictors,
      pmv,
      rdmult,
    );
  }
  out
}

/// Modes, candidate indices and vectors worth trying for reference `rf`.
fn inter_mode_candidates<T: Pixel>(
  fi: &FrameInvariants<T>, mv_refs: &BlockMvRefs, rf: [RefType; 2],
  bsize: BlockSize, searched: &[Option<MotionVector>; INTER_REFS_PER_FRAME],
) -> ArrayVec<(PredictionMode, u8, [MotionVector; 2]), 6> {
  use PredictionMode::*;

  let mut out = ArrayVec::new();
  let lists = if rf[1].is_inter() { 2 } else { 1 };
  let valid = |mvs: &[MotionVector; 2]| mvs[..lists].iter().all(|mv| mv.is_valid());

  // Under the all-zero context the decoder infers ZEROMV without reading
  // the NEAREST/NEAR symbols.
  let ctx = mv_refs.mode_context(rf, bsize, None);
  if ctx & (1 << ALL_ZERO_FLAG_OFFSET) == 0 {
    let mvs = mv_refs.mode_mv(rf, NEARESTMV, 0);
    if valid(&mvs) {
      out.push((NEARESTMV, 0, mvs));
    }
    let max_idx = mv_refs.get(rf).stack.len().saturating_sub(2).min(2);
    for idx in 0..=max_idx {
      let mvs = mv_refs.mode_mv(rf, NEARMV, idx);
      if valid(&mvs) {
        out.push((NEARMV, idx as u8, mvs));
      }
    }
  }
  out.push((ZEROMV, 0, [MotionVector::default(); 2]));

  let pred = mv_refs.mode_mv(rf, NEWMV, 0);
  let mut mvs = [MotionVector::default(); 2];
  for i in 0..lists {
    let Some(mv) = searched[rf[i].to_index()] else {
      return out;
    };
    let usehp = fi.allow_high_precision_mv && use_mv_hp(pred[i]);
    let mv = if usehp { mv } else { lower_mv_precision(mv, false) };
    if !mv.is_valid() || !mv_diff_in_range(mv, pred[i]) {
      return out;
    }
    mvs[i] = mv;
  }
  if mvs[..lists] != pred[..lists] {
    out.push((NEWMV, 0, mvs));
  }
  out
}

/// Kernel of a switchable block, by luma prediction error and kernel rate.
fn pick_interp_filter<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>, cw: &ContextWriter,
  tile_bo: TileBlockOffset, b: &Block, rdmult: u32,
) -> InterpFilter {
  if fi.interp_filter != InterpFilter::SWITCHABLE
    || !fi.config.speed_settings.search_interp_filters
  {
    return default_filter(fi);
  }
  let ctx = cw.bc.switchable_interp_context(tile_bo);
  let mut best = (i64::MAX, InterpFilter::EIGHTTAP_REGULAR);
  for filter in [
    InterpFilter::EIGHTTAP_REGULAR,
    InterpFilter::EIGHTTAP_SMOOTH,
    InterpFilter::MULTITAP_SHARP,
  ] {
    let cand = Block { interp_filter: filter, ..*b };
    motion_compensate(fi, ts, tile_bo, &cand, true);
    let dist = block_sse(ts, tile_bo, b.bsize, 0..1) << 4;
    let rate = fi.costs.switchable_interp[ctx][filter as usize];
    let rd = rdcost(rate, dist, rdmult);
    if rd < best.0 {
      best = (rd, filter);
    }
  }
  best.1
}

/// Every blend a compound block of wedge-capable size may use.
fn compound_candidates() -> impl Iterator<Item = CompoundType> {
  let wedges = (0..WEDGE_TYPES as u8).flat_map(|index| {
    [false, true].map(|sign| CompoundType::Wedge { index, sign })
  });
  std::iter::once(CompoundType::Average)
    .chain(wedges)
    .chain([false, true].map(|inverse| CompoundType::Diff { inverse }))
}

/// Blend of the two luma predictions `tmp` of a `bsize` block that costs
/// least against `src`, given the rate of each blend.
pub fn best_compound_type<T: Pixel>(
  src: &PlaneRegion<'_, T>, tmp: &[Vec<i16>; 2], bsize: BlockSize,
  bit_depth: usize, rdmult: u32, rate: impl Fn(CompoundType) -> u32,
) -> CompoundType {
  let (w, h) = (bsize.width(), bsize.height());
  let rect = Rect { x: 0, y: 0, width: w, height: h };
  let mut scratch = Plane::<T>::new(w, h, 0, 0);
  let mut best = (i64::MAX, CompoundType::Average);
  for compound in compound_candidates() {
    {
      let mut dst = PlaneRegionMut::new(&mut scratch, rect);
      blend_compound(&mut dst, tmp, w, h, compound, bsize, bit_depth);
    }
    let dist = get_sse(src, &PlaneRegion::new(&scratch, rect), w, h) << 4;
    let rd = rdcost(rate(compound), dist, rdmult);
    if rd < best.0 {
      best = (rd, compound);
    }
  }
  best.1
}

/// Blend of a compound block, by luma prediction error and blend rate.
fn pick_compound_type<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>, cw: &ContextWriter,
  tile_bo: TileBlockOffset, b: &Block, rdmult: u32,
) -> CompoundType {
  if !b.codes_compound_type()
    || !fi.config.speed_settings.search_compound_masks
  {
    return CompoundType::Average;
  }
  let (w, h) = (b.bsize.width(), b.bsize.height());
  let frame_po =
    ts.to_frame_block_offset(tile_bo).plane_offset(&ts.input.planes[0].cfg);
  let Some(tmp) = prep_compound(
    fi,
    0,
    frame_po,
    w,
    h,
    b.ref_frames,
    b.mv,
    b.interp_filter,
  ) else {
    return CompoundType::Average;
  };
  let po = tile_bo.plane_offset(ts.input_tile.planes[0].plane_cfg);
  let src = ts.input_tile.planes[0].subregion(Area::Rect {
    x: po.x,
    y: po.y,
    width: w,
    height: h,
  });
  best_compound_type(&src, &tmp, b.bsize, fi.bit_depth, rdmult, |c| {
    let mut w = WriterCounter::new();
    cw.write_compound_type(&mut w, b.bsize, c);
    w.tell_frac() as u32
  })
}

/// Best inter or intra coding of a block of 8×8 or larger on an inter
/// frame.
#[profiling::function]
fn pick_inter_sb<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, template: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> (Block, Trial) {
  let bsize = template.bsize;
  let segment_id = template.segmentation_idx;
  let searched =
    single_ref_motion(fi, ts, tile_bo, bsize, mv_refs, segment_id, rdmult);

  let mut best: Option<(Block, Trial)> = None;
  for rf in ref_candidates(fi, ts.segmentation, segment_id) {
    for (mode, ref_mv_idx, mvs) in
      inter_mode_candidates(fi, mv_refs, rf, bsize, &searched)
    {
      let mut b = Block {
        mode,
        uv_mode: PredictionMode::DC_PRED,
        ref_frames: rf,
        mv: mvs,
        bmi: [SubBlockInfo { mode, mv: mvs }; 4],
        ref_mv_idx,
        tx_type: TxType::DCT_DCT,
        compound: CompoundType::Average,
        ..*template
      };
      b.interp_filter = pick_interp_filter(fi, ts, cw, tile_bo, &b, rdmult);
      b.compound = pick_compound_type(fi, ts, cw, tile_bo, &b, rdmult);
      let trial = rd_trial(fi, ts, cw, tile_bo, &b, mv_refs, rdmult);
      b.skip = trial.skip;
      if trial.beats(best.as_ref().map(|(_, t)| t)) {
        best = Some((b, trial));
      }
    }
  }

  let intra = pick_intra_sb(fi, ts, cw, tile_bo, template, mv_refs, rdmult);
  match best {
    Some((b, trial)) if !intra.1.beats(Some(&trial)) => (b, trial),
    _ => intra,
  }
}

/// Predicts unit `(x, y, w, h)` of a sub-8×8 block with a single vector
/// and returns its luma error.
fn sub8x8_pred_sse<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  tile_bo: TileBlockOffset, rf: [RefType; 2], mv: MotionVector,
  filter: InterpFilter, (x, y, w, h): (usize, usize, usize, usize),
) -> u64 {
  let cfg = *ts.rec.planes[0].plane_cfg;
  let frame_po = ts.to_frame_block_offset(tile_bo).plane_offset(&cfg);
  let tile_po = tile_bo.plane_offset(&cfg);
  {
    let mut dst = ts.rec.planes[0].subregion_mut(Area::Rect {
      x: tile_po.x + x as isize,
      y: tile_po.y + y as isize,
      width: w,
      height: h,
    });
    predict_inter_rect(
      fi,
      0,
      PlaneOffset { x: frame_po.x + x as isize, y: frame_po.y + y as isize },
      &mut dst,
      w,
      h,
      rf,
      [mv, MotionVector::default()],
      filter,
      CompoundType::Average,
      BLOCK_8X8,
    );
  }
  luma_rect_sse(ts, tile_bo, x, y, w, h)
}

/// Best single-reference coding of a sub-8×8 block on an inter frame,
/// deciding each unit greedily, compared with the best intra coding.
#[profiling::function]
fn pick_inter_sub8x8<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, template: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> (Block, Trial) {
  use PredictionMode::*;

  let bsize = template.bsize;
  let filter = default_filter(fi);
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  let frame_po = frame_bo.plane_offset(&ts.input.planes[0].cfg);
  let params = fi.mv_ref_params();
  let refs: ArrayVec<RefType, INTER_REFS_PER_FRAME> = fi
    .available_refs(ts.segmentation, template.segmentation_idx)
    .collect();

  let mut best: Option<(Block, Trial)> = None;
  for rf in refs {
    let rfs = [rf, NONE_FRAME];
    let mut b = Block {
      uv_mode: DC_PRED,
      ref_frames: rfs,
      ref_mv_idx: 0,
      tx_type: TxType::DCT_DCT,
      interp_filter: filter,
      ..*template
    };
    // NEWMV units are coded against the block's nearest vector.
    let block_nearest = mv_refs.get(rfs).nearest;
    let usehp = fi.allow_high_precision_mv && use_mv_hp(block_nearest);
    let scaled = fi.ref_scale[rf.to_index()].is_scaled();

    for &idx in sub8x8_units(bsize) {
      let rect = sub8x8_rect(bsize, idx);
      let subs = append_sub8x8_mvs_for_idx(
        &cw.bc.blocks.as_const(),
        &params,
        tile_bo,
        bsize,
        rf,
        0,
        idx,
        &b.bmi,
      );
      let ctx = mv_refs.mode_context(rfs, bsize, Some(idx));

      let mut cands: ArrayVec<(PredictionMode, MotionVector), 4> =
        ArrayVec::new();
      cands.push((NEARESTMV, subs.nearest));
      cands.push((NEARMV, subs.near));
      cands.push((ZEROMV, MotionVector::default()));
      if !scaled {
        let predictors = get_subset_predictors(
          &subs.stack,
          frame_bo,
          params.prev_frame_mvs,
          rf,
        );
        let po = PlaneOffset {
          x: frame_po.x + rect.0 as isize,
          y: frame_po.y + rect.1 as isize,
        };
        if let Some(mv) = search_rect_motion(
          fi,
          ts,
          po,
          rect.2,
          rect.3,
          rf,
          &predictors,
          [block_nearest, subs.nearest],
          rdmult,
        ) {
          let mv = if usehp { mv } else { lower_mv_precision(mv, false) };
          if mv != block_nearest
            && mv.is_valid()
            && mv_diff_in_range(mv, block_nearest)
          {
            cands.push((NEWMV, mv));
          }
        }
      }

      let mut best_unit = (i64::MAX, SubBlockInfo::default());
      for (mode, mv) in cands {
        if !mv.is_valid() {
          continue;
        }
        let dist = sub8x8_pred_sse(fi, ts, tile_bo, rfs, mv, filter, rect) << 4;
        let mut w = WriterCounter::new();
        cw.write_inter_mode(&mut w, mode, ctx);
        let mut rate = w.tell_frac() as u32;
        if mode == NEWMV {
          rate += fi.costs.mv_cost(mv, block_nearest, usehp);
        }
        let rd = rdcost(rate, dist, rdmult);
        if rd < best_unit.0 {
          best_unit =
            (rd, SubBlockInfo { mode, mv: [mv, MotionVector::default()] });
        }
      }
      b.bmi[idx] = best_unit.1;
      replicate_sub8x8(&mut b.bmi, bsize);
    }
    b.mode = b.bmi[3].mode;
    b.mv = b.bmi[3].mv;

    let trial = rd_trial(fi, ts, cw, tile_bo, &b, mv_refs, rdmult);
    b.skip = trial.skip;
    if trial.beats(best.as_ref().map(|(_, t)| t)) {
      best = Some((b, trial));
    }
  }

  let intra =
    pick_intra_sub8x8(fi, ts, cw, tile_bo, template, mv_refs, rdmult);
  match best {
    Some((b, trial)) if !intra.1.beats(Some(&trial)) => (b, trial),
    _ => intra,
  }
}

/// Coding of a block whose segment forces skip: zero motion from the
/// segment's reference on inter frames, DC prediction otherwise.
fn pick_seg_skip<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, template: &Block,
  mv_refs: &BlockMvRefs, rdmult: u32,
) -> Result<(Block, Trial), CodecError> {
  let segmentation = ts.segmentation;
  let rf = segmentation.ref_frame(template.segmentation_idx).unwrap_or(LAST_FRAME);
  let mut b = Block { skip: true, tx_type: TxType::DCT_DCT, ..*template };

  let checkpoint = cw.bc.checkpoint(&tile_bo);
  if fi.is_intra() || rf == INTRA_FRAME {
    b.ref_frames = [INTRA_FRAME, NONE_FRAME];
    set_mode(&mut b, PredictionMode::DC_PRED);
    b.uv_mode = PredictionMode::DC_PRED;
    let mut w = WriterCounter::new();
    write_tx_blocks(fi, ts, cw, &mut w, tile_bo, &b, 0..MAX_PLANES, true);
  } else {
    if fi.reference(rf).is_none() {
      log::error!(
        "segment {} forces skip from missing {:?}",
        template.segmentation_idx,
        rf
      );
      return Err(CodecError::UnsupportedBitstream(format!(
        "segment {} references missing {rf:?}",
        template.segmentation_idx
      )));
    }
    b.ref_frames = [rf, NONE_FRAME];
    b.mv = [MotionVector::default(); 2];
    set_mode(&mut b, PredictionMode::ZEROMV);
    b.interp_filter = default_filter(fi);
    motion_compensate(fi, ts, tile_bo, &b, false);
  }
  let dist = block_sse(ts, tile_bo, b.bsize, 0..MAX_PLANES) << 4;
  cw.bc.rollback(&checkpoint);

  let rate = mode_rate(fi, cw, tile_bo, &b, mv_refs, segmentation);
  Ok((
    b,
    Trial { rd: RDCost::new(rate, dist, rdmult), skip: true, skippable: true },
  ))
}

/// Chooses the prediction, transform type and skip flag of the `bsize`
/// block at `tile_bo`.
///
/// The reconstruction of the block is left in an unspecified state; the
/// caller re-codes the decision. A result costing `best_rd` or more is
/// reported as [`RDCost::infinite`].
///
/// # Errors
///
/// Returns `UnsupportedBitstream` when the block's segment features cannot
/// be applied to a block of this size.
#[profiling::function]
pub fn rd_pick_sb_modes<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, tile_bo: TileBlockOffset, bsize: BlockSize,
  best_rd: i64,
) -> Result<PickModeContext, CodecError> {
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  let segment_id = fi.segment_id(bsize, frame_bo);
  let segmentation = ts.segmentation;
  segmentation.check_block(segment_id, bsize)?;
  let rdmult = block_rdmult(fi, segmentation, segment_id);

  let template = Block {
    bsize,
    segmentation_idx: segment_id,
    txsize: block_tx_size(fi, bsize),
    ..Default::default()
  };

  let mv_refs = if fi.is_intra() {
    BlockMvRefs::default()
  } else {
    let compound = fi.reference_mode != ReferenceMode::SINGLE
      && segmentation.ref_frame(segment_id).is_none();
    find_block_mv_refs(
      &cw.bc.blocks.as_const(),
      &fi.mv_ref_params(),
      tile_bo,
      bsize,
      compound,
    )
  };

  let args = (tile_bo, &template, &mv_refs, rdmult);
  let (mic, trial) =
    if segmentation.feature_active(segment_id, SegLvl::SEG_LVL_SKIP) {
      pick_seg_skip(fi, ts, cw, args.0, args.1, args.2, args.3)?
    } else {
      let picker = match (fi.is_intra(), bsize.is_sub8x8()) {
        (true, false) => pick_intra_sb,
        (true, true) => pick_intra_sub8x8,
        (false, false) => pick_inter_sb,
        (false, true) => pick_inter_sub8x8,
      };
      picker(fi, ts, cw, args.0, args.1, args.2, args.3)
    };

  let rdc = if trial.rd.rdcost < best_rd { trial.rd } else { RDCost::infinite() };
  Ok(PickModeContext { mic, mv_refs, rdc, skippable: trial.skippable })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::encoder::test_util::*;
  use crate::predict::PredictionMode::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn rd_cost_arithmetic() {
    assert_eq!(RDCost::new(512, 0, 512).rdcost, 512);
    assert_eq!(RDCost::new(0, 3, 512).rdcost, 3 << RDDIV_BITS);
    let a = RDCost::new(100, 10, 300);
    let b = RDCost::new(50, 5, 300);
    assert_eq!(a.add(b, 300), RDCost::new(150, 15, 300));
    assert!(a.add(RDCost::infinite(), 300).is_infinite());
    assert!(!RDCost::new(u32::MAX, u64::MAX, u32::MAX).is_infinite());
  }

  #[test]
  fn rd_mult_grows_with_q_and_tracks_bit_depth() {
    assert!(rd_mult(10, 8) < rd_mult(100, 8));
    assert!(rd_mult(100, 8) < rd_mult(200, 8));
    for q in [20u8, 120, 220] {
      let m8 = rd_mult(q, 8) as f64;
      let m10 = rd_mult(q, 10) as f64;
      assert!((m10 / m8 - 1.0).abs() < 0.2, "q {} {} {}", q, m8, m10);
    }
  }

  fn blended(
    tmp: &[Vec<i16>; 2], bsize: BlockSize, compound: CompoundType,
  ) -> Plane<u8> {
    let (w, h) = (bsize.width(), bsize.height());
    let mut plane = Plane::new(w, h, 0, 0);
    let rect = Rect { x: 0, y: 0, width: w, height: h };
    let mut dst = PlaneRegionMut::new(&mut plane, rect);
    blend_compound(&mut dst, tmp, w, h, compound, bsize, 8);
    plane
  }

  #[test]
  fn diagonal_split_prefers_a_wedge() {
    let bsize = BLOCK_16X16;
    let rect = Rect { x: 0, y: 0, width: 16, height: 16 };
    // Flat predictions of 40 and 200 at the precision of 8-bit prep_8tap.
    let tmp = [vec![40 << 4; bsize.area()], vec![200 << 4; bsize.area()]];
    let rate = |c: CompoundType| {
      if c.is_masked() {
        6 << PROB_COST_SHIFT
      } else {
        1 << PROB_COST_SHIFT
      }
    };
    let rdmult = rd_mult(100, 8);

    // The source follows the first prediction on one side of an oblique
    // edge through the centre and the second on the other.
    let wedge = CompoundType::Wedge { index: 1, sign: false };
    let src = blended(&tmp, bsize, wedge);
    let pick = best_compound_type(
      &PlaneRegion::new(&src, rect),
      &tmp,
      bsize,
      8,
      rdmult,
      rate,
    );
    assert!(matches!(pick, CompoundType::Wedge { .. }), "{:?}", pick);

    let src = blended(&tmp, bsize, CompoundType::Average);
    let pick = best_compound_type(
      &PlaneRegion::new(&src, rect),
      &tmp,
      bsize,
      8,
      rdmult,
      rate,
    );
    assert_eq!(pick, CompoundType::Average);
  }

  #[test]
  fn sub8x8_units_cover_the_quarters() {
    let mut bmi = [SubBlockInfo::default(); 4];
    bmi[0].mode = V_PRED;
    bmi[1].mode = H_PRED;
    replicate_sub8x8(&mut bmi, BLOCK_4X8);
    assert_eq!(bmi.map(|s| s.mode), [V_PRED, H_PRED, V_PRED, H_PRED]);
    assert_eq!(sub8x8_units(BLOCK_8X4), &[0, 2]);
    assert_eq!(sub8x8_rect(BLOCK_8X4, 2), (0, 4, 8, 4));
  }

  #[test]
  fn flat_block_picks_dc_and_skips() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fs = flat_frame_state(&fi, 128);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut ts = TileStateMut::new(&mut fs, Default::default(), 64, 64);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });

    let ctx =
      rd_pick_sb_modes(&fi, &mut ts, &mut cw, bo, BLOCK_16X16, i64::MAX)
        .unwrap();
    assert_eq!(ctx.mic.mode, DC_PRED);
    assert_eq!(ctx.mic.uv_mode, DC_PRED);
    assert!(ctx.mic.skip);
    assert!(ctx.skippable);
    assert_eq!(ctx.rdc.dist, 0);
  }

  #[test]
  fn bound_turns_result_infinite() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fs = flat_frame_state(&fi, 128);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut ts = TileStateMut::new(&mut fs, Default::default(), 64, 64);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });

    let ctx = rd_pick_sb_modes(&fi, &mut ts, &mut cw, bo, BLOCK_8X8, 1).unwrap();
    assert!(ctx.rdc.is_infinite());
  }

  #[test]
  fn flat_inter_block_prefers_zero_motion_skip() {
    let (fi, mut fs) = inter_frame_from_flat::<u8>(64, 64, 100, 90);
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let mut ts = TileStateMut::new(&mut fs, Default::default(), 64, 64);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset(BlockOffset { x: 2, y: 2 });

    let ctx =
      rd_pick_sb_modes(&fi, &mut ts, &mut cw, bo, BLOCK_16X16, i64::MAX)
        .unwrap();
    assert!(ctx.mic.is_inter());
    assert!(ctx.mic.skip);
    assert_eq!(ctx.rdc.dist, 0);
    assert!(ctx.mic.mv[0].is_zero());
  }
}
