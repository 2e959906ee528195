// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::ops::Range;

use crate::context::*;
use crate::dist::get_sse;
use crate::ec::Writer;
use crate::encoder::frame::FrameInvariants;
use crate::frame::*;
use crate::partition::*;
use crate::predict::*;
use crate::quantize::QuantizationContext;
use crate::tiling::*;
use crate::transform::*;
use crate::util::*;

/// Luma transform size of a block.
pub fn block_tx_size<T: Pixel>(
  fi: &FrameInvariants<T>, bsize: BlockSize,
) -> TxSize {
  if fi.lossless || bsize.is_sub8x8() {
    TxSize::TX_4X4
  } else {
    bsize.max_tx_size().min(TxSize::TX_32X32)
  }
}

/// Area of plane `p` covered by a block. Sub-8×8 blocks cover a whole
/// 8×8 luma unit.
#[inline]
pub fn plane_block_dims(bsize: BlockSize, p: usize) -> (usize, usize) {
  if p == 0 {
    (bsize.width().max(8), bsize.height().max(8))
  } else {
    let uv = bsize.uv_size();
    (uv.width(), uv.height())
  }
}

/// Squared error between source and reconstruction over the planes of a
/// block.
pub fn block_sse<T: Pixel>(
  ts: &TileStateMut<'_, T>, tile_bo: TileBlockOffset, bsize: BlockSize,
  planes: Range<usize>,
) -> u64 {
  planes
    .map(|p| {
      let (w, h) = plane_block_dims(bsize, p);
      let po = tile_bo.plane_offset(ts.rec.planes[p].plane_cfg);
      let area = Area::Rect { x: po.x, y: po.y, width: w, height: h };
      let src = ts.input_tile.planes[p].subregion(area);
      let rec = ts.rec.planes[p].subregion(area);
      get_sse(&src, &rec, w, h)
    })
    .sum()
}

/// Quantizer of a block, from the quantizer index of its segment.
pub fn block_quantizer<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>, b: &Block,
) -> QuantizationContext {
  let qindex = ts.segmentation.qindex(b.segmentation_idx, fi.base_q_idx);
  QuantizationContext::new(qindex, fi.bit_depth, !b.is_inter())
}

// For a transform block,
// predict, transform, quantize, write coefficients,
// dequantize, inverse-transform.
#[profiling::function]
pub fn encode_tx_block<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, qc: &QuantizationContext, p: usize,
  tile_bo: TileBlockOffset, mode: PredictionMode, tx_size: TxSize,
  tx_type: TxType, tx_x: usize, tx_y: usize, block_w: usize, skip: bool,
) -> bool {
  let cfg = *ts.rec.planes[p].plane_cfg;
  let PlaneConfig { xdec, ydec, .. } = cfg;
  let block_po = tile_bo.plane_offset(&cfg);
  let po = PlaneOffset {
    x: block_po.x + tx_x as isize,
    y: block_po.y + tx_y as isize,
  };
  let n = tx_size.width();
  let area = Area::Rect { x: po.x, y: po.y, width: n, height: n };

  if mode.is_intra() {
    let sb_h = if p == 0 { SB_SIZE } else { SB_SIZE >> ydec };
    let block_y = ts.to_frame_block_offset(tile_bo).plane_offset(&cfg).y;
    let region_w = ts.rec.planes[p].rect().width;
    let have_right = has_top_right(
      tx_x,
      tx_y,
      n,
      block_w,
      block_y as usize,
      sb_h,
      po.x as usize + n,
      region_w,
    );
    let edge = get_intra_edges(
      &ts.rec.planes[p].as_const(),
      po,
      tx_size,
      fi.bit_depth,
      have_right,
    );
    let mut dst = ts.rec.planes[p].subregion_mut(area);
    mode.predict_intra(&mut dst, tx_size, fi.bit_depth, &edge);
  }

  if skip {
    return false;
  }

  let mut residual = [0i32; 32 * 32];
  let mut coeffs = [0i32; 32 * 32];
  let mut qcoeffs = [0i32; 32 * 32];
  let residual = &mut residual[..tx_size.area()];
  let coeffs = &mut coeffs[..tx_size.area()];
  let qcoeffs = &mut qcoeffs[..tx_size.area()];

  {
    let src = ts.input_tile.planes[p].subregion(area);
    let pred = ts.rec.planes[p].subregion(area);
    for ((res, s), r) in
      residual.chunks_mut(n).zip(src.rows_iter()).zip(pred.rows_iter())
    {
      for ((d, &a), &b) in res.iter_mut().zip(&s[..n]).zip(&r[..n]) {
        *d = i32::cast_from(a) - i32::cast_from(b);
      }
    }
  }

  forward_transform(residual, coeffs, n, tx_size, tx_type, fi.lossless);
  let eob = qc.quantize(coeffs, qcoeffs, tx_size);
  let nonzero = cw.write_coeffs(
    w,
    p,
    tile_bo,
    tx_x >> 2,
    tx_y >> 2,
    qcoeffs,
    eob,
    tx_size,
    xdec,
    ydec,
  );

  if eob > 0 {
    // `coeffs` is reused for the dequantized values and `residual` for the
    // reconstructed residual.
    qc.dequantize(qcoeffs, coeffs);
    inverse_transform(coeffs, residual, tx_size, tx_type, fi.lossless);
    let mut dst = ts.rec.planes[p].subregion_mut(area);
    for (res, row) in residual.chunks(n).zip(dst.rows_iter_mut()) {
      for (&d, px) in res.iter().zip(row[..n].iter_mut()) {
        *px = T::clip(i32::cast_from(*px) + d, fi.bit_depth);
      }
    }
  }

  nonzero
}

/// Prediction mode and transform type of the transform block at `(tx_x,
/// tx_y)` of plane `p`.
fn tx_block_mode(
  b: &Block, p: usize, tx_x: usize, tx_y: usize, tx_type: TxType,
) -> (PredictionMode, TxType) {
  if b.is_inter() {
    let t = if p == 0 { tx_type } else { TxType::DCT_DCT };
    return (PredictionMode::NEARESTMV, t);
  }
  if p > 0 {
    return (b.uv_mode, b.uv_mode.intra_tx_type());
  }
  let mode = if b.bsize.is_sub8x8() {
    b.bmi[((tx_y >> 2) << 1) + (tx_x >> 2)].mode
  } else {
    b.mode
  };
  (mode, tx_type)
}

/// Codes every transform block of the given planes of `b` in raster
/// order. Intra blocks are predicted transform block by transform block;
/// inter blocks must already hold their motion compensated prediction.
/// Returns whether any coefficient was nonzero.
pub fn write_tx_blocks<T: Pixel, W: Writer>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  cw: &mut ContextWriter, w: &mut W, tile_bo: TileBlockOffset, b: &Block,
  planes: Range<usize>, skip: bool,
) -> bool {
  let qc = block_quantizer(fi, ts, b);
  let tx_type = if fi.lossless { TxType::DCT_DCT } else { b.tx_type };
  let mut nonzero = false;

  for p in planes {
    let (bw, bh) = plane_block_dims(b.bsize, p);
    let tx_size = if p == 0 { b.txsize } else { b.txsize.uv_tx_size(b.bsize) };
    let tx_size = if fi.lossless { TxSize::TX_4X4 } else { tx_size };
    let n = tx_size.width();
    for tx_y in (0..bh).step_by(n) {
      for tx_x in (0..bw).step_by(n) {
        let (mode, t) = tx_block_mode(b, p, tx_x, tx_y, tx_type);
        let t = if fi.lossless { TxType::DCT_DCT } else { t };
        nonzero |= encode_tx_block(
          fi, ts, cw, w, &qc, p, tile_bo, mode, tx_size, t, tx_x, tx_y, bw,
          skip,
        );
      }
    }
  }

  if skip {
    cw.bc.reset_skip_context(tile_bo, b.bsize);
  }
  nonzero
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn sub8x8_blocks_cover_an_8x8_unit() {
    assert_eq!(plane_block_dims(BLOCK_4X8, 0), (8, 8));
    assert_eq!(plane_block_dims(BLOCK_4X8, 1), (4, 4));
    assert_eq!(plane_block_dims(BLOCK_32X16, 0), (32, 16));
    assert_eq!(plane_block_dims(BLOCK_32X16, 2), (16, 8));
  }

  #[test]
  fn sub8x8_quarters_use_their_own_mode() {
    let mut b = Block { bsize: BLOCK_4X4, ..Default::default() };
    b.bmi[3].mode = PredictionMode::TM_PRED;
    b.uv_mode = PredictionMode::V_PRED;
    assert_eq!(
      tx_block_mode(&b, 0, 4, 4, TxType::DCT_DCT).0,
      PredictionMode::TM_PRED
    );
    assert_eq!(
      tx_block_mode(&b, 1, 0, 0, TxType::DCT_DCT),
      (PredictionMode::V_PRED, TxType::ADST_DCT)
    );
  }
}
