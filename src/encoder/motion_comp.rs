// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::encoder::frame::FrameInvariants;
use crate::frame::*;
use crate::mc::*;
use crate::partition::*;
use crate::tiling::*;
use crate::util::*;
use crate::wedge::{wedge_mask, MAX_WEDGE_WEIGHT};

/// `mv` in 1/16 samples of a plane with the given subsampling, as
/// `(row, col)`.
#[inline]
fn mv_q4(mv: MotionVector, xdec: usize, ydec: usize) -> (i32, i32) {
  (((mv.row as i32) << 1) >> ydec, ((mv.col as i32) << 1) >> xdec)
}

/// Predicts a `w`×`h` rectangle of plane `p` whose top-left sample is at
/// `frame_po` from a single reference.
fn predict_one<T: Pixel>(
  fi: &FrameInvariants<T>, p: usize, frame_po: PlaneOffset,
  dst: &mut PlaneRegionMut<'_, T>, w: usize, h: usize, rf: RefType,
  mv: MotionVector, filter: InterpFilter,
) {
  let Some(rec) = fi.reference(rf) else {
    debug_assert!(false, "prediction from missing {:?}", rf);
    return;
  };
  let src = &rec.frame.planes[p];
  let PlaneConfig { xdec, ydec, .. } = src.cfg;
  let (row_q4, col_q4) = mv_q4(mv, xdec, ydec);
  let sf = &fi.ref_scale[rf.to_index()];
  if sf.is_scaled() {
    let (px, py) = sf.scaled_position(
      frame_po.x as i32,
      frame_po.y as i32,
      (row_q4, col_q4),
    );
    put_8tap_scaled(
      dst,
      src,
      px,
      py,
      sf.x_step_q4,
      sf.y_step_q4,
      w,
      h,
      filter,
      fi.bit_depth,
      &*fi.kernels,
    );
  } else {
    put_8tap(
      dst,
      src,
      frame_po.x + (col_q4 >> SUBPEL_BITS) as isize,
      frame_po.y + (row_q4 >> SUBPEL_BITS) as isize,
      w,
      h,
      (col_q4 & SUBPEL_MASK as i32) as usize,
      (row_q4 & SUBPEL_MASK as i32) as usize,
      filter,
      fi.bit_depth,
      &*fi.kernels,
    );
  }
}

/// Intermediate-precision prediction of a `w`×`h` rectangle of plane `p`
/// from one reference, as `prep_8tap` lays it out.
fn prep_one<T: Pixel>(
  fi: &FrameInvariants<T>, p: usize, frame_po: PlaneOffset, tmp: &mut [i16],
  w: usize, h: usize, rf: RefType, mv: MotionVector, filter: InterpFilter,
) -> bool {
  let Some(rec) = fi.reference(rf) else {
    debug_assert!(false, "prediction from missing {:?}", rf);
    return false;
  };
  if !fi.ref_scale[rf.to_index()].is_scaled() {
    let src = &rec.frame.planes[p];
    let (row_q4, col_q4) = mv_q4(mv, src.cfg.xdec, src.cfg.ydec);
    prep_8tap(
      tmp,
      src,
      frame_po.x + (col_q4 >> SUBPEL_BITS) as isize,
      frame_po.y + (row_q4 >> SUBPEL_BITS) as isize,
      w,
      h,
      (col_q4 & SUBPEL_MASK as i32) as usize,
      (row_q4 & SUBPEL_MASK as i32) as usize,
      filter,
      fi.bit_depth,
      &*fi.kernels,
    );
    return true;
  }

  // Scaled references are predicted at pixel precision and lifted.
  let mut pred = Plane::<T>::new(w, h, 0, 0);
  {
    let rect = Rect { x: 0, y: 0, width: w, height: h };
    let mut region = PlaneRegionMut::new(&mut pred, rect);
    predict_one(fi, p, frame_po, &mut region, w, h, rf, mv, filter);
  }
  let ib = intermediate_bits(fi.bit_depth);
  for r in 0..h {
    let row = &pred.data[r * pred.cfg.stride..][..w];
    for (t, &v) in tmp[r * w..][..w].iter_mut().zip(row) {
      *t = (i32::cast_from(v) << ib) as i16;
    }
  }
  true
}

/// Weights of a difference-weighted blend. The first prediction gets a
/// larger share where the two disagree, the second one when `inverse`.
pub fn diff_weighted_mask(
  tmp1: &[i16], tmp2: &[i16], inverse: bool, bit_depth: usize,
) -> Vec<u8> {
  let shift = intermediate_bits(bit_depth) + bit_depth - 8;
  tmp1
    .iter()
    .zip(tmp2)
    .map(|(&a, &b)| {
      let diff = round_shift((a as i32 - b as i32).abs(), shift);
      let m = (DIFF_MASK_BASE + diff / DIFF_FACTOR).min(64) as u8;
      if inverse {
        MAX_WEDGE_WEIGHT - m
      } else {
        m
      }
    })
    .collect()
}

const DIFF_MASK_BASE: i32 = 38;
const DIFF_FACTOR: i32 = 16;

/// Combines two intermediate predictions of plane `p` of a `bsize` block
/// the way `compound` says.
pub fn blend_compound<T: Pixel>(
  dst: &mut PlaneRegionMut<'_, T>, tmp: &[Vec<i16>; 2], w: usize, h: usize,
  compound: CompoundType, bsize: BlockSize, bit_depth: usize,
) {
  let PlaneConfig { xdec, ydec, .. } = *dst.plane_cfg;
  match compound {
    CompoundType::Average => mc_avg(dst, &tmp[0], &tmp[1], w, h, bit_depth),
    CompoundType::Wedge { index, sign } => {
      let mask = wedge_mask(bsize, index, sign);
      mc_mask(
        dst,
        &tmp[0],
        &tmp[1],
        w,
        h,
        mask,
        bsize.width(),
        xdec,
        ydec,
        bit_depth,
      );
    }
    CompoundType::Diff { inverse } => {
      let mask = diff_weighted_mask(&tmp[0], &tmp[1], inverse, bit_depth);
      mc_mask(dst, &tmp[0], &tmp[1], w, h, &mask, w, 0, 0, bit_depth);
    }
  }
}

/// Inter prediction of one rectangle of plane `p`. Compound blocks blend
/// their two references according to `compound`; wedge masks are those
/// of a `bsize` block.
pub fn predict_inter_rect<T: Pixel>(
  fi: &FrameInvariants<T>, p: usize, frame_po: PlaneOffset,
  dst: &mut PlaneRegionMut<'_, T>, w: usize, h: usize,
  ref_frames: [RefType; 2], mvs: [MotionVector; 2], filter: InterpFilter,
  compound: CompoundType, bsize: BlockSize,
) {
  if !ref_frames[1].is_inter() {
    predict_one(fi, p, frame_po, dst, w, h, ref_frames[0], mvs[0], filter);
    return;
  }

  if let Some(tmp) =
    prep_compound(fi, p, frame_po, w, h, ref_frames, mvs, filter)
  {
    blend_compound(dst, &tmp, w, h, compound, bsize, fi.bit_depth);
  }
}

/// Both predictions of a compound rectangle before they are combined.
pub fn prep_compound<T: Pixel>(
  fi: &FrameInvariants<T>, p: usize, frame_po: PlaneOffset, w: usize,
  h: usize, ref_frames: [RefType; 2], mvs: [MotionVector; 2],
  filter: InterpFilter,
) -> Option<[Vec<i16>; 2]> {
  let mut tmp = [vec![0i16; w * h], vec![0i16; w * h]];
  for (i, t) in tmp.iter_mut().enumerate() {
    if !prep_one(fi, p, frame_po, t, w, h, ref_frames[i], mvs[i], filter) {
      return None;
    }
  }
  Some(tmp)
}

/// Rounded average of the four quarter vectors of a sub-8×8 block, used by
/// the chroma planes.
pub fn average_split_mvs(b: &Block, list: usize) -> MotionVector {
  let round = |sum: i32| -> i16 {
    (if sum < 0 { sum - 2 } else { sum + 2 } / 4) as i16
  };
  let (rows, cols) = (0..4).fold((0i32, 0i32), |(r, c), i| {
    let mv = b.bmi[i].mv[list];
    (r + mv.row as i32, c + mv.col as i32)
  });
  MotionVector { row: round(rows), col: round(cols) }
}

/// Writes the inter prediction of block `b` at `tile_bo` into the
/// reconstruction of the tile. Sub-8×8 blocks predict each luma quarter
/// with its own vector and chroma with the average vector.
#[profiling::function]
pub fn motion_compensate<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &mut TileStateMut<'_, T>,
  tile_bo: TileBlockOffset, b: &Block, luma_only: bool,
) {
  debug_assert!(b.is_inter());
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  let num_planes = if luma_only { 1 } else { MAX_PLANES };
  let sub8x8 = b.bsize.is_sub8x8();

  for p in 0..num_planes {
    let cfg = *ts.rec.planes[p].plane_cfg;
    let frame_po = frame_bo.plane_offset(&cfg);
    let tile_po = tile_bo.plane_offset(&cfg);
    let (w, h) = if p == 0 {
      (b.bsize.width(), b.bsize.height())
    } else {
      let uv = b.bsize.uv_size();
      (uv.width(), uv.height())
    };

    if p == 0 && sub8x8 {
      for i in 0..4 {
        let (dx, dy) = ((i & 1) * 4, (i >> 1) * 4);
        let mut dst = ts.rec.planes[0].subregion_mut(Area::Rect {
          x: tile_po.x + dx as isize,
          y: tile_po.y + dy as isize,
          width: 4,
          height: 4,
        });
        predict_inter_rect(
          fi,
          0,
          PlaneOffset {
            x: frame_po.x + dx as isize,
            y: frame_po.y + dy as isize,
          },
          &mut dst,
          4,
          4,
          b.ref_frames,
          b.bmi[i].mv,
          b.interp_filter,
          CompoundType::Average,
          b.bsize,
        );
      }
      continue;
    }

    // Sub-8×8 blocks are never masked.
    let compound = if sub8x8 { CompoundType::Average } else { b.compound };
    let mvs = if sub8x8 {
      [average_split_mvs(b, 0), average_split_mvs(b, 1)]
    } else {
      b.mv
    };
    let mut dst = ts.rec.planes[p].subregion_mut(Area::Rect {
      x: tile_po.x,
      y: tile_po.y,
      width: w,
      height: h,
    });
    predict_inter_rect(
      fi,
      p,
      frame_po,
      &mut dst,
      w,
      h,
      b.ref_frames,
      mvs,
      b.interp_filter,
      compound,
      b.bsize,
    );
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn split_mv_average_rounds_away_from_zero() {
    let mut b = Block { bsize: BLOCK_4X4, ..Default::default() };
    let mvs = [(1, -1), (2, -2), (2, -2), (2, -2)];
    for (i, &(row, col)) in mvs.iter().enumerate() {
      b.bmi[i].mv[0] = MotionVector { row, col };
    }
    // 7 / 4 and -7 / 4 both round to magnitude 2.
    assert_eq!(average_split_mvs(&b, 0), MotionVector { row: 2, col: -2 });
    assert_eq!(average_split_mvs(&b, 1), MotionVector::default());
  }

  #[test]
  fn difference_mask_follows_disagreement() {
    let a = [100 << 4, 100 << 4, 0];
    let b = [100 << 4, 0, 100 << 4];
    assert_eq!(diff_weighted_mask(&a, &b, false, 8), vec![38, 44, 44]);
    assert_eq!(diff_weighted_mask(&a, &b, true, 8), vec![26, 20, 20]);
    // Disagreement is measured on the 8-bit scale at every depth.
    let a10 = [400 << 4, 0];
    let b10 = [0, 0];
    assert_eq!(diff_weighted_mask(&a10, &b10, false, 10), vec![44, 38]);
  }

  #[test]
  fn wedge_blend_takes_each_side_from_its_prediction() {
    let tmp = [vec![40 << 4; 256], vec![200 << 4; 256]];
    let mut plane = Plane::<u8>::new(16, 16, 0, 0);
    let rect = Rect { x: 0, y: 0, width: 16, height: 16 };
    // A vertical edge a quarter of the way across.
    let wedge = CompoundType::Wedge { index: 6, sign: false };
    blend_compound(
      &mut PlaneRegionMut::new(&mut plane, rect),
      &tmp,
      16,
      16,
      wedge,
      BLOCK_16X16,
      8,
    );
    for row in plane.rows_iter().take(16) {
      assert_eq!(row[0], 40);
      assert_eq!(row[15], 200);
      assert!(row[3] > 40 && row[4] < 200);
    }

    let average = CompoundType::Average;
    blend_compound(
      &mut PlaneRegionMut::new(&mut plane, rect),
      &tmp,
      16,
      16,
      average,
      BLOCK_16X16,
      8,
    );
    assert!(plane.rows_iter().take(16).all(|row| row[..16] == [120; 16]));
  }

  #[test]
  fn chroma_phase_of_luma_vector() {
    let mv = MotionVector { row: 3, col: -5 };
    assert_eq!(mv_q4(mv, 0, 0), (6, -10));
    assert_eq!(mv_q4(mv, 1, 1), (3, -5));
  }
}
