// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::dist::get_sad;
use crate::frame::*;
use crate::mc::*;
use crate::partition::*;
use crate::tiling::*;
use crate::util::*;

use arrayvec::ArrayVec;

pub const MAX_PREDICTORS: usize = 16;

/// Blocks may point up to this many pixels outside the frame.
const MV_SEARCH_BORDER: isize = 16;

/// Allowed motion vectors of a block, in 1/8 pel, bounds included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MvRange {
  pub col_min: isize,
  pub col_max: isize,
  pub row_min: isize,
  pub row_max: isize,
}

impl MvRange {
  #[inline]
  pub fn contains(&self, mv: MotionVector) -> bool {
    (self.col_min..=self.col_max).contains(&(mv.col as isize))
      && (self.row_min..=self.row_max).contains(&(mv.row as isize))
  }

  #[inline]
  pub fn clamp(&self, mv: MotionVector) -> MotionVector {
    MotionVector {
      row: (mv.row as isize).clamp(self.row_min, self.row_max) as i16,
      col: (mv.col as isize).clamp(self.col_min, self.col_max) as i16,
    }
  }
}

/// Range of a `blk_w`×`blk_h` block at luma position `po` in a
/// `frame_w`×`frame_h` frame.
pub fn get_mv_range(
  frame_w: usize, frame_h: usize, po: PlaneOffset, blk_w: usize, blk_h: usize,
) -> MvRange {
  let border_w = (MV_SEARCH_BORDER + blk_w as isize) * 8;
  let border_h = (MV_SEARCH_BORDER + blk_h as isize) * 8;
  let col_min = -po.x * 8 - border_w;
  let col_max = (frame_w as isize - po.x - blk_w as isize) * 8 + border_w;
  let row_min = -po.y * 8 - border_h;
  let row_max = (frame_h as isize - po.y - blk_h as isize) * 8 + border_h;

  let lo = MV_LOW as isize + 1;
  let hi = MV_UPP as isize - 1;
  MvRange {
    col_min: col_min.max(lo),
    col_max: col_max.min(hi),
    row_min: row_min.max(lo),
    row_max: row_max.min(hi),
  }
}

/// Rough bit count of coding `a` against `b`.
pub fn get_mv_rate(
  a: MotionVector, b: MotionVector, allow_high_precision_mv: bool,
) -> u32 {
  #[inline(always)]
  fn diff_to_rate(diff: i16, allow_high_precision_mv: bool) -> u32 {
    let d = if allow_high_precision_mv { diff } else { diff >> 1 };
    if d == 0 {
      0
    } else {
      2 * (16 - d.unsigned_abs().leading_zeros())
    }
  }

  diff_to_rate(a.row - b.row, allow_high_precision_mv)
    + diff_to_rate(a.col - b.col, allow_high_precision_mv)
}

/// Starting points of the search: the candidate stack of the reference,
/// the spatial median, zero, and the co-located motion of the previous
/// frame.
pub fn get_subset_predictors(
  candidates: &[CandidateMV], frame_bo: BlockOffset,
  prev_frame_mvs: Option<&FrameMvs>, ref_frame: RefType,
) -> ArrayVec<MotionVector, MAX_PREDICTORS> {
  let mut predictors = ArrayVec::<MotionVector, MAX_PREDICTORS>::new();
  let mut push = |mv: MotionVector| {
    let mv = mv.quantize_to_fullpel();
    if !predictors.contains(&mv) && !predictors.is_full() {
      predictors.push(mv);
    }
  };

  for c in candidates.iter().take(4) {
    push(c.this_mv);
  }

  if candidates.len() >= 3 {
    let median = |f: fn(&CandidateMV) -> i16| {
      let mut v: ArrayVec<i16, 3> = candidates.iter().take(3).map(f).collect();
      v.sort_unstable();
      v[1]
    };
    push(MotionVector { row: median(|c| c.this_mv.row), col: median(|c| c.this_mv.col) });
  }

  push(MotionVector::default());

  if let Some(prev) = prev_frame_mvs {
    let y = frame_bo.y.min(prev.rows - 1);
    let x = frame_bo.x.min(prev.cols - 1);
    let mut add_from = |row: &[MvRef], x: usize| {
      let m = row[x];
      for (rf, mv) in m.ref_frames.iter().zip(m.mv.iter()) {
        if *rf == ref_frame {
          push(*mv);
        }
      }
    };
    let row = prev.wait_row(y);
    add_from(row, x);
    if x + 1 < prev.cols {
      add_from(row, x + 1);
    }
    if y + 1 < prev.rows {
      add_from(prev.wait_row(y + 1), x);
    }
  }

  predictors
}

/// Fixed inputs of the search of one block against one reference plane.
pub struct MotionSearch<'a, T: Pixel> {
  pub org: &'a Plane<T>,
  pub reference: &'a Plane<T>,
  /// Luma position of the block in the frame.
  pub po: PlaneOffset,
  pub w: usize,
  pub h: usize,
  pub range: MvRange,
  /// Predictors the vector may be coded against.
  pub pmv: [MotionVector; 2],
  /// Weight of one rate unit, in 1/256 SAD.
  pub lambda: u32,
  pub allow_high_precision_mv: bool,
  pub bit_depth: usize,
  pub filter: InterpFilter,
  pub kernels: &'a dyn InterpolationStrategy,
}

/// Search strategy knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOptions {
  pub diamond: bool,
  /// Full-pel radius of the exhaustive search, in pixels.
  pub range: isize,
  pub subpel: bool,
}

impl<'a, T: Pixel> MotionSearch<'a, T> {
  fn sad(&self, tmp: &mut Plane<T>, mv: MotionVector) -> u32 {
    let (w, h) = (self.w, self.h);
    {
      let mut dst =
        PlaneRegionMut::new(tmp, Rect { x: 0, y: 0, width: w, height: h });
      put_8tap(
        &mut dst,
        self.reference,
        self.po.x + (mv.col as isize >> 3),
        self.po.y + (mv.row as isize >> 3),
        w,
        h,
        ((mv.col & 7) << 1) as usize,
        ((mv.row & 7) << 1) as usize,
        self.filter,
        self.bit_depth,
        self.kernels,
      );
    }
    let org = PlaneRegion::new(
      self.org,
      Rect { x: self.po.x, y: self.po.y, width: w, height: h },
    );
    let pred = PlaneRegion::new(tmp, Rect { x: 0, y: 0, width: w, height: h });
    get_sad(&org, &pred, w, h)
  }

  fn rate(&self, mv: MotionVector) -> u32 {
    let hp = self.allow_high_precision_mv;
    let rate1 = get_mv_rate(mv, self.pmv[0], hp);
    let rate2 = get_mv_rate(mv, self.pmv[1], hp);
    rate1.min(rate2 + 1)
  }

  /// SAD plus weighted rate, or `u64::MAX` outside the range.
  pub fn get_mv_rd_cost(&self, tmp: &mut Plane<T>, mv: MotionVector) -> u64 {
    if !self.range.contains(mv) {
      return u64::MAX;
    }
    let sad = self.sad(tmp, mv);
    256 * sad as u64 + self.rate(mv) as u64 * self.lambda as u64
  }

  fn get_best_predictor(
    &self, tmp: &mut Plane<T>, predictors: &[MotionVector],
  ) -> (MotionVector, u64) {
    let mut best = (MotionVector::default(), u64::MAX);
    for &init_mv in predictors.iter() {
      let cost = self.get_mv_rd_cost(tmp, init_mv);
      if cost < best.1 {
        best = (init_mv, cost);
      }
    }
    best
  }

  fn diamond_me_search(
    &self, tmp: &mut Plane<T>, center_mv: &mut MotionVector,
    center_mv_cost: &mut u64,
  ) {
    let diamond_pattern = [(1i16, 0i16), (0, 1), (-1, 0), (0, -1)];
    let mut diamond_radius: i16 = 16;

    loop {
      let mut best_diamond_rd_cost = u64::MAX;
      let mut best_diamond_mv = MotionVector::default();

      for p in diamond_pattern.iter() {
        let cand_mv = MotionVector {
          row: center_mv.row + diamond_radius * p.0,
          col: center_mv.col + diamond_radius * p.1,
        };

        let rd_cost = self.get_mv_rd_cost(tmp, cand_mv);

        if rd_cost < best_diamond_rd_cost {
          best_diamond_rd_cost = rd_cost;
          best_diamond_mv = cand_mv;
        }
      }

      if *center_mv_cost <= best_diamond_rd_cost {
        if diamond_radius == 8 {
          break;
        } else {
          diamond_radius /= 2;
        }
      } else {
        *center_mv = best_diamond_mv;
        *center_mv_cost = best_diamond_rd_cost;
      }
    }
  }

  fn full_search(
    &self, tmp: &mut Plane<T>, center: MotionVector, range: isize, step: usize,
    best_mv: &mut MotionVector, lowest_cost: &mut u64,
  ) {
    let cx = center.col as isize / 8;
    let cy = center.row as isize / 8;
    let x_lo = (cx - range).max(self.range.col_min / 8);
    let x_hi = (cx + range).min(self.range.col_max / 8);
    let y_lo = (cy - range).max(self.range.row_min / 8);
    let y_hi = (cy + range).min(self.range.row_max / 8);

    for y in (y_lo..=y_hi).step_by(step) {
      for x in (x_lo..=x_hi).step_by(step) {
        let mv = MotionVector { row: (8 * y) as i16, col: (8 * x) as i16 };
        let cost = self.get_mv_rd_cost(tmp, mv);
        if cost < *lowest_cost {
          *lowest_cost = cost;
          *best_mv = mv;
        }
      }
    }
  }

  fn sub_pixel_search(
    &self, tmp: &mut Plane<T>, best_mv: &mut MotionVector,
    lowest_cost: &mut u64,
  ) {
    let mut steps: ArrayVec<i16, 4> = [8, 4, 2].into_iter().collect();
    if self.allow_high_precision_mv && use_mv_hp(self.pmv[0]) {
      steps.push(1);
    }

    for step in steps {
      let center_mv_h = *best_mv;
      for i in 0..3 {
        for j in 0..3 {
          // Skip the center point that was already tested
          if i == 1 && j == 1 {
            continue;
          }

          let cand_mv = MotionVector {
            row: center_mv_h.row + step * (i as i16 - 1),
            col: center_mv_h.col + step * (j as i16 - 1),
          };

          let cost = self.get_mv_rd_cost(tmp, cand_mv);
          if cost < *lowest_cost {
            *lowest_cost = cost;
            *best_mv = cand_mv;
          }
        }
      }
    }
  }
}

/// Best vector of a block against one reference and its search cost.
#[profiling::function]
pub fn motion_estimation<T: Pixel>(
  ms: &MotionSearch<'_, T>, predictors: &[MotionVector], opts: SearchOptions,
) -> (MotionVector, u64) {
  let mut tmp = Plane::new(ms.w, ms.h, 0, 0);

  // Full-pixel motion estimation
  let (mut best_mv, mut lowest_cost) = ms.get_best_predictor(&mut tmp, predictors);
  if lowest_cost == u64::MAX {
    best_mv = ms.range.clamp(MotionVector::default()).quantize_to_fullpel();
    lowest_cost = ms.get_mv_rd_cost(&mut tmp, best_mv);
  }

  if opts.diamond {
    ms.diamond_me_search(&mut tmp, &mut best_mv, &mut lowest_cost);
  } else {
    let center = best_mv;
    ms.full_search(&mut tmp, center, opts.range, 1, &mut best_mv, &mut lowest_cost);
  }

  // Sub-pixel motion estimation
  if opts.subpel {
    ms.sub_pixel_search(&mut tmp, &mut best_mv, &mut lowest_cost);
  }

  (best_mv, lowest_cost)
}

/// Weight of one rate unit of [`get_mv_rate`] for a block of RD multiplier
/// `rdmult`, in 1/256 SAD: the square root of the per-bit weight in the
/// squared-error domain.
pub fn me_lambda(rdmult: u32) -> u32 {
  let lambda_sse = rdmult as f64 / 2048.0;
  (lambda_sse.sqrt() * 256.0) as u32
}

#[cfg(test)]
pub mod test {
  use super::*;
  use pretty_assertions::assert_eq;
  use rand::{Rng, SeedableRng};
  use rand::rngs::StdRng;

  fn textured_plane(w: usize, h: usize, seed: u64) -> Plane<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut p = Plane::new(w, h, 0, 0);
    for row in p.rows_iter_mut() {
      for v in row.iter_mut() {
        *v = rng.gen();
      }
    }
    // Smooth a little so sub-pixel positions interpolate sensibly.
    let src = p.clone();
    for y in 0..h {
      for x in 0..w {
        let s: u32 = (0..4)
          .flat_map(|dy| (0..4).map(move |dx| (dx, dy)))
          .map(|(dx, dy)| src.clamped((x + dx) as isize, (y + dy) as isize) as u32)
          .sum();
        p[y][x] = (s / 16) as u8;
      }
    }
    p
  }

  fn shifted(src: &Plane<u8>, dx: isize, dy: isize) -> Plane<u8> {
    let mut p = src.clone();
    for y in 0..src.height() {
      for x in 0..src.width() {
        p[y][x] = src.clamped(x as isize + dx, y as isize + dy);
      }
    }
    p
  }

  fn search<'a>(
    org: &'a Plane<u8>, reference: &'a Plane<u8>, po: PlaneOffset,
    bsize: BlockSize,
  ) -> MotionSearch<'a, u8> {
    let (w, h) = (bsize.width(), bsize.height());
    MotionSearch {
      org,
      reference,
      po,
      w,
      h,
      range: get_mv_range(org.width(), org.height(), po, w, h),
      pmv: [MotionVector::default(); 2],
      lambda: me_lambda(10_000),
      allow_high_precision_mv: false,
      bit_depth: 8,
      filter: InterpFilter::EIGHTTAP_REGULAR,
      kernels: &Av1Kernels,
    }
  }

  #[test]
  fn mv_range_allows_border() {
    let r = get_mv_range(128, 64, PlaneOffset { x: 0, y: 0 }, 16, 16);
    assert_eq!(r.col_min, -(16 + 16) * 8);
    assert_eq!(r.col_max, (128 - 16 + 16 + 16) * 8);
    assert_eq!(r.row_min, -(16 + 16) * 8);
    assert!(r.contains(MotionVector { row: -256, col: 0 }));
    assert!(!r.contains(MotionVector { row: -257, col: 0 }));
    assert_eq!(r.clamp(MotionVector { row: -1000, col: 5 }).row, -256);
  }

  #[test]
  fn mv_rate_grows_with_distance() {
    let z = MotionVector::default();
    assert_eq!(get_mv_rate(z, z, true), 0);
    let near = get_mv_rate(MotionVector { row: 2, col: 0 }, z, true);
    let far = get_mv_rate(MotionVector { row: 200, col: 0 }, z, true);
    assert!(near < far);
    // Without high precision the 1/8 bit is free.
    assert_eq!(get_mv_rate(MotionVector { row: 1, col: 0 }, z, false), 0);
  }

  #[test]
  fn predictors_are_unique_fullpel() {
    let c = |row, col| CandidateMV {
      this_mv: MotionVector { row, col },
      comp_mv: MotionVector::default(),
      weight: 2,
    };
    let cands = [c(9, 17), c(8, 16), c(-24, 40)];
    let p = get_subset_predictors(&cands, BlockOffset::default(), None, LAST_FRAME);
    assert_eq!(p[0], MotionVector { row: 8, col: 16 });
    assert_eq!(p[1], MotionVector { row: -24, col: 40 });
    assert!(p.contains(&MotionVector::default()));
    assert_eq!(p.len(), 3);
  }

  #[test]
  fn finds_integer_translation() {
    let reference = textured_plane(128, 128, 7);
    // Content moved right by 5 and down by 3 pixels.
    let org = shifted(&reference, -5, -3);
    let po = PlaneOffset { x: 48, y: 48 };
    let ms = search(&org, &reference, po, BLOCK_16X16);
    let opts = SearchOptions { diamond: false, range: 8, subpel: false };
    let (mv, _) = motion_estimation(&ms, &[MotionVector::default()], opts);
    assert_eq!(mv, MotionVector { row: -3 * 8, col: -5 * 8 });
  }

  #[test]
  fn diamond_walks_to_translation() {
    let reference = textured_plane(128, 128, 11);
    let org = shifted(&reference, 2, -1);
    let po = PlaneOffset { x: 40, y: 56 };
    let ms = search(&org, &reference, po, BLOCK_32X32);
    let opts = SearchOptions { diamond: true, range: 0, subpel: true };
    let start = [MotionVector { row: 0, col: 8 }];
    let (mv, cost) = motion_estimation(&ms, &start, opts);
    assert_eq!(mv, MotionVector { row: -8, col: 16 });
    // Exact match: only the rate term remains.
    let mut tmp = Plane::new(32, 32, 0, 0);
    assert_eq!(ms.sad(&mut tmp, mv), 0);
    assert_eq!(cost, ms.rate(mv) as u64 * ms.lambda as u64);
  }

  #[test]
  fn out_of_range_predictors_are_ignored() {
    let reference = textured_plane(64, 64, 3);
    let po = PlaneOffset { x: 0, y: 0 };
    let ms = search(&reference, &reference, po, BLOCK_8X8);
    let far = MotionVector { row: -2000, col: 0 };
    let mut tmp = Plane::new(8, 8, 0, 0);
    assert_eq!(ms.get_mv_rd_cost(&mut tmp, far), u64::MAX);
    let opts = SearchOptions { diamond: true, range: 0, subpel: false };
    let (mv, cost) = motion_estimation(&ms, &[far], opts);
    assert_eq!(mv, MotionVector::default());
    assert_eq!(cost, 0);
  }
}
