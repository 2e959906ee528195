// Copyright (c) 2001-2016, Alliance for Open Media. All rights reserved
// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Superblock partitioning from the variance of downsampled residuals,
//! without any rate-distortion search.

use crate::context::*;
use crate::dist::get_sad;
use crate::encoder::frame::FrameInvariants;
use crate::encoder::motion_comp::predict_inter_rect;
use crate::frame::*;
use crate::mc::{CompoundType, InterpFilter, MotionVector};
use crate::partition::*;
use crate::quantize::ac_q;
use crate::tiling::*;
use crate::util::*;

/// Running sums of one node of the variance tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Var {
  sse: i64,
  sum: i64,
  log2_count: u32,
}

impl Var {
  fn leaf(diff: i64) -> Self {
    Var { sse: diff * diff, sum: diff, log2_count: 0 }
  }

  fn merge(a: Var, b: Var) -> Self {
    debug_assert_eq!(a.log2_count, b.log2_count);
    Var {
      sse: a.sse + b.sse,
      sum: a.sum + b.sum,
      log2_count: a.log2_count + 1,
    }
  }

  /// Variance per sample, scaled by 256.
  fn variance(&self) -> i64 {
    let n = self.log2_count;
    (256 * (self.sse - ((self.sum * self.sum) >> n))) >> n
  }
}

#[derive(Clone, Copy, Debug, Default)]
struct PartitionVariance {
  none: Var,
  horz: [Var; 2],
  vert: [Var; 2],
}

impl PartitionVariance {
  /// Combines four quadrants given in raster order.
  fn from_quadrants(q: [Var; 4]) -> Self {
    let vert = [Var::merge(q[0], q[2]), Var::merge(q[1], q[3])];
    PartitionVariance {
      none: Var::merge(vert[0], vert[1]),
      horz: [Var::merge(q[0], q[1]), Var::merge(q[2], q[3])],
      vert,
    }
  }
}

/// Thresholds of the variance based partitioning of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VbpThresholds {
  /// Split thresholds at 64×64, 32×32, 16×16 and 8×8. The 8×8 level is
  /// only used on intra frames.
  pub split: [i64; 4],
  /// SAD under which an inter superblock is coded whole.
  pub sad: u32,
  /// Spread of the 8×8 residual ranges that forces a 16×16 to split.
  pub minmax: i32,
  /// Smallest size whose variance is tested against its threshold.
  pub bsize_min: BlockSize,
}

pub fn set_vbp_thresholds<T: Pixel>(
  fi: &FrameInvariants<T>, qindex: u8,
) -> VbpThresholds {
  let is_key = fi.is_intra();
  let ac = ac_q(qindex, 0, fi.bit_depth) as i64;
  let low_res = fi.width <= 352 && fi.height <= 288;

  let split = if is_key {
    let base = 20 * ac;
    [base, base >> 2, base >> 2, base << 2]
  } else if low_res {
    [ac >> 2, ac, ac << 3, 0]
  } else {
    let t32 = if fi.width >= 1920 && fi.height >= 1080 {
      (7 * ac) >> 2
    } else {
      (5 * ac) >> 2
    };
    [ac, t32, ac << fi.config.speed_settings.var_partition_shift, 0]
  };

  let sad = match (is_key, low_res) {
    (true, _) => 0,
    (false, true) => 100,
    (false, false) => ((ac as u32) << 1).max(1000),
  };

  VbpThresholds {
    split,
    sad,
    minmax: 15 + (qindex as i32 >> 3),
    bsize_min: if is_key { BLOCK_8X8 } else { BLOCK_16X16 },
  }
}

/// Rounded mean of the part of the `n`×`n` block at `(x, y)` that lies
/// inside `w`×`h`.
fn block_avg<T: Pixel>(
  r: &PlaneRegion<'_, T>, x: usize, y: usize, n: usize, w: usize, h: usize,
) -> i64 {
  let (x1, y1) = ((x + n).min(w), (y + n).min(h));
  let count = ((x1 - x) * (y1 - y)) as i64;
  let sum: i64 = (y..y1)
    .map(|row| r[row][x..x1].iter().map(|&p| i32::cast_from(p) as i64).sum::<i64>())
    .sum();
  (sum + count / 2) / count
}

/// Difference between the largest and the smallest residual range of the
/// four 8×8 blocks of the 16×16 at `(x, y)`.
fn minmax_8x8<T: Pixel>(
  src: &PlaneRegion<'_, T>, pred: &PlaneRegion<'_, T>, x: usize, y: usize,
  w: usize, h: usize,
) -> i32 {
  let mut range_max = 0;
  let mut range_min = i32::MAX;
  for k in 0..4 {
    let (x8, y8) = (x + ((k & 1) << 3), y + ((k >> 1) << 3));
    if x8 >= w || y8 >= h {
      continue;
    }
    let (mut lo, mut hi) = (i32::MAX, 0);
    for row in y8..(y8 + 8).min(h) {
      for col in x8..(x8 + 8).min(w) {
        let d = (i32::cast_from(src[row][col]) - i32::cast_from(pred[row][col]))
          .abs();
        lo = lo.min(d);
        hi = hi.max(d);
      }
    }
    range_max = range_max.max(hi - lo);
    range_min = range_min.min(hi - lo);
  }
  if range_min == i32::MAX {
    0
  } else {
    range_max - range_min
  }
}

/// Zero-motion prediction of the superblock from LAST or GOLDEN, whichever
/// has the lower SAD, with that SAD.
fn predict_superblock<T: Pixel>(
  fi: &FrameInvariants<T>, src: &PlaneRegion<'_, T>, frame_po: PlaneOffset,
  w: usize, h: usize,
) -> Option<(u32, Plane<T>)> {
  let mut best: Option<(u32, Plane<T>)> = None;
  for rf in [LAST_FRAME, GOLDEN_FRAME] {
    let Some(r) = fi.reference(rf) else {
      continue;
    };
    if rf == GOLDEN_FRAME
      && fi.reference(LAST_FRAME).map_or(false, |last| std::ptr::eq(last, r))
    {
      continue;
    }
    let mut plane = Plane::new(SB_SIZE, SB_SIZE, 0, 0);
    {
      let rect = Rect { x: 0, y: 0, width: w, height: h };
      let mut dst = PlaneRegionMut::new(&mut plane, rect);
      predict_inter_rect(
        fi,
        0,
        frame_po,
        &mut dst,
        w,
        h,
        [rf, NONE_FRAME],
        [MotionVector::default(); 2],
        InterpFilter::BILINEAR,
        CompoundType::Average,
        BLOCK_64X64,
      );
    }
    let sad = {
      let pred = PlaneRegion::new(&plane, Rect { x: 0, y: 0, width: w, height: h });
      get_sad(src, &pred, w, h)
    };
    if best.as_ref().map_or(true, |(b, _)| sad < *b) {
      best = Some((sad, plane));
    }
  }
  best
}

fn set_size(
  blocks: &mut TileBlocksMut<'_>, bo: TileBlockOffset, bsize: BlockSize,
) {
  if bo.0.x < blocks.cols() && bo.0.y < blocks.rows() {
    blocks.set_block_size(bo, bsize);
  }
}

/// Writes `bsize` or one of its rectangular halvings into the grid if the
/// variances allow it. Returns false when the block must be split.
fn set_vt_partitioning(
  blocks: &mut TileBlocksMut<'_>, is_key: bool, pv: &PartitionVariance,
  bsize: BlockSize, bo: TileBlockOffset, threshold: i64,
  bsize_min: BlockSize, force_split: bool,
) -> bool {
  if force_split || bsize < bsize_min {
    return false;
  }
  let hbs = bsize.width_mi() >> 1;
  let has_cols = bo.0.x + hbs < blocks.cols();
  let has_rows = bo.0.y + hbs < blocks.rows();
  let none = pv.none.variance();

  // Too few samples below the minimum for the halvings.
  if bsize == bsize_min {
    if has_cols && has_rows && none < threshold {
      set_size(blocks, bo, bsize);
      return true;
    }
    return false;
  }

  if is_key && none > threshold << 4 {
    return false;
  }
  if has_cols && has_rows && none < threshold {
    set_size(blocks, bo, bsize);
    return true;
  }

  if has_rows && pv.vert.iter().all(|v| v.variance() < threshold) {
    let subsize = bsize.subsize(PARTITION_VERT);
    set_size(blocks, bo, subsize);
    let right = BlockOffset { x: bo.0.x + hbs, y: bo.0.y };
    set_size(blocks, TileBlockOffset(right), subsize);
    return true;
  }
  if has_cols && pv.horz.iter().all(|v| v.variance() < threshold) {
    let subsize = bsize.subsize(PARTITION_HORZ);
    set_size(blocks, bo, subsize);
    let bottom = BlockOffset { x: bo.0.x, y: bo.0.y + hbs };
    set_size(blocks, TileBlockOffset(bottom), subsize);
    return true;
  }
  false
}

#[inline]
fn offset(bo: TileBlockOffset, dx: usize, dy: usize) -> TileBlockOffset {
  TileBlockOffset(BlockOffset { x: bo.0.x + dx, y: bo.0.y + dy })
}

/// Writes the block sizes of the superblock at `tile_sbo` into the grid,
/// splitting every block whose residual variance exceeds the threshold of
/// its level.
///
/// Intra frames measure the source against mid-grey on a 4×4 grid of
/// averages. Inter frames measure it against a zero-motion prediction on
/// an 8×8 grid, and code the superblock whole when the prediction is
/// already close.
#[profiling::function]
pub fn choose_partitioning<T: Pixel>(
  fi: &FrameInvariants<T>, ts: &TileStateMut<'_, T>,
  blocks: &mut TileBlocksMut<'_>, tile_sbo: TileSuperBlockOffset,
) {
  let tile_bo = tile_sbo.block_offset(0, 0);
  let frame_bo = ts.to_frame_block_offset(tile_bo);
  let segment_id = fi.segment_id(BLOCK_64X64, frame_bo);
  let qindex = ts.segmentation.qindex(segment_id, fi.base_q_idx);
  let thr = set_vbp_thresholds(fi, qindex);
  let is_key = fi.is_intra();
  let low_res = fi.width <= 352 && fi.height <= 288;

  let input = &ts.input_tile.planes[0];
  let po = tile_sbo.plane_offset(input.plane_cfg);
  let w = (input.rect().width - po.x as usize).min(SB_SIZE);
  let h = (input.rect().height - po.y as usize).min(SB_SIZE);
  let src =
    input.subregion(Area::Rect { x: po.x, y: po.y, width: w, height: h });

  let pred = if is_key {
    None
  } else {
    let frame_po = frame_bo.plane_offset(input.plane_cfg);
    predict_superblock(fi, &src, frame_po, w, h)
  };
  if let Some((sad, _)) = &pred {
    let half = BLOCK_64X64.width_mi() >> 1;
    if *sad < thr.sad
      && tile_bo.0.x + half < blocks.cols()
      && tile_bo.0.y + half < blocks.rows()
    {
      set_size(blocks, tile_bo, BLOCK_64X64);
      return;
    }
  }
  let pred_region = pred.as_ref().map(|(_, plane)| {
    PlaneRegion::new(plane, Rect { x: 0, y: 0, width: w, height: h })
  });
  let grey = 128i64 << (fi.bit_depth - 8);
  let leaf = |x: usize, y: usize, n: usize| -> Var {
    if x >= w || y >= h {
      return Var::default();
    }
    let s = block_avg(&src, x, y, n, w, h);
    let d = pred_region.as_ref().map_or(grey, |p| block_avg(p, x, y, n, w, h));
    Var::leaf(s - d)
  };
  let quadrants_of = |x: usize, y: usize, n: usize| -> [Var; 4] {
    std::array::from_fn(|k| leaf(x + (k & 1) * n, y + (k >> 1) * n, n))
  };

  // force_split: 0 for 64x64, 1..=4 for the 32x32s, 5..=20 for the 16x16s.
  let mut force_split = [false; 21];
  let mut v16 = [PartitionVariance::default(); 16];
  let mut fine: [Option<(PartitionVariance, [PartitionVariance; 4])>; 16] =
    [None; 16];

  for i in 0..4 {
    let (x32, y32) = ((i & 1) << 5, (i >> 1) << 5);
    for j in 0..4 {
      let idx = (i << 2) + j;
      let (x16, y16) = (x32 + ((j & 1) << 4), y32 + ((j >> 1) << 4));
      if !is_key {
        v16[idx] = PartitionVariance::from_quadrants(quadrants_of(x16, y16, 8));
        let var = v16[idx].none.variance();
        let split = var > thr.split[2]
          || (var > thr.split[1]
            && pred_region.as_ref().map_or(false, |p| {
              minmax_8x8(&src, p, x16, y16, w, h) > thr.minmax
            }));
        if split {
          force_split[5 + idx] = true;
          force_split[i + 1] = true;
          force_split[0] = true;
        }
      }
      if is_key
        || (low_res && v16[idx].none.variance() > thr.split[1] << 1)
      {
        force_split[5 + idx] = false;
        let v8: [PartitionVariance; 4] = std::array::from_fn(|k| {
          let (x8, y8) = (x16 + ((k & 1) << 3), y16 + ((k >> 1) << 3));
          PartitionVariance::from_quadrants(quadrants_of(x8, y8, 4))
        });
        let node = PartitionVariance::from_quadrants(v8.map(|v| v.none));
        if is_key {
          v16[idx] = node;
        }
        fine[idx] = Some((node, v8));
      }
    }
  }

  let mut v32 = [PartitionVariance::default(); 4];
  for i in 0..4 {
    v32[i] = PartitionVariance::from_quadrants(std::array::from_fn(|j| {
      v16[(i << 2) + j].none
    }));
    if !force_split[i + 1] && v32[i].none.variance() > thr.split[1] {
      force_split[i + 1] = true;
      force_split[0] = true;
    }
  }
  let v64 = PartitionVariance::from_quadrants(v32.map(|v| v.none));

  let whole_sb = tile_bo.0.x + MIB_SIZE <= blocks.cols()
    && tile_bo.0.y + MIB_SIZE <= blocks.rows();
  if whole_sb
    && set_vt_partitioning(
      blocks,
      is_key,
      &v64,
      BLOCK_64X64,
      tile_bo,
      thr.split[0],
      BLOCK_16X16,
      force_split[0],
    )
  {
    return;
  }

  for i in 0..4 {
    let bo32 = offset(tile_bo, (i & 1) << 2, (i >> 1) << 2);
    if set_vt_partitioning(
      blocks,
      is_key,
      &v32[i],
      BLOCK_32X32,
      bo32,
      thr.split[1],
      BLOCK_16X16,
      force_split[i + 1],
    ) {
      continue;
    }
    for j in 0..4 {
      let idx = (i << 2) + j;
      let bo16 = offset(bo32, (j & 1) << 1, (j >> 1) << 1);
      let node = fine[idx].map_or(v16[idx], |(n, _)| n);
      if set_vt_partitioning(
        blocks,
        is_key,
        &node,
        BLOCK_16X16,
        bo16,
        thr.split[2],
        thr.bsize_min,
        force_split[5 + idx],
      ) {
        continue;
      }
      for k in 0..4 {
        let bo8 = offset(bo16, k & 1, k >> 1);
        match fine[idx] {
          Some((_, v8)) if is_key => {
            if !set_vt_partitioning(
              blocks,
              is_key,
              &v8[k],
              BLOCK_8X8,
              bo8,
              thr.split[3],
              BLOCK_8X8,
              false,
            ) {
              set_size(blocks, bo8, BLOCK_4X4);
            }
          }
          _ => set_size(blocks, bo8, BLOCK_8X8),
        }
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::encoder::test_util::*;
  use crate::encoder::FrameState;
  use pretty_assertions::assert_eq;

  #[test]
  fn variance_of_merged_leaves() {
    let q = [Var::leaf(4), Var::leaf(4), Var::leaf(4), Var::leaf(4)];
    let pv = PartitionVariance::from_quadrants(q);
    assert_eq!(pv.none.log2_count, 2);
    assert_eq!(pv.none.variance(), 0);
    let q = [Var::leaf(0), Var::leaf(8), Var::leaf(0), Var::leaf(8)];
    let pv = PartitionVariance::from_quadrants(q);
    // Columns are uniform, rows are not.
    assert_eq!(pv.vert[0].variance(), 0);
    assert_eq!(pv.vert[1].variance(), 0);
    assert_eq!(pv.horz[0].variance(), 256 * 16);
    assert_eq!(pv.none.variance(), 256 * 16);
  }

  #[test]
  fn key_frame_thresholds_scale_with_q() {
    let fi = key_frame::<u8>(64, 64, 60);
    let lo = set_vbp_thresholds(&fi, 40);
    let hi = set_vbp_thresholds(&fi, 200);
    assert!(lo.split[0] < hi.split[0]);
    assert_eq!(lo.split[1], lo.split[0] >> 2);
    assert_eq!(lo.split[3], lo.split[0] << 2);
    assert_eq!(lo.bsize_min, BLOCK_8X8);
    assert_eq!(lo.sad, 0);
  }

  fn partition_sb(fi: &FrameInvariants<u8>, fs: &mut FrameState<u8>) -> FrameBlocks {
    let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    {
      let ts = TileStateMut::new(fs, Default::default(), fi.width, fi.height);
      let mut tb = fb.as_tile_blocks_mut();
      let sbo = TileSuperBlockOffset(SuperBlockOffset { x: 0, y: 0 });
      choose_partitioning(fi, &ts, &mut tb, sbo);
    }
    fb
  }

  #[test]
  fn uniform_superblock_stays_whole() {
    let fi = key_frame::<u8>(64, 64, 100);
    let mut fs = flat_frame_state(&fi, 60);
    let fb = partition_sb(&fi, &mut fs);
    for y in 0..8 {
      for x in 0..8 {
        assert_eq!(fb[y][x].bsize, BLOCK_64X64);
      }
    }
  }

  #[test]
  fn noisy_superblock_splits() {
    let fi = key_frame::<u8>(64, 64, 20);
    let mut fs = noise_frame_state(&fi, 11);
    let fb = partition_sb(&fi, &mut fs);
    assert!(fb[0][0].bsize < BLOCK_64X64);
  }

  #[test]
  fn partial_superblock_never_whole() {
    let fi = key_frame::<u8>(48, 40, 100);
    let mut fs = flat_frame_state(&fi, 128);
    let fb = partition_sb(&fi, &mut fs);
    for y in 0..fi.mi_rows {
      for x in 0..fi.mi_cols {
        assert!(fb[y][x].bsize <= BLOCK_32X32, "({}, {})", x, y);
      }
    }
  }
}
