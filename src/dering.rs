// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Directional deringing filter.
//!
//! Every 8×8 luma block that carries residual is smoothed along its
//! dominant edge direction. The strength of a superblock is derived from a
//! frame level and a per-superblock gain index.

use std::cmp;

use crate::context::*;
use crate::error::CodecError;
use crate::frame::*;
use crate::tiling::TileBlocks;
use crate::util::*;

pub const MAX_DERING_LEVEL: usize = 64;
pub const DERING_REFINEMENT_LEVELS: usize = 4;

/// Gain of each refinement index, in 1/16.
const DERING_GAINS: [usize; DERING_REFINEMENT_LEVELS] = [0, 11, 16, 22];

/// Marks samples outside the frame in padded copies.
pub const DERING_VERY_LARGE: u16 = 30000;

/// Padding around a plane copy, enough for the longest filter tap.
const DERING_PAD: usize = 2;

// Instead of dividing by n between 2 and 8, we multiply by 3*5*7*8/n.
// The output is then 840 times larger, but we don't care for finding
// the max.
const DERING_DIV_TABLE: [i32; 9] = [0, 840, 420, 280, 210, 168, 140, 120, 105];

/// Offsets `(dy, dx)` of the two taps along each direction.
const DERING_DIRECTIONS: [[(isize, isize); 2]; 8] = [
  [(-1, 1), (-2, 2)],
  [(0, 1), (-1, 2)],
  [(0, 1), (0, 2)],
  [(0, 1), (1, 2)],
  [(1, 1), (2, 2)],
  [(1, 0), (2, 1)],
  [(1, 0), (2, 0)],
  [(1, 0), (2, -1)],
];

/// Level of a superblock with refinement index `gi` under frame level
/// `global_level`.
pub fn compute_level_from_index(global_level: usize, gi: usize) -> usize {
  if global_level == 0 {
    return 0;
  }
  let level = (global_level * DERING_GAINS[gi] + 8) >> 4;
  level.clamp(gi, MAX_DERING_LEVEL - 1)
}

/// Level applied to plane `pli` of a superblock. Chroma is filtered more
/// gently, and superblocks without any residual are left alone.
pub fn superblock_level(
  global_level: usize, gi: usize, pli: usize, all_skip: bool,
) -> usize {
  if all_skip {
    return 0;
  }
  let level = compute_level_from_index(global_level, gi);
  if pli > 0 {
    (level * 5 + 4) >> 3
  } else {
    level
  }
}

/// Direction and directional variance of every 8×8 block of a superblock.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeringDirections {
  pub dir: [[u8; MIB_SIZE]; MIB_SIZE],
  pub var: [[i32; MIB_SIZE]; MIB_SIZE],
}

/// A plane converted to 16 bits with a border of [`DERING_VERY_LARGE`].
pub struct PaddedPlane {
  data: Vec<u16>,
  stride: usize,
  pub width: usize,
  pub height: usize,
  pub xdec: usize,
  pub ydec: usize,
}

impl PaddedPlane {
  /// # Errors
  ///
  /// Returns `ResourceExhausted` if the copy cannot be allocated.
  pub fn try_from_plane<T: Pixel>(
    plane: &Plane<T>,
  ) -> Result<Self, CodecError> {
    let stride = plane.cfg.width + 2 * DERING_PAD;
    let rows = plane.cfg.height + 2 * DERING_PAD;
    let mut data = try_alloc_zeroed::<u16>(stride * rows, "dering source")?;
    data.iter_mut().for_each(|v| *v = DERING_VERY_LARGE);
    for (y, row) in plane.rows_iter().enumerate() {
      let base = (y + DERING_PAD) * stride + DERING_PAD;
      for (d, &s) in data[base..base + row.len()].iter_mut().zip(row) {
        *d = u16::cast_from(s);
      }
    }
    Ok(PaddedPlane {
      data,
      stride,
      width: plane.cfg.width,
      height: plane.cfg.height,
      xdec: plane.cfg.xdec,
      ydec: plane.cfg.ydec,
    })
  }

  #[inline(always)]
  fn index(&self, x: usize, y: usize) -> usize {
    (y + DERING_PAD) * self.stride + x + DERING_PAD
  }

  #[inline(always)]
  pub fn at(&self, x: usize, y: usize) -> u16 {
    self.data[self.index(x, y)]
  }

  #[inline(always)]
  fn at_offset(&self, x: usize, y: usize, dy: isize, dx: isize) -> u16 {
    let i = self.index(x, y) as isize + dy * self.stride as isize + dx;
    self.data[i as usize]
  }
}

// Detect direction. 0 means 45-degree up-right, 2 is horizontal, and so on.
// The search minimizes the weighted variance along all the lines in a
// particular direction, i.e. the squared error between the input and a
// "predicted" block where each pixel is replaced by the average along a line
// in a particular direction. Since each direction have the same sum(x^2) term,
// that term is never computed.
fn dering_find_dir(
  src: &PaddedPlane, x0: usize, y0: usize, coeff_shift: usize,
) -> (usize, i32) {
  let mut cost = [0i32; 8];
  let mut partial = [[0i32; 15]; 8];
  for i in 0..8 {
    for j in 0..8 {
      // We subtract 128 here to reduce the maximum range of the squared
      // partial sums.
      let x = (src.at(x0 + j, y0 + i) as i32 >> coeff_shift) - 128;
      partial[0][i + j] += x;
      partial[1][i + j / 2] += x;
      partial[2][i] += x;
      partial[3][3 + i - j / 2] += x;
      partial[4][7 + i - j] += x;
      partial[5][3 - i / 2 + j] += x;
      partial[6][j] += x;
      partial[7][i / 2 + j] += x;
    }
  }
  for i in 0..8 {
    cost[2] += partial[2][i] * partial[2][i];
    cost[6] += partial[6][i] * partial[6][i];
  }
  cost[2] *= DERING_DIV_TABLE[8];
  cost[6] *= DERING_DIV_TABLE[8];
  for i in 0..7 {
    cost[0] += (partial[0][i] * partial[0][i]
      + partial[0][14 - i] * partial[0][14 - i])
      * DERING_DIV_TABLE[i + 1];
    cost[4] += (partial[4][i] * partial[4][i]
      + partial[4][14 - i] * partial[4][14 - i])
      * DERING_DIV_TABLE[i + 1];
  }
  cost[0] += partial[0][7] * partial[0][7] * DERING_DIV_TABLE[8];
  cost[4] += partial[4][7] * partial[4][7] * DERING_DIV_TABLE[8];
  for i in (1..8).step_by(2) {
    for j in 0..5 {
      cost[i] += partial[i][3 + j] * partial[i][3 + j];
    }
    cost[i] *= DERING_DIV_TABLE[8];
    for j in 0..3 {
      cost[i] += (partial[i][j] * partial[i][j]
        + partial[i][10 - j] * partial[i][10 - j])
        * DERING_DIV_TABLE[2 * j + 2];
    }
  }
  let mut best_cost = 0;
  let mut best_dir = 0;
  for (i, &c) in cost.iter().enumerate() {
    if c > best_cost {
      best_cost = c;
      best_dir = i;
    }
  }
  // Difference between the optimal variance and the variance along the
  // orthogonal direction. Again, the sum(x^2) terms cancel out.
  // We'd normally divide by 840, but dividing by 1024 is close enough
  // for what we're going to do with this.
  (best_dir, (best_cost - cost[(best_dir + 4) & 7]) >> 10)
}

fn constrain(diff: i32, threshold: i32, damping: i32) -> i32 {
  if threshold == 0 {
    return 0;
  }
  let shift = cmp::max(0, damping - msb(threshold));
  let magnitude =
    cmp::min(diff.abs(), cmp::max(0, threshold - (diff.abs() >> shift)));
  if diff < 0 {
    -magnitude
  } else {
    magnitude
  }
}

// We use the variance of an 8x8 block to adjust the effective filter strength.
fn adjust_threshold(threshold: i32, var: i32) -> i32 {
  let i = if (var >> 6) != 0 { cmp::min(msb(var >> 6), 12) } else { 0 };
  if var != 0 {
    (threshold * (4 + i) + 8) >> 4
  } else {
    0
  }
}

/// Whether every 8×8 unit of a superblock carries no residual.
#[inline]
pub fn sb_all_skip(blocks: &TileBlocks<'_>, sbo: SuperBlockOffset) -> bool {
  blocks.sb_all_skip(TileSuperBlockOffset(sbo))
}

#[inline]
fn block_skipped(blocks: &TileBlocks<'_>, bx: usize, by: usize) -> bool {
  blocks[by][bx].skip
}

/// Directions of the coded 8×8 luma blocks of superblock `sbo`.
pub fn dering_analyze_superblock(
  luma: &PaddedPlane, blocks: &TileBlocks<'_>, sbo: SuperBlockOffset,
  bit_depth: usize,
) -> DeringDirections {
  let coeff_shift = bit_depth - 8;
  let mut dirs = DeringDirections::default();
  let bo = sbo.block_offset(0, 0);
  for by in 0..MIB_SIZE {
    for bx in 0..MIB_SIZE {
      let (x, y) = (bo.x + bx, bo.y + by);
      if x >= blocks.cols() || y >= blocks.rows() || block_skipped(blocks, x, y)
      {
        continue;
      }
      let (dir, var) =
        dering_find_dir(luma, x << MI_SIZE_LOG2, y << MI_SIZE_LOG2, coeff_shift);
      dirs.dir[by][bx] = dir as u8;
      dirs.var[by][bx] = var;
    }
  }
  dirs
}

/// Filters one plane of a superblock at `threshold`, handing every sample
/// of the superblock inside the frame to `out` as `(x, y, value)`.
///
/// Units without residual pass through unchanged; a zero threshold is the
/// identity.
pub fn dering_filter_superblock<F: FnMut(usize, usize, u16)>(
  src: &PaddedPlane, blocks: &TileBlocks<'_>, sbo: SuperBlockOffset,
  dirs: &DeringDirections, pli: usize, threshold: usize, bit_depth: usize,
  mut out: F,
) {
  let coeff_shift = bit_depth as i32 - 8;
  let damping = 6 + coeff_shift - (pli > 0) as i32;
  let bw = MI_SIZE >> src.xdec;
  let bh = MI_SIZE >> src.ydec;
  let bo = sbo.block_offset(0, 0);

  for by in 0..MIB_SIZE {
    for bx in 0..MIB_SIZE {
      let (mx, my) = (bo.x + bx, bo.y + by);
      if mx >= blocks.cols() || my >= blocks.rows() {
        continue;
      }
      let x0 = mx * bw;
      let y0 = my * bh;
      let filtered = threshold != 0 && !block_skipped(blocks, mx, my);
      let dir = dirs.dir[by][bx] as usize;
      let pri = if pli == 0 {
        adjust_threshold(threshold as i32, dirs.var[by][bx])
      } else {
        threshold as i32
      };
      let sec = (threshold as i32) >> 2;
      let pri_taps = [[4, 2], [3, 3]][((pri >> coeff_shift) & 1) as usize];
      let sec_taps = [2, 1];

      for y in y0..y0 + bh {
        for x in x0..x0 + bw {
          let v = src.at(x, y);
          if !filtered {
            out(x, y, v);
            continue;
          }
          let v = v as i32;
          let mut sum = 0;
          let mut max = v;
          let mut min = v;
          let mut tap = |p: u16, strength: i32, weight: i32, sum: &mut i32| {
            let p = p as i32;
            *sum += weight * constrain(p - v, strength, damping);
            if p != DERING_VERY_LARGE as i32 {
              max = cmp::max(p, max);
            }
            min = cmp::min(p, min);
          };
          for k in 0..2 {
            let (dy, dx) = DERING_DIRECTIONS[dir][k];
            tap(src.at_offset(x, y, dy, dx), pri, pri_taps[k], &mut sum);
            tap(src.at_offset(x, y, -dy, -dx), pri, pri_taps[k], &mut sum);
            for d in [(dir + 2) & 7, (dir + 6) & 7] {
              let (dy, dx) = DERING_DIRECTIONS[d][k];
              tap(src.at_offset(x, y, dy, dx), sec, sec_taps[k], &mut sum);
              tap(src.at_offset(x, y, -dy, -dx), sec, sec_taps[k], &mut sum);
            }
          }
          let y_out = v + ((8 + sum - (sum < 0) as i32) >> 4);
          out(x, y, y_out.clamp(min, max) as u16);
        }
      }
    }
  }
}

/// Applies the deringing filter to the reconstruction, using the gain
/// index stored on the first unit of every superblock.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the unfiltered copy of a plane cannot be
/// allocated.
#[profiling::function]
pub fn dering_frame<T: Pixel>(
  rec: &mut Frame<T>, blocks: &FrameBlocks, global_level: usize,
  bit_depth: usize,
) -> Result<(), CodecError> {
  if global_level == 0 {
    return Ok(());
  }
  let tb = blocks.as_tile_blocks();
  let sb_cols = blocks.cols.align_power_of_two_and_shift(MIB_SIZE_LOG2);
  let sb_rows = blocks.rows.align_power_of_two_and_shift(MIB_SIZE_LOG2);
  let src = [
    PaddedPlane::try_from_plane(&rec.planes[0])?,
    PaddedPlane::try_from_plane(&rec.planes[1])?,
    PaddedPlane::try_from_plane(&rec.planes[2])?,
  ];

  for sby in 0..sb_rows {
    for sbx in 0..sb_cols {
      let sbo = SuperBlockOffset { x: sbx, y: sby };
      let all_skip = sb_all_skip(&tb, sbo);
      if all_skip {
        continue;
      }
      let gi = tb.get_dering_gain(TileSuperBlockOffset(sbo)) as usize;
      let dirs = dering_analyze_superblock(&src[0], &tb, sbo, bit_depth);
      for (pli, plane) in rec.planes.iter_mut().enumerate() {
        let level = superblock_level(global_level, gi, pli, all_skip);
        if level == 0 {
          continue;
        }
        let threshold = level << (bit_depth - 8);
        dering_filter_superblock(
          &src[pli],
          &tb,
          sbo,
          &dirs,
          pli,
          threshold,
          bit_depth,
          |x, y, v| plane[y][x] = T::cast_from(v),
        );
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use interpolate_name::interpolate_test;
  use pretty_assertions::assert_eq;
  use rand::{Rng, SeedableRng};
  use rand::rngs::StdRng;

  fn noisy_frame<T: Pixel>(w: usize, h: usize, bit_depth: usize) -> Frame<T> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut f = Frame::new(w, h);
    for p in f.planes.iter_mut() {
      for row in p.rows_iter_mut() {
        for v in row.iter_mut() {
          *v = T::cast_from(rng.gen_range(0..(1u32 << bit_depth)));
        }
      }
    }
    f
  }

  fn coded_blocks(w: usize, h: usize, skip: bool) -> FrameBlocks {
    let mut fb = FrameBlocks::new(w >> MI_SIZE_LOG2, h >> MI_SIZE_LOG2);
    for y in 0..fb.rows {
      for x in 0..fb.cols {
        fb[y][x].skip = skip;
        fb[y][x].dering_gain = 3;
      }
    }
    fb
  }

  #[test]
  fn level_mapping() {
    assert_eq!(compute_level_from_index(0, 3), 0);
    assert_eq!(compute_level_from_index(20, 0), 0);
    assert_eq!(compute_level_from_index(20, 1), 14);
    assert_eq!(compute_level_from_index(20, 2), 20);
    assert_eq!(compute_level_from_index(20, 3), 28);
    // refinement never maps below its index, nor past the top level
    assert_eq!(compute_level_from_index(2, 3), 3);
    assert_eq!(compute_level_from_index(63, 3), MAX_DERING_LEVEL - 1);
    assert_eq!(superblock_level(20, 2, 1, false), 13);
    assert_eq!(superblock_level(20, 2, 0, true), 0);
  }

  #[test]
  fn flat_block_has_no_direction_energy() {
    let mut plane = Plane::<u8>::new(8, 8, 0, 0);
    plane.fill(77);
    let src = PaddedPlane::try_from_plane(&plane).unwrap();
    assert_eq!(dering_find_dir(&src, 0, 0, 0).1, 0);
  }

  #[test]
  fn vertical_stripes_are_vertical() {
    let mut plane = Plane::<u8>::new(8, 8, 0, 0);
    for row in plane.rows_iter_mut() {
      for (x, v) in row.iter_mut().enumerate() {
        *v = if x % 2 == 0 { 40 } else { 200 };
      }
    }
    let src = PaddedPlane::try_from_plane(&plane).unwrap();
    let (dir, var) = dering_find_dir(&src, 0, 0, 0);
    assert_eq!(dir, 6);
    assert!(var > 0);
  }

  #[interpolate_test(8, 8)]
  #[interpolate_test(10, 10)]
  fn all_skip_superblocks_are_untouched(bit_depth: usize) {
    let f = noisy_frame::<u16>(72, 64, bit_depth);
    let fb = coded_blocks(72, 64, true);
    let mut rec = f.clone();
    dering_frame(&mut rec, &fb, 63, bit_depth).unwrap();
    assert_eq!(rec, f);
  }

  #[test]
  fn level_zero_is_identity() {
    let f = noisy_frame::<u8>(64, 64, 8);
    let fb = coded_blocks(64, 64, false);
    let mut rec = f.clone();
    dering_frame(&mut rec, &fb, 0, 8).unwrap();
    assert_eq!(rec, f);
  }

  #[test]
  fn coded_superblocks_are_smoothed() {
    let f = noisy_frame::<u8>(64, 64, 8);
    let fb = coded_blocks(64, 64, false);
    let mut rec = f.clone();
    dering_frame(&mut rec, &fb, 40, 8).unwrap();
    assert!(rec.planes[0] != f.planes[0]);
    // only the skipped superblock of a mixed frame keeps its samples
    let mut fb = coded_blocks(128, 64, false);
    let f = noisy_frame::<u8>(128, 64, 8);
    for y in 0..8 {
      for x in 8..16 {
        fb[y][x].skip = true;
      }
    }
    let mut rec = f.clone();
    dering_frame(&mut rec, &fb, 40, 8).unwrap();
    for y in 0..64 {
      assert_eq!(rec.planes[0][y][64..], f.planes[0][y][64..]);
    }
    assert!(rec.planes[0][10][..64] != f.planes[0][10][..64]);
  }
}
