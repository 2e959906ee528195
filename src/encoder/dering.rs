// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::dering::*;
use crate::error::CodecError;
use crate::frame::*;
use crate::util::*;

/// Squared luma error of every superblock at every level, in raster order
/// of superblocks.
struct LevelErrors {
  mse: Vec<u64>,
}

impl LevelErrors {
  #[inline]
  fn sb(&self, i: usize) -> &[u64] {
    &self.mse[i * MAX_DERING_LEVEL..(i + 1) * MAX_DERING_LEVEL]
  }
}

/// Best refinement index of one superblock under `global_level`, with its
/// error.
fn best_gain(errors: &[u64], global_level: usize) -> (usize, u64) {
  let mut best = (0, errors[0]);
  for gi in 1..DERING_REFINEMENT_LEVELS {
    let level = compute_level_from_index(global_level, gi);
    if errors[level] < best.1 {
      best = (gi, errors[level]);
    }
  }
  best
}

/// Picks the frame deringing level and stores the refinement index of
/// every superblock in `blocks`. Returns the frame level; zero turns the
/// filter off.
///
/// Only luma is measured. Levels are compared by their squared error
/// against the source.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the scratch tables cannot be allocated.
#[profiling::function]
pub fn dering_search<T: Pixel>(
  rec: &Frame<T>, src: &Frame<T>, blocks: &mut FrameBlocks, bit_depth: usize,
) -> Result<usize, CodecError> {
  let sb_cols = blocks.cols.align_power_of_two_and_shift(MIB_SIZE_LOG2);
  let sb_rows = blocks.rows.align_power_of_two_and_shift(MIB_SIZE_LOG2);
  let luma = PaddedPlane::try_from_plane(&rec.planes[0])?;
  let mut errors = LevelErrors {
    mse: try_alloc_zeroed(sb_cols * sb_rows * MAX_DERING_LEVEL, "dering mse")?,
  };
  let source = &src.planes[0];

  {
    let tb = blocks.as_tile_blocks();
    for sby in 0..sb_rows {
      for sbx in 0..sb_cols {
        let sbo = SuperBlockOffset { x: sbx, y: sby };
        let dirs = dering_analyze_superblock(&luma, &tb, sbo, bit_depth);
        let i = sby * sb_cols + sbx;
        let sb_mse =
          &mut errors.mse[i * MAX_DERING_LEVEL..(i + 1) * MAX_DERING_LEVEL];
        let all_skip = sb_all_skip(&tb, sbo);
        for level in 0..MAX_DERING_LEVEL {
          // Skipped superblocks are never filtered.
          if all_skip && level > 0 {
            sb_mse[level] = sb_mse[0];
            continue;
          }
          let mut sse = 0u64;
          dering_filter_superblock(
            &luma,
            &tb,
            sbo,
            &dirs,
            0,
            level << (bit_depth - 8),
            bit_depth,
            |x, y, v| {
              let d = v as i32 - i32::cast_from(source[y][x]);
              sse += (d * d) as u64;
            },
          );
          sb_mse[level] = sse;
        }
      }
    }
  }

  let sbs = sb_cols * sb_rows;
  let mut best_level = 0;
  let mut best_total = (0..sbs).map(|i| errors.sb(i)[0]).sum::<u64>();
  // Search for the best global level one value at a time.
  for global_level in 2..MAX_DERING_LEVEL {
    let total =
      (0..sbs).map(|i| best_gain(errors.sb(i), global_level).1).sum::<u64>();
    if total < best_total {
      best_level = global_level;
      best_total = total;
    }
  }

  let mut tb = blocks.as_tile_blocks_mut();
  for sby in 0..sb_rows {
    for sbx in 0..sb_cols {
      let (gi, _) = best_gain(errors.sb(sby * sb_cols + sbx), best_level);
      let sbo = TileSuperBlockOffset(SuperBlockOffset { x: sbx, y: sby });
      tb.set_dering_gain(sbo, gi as u8);
    }
  }

  log::debug!("dering: level {}, luma sse {}", best_level, best_total);
  Ok(best_level)
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;
  use rand::{Rng, SeedableRng};
  use rand::rngs::StdRng;

  #[test]
  fn gain_prefers_lowest_error() {
    let mut errors = vec![100u64; MAX_DERING_LEVEL];
    errors[compute_level_from_index(20, 2)] = 10;
    assert_eq!(best_gain(&errors, 20), (2, 10));
    errors[0] = 5;
    assert_eq!(best_gain(&errors, 20), (0, 5));
  }

  #[test]
  fn clean_reconstruction_is_not_filtered() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut src = Frame::<u8>::new(64, 64);
    for row in src.planes[0].rows_iter_mut() {
      for v in row.iter_mut() {
        *v = rng.gen();
      }
    }
    let mut fb = FrameBlocks::new(8, 8);
    // The reconstruction already equals the source: any filtering only
    // adds error.
    let level = dering_search(&src, &src, &mut fb, 8).unwrap();
    assert_eq!(level, 0);
    assert_eq!(fb[0][0].dering_gain, 0);
  }

  #[test]
  fn skipped_superblocks_keep_gain_zero() {
    let src = Frame::<u8>::new(64, 64);
    let mut fb = FrameBlocks::new(8, 8);
    for y in 0..8 {
      for x in 0..8 {
        fb[y][x].skip = true;
      }
    }
    let mut rec = src.clone();
    rec.planes[0][3][3] = 0;
    dering_search(&rec, &src, &mut fb, 8).unwrap();
    assert_eq!(fb[0][0].dering_gain, 0);
  }
}
