// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

pub use self::rust::*;

pub(crate) mod rust {
  use crate::tiling::*;
  use crate::util::*;

  /// Sum of absolute differences over the top-left `blk_w`×`blk_h` samples.
  #[inline(always)]
  pub fn get_sad<T: Pixel>(
    plane_org: &PlaneRegion<'_, T>, plane_ref: &PlaneRegion<'_, T>,
    blk_w: usize, blk_h: usize,
  ) -> u32 {
    let mut sum = 0u32;

    for (slice_org, slice_ref) in
      plane_org.rows_iter().take(blk_h).zip(plane_ref.rows_iter())
    {
      sum += slice_org
        .iter()
        .take(blk_w)
        .zip(slice_ref)
        .map(|(&a, &b)| (i32::cast_from(a) - i32::cast_from(b)).unsigned_abs())
        .sum::<u32>();
    }

    sum
  }

  /// Sum of squared differences.
  #[profiling::function]
  pub fn get_sse<T: Pixel>(
    plane_org: &PlaneRegion<'_, T>, plane_ref: &PlaneRegion<'_, T>,
    blk_w: usize, blk_h: usize,
  ) -> u64 {
    let mut sse = 0u64;
    for (slice_org, slice_ref) in
      plane_org.rows_iter().take(blk_h).zip(plane_ref.rows_iter())
    {
      sse += slice_org
        .iter()
        .take(blk_w)
        .zip(slice_ref)
        .map(|(&a, &b)| {
          let d = i32::cast_from(a) - i32::cast_from(b);
          (d * d) as u64
        })
        .sum::<u64>();
    }
    sse
  }

  /// Returns `(sse, variance)` of the difference of two blocks, where the
  /// variance is the SSE minus the squared mean times the area.
  #[profiling::function]
  pub fn variance<T: Pixel>(
    a: &PlaneRegion<'_, T>, b: &PlaneRegion<'_, T>, blk_w: usize,
    blk_h: usize,
  ) -> (u64, u64) {
    let mut sse = 0u64;
    let mut sum = 0i64;
    for (ra, rb) in a.rows_iter().take(blk_h).zip(b.rows_iter()) {
      for (&pa, &pb) in ra.iter().take(blk_w).zip(rb) {
        let d = i32::cast_from(pa) - i32::cast_from(pb);
        sum += d as i64;
        sse += (d * d) as u64;
      }
    }
    let n = (blk_w * blk_h) as u64;
    let mean_sq = (sum * sum) as u64 / n;
    (sse, sse - mean_sq)
  }

  /// Variance of a block against a constant, i.e. its own energy around
  /// its mean, times the area.
  pub fn source_variance<T: Pixel>(
    a: &PlaneRegion<'_, T>, blk_w: usize, blk_h: usize,
  ) -> u64 {
    let mut sq = 0u64;
    let mut sum = 0i64;
    for ra in a.rows_iter().take(blk_h) {
      for &p in ra.iter().take(blk_w) {
        let v = i32::cast_from(p) as i64;
        sum += v;
        sq += (v * v) as u64;
      }
    }
    let n = (blk_w * blk_h) as u64;
    sq - (sum * sum) as u64 / n
  }

  /// Mean of a block, rounded.
  pub fn block_mean<T: Pixel>(
    a: &PlaneRegion<'_, T>, blk_w: usize, blk_h: usize,
  ) -> u32 {
    let sum: u64 = a
      .rows_iter()
      .take(blk_h)
      .map(|r| {
        r.iter().take(blk_w).map(|&p| u32::cast_from(p) as u64).sum::<u64>()
      })
      .sum();
    let n = (blk_w * blk_h) as u64;
    ((sum + n / 2) / n) as u32
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::frame::*;
  use crate::partition::BlockSize::*;
  use crate::partition::*;
  use crate::tiling::*;
  use crate::util::*;

  fn setup_planes<T: Pixel>() -> (Plane<T>, Plane<T>) {
    let mut input_plane = Plane::new(128, 96, 0, 0);
    let mut rec_plane = Plane::new(128, 96, 0, 0);
    for (i, row) in input_plane.rows_iter_mut().enumerate() {
      for (j, pixel) in row.iter_mut().enumerate() {
        *pixel = T::cast_from(((j + i) & 255) as u32);
      }
    }
    for (i, row) in rec_plane.rows_iter_mut().enumerate() {
      for (j, pixel) in row.iter_mut().enumerate() {
        *pixel = T::cast_from(((j + 2 * i) & 255) as u32);
      }
    }
    (input_plane, rec_plane)
  }

  fn whole<T: Pixel>(p: &Plane<T>) -> PlaneRegion<'_, T> {
    PlaneRegion::new(
      p,
      Rect { x: 0, y: 0, width: p.cfg.width, height: p.cfg.height },
    )
  }

  fn sad_matches_sse_for_unit_differences<T: Pixel>() {
    let (input, _) = setup_planes::<T>();
    let mut shifted = input.clone();
    shifted.data.iter_mut().for_each(|v| {
      *v = T::cast_from(u32::cast_from(*v) + 1);
    });
    for bsize in [BLOCK_4X4, BLOCK_8X16, BLOCK_32X32, BLOCK_64X64] {
      let (w, h) = (bsize.width(), bsize.height());
      let sad = get_sad(&whole(&input), &whole(&shifted), w, h);
      let sse = get_sse(&whole(&input), &whole(&shifted), w, h);
      assert_eq!(sad as usize, w * h);
      assert_eq!(sse as usize, w * h);
      // A constant offset has no variance.
      let (_, var) = variance(&whole(&input), &whole(&shifted), w, h);
      assert_eq!(var, 0);
    }
  }

  #[test]
  fn unit_offset_u8() {
    sad_matches_sse_for_unit_differences::<u8>();
  }

  #[test]
  fn unit_offset_u16() {
    sad_matches_sse_for_unit_differences::<u16>();
  }

  #[test]
  fn ramp_difference() {
    let (input, rec) = setup_planes::<u8>();
    // Row r differs by r: the sum over an 8x8 block is 8 * (0 + ... + 7).
    let sad = get_sad(&whole(&input), &whole(&rec), 8, 8);
    assert_eq!(sad, 8 * 28);
    let sse = get_sse(&whole(&input), &whole(&rec), 8, 8);
    assert_eq!(sse, 8 * (0..8u64).map(|r| r * r).sum::<u64>());
  }

  #[test]
  fn flat_block_has_zero_variance() {
    let mut p = Plane::<u16>::new(16, 16, 0, 0);
    p.fill(612);
    assert_eq!(source_variance(&whole(&p), 16, 16), 0);
    assert_eq!(block_mean(&whole(&p), 16, 16), 612);
  }
}
