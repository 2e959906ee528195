// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Blending masks of masked compound prediction.
//!
//! A wedge splits a block along one of six directions through one of
//! sixteen anchor points. Every mask is a window into a 64×64 master mask
//! of its direction, so all of them are cut out once, on first use.

use std::sync::OnceLock;

use num_traits::FromPrimitive;

use crate::partition::*;

/// Mask weights are in 1/64 of the first prediction.
pub const WEDGE_WEIGHT_BITS: u32 = 6;
pub const MAX_WEDGE_WEIGHT: u8 = 1 << WEDGE_WEIGHT_BITS;

/// Bits of a wedge index.
pub const WEDGE_BITS: u8 = 4;
pub const WEDGE_TYPES: usize = 1 << WEDGE_BITS;

const MASK_MASTER_SIZE: usize = 64;
const SMOOTHER_LEN: i32 = 32;

static SMOOTHER: [u8; 2 * SMOOTHER_LEN as usize + 1] = [
  0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
  0, 1, 2, 4, 7, 13, 21, 32, 43, 51, 57, 60, 62, 63, 64, 64, 64, 64, 64, 64,
  64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64,
  64,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WedgeDirection {
  Horizontal,
  Vertical,
  Oblique27,
  Oblique63,
  Oblique117,
  Oblique153,
}

const WEDGE_DIRECTIONS: usize = 6;

use WedgeDirection::*;

/// Direction and anchor of a wedge; the anchor is in eighths of the block
/// width and height.
type WedgeCode = (WedgeDirection, usize, usize);

static WEDGE_CODEBOOK_HGTW: [WedgeCode; WEDGE_TYPES] = [
  (Oblique27, 4, 4),
  (Oblique63, 4, 4),
  (Oblique117, 4, 4),
  (Oblique153, 4, 4),
  (Horizontal, 4, 2),
  (Horizontal, 4, 4),
  (Horizontal, 4, 6),
  (Vertical, 4, 4),
  (Oblique27, 4, 2),
  (Oblique27, 4, 6),
  (Oblique153, 4, 2),
  (Oblique153, 4, 6),
  (Oblique63, 2, 4),
  (Oblique63, 6, 4),
  (Oblique117, 2, 4),
  (Oblique117, 6, 4),
];

static WEDGE_CODEBOOK_HLTW: [WedgeCode; WEDGE_TYPES] = [
  (Oblique27, 4, 4),
  (Oblique63, 4, 4),
  (Oblique117, 4, 4),
  (Oblique153, 4, 4),
  (Vertical, 2, 4),
  (Vertical, 4, 4),
  (Vertical, 6, 4),
  (Horizontal, 4, 4),
  (Oblique27, 4, 2),
  (Oblique27, 4, 6),
  (Oblique153, 4, 2),
  (Oblique153, 4, 6),
  (Oblique63, 2, 4),
  (Oblique63, 6, 4),
  (Oblique117, 2, 4),
  (Oblique117, 6, 4),
];

static WEDGE_CODEBOOK_HEQW: [WedgeCode; WEDGE_TYPES] = [
  (Oblique27, 4, 4),
  (Oblique63, 4, 4),
  (Oblique117, 4, 4),
  (Oblique153, 4, 4),
  (Horizontal, 4, 2),
  (Horizontal, 4, 6),
  (Vertical, 2, 4),
  (Vertical, 6, 4),
  (Oblique27, 4, 2),
  (Oblique27, 4, 6),
  (Oblique153, 4, 2),
  (Oblique153, 4, 6),
  (Oblique63, 2, 4),
  (Oblique63, 6, 4),
  (Oblique117, 2, 4),
  (Oblique117, 6, 4),
];

/// Whether blocks of size `bsize` may use a wedge. Sub-8×8 blocks and
/// blocks with a 64 sample side may not.
pub fn is_wedge_used(bsize: BlockSize) -> bool {
  bsize >= BlockSize::BLOCK_8X8 && bsize <= BlockSize::BLOCK_32X32
}

fn codebook(bsize: BlockSize) -> &'static [WedgeCode; WEDGE_TYPES] {
  use std::cmp::Ordering::*;
  match bsize.height().cmp(&bsize.width()) {
    Greater => &WEDGE_CODEBOOK_HGTW,
    Less => &WEDGE_CODEBOOK_HLTW,
    Equal => &WEDGE_CODEBOOK_HEQW,
  }
}

fn masked_weight(m: i32) -> u8 {
  if m < -SMOOTHER_LEN {
    0
  } else if m > SMOOTHER_LEN {
    MAX_WEDGE_WEIGHT
  } else {
    SMOOTHER[(m + SMOOTHER_LEN) as usize]
  }
}

/// Master masks by `[negative][direction]`, `MASK_MASTER_SIZE` square.
type MasterMasks = [[Box<[u8]>; WEDGE_DIRECTIONS]; 2];

fn master_masks() -> MasterMasks {
  const N: usize = MASK_MASTER_SIZE;
  let mut masks: MasterMasks =
    [0, 1].map(|_| [(); WEDGE_DIRECTIONS].map(|_| vec![0u8; N * N].into()));
  let asqrt = 5f64.sqrt();
  for i in 0..N {
    for j in 0..N {
      let x = 2 * j as i32 + 1 - N as i32;
      let y = 2 * i as i32 + 1 - N as i32;
      let m = ((2 * x + y) as f64 / asqrt).round() as i32;
      let w = masked_weight(m);
      let v = masked_weight(x);
      for neg in 0..2 {
        let (a, b) = if neg == 1 {
          (w, MAX_WEDGE_WEIGHT - w)
        } else {
          (MAX_WEDGE_WEIGHT - w, w)
        };
        let dirs = &mut masks[neg];
        dirs[Oblique63 as usize][i * N + j] = a;
        dirs[Oblique27 as usize][j * N + i] = a;
        dirs[Oblique117 as usize][i * N + N - 1 - j] = b;
        dirs[Oblique153 as usize][(N - 1 - j) * N + i] = b;
        let s = if neg == 1 { v } else { MAX_WEDGE_WEIGHT - v };
        dirs[Vertical as usize][i * N + j] = s;
        dirs[Horizontal as usize][j * N + i] = s;
      }
    }
  }
  masks
}

/// Copies the `bsize` window of wedge `code` out of a master mask.
fn cut_mask(master: &[u8], code: WedgeCode, bsize: BlockSize) -> Box<[u8]> {
  let (w, h) = (bsize.width(), bsize.height());
  let woff = (code.1 * w) >> 3;
  let hoff = (code.2 * h) >> 3;
  let y0 = MASK_MASTER_SIZE / 2 - hoff;
  let x0 = MASK_MASTER_SIZE / 2 - woff;
  let mut out = Vec::with_capacity(w * h);
  for r in 0..h {
    let start = (y0 + r) * MASK_MASTER_SIZE + x0;
    out.extend_from_slice(&master[start..start + w]);
  }
  out.into()
}

struct WedgeMasks {
  /// `[bsize][index][sign]`, empty for sizes without wedges.
  masks: Vec<Vec<[Box<[u8]>; 2]>>,
}

fn wedge_masks() -> &'static WedgeMasks {
  static MASKS: OnceLock<WedgeMasks> = OnceLock::new();
  MASKS.get_or_init(|| {
    let master = master_masks();
    let masks = (0..BlockSize::BLOCK_SIZES_ALL)
      .map(|i| {
        let bsize =
          BlockSize::from_usize(i).unwrap_or(BlockSize::BLOCK_INVALID);
        if !is_wedge_used(bsize) {
          return Vec::new();
        }
        codebook(bsize)
          .iter()
          .map(|&code| {
            let dir = code.0 as usize;
            let mask = cut_mask(&master[0][dir], code, bsize);
            // Orient every wedge so that sign 0 weights the top left
            // edge towards the first prediction.
            let (w, h) = (bsize.width(), bsize.height());
            let edge: u32 = mask[..w].iter().map(|&v| v as u32).sum::<u32>()
              + (0..h).map(|r| mask[r * w] as u32).sum::<u32>();
            let mean = (edge + (w + h) as u32 / 2) / (w + h) as u32;
            let flip = mean < 32;
            let other = cut_mask(&master[1][dir], code, bsize);
            if flip {
              [other, mask]
            } else {
              [mask, other]
            }
          })
          .collect()
      })
      .collect();
    WedgeMasks { masks }
  })
}

/// Row-major `width`×`height` mask of wedge `index` with `sign`. Each
/// weight is the share of the first prediction in 1/64.
pub fn wedge_mask(bsize: BlockSize, index: u8, sign: bool) -> &'static [u8] {
  debug_assert!(is_wedge_used(bsize));
  &wedge_masks().masks[bsize as usize][index as usize][sign as usize]
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn signs_are_complementary() {
    for bsize in [BLOCK_8X8, BLOCK_8X16, BLOCK_32X16, BLOCK_32X32] {
      for index in 0..WEDGE_TYPES as u8 {
        let a = wedge_mask(bsize, index, false);
        let b = wedge_mask(bsize, index, true);
        assert_eq!(a.len(), bsize.area());
        for (&x, &y) in a.iter().zip(b.iter()) {
          assert!(x <= MAX_WEDGE_WEIGHT);
          assert_eq!(x + y, MAX_WEDGE_WEIGHT);
        }
      }
    }
  }

  #[test]
  fn sign_zero_favours_the_first_prediction_at_the_top_left() {
    let m = wedge_mask(BLOCK_16X16, 0, false);
    assert!(m[0] >= 32);
    assert!(wedge_mask(BLOCK_16X16, 0, true)[0] <= 32);
  }

  #[test]
  fn vertical_wedge_splits_columns() {
    // Entry 6 of the square codebook is a vertical edge at a quarter of
    // the width.
    let m = wedge_mask(BLOCK_16X16, 6, false);
    for r in 0..16 {
      let row = &m[r * 16..][..16];
      assert_eq!(row[0], MAX_WEDGE_WEIGHT);
      assert_eq!(row[15], 0);
      assert_eq!(row, &m[..16]);
    }
  }

  #[test]
  fn large_blocks_have_no_wedges() {
    assert!(!is_wedge_used(BLOCK_4X4));
    assert!(!is_wedge_used(BLOCK_8X4));
    assert!(is_wedge_used(BLOCK_8X8));
    assert!(is_wedge_used(BLOCK_32X32));
    assert!(!is_wedge_used(BLOCK_32X64));
    assert!(!is_wedge_used(BLOCK_64X64));
  }
}
