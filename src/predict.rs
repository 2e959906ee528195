// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]

use crate::frame::*;
use crate::tiling::*;
use crate::transform::*;
use crate::util::*;

use num_derive::FromPrimitive;

#[derive(
  Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
  FromPrimitive,
)]
pub enum PredictionMode {
  #[default]
  DC_PRED, // Average of above and left pixels
  V_PRED,    // Vertical
  H_PRED,    // Horizontal
  D45_PRED,  // Directional 45  deg = round(arctan(1/1) * 180/pi)
  D135_PRED, // Directional 135 deg = 180 - 45
  D117_PRED, // Directional 117 deg = 180 - 63
  D153_PRED, // Directional 153 deg = 180 - 27
  D207_PRED, // Directional 207 deg = 180 + 27
  D63_PRED,  // Directional 63  deg = round(arctan(2/1) * 180/pi)
  TM_PRED,   // True-motion
  NEARESTMV,
  NEARMV,
  ZEROMV,
  NEWMV,
}

pub const INTRA_MODES: usize = 10;
pub const INTER_MODES: usize = 4;

pub static ALL_INTRA_MODES: &[PredictionMode] = &[
  PredictionMode::DC_PRED,
  PredictionMode::V_PRED,
  PredictionMode::H_PRED,
  PredictionMode::D45_PRED,
  PredictionMode::D135_PRED,
  PredictionMode::D117_PRED,
  PredictionMode::D153_PRED,
  PredictionMode::D207_PRED,
  PredictionMode::D63_PRED,
  PredictionMode::TM_PRED,
];

// Intra prediction modes tested at high speed levels
pub static INTRA_MODES_MINIMAL: &[PredictionMode] = &[
  PredictionMode::DC_PRED,
  PredictionMode::V_PRED,
  PredictionMode::H_PRED,
  PredictionMode::TM_PRED,
];

pub static ALL_INTER_MODES: &[PredictionMode] = &[
  PredictionMode::NEARESTMV,
  PredictionMode::NEARMV,
  PredictionMode::ZEROMV,
  PredictionMode::NEWMV,
];

impl PredictionMode {
  #[inline]
  pub fn is_intra(self) -> bool {
    self < PredictionMode::NEARESTMV
  }

  /// Offset of an inter mode in the inter mode tables.
  #[inline]
  pub fn inter_offset(self) -> usize {
    debug_assert!(!self.is_intra());
    self as usize - PredictionMode::NEARESTMV as usize
  }

  /// Transform type implied by an intra direction.
  pub const fn intra_tx_type(self) -> TxType {
    use PredictionMode::*;
    match self {
      V_PRED | D117_PRED | D63_PRED => ADST_DCT,
      H_PRED | D153_PRED | D207_PRED => DCT_ADST,
      D135_PRED | TM_PRED => ADST_ADST,
      _ => DCT_DCT,
    }
  }

  /// Fills `dst` with the prediction of a `tx_size` block from `edge`.
  #[profiling::function]
  pub fn predict_intra<T: Pixel>(
    self, dst: &mut PlaneRegionMut<'_, T>, tx_size: TxSize, bit_depth: usize,
    edge: &IntraEdge<T>,
  ) {
    debug_assert!(self.is_intra());
    debug_assert_eq!(edge.size, tx_size.width());
    let bs = tx_size.width();
    let pred = |r: usize, c: usize| -> i32 {
      use PredictionMode::*;
      match self {
        V_PRED => edge.above(c),
        H_PRED => edge.left(r),
        TM_PRED => edge.left(r) + edge.above(c) - edge.top_left(),
        D45_PRED => {
          let t = r + c;
          if t + 2 < 2 * bs {
            avg3(edge.above(t), edge.above(t + 1), edge.above(t + 2))
          } else {
            edge.above(2 * bs - 1)
          }
        }
        D63_PRED => {
          let i = r / 2 + c;
          if r & 1 == 1 {
            avg3(edge.above(i), edge.above(i + 1), edge.above(i + 2))
          } else {
            avg2(edge.above(i), edge.above(i + 1))
          }
        }
        D135_PRED => {
          let k = c as isize - r as isize;
          avg3(edge.e(k - 1), edge.e(k), edge.e(k + 1))
        }
        D117_PRED => {
          let (mut r, mut c) = (r, c);
          while r >= 2 && c >= 1 {
            r -= 2;
            c -= 1;
          }
          let c = c as isize;
          if r == 0 {
            avg2(edge.e(c), edge.e(c + 1))
          } else if r == 1 {
            avg3(edge.e(c - 1), edge.e(c), edge.e(c + 1))
          } else {
            let k = 1 - r as isize;
            avg3(edge.e(k - 1), edge.e(k), edge.e(k + 1))
          }
        }
        D153_PRED => {
          let (mut r, mut c) = (r, c);
          while r >= 1 && c >= 2 {
            r -= 1;
            c -= 2;
          }
          let r = r as isize;
          if c == 0 {
            avg2(edge.e(-r), edge.e(-1 - r))
          } else if c == 1 {
            avg3(edge.e(-r - 1), edge.e(-r), edge.e(-r + 1))
          } else {
            let k = c as isize - 1;
            avg3(edge.e(k - 1), edge.e(k), edge.e(k + 1))
          }
        }
        D207_PRED => {
          let rr = r + c / 2;
          let lx = |i: usize| edge.left(i.min(bs - 1));
          if c & 1 == 0 {
            avg2(lx(rr), lx(rr + 1))
          } else {
            avg3(lx(rr), lx(rr + 1), lx(rr + 2))
          }
        }
        _ => unreachable!(),
      }
    };

    if self == PredictionMode::DC_PRED {
      let dc = edge.dc(bit_depth);
      for r in 0..bs {
        dst[r][..bs].iter_mut().for_each(|v| *v = T::cast_from(dc as u32));
      }
      return;
    }

    for r in 0..bs {
      for c in 0..bs {
        dst[r][c] = T::clip(pred(r, c), bit_depth);
      }
    }
  }
}

#[inline(always)]
const fn avg2(a: i32, b: i32) -> i32 {
  (a + b + 1) >> 1
}

#[inline(always)]
const fn avg3(a: i32, b: i32, c: i32) -> i32 {
  (a + 2 * b + c + 2) >> 2
}

pub const MAX_TX_SIZE: usize = 32;

/// Reconstructed neighbours of a transform block.
///
/// `left` runs top to bottom; `above` covers twice the block width so the
/// diagonal modes can read the above-right samples.
#[derive(Debug, Clone)]
pub struct IntraEdge<T: Pixel> {
  left: [T; MAX_TX_SIZE],
  above: [T; 2 * MAX_TX_SIZE],
  top_left: T,
  size: usize,
  have_top: bool,
  have_left: bool,
}

impl<T: Pixel> IntraEdge<T> {
  #[inline(always)]
  pub fn left(&self, i: usize) -> i32 {
    i32::cast_from(self.left[i])
  }

  #[inline(always)]
  pub fn above(&self, i: usize) -> i32 {
    i32::cast_from(self.above[i])
  }

  #[inline(always)]
  pub fn top_left(&self) -> i32 {
    i32::cast_from(self.top_left)
  }

  /// Unified edge access: negative indices walk down the left column,
  /// zero is the top-left sample, positive indices walk the above row.
  #[inline(always)]
  pub fn e(&self, k: isize) -> i32 {
    match k {
      0 => self.top_left(),
      k if k < 0 => self.left((-k - 1) as usize),
      k => self.above((k - 1) as usize),
    }
  }

  fn dc(&self, bit_depth: usize) -> i32 {
    let bs = self.size;
    let sum_above: i32 = (0..bs).map(|i| self.above(i)).sum();
    let sum_left: i32 = (0..bs).map(|i| self.left(i)).sum();
    match (self.have_top, self.have_left) {
      (true, true) => (sum_above + sum_left + bs as i32) / (2 * bs as i32),
      (true, false) => (sum_above + (bs as i32 >> 1)) / bs as i32,
      (false, true) => (sum_left + (bs as i32 >> 1)) / bs as i32,
      (false, false) => 1 << (bit_depth - 1),
    }
  }
}

/// Gathers the prediction edge of the transform block at `po` (relative to
/// `rec`, which starts at the left edge of the tile and the top of the
/// frame).
///
/// `have_right` tells whether the above-right neighbour has already been
/// reconstructed; unavailable samples are synthesized from the base value
/// `1 << (bit_depth - 1)`: `base - 1` above and `base + 1` to the left.
pub fn get_intra_edges<T: Pixel>(
  rec: &PlaneRegion<'_, T>, po: PlaneOffset, tx_size: TxSize,
  bit_depth: usize, have_right: bool,
) -> IntraEdge<T> {
  let bs = tx_size.width();
  let base = 1i32 << (bit_depth - 1);
  let x = po.x as usize;
  let y = po.y as usize;
  let have_top = y > 0;
  let have_left = x > 0;

  let mut edge = IntraEdge {
    left: [T::cast_from((base + 1) as u32); MAX_TX_SIZE],
    above: [T::cast_from((base - 1) as u32); 2 * MAX_TX_SIZE],
    top_left: T::cast_from((base - 1) as u32),
    size: bs,
    have_top,
    have_left,
  };

  if have_left {
    for i in 0..bs {
      edge.left[i] = rec[y + i][x - 1];
    }
  }

  if have_top {
    let row = &rec[y - 1];
    let avail = if have_right {
      (2 * bs).min(row.len() - x)
    } else {
      bs.min(row.len() - x)
    };
    edge.above[..avail].copy_from_slice(&row[x..x + avail]);
    let last = edge.above[avail - 1];
    edge.above[avail..2 * bs].iter_mut().for_each(|v| *v = last);
    edge.top_left =
      if have_left { row[x - 1] } else { T::cast_from((base + 1) as u32) };
  }

  edge
}

/// Whether the above-right neighbour of a transform block is available.
///
/// `tx_x`/`tx_y` are the offsets of the transform inside its block and
/// `block_w` the block width, all in pixels of the plane. Above-right samples
/// inside the block, or in the superblock row above, are reconstructed;
/// anything else to the right in the current superblock row is not.
pub fn has_top_right(
  tx_x: usize, tx_y: usize, tx_w: usize, block_w: usize, block_y: usize,
  sb_h: usize, x_end: usize, region_w: usize,
) -> bool {
  if tx_x + tx_w < block_w {
    return true;
  }
  tx_y == 0 && block_y % sb_h == 0 && x_end + tx_w <= region_w
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;
  use PredictionMode::*;

  fn edge_from(above: &[i32], left: &[i32], top_left: i32) -> IntraEdge<u16> {
    let mut e = IntraEdge {
      left: [0; MAX_TX_SIZE],
      above: [0; 2 * MAX_TX_SIZE],
      top_left: top_left as u16,
      size: left.len(),
      have_top: true,
      have_left: true,
    };
    for (i, &v) in above.iter().enumerate() {
      e.above[i] = v as u16;
    }
    for (i, &v) in left.iter().enumerate() {
      e.left[i] = v as u16;
    }
    e
  }

  fn predict(mode: PredictionMode, edge: &IntraEdge<u16>) -> Plane<u16> {
    let mut p = Plane::new(4, 4, 0, 0);
    let mut dst =
      PlaneRegionMut::new(&mut p, Rect { x: 0, y: 0, width: 4, height: 4 });
    mode.predict_intra(&mut dst, TX_4X4, 8, edge);
    p
  }

  #[test]
  fn flat_edges_give_flat_prediction() {
    let edge = edge_from(&[90; 8], &[90; 4], 90);
    for &mode in ALL_INTRA_MODES {
      let p = predict(mode, &edge);
      assert!(p.data.iter().all(|&v| v == 90), "{:?}", mode);
    }
  }

  #[test]
  fn directional_samples() {
    let above = [10, 20, 30, 40, 50, 60, 70, 80];
    let left = [15, 25, 35, 45];
    let edge = edge_from(&above, &left, 5);
    let v = predict(V_PRED, &edge);
    assert_eq!(&v[3][..], &[10, 20, 30, 40]);
    let h = predict(H_PRED, &edge);
    assert_eq!(&h[2][..], &[35, 35, 35, 35]);
    let d45 = predict(D45_PRED, &edge);
    assert_eq!(d45[0][0], ((10 + 40 + 30 + 2) >> 2) as u16);
    assert_eq!(d45[3][3], 80);
    let d135 = predict(D135_PRED, &edge);
    assert_eq!(d135[0][0], ((15 + 10 + 10 + 2) >> 2) as u16);
    assert_eq!(d135[1][1], d135[0][0]);
    let tm = predict(TM_PRED, &edge);
    assert_eq!(tm[1][2], (25 + 30 - 5) as u16);
  }

  #[test]
  fn missing_neighbours_use_base_values() {
    let mut p = Plane::<u8>::new(16, 16, 0, 0);
    p.fill(77);
    let region =
      PlaneRegion::new(&p, Rect { x: 0, y: 0, width: 16, height: 16 });
    let edge = get_intra_edges(&region, PlaneOffset { x: 0, y: 0 }, TX_4X4, 8, false);
    assert_eq!(edge.above(0), 127);
    assert_eq!(edge.left(0), 129);
    assert_eq!(edge.dc(8), 128);
    let edge = get_intra_edges(&region, PlaneOffset { x: 4, y: 4 }, TX_4X4, 8, false);
    assert_eq!(edge.above(7), 77);
    assert_eq!(edge.top_left(), 77);
  }

  #[test]
  fn top_right_availability() {
    // inside the block
    assert!(has_top_right(0, 4, 4, 8, 8, 64, 4, 64));
    // right column of a block in the middle of a superblock
    assert!(!has_top_right(4, 0, 4, 8, 8, 64, 16, 64));
    // top of the superblock row, inside the tile
    assert!(has_top_right(4, 0, 4, 8, 64, 64, 16, 64));
    // tile edge
    assert!(!has_top_right(4, 0, 4, 8, 64, 64, 64, 64));
  }
}
