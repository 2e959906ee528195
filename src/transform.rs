// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_camel_case_types)]

use crate::partition::BlockSize;
use crate::partition::BlockSize::*;

use num_derive::FromPrimitive;
use std::sync::OnceLock;

pub use self::TxSize::*;
pub use self::TxType::*;

#[derive(
  Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive,
)]
pub enum TxSize {
  TX_4X4,
  TX_8X8,
  TX_16X16,
  TX_32X32,
}

pub const TX_SIZES: usize = 4;

impl TxSize {
  #[inline]
  pub const fn width_log2(self) -> usize {
    self as usize + 2
  }

  #[inline]
  pub const fn width(self) -> usize {
    1 << self.width_log2()
  }

  #[inline]
  pub const fn height(self) -> usize {
    self.width()
  }

  #[inline]
  pub const fn area(self) -> usize {
    1 << (2 * self.width_log2())
  }

  #[inline]
  pub const fn block_size(self) -> BlockSize {
    match self {
      TX_4X4 => BLOCK_4X4,
      TX_8X8 => BLOCK_8X8,
      TX_16X16 => BLOCK_16X16,
      TX_32X32 => BLOCK_32X32,
    }
  }

  /// Chroma transform size for a luma block in 4:2:0.
  pub fn uv_tx_size(self, bsize: BlockSize) -> TxSize {
    let uv_max = bsize.uv_size().max_tx_size();
    self.min(uv_max)
  }
}

/// Vertical kernel first, then horizontal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, FromPrimitive)]
pub enum TxType {
  DCT_DCT,
  ADST_DCT,
  DCT_ADST,
  ADST_ADST,
}

pub const TX_TYPES: usize = 4;

pub const ALL_TX_TYPES: [TxType; TX_TYPES] =
  [DCT_DCT, ADST_DCT, DCT_ADST, ADST_ADST];

impl TxType {
  #[inline]
  const fn kernels(self) -> (Kernel, Kernel) {
    match self {
      DCT_DCT => (Kernel::Dct, Kernel::Dct),
      ADST_DCT => (Kernel::Adst, Kernel::Dct),
      DCT_ADST => (Kernel::Dct, Kernel::Adst),
      ADST_ADST => (Kernel::Adst, Kernel::Adst),
    }
  }
}

/// Transform types that may be searched for a transform size.
pub fn tx_types_for(tx_size: TxSize, is_inter: bool) -> &'static [TxType] {
  if tx_size == TX_32X32 {
    &ALL_TX_TYPES[..1]
  } else if is_inter && tx_size == TX_16X16 {
    &ALL_TX_TYPES[..1]
  } else {
    &ALL_TX_TYPES
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Kernel {
  Dct,
  Adst,
}

/// Basis matrices are stored with this many fractional bits.
const BASIS_BITS: usize = 14;
/// Coefficients leave the forward transform scaled by 8 relative to an
/// orthonormal transform, matching the quantizer step tables.
const COEFF_SCALE_LOG2: usize = 3;

struct Bases {
  dct: [Vec<i32>; TX_SIZES],
  adst: [Vec<i32>; TX_SIZES],
}

fn gen_basis(n: usize, kernel: Kernel) -> Vec<i32> {
  use std::f64::consts::PI;
  let scale = (1 << BASIS_BITS) as f64;
  let mut m = Vec::with_capacity(n * n);
  for k in 0..n {
    for i in 0..n {
      let v = match kernel {
        Kernel::Dct => {
          let s = if k == 0 { (1.0 / n as f64).sqrt() } else { (2.0 / n as f64).sqrt() };
          s * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos()
        }
        Kernel::Adst => {
          let d = (2 * n + 1) as f64;
          2.0 / d.sqrt()
            * (PI * (2 * k + 1) as f64 * (i + 1) as f64 / d).sin()
        }
      };
      m.push((v * scale).round() as i32);
    }
  }
  m
}

fn bases() -> &'static Bases {
  static BASES: OnceLock<Bases> = OnceLock::new();
  BASES.get_or_init(|| Bases {
    dct: [4, 8, 16, 32].map(|n| gen_basis(n, Kernel::Dct)),
    adst: [4, 8, 16, 32].map(|n| gen_basis(n, Kernel::Adst)),
  })
}

#[inline]
fn basis(tx_size: TxSize, kernel: Kernel) -> &'static [i32] {
  let b = bases();
  match kernel {
    Kernel::Dct => &b.dct[tx_size as usize],
    Kernel::Adst => &b.adst[tx_size as usize],
  }
}

pub mod rust {
  use super::*;
  use crate::util::round_shift_signed;

  /// Forward 2D transform of a residual block.
  ///
  /// `input` is row-major with `stride`; `output` is row-major with the
  /// transform width as stride. Lossless blocks use the 4×4 Walsh-Hadamard
  /// transform, which reconstructs exactly.
  pub fn forward_transform(
    input: &[i32], output: &mut [i32], stride: usize, tx_size: TxSize,
    tx_type: TxType, lossless: bool,
  ) {
    if lossless {
      debug_assert_eq!(tx_size, TX_4X4);
      fwht4x4(input, output, stride);
      return;
    }
    let n = tx_size.width();
    let (vk, hk) = tx_type.kernels();
    let mv = basis(tx_size, vk);
    let mh = basis(tx_size, hk);
    let mut tmp = vec![0i64; n * n];
    for k in 0..n {
      for c in 0..n {
        let mut acc = 0i64;
        for r in 0..n {
          acc += mv[k * n + r] as i64 * input[r * stride + c] as i64;
        }
        tmp[k * n + c] = acc;
      }
    }
    for r in 0..n {
      for k in 0..n {
        let mut acc = 0i64;
        for c in 0..n {
          acc += mh[k * n + c] as i64 * tmp[r * n + c];
        }
        output[r * n + k] =
          round_shift_signed(acc, 2 * BASIS_BITS - COEFF_SCALE_LOG2) as i32;
      }
    }
  }

  /// Inverse 2D transform, producing a row-major residual of the transform
  /// width.
  pub fn inverse_transform(
    input: &[i32], output: &mut [i32], tx_size: TxSize, tx_type: TxType,
    lossless: bool,
  ) {
    if lossless {
      debug_assert_eq!(tx_size, TX_4X4);
      iwht4x4(input, output);
      return;
    }
    let n = tx_size.width();
    let (vk, hk) = tx_type.kernels();
    let mv = basis(tx_size, vk);
    let mh = basis(tx_size, hk);
    let mut tmp = vec![0i64; n * n];
    for r in 0..n {
      for c in 0..n {
        let mut acc = 0i64;
        for k in 0..n {
          acc += mh[k * n + c] as i64 * input[r * n + k] as i64;
        }
        tmp[r * n + c] = acc;
      }
    }
    for r in 0..n {
      for c in 0..n {
        let mut acc = 0i64;
        for k in 0..n {
          acc += mv[k * n + r] as i64 * tmp[k * n + c];
        }
        output[r * n + c] =
          round_shift_signed(acc, 2 * BASIS_BITS + COEFF_SCALE_LOG2) as i32;
      }
    }
  }

  const UNIT_QUANT_SHIFT: usize = 2;

  fn fwht4x4(input: &[i32], output: &mut [i32], stride: usize) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
      let mut a1 = input[i];
      let mut b1 = input[stride + i];
      let mut c1 = input[2 * stride + i];
      let mut d1 = input[3 * stride + i];
      a1 += b1;
      d1 -= c1;
      let e1 = (a1 - d1) >> 1;
      b1 = e1 - b1;
      c1 = e1 - c1;
      a1 -= c1;
      d1 += b1;
      tmp[i] = a1;
      tmp[4 + i] = c1;
      tmp[8 + i] = d1;
      tmp[12 + i] = b1;
    }
    for i in 0..4 {
      let mut a1 = tmp[4 * i];
      let mut b1 = tmp[4 * i + 1];
      let mut c1 = tmp[4 * i + 2];
      let mut d1 = tmp[4 * i + 3];
      a1 += b1;
      d1 -= c1;
      let e1 = (a1 - d1) >> 1;
      b1 = e1 - b1;
      c1 = e1 - c1;
      a1 -= c1;
      d1 += b1;
      output[4 * i] = a1 << UNIT_QUANT_SHIFT;
      output[4 * i + 1] = c1 << UNIT_QUANT_SHIFT;
      output[4 * i + 2] = d1 << UNIT_QUANT_SHIFT;
      output[4 * i + 3] = b1 << UNIT_QUANT_SHIFT;
    }
  }

  fn iwht4x4(input: &[i32], output: &mut [i32]) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
      let mut a1 = input[4 * i] >> UNIT_QUANT_SHIFT;
      let mut c1 = input[4 * i + 1] >> UNIT_QUANT_SHIFT;
      let mut d1 = input[4 * i + 2] >> UNIT_QUANT_SHIFT;
      let mut b1 = input[4 * i + 3] >> UNIT_QUANT_SHIFT;
      a1 += c1;
      d1 -= b1;
      let e1 = (a1 - d1) >> 1;
      b1 = e1 - b1;
      c1 = e1 - c1;
      a1 -= b1;
      d1 += c1;
      tmp[4 * i] = a1;
      tmp[4 * i + 1] = b1;
      tmp[4 * i + 2] = c1;
      tmp[4 * i + 3] = d1;
    }
    for i in 0..4 {
      let mut a1 = tmp[i];
      let mut c1 = tmp[4 + i];
      let mut d1 = tmp[8 + i];
      let mut b1 = tmp[12 + i];
      a1 += c1;
      d1 -= b1;
      let e1 = (a1 - d1) >> 1;
      b1 = e1 - b1;
      c1 = e1 - c1;
      a1 -= b1;
      d1 += c1;
      output[i] = a1;
      output[4 + i] = b1;
      output[8 + i] = c1;
      output[12 + i] = d1;
    }
  }
}

pub use self::rust::*;

#[cfg(test)]
mod test {
  use super::*;
  use rand::{Rng, SeedableRng};

  fn round_trip(tx_size: TxSize, tx_type: TxType, lossless: bool) {
    let n = tx_size.width();
    let mut rng = rand::rngs::StdRng::seed_from_u64(n as u64);
    let input: Vec<i32> = (0..n * n).map(|_| rng.gen_range(-255..=255)).collect();
    let mut coeffs = vec![0; n * n];
    let mut output = vec![0; n * n];
    forward_transform(&input, &mut coeffs, n, tx_size, tx_type, lossless);
    inverse_transform(&coeffs, &mut output, tx_size, tx_type, lossless);
    for (a, b) in input.iter().zip(output.iter()) {
      assert!((a - b).abs() <= if lossless { 0 } else { 1 }, "{} vs {}", a, b);
    }
  }

  #[test]
  fn lossless_wht_is_exact() {
    round_trip(TX_4X4, DCT_DCT, true);
  }

  #[test]
  fn lossy_transforms_nearly_invert() {
    for tx_size in [TX_4X4, TX_8X8, TX_16X16, TX_32X32] {
      for &tx_type in tx_types_for(tx_size, false) {
        round_trip(tx_size, tx_type, false);
      }
    }
  }

  #[test]
  fn flat_block_has_only_dc() {
    let input = [10i32; 64];
    let mut coeffs = [0i32; 64];
    forward_transform(&input, &mut coeffs, 8, TX_8X8, DCT_DCT, false);
    // orthonormal DC of a flat 8x8 is 8 * value, scaled by 8
    assert_eq!(coeffs[0], 640);
    assert!(coeffs[1..].iter().all(|&c| c == 0));
  }
}
