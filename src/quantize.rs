// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::scan_order::default_scan;
use crate::transform::TxSize;

use std::sync::OnceLock;

pub const QINDEX_RANGE: usize = 256;
pub const MINQ: usize = 0;
pub const MAXQ: usize = 255;

struct QLookup {
  dc: [[u16; QINDEX_RANGE]; 3],
  ac: [[u16; QINDEX_RANGE]; 3],
}

// Smooth approximation of the AV1 step tables: roughly linear for low
// indices, exponential above. Index 0 is the lossless step of 4.
fn gen_qlookup() -> QLookup {
  let mut dc = [[0u16; QINDEX_RANGE]; 3];
  let mut ac = [[0u16; QINDEX_RANGE]; 3];
  for q in 0..QINDEX_RANGE {
    let qf = q as f64;
    let growth = (0.0213 * qf).exp() - 1.0;
    let ac8 = (4.0 + qf + 6.9 * growth).round();
    let dc8 = (4.0 + 0.85 * qf + 4.0 * growth).round();
    for (bd, scale) in [1.0, 4.0, 16.0].into_iter().enumerate() {
      ac[bd][q] = (ac8 * scale) as u16;
      dc[bd][q] = (dc8 * scale) as u16;
    }
  }
  QLookup { dc, ac }
}

fn qlookup() -> &'static QLookup {
  static QLOOKUP: OnceLock<QLookup> = OnceLock::new();
  QLOOKUP.get_or_init(gen_qlookup)
}

#[inline]
fn bd_index(bit_depth: usize) -> usize {
  ((bit_depth ^ 8) >> 1).min(2)
}

pub fn dc_q(qindex: u8, delta_q: i8, bit_depth: usize) -> u16 {
  let q = (qindex as isize + delta_q as isize).clamp(0, MAXQ as isize);
  qlookup().dc[bd_index(bit_depth)][q as usize]
}

pub fn ac_q(qindex: u8, delta_q: i8, bit_depth: usize) -> u16 {
  let q = (qindex as isize + delta_q as isize).clamp(0, MAXQ as isize);
  qlookup().ac[bd_index(bit_depth)][q as usize]
}

/// Quantizer state for one block: step sizes and dead-zone rounding.
#[derive(Debug, Clone, Copy)]
pub struct QuantizationContext {
  dc_quant: u32,
  ac_quant: u32,
  dc_round: u32,
  ac_round: u32,
}

impl QuantizationContext {
  pub fn new(qindex: u8, bit_depth: usize, is_intra: bool) -> Self {
    let dc_quant = dc_q(qindex, 0, bit_depth) as u32;
    let ac_quant = ac_q(qindex, 0, bit_depth) as u32;
    // Half-step rounding at q 0 keeps lossless exact.
    let factor = if qindex == 0 {
      64
    } else if is_intra {
      48
    } else {
      42
    };
    QuantizationContext {
      dc_quant,
      ac_quant,
      dc_round: (dc_quant * factor) >> 7,
      ac_round: (ac_quant * factor) >> 7,
    }
  }

  #[inline]
  pub const fn dc_quant(&self) -> u32 {
    self.dc_quant
  }

  #[inline]
  pub const fn ac_quant(&self) -> u32 {
    self.ac_quant
  }

  /// Quantizes `coeffs` into `qcoeffs` and returns the end-of-block
  /// position in scan order.
  #[profiling::function]
  pub fn quantize(
    &self, coeffs: &[i32], qcoeffs: &mut [i32], tx_size: TxSize,
  ) -> usize {
    let scan = default_scan(tx_size);
    let mut eob = 0;
    for (i, &pos) in scan.iter().enumerate() {
      let pos = pos as usize;
      let (q, r) = if pos == 0 {
        (self.dc_quant, self.dc_round)
      } else {
        (self.ac_quant, self.ac_round)
      };
      let c = coeffs[pos];
      let level = ((c.unsigned_abs() + r) / q) as i32;
      qcoeffs[pos] = if c < 0 { -level } else { level };
      if level != 0 {
        eob = i + 1;
      }
    }
    eob
  }

  pub fn dequantize(&self, qcoeffs: &[i32], rcoeffs: &mut [i32]) {
    for (i, (&q, r)) in qcoeffs.iter().zip(rcoeffs.iter_mut()).enumerate() {
      let step = if i == 0 { self.dc_quant } else { self.ac_quant };
      *r = q * step as i32;
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::transform::TxSize::*;

  #[test]
  fn step_tables_are_monotonic() {
    for bd in [8, 10, 12] {
      for q in 1..=255u8 {
        assert!(ac_q(q, 0, bd) >= ac_q(q - 1, 0, bd));
        assert!(dc_q(q, 0, bd) >= dc_q(q - 1, 0, bd));
      }
    }
    assert_eq!(ac_q(0, 0, 8), 4);
    assert_eq!(dc_q(0, 0, 8), 4);
    assert_eq!(ac_q(0, 0, 10), 16);
  }

  #[test]
  fn lossless_quantizer_is_exact() {
    let qc = QuantizationContext::new(0, 8, true);
    let coeffs: Vec<i32> = (0..16).map(|i| (i - 8) * 4).collect();
    let mut q = vec![0; 16];
    let mut r = vec![0; 16];
    let eob = qc.quantize(&coeffs, &mut q, TX_4X4);
    qc.dequantize(&q, &mut r);
    assert_eq!(coeffs, r);
    assert_eq!(eob, 16);
  }

  #[test]
  fn eob_follows_scan_order() {
    let qc = QuantizationContext::new(100, 8, false);
    let mut coeffs = vec![0; 16];
    // raster position 4 is third in zig-zag order
    coeffs[4] = 10_000;
    let mut q = vec![0; 16];
    assert_eq!(qc.quantize(&coeffs, &mut q, TX_4X4), 3);
  }
}
