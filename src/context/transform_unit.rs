// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

use crate::ec::Prob;
use crate::scan_order::default_scan;

pub const PLANE_TYPES: usize = 2;
pub const COEF_BANDS: usize = 6;
pub const COEFF_CONTEXTS: usize = 3;
/// More-coefficients, zero and one nodes of the token tree.
pub const UNCONSTRAINED_NODES: usize = 3;

static coefband_4x4: [u8; 16] = [0, 1, 1, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 5, 5, 5];

/// Token probabilities by plane type, band and neighbourhood energy.
/// These are fixed: coefficient statistics are not adapted.
static coef_probs: [[[[Prob; UNCONSTRAINED_NODES]; COEFF_CONTEXTS];
  COEF_BANDS]; PLANE_TYPES] = [
  [
    // Y plane
    [[195, 29, 183], [84, 49, 136], [8, 42, 71]],
    [[154, 82, 169], [98, 77, 140], [35, 60, 101]],
    [[187, 120, 178], [110, 98, 150], [43, 72, 115]],
    [[208, 142, 190], [125, 117, 160], [51, 83, 123]],
    [[222, 160, 200], [142, 130, 169], [58, 91, 130]],
    [[238, 186, 210], [163, 148, 180], [64, 102, 138]],
  ],
  [
    // UV planes
    [[211, 52, 203], [106, 68, 159], [17, 55, 92]],
    [[170, 95, 180], [110, 88, 151], [43, 70, 110]],
    [[198, 131, 186], [121, 108, 158], [51, 81, 121]],
    [[217, 153, 198], [136, 126, 168], [59, 91, 130]],
    [[230, 171, 207], [152, 139, 177], [66, 99, 137]],
    [[243, 196, 216], [171, 157, 187], [72, 110, 146]],
  ],
];

#[inline]
fn coef_band(scan_pos: usize, tx_size: TxSize) -> usize {
  if tx_size == TX_4X4 {
    coefband_4x4[scan_pos] as usize
  } else {
    match scan_pos {
      0 => 0,
      1..=2 => 1,
      3..=5 => 2,
      6..=9 => 3,
      10..=20 => 4,
      _ => 5,
    }
  }
}

/// Energy class of a coded level, used as the context of the next token.
#[inline]
fn energy_class(level: u32) -> usize {
  match level {
    0 => 0,
    1 => 1,
    _ => 2,
  }
}

impl<'a> ContextWriter<'a> {
  /// Code the quantized coefficients of one transform block and update the
  /// above and left nonzero contexts. `coeffs` is in raster order; `eob` is
  /// the number of scan positions up to and including the last nonzero
  /// level. Returns whether any level was nonzero.
  pub fn write_coeffs<W: Writer>(
    &mut self, w: &mut W, plane: usize, bo: TileBlockOffset, tx_x4: usize,
    tx_y4: usize, coeffs: &[i32], eob: usize, tx_size: TxSize, xdec: usize,
    ydec: usize,
  ) -> bool {
    let ctx0 =
      self.bc.coeff_context(plane, bo, tx_x4, tx_y4, tx_size, xdec, ydec);
    let probs = &coef_probs[(plane > 0) as usize];
    let scan = default_scan(tx_size);
    let mut ctx = ctx0;
    let mut more_coefs_coded = true;

    for (c, &pos) in scan.iter().enumerate() {
      let band = coef_band(c, tx_size);
      let p = &probs[band][ctx];
      if more_coefs_coded {
        // The zero branch of the first node ends the block.
        w.bit(c < eob, p[0]);
        if c >= eob {
          break;
        }
      }
      let v = coeffs[pos as usize];
      let level = v.unsigned_abs();
      w.bit(level != 0, p[1]);
      if level != 0 {
        w.bit(level > 1, p[2]);
        if level > 1 {
          // Remaining magnitude as an Exp-Golomb code.
          let x = level - 1;
          let len = 32 - x.leading_zeros();
          w.literal((2 * len - 1) as u8, x);
        }
        w.literal(1, (v < 0) as u32);
      }
      more_coefs_coded = level != 0;
      ctx = energy_class(level);
      if c + 1 == eob {
        if more_coefs_coded && c + 1 < scan.len() {
          let band = coef_band(c + 1, tx_size);
          w.bit(false, probs[band][ctx][0]);
        }
        break;
      }
    }

    let nonzero = eob > 0;
    self.bc.set_coeff_context(
      plane, bo, tx_x4, tx_y4, tx_size, xdec, ydec, nonzero,
    );
    nonzero
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ec::{cost_bit, WriterCounter};

  #[test]
  fn empty_block_codes_a_single_end_of_block() {
    let fc = FrameContext::default();
    let mut fb = FrameBlocks::new(4, 4);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fc, BlockContext::new(&mut tb));
    let mut w = WriterCounter::new();
    let bo = TileBlockOffset::default();
    let nz =
      cw.write_coeffs(&mut w, 0, bo, 0, 0, &[0; 16], 0, TX_4X4, 0, 0);
    assert!(!nz);
    assert_eq!(w.tell_frac(), cost_bit(coef_probs[0][0][0][0], false) as u64);
  }

  #[test]
  fn larger_levels_cost_more() {
    let fc = FrameContext::default();
    let mut fb = FrameBlocks::new(4, 4);
    let mut tb = fb.as_tile_blocks_mut();
    let mut cw = ContextWriter::new(&fc, BlockContext::new(&mut tb));
    let bo = TileBlockOffset::default();
    let mut small = [0i32; 16];
    small[0] = 1;
    let mut large = [0i32; 16];
    large[0] = 40;
    let mut w1 = WriterCounter::new();
    cw.write_coeffs(&mut w1, 0, bo, 0, 0, &small, 1, TX_4X4, 0, 0);
    cw.bc.reset_above_contexts();
    cw.bc.reset_left_contexts();
    let mut w2 = WriterCounter::new();
    let nz = cw.write_coeffs(&mut w2, 0, bo, 0, 0, &large, 1, TX_4X4, 0, 0);
    assert!(nz);
    assert!(w1.tell_frac() < w2.tell_frac());
    assert_eq!(cw.bc.coeff_context(0, bo, 0, 0, TX_4X4, 0, 0), 2);
  }
}
