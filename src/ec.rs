// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Bit-cost model of the binary arithmetic coder.
//!
//! Symbols are written in coding order exactly as a real coder would
//! consume them; instead of producing bytes the writer accumulates the
//! ideal code length of every symbol.

use arrayvec::ArrayVec;
use std::sync::OnceLock;

/// Precision of fractional bit costs, in bits.
pub const PROB_COST_SHIFT: u32 = 9;

/// A binary probability of the `0` branch, in units of 1/256.
pub type Prob = u8;

/// A binary tree over symbol values, in the classic packed layout: even
/// indices are `0` branches, odd indices `1` branches, non-positive entries
/// are leaves holding the negated symbol value.
pub type TreeIndex = i8;

fn prob_cost_table() -> &'static [u16; 256] {
  static TABLE: OnceLock<[u16; 256]> = OnceLock::new();
  TABLE.get_or_init(|| {
    let mut t = [0u16; 256];
    for (p, c) in t.iter_mut().enumerate() {
      let p = p.max(1) as f64 / 256.0;
      *c = (-p.log2() * (1 << PROB_COST_SHIFT) as f64).round() as u16;
    }
    t
  })
}

/// Cost of coding `bit` with probability `prob` of a zero, in 1/512 bits.
#[inline]
pub fn cost_bit(prob: Prob, bit: bool) -> u32 {
  let p = if bit { 256 - prob as usize } else { prob as usize };
  prob_cost_table()[p.min(255)] as u32
}

/// Fills `costs` with the code length of every leaf of `tree`.
pub fn tree_costs(costs: &mut [u32], tree: &[TreeIndex], probs: &[Prob]) {
  fn walk(
    costs: &mut [u32], tree: &[TreeIndex], probs: &[Prob], i: usize, c: u32,
  ) {
    let prob = probs[i >> 1];
    for b in 0..2 {
      let cc = c + cost_bit(prob, b == 1);
      let ii = tree[i + b];
      if ii <= 0 {
        costs[(-ii) as usize] = cc;
      } else {
        walk(costs, tree, probs, ii as usize, cc);
      }
    }
  }
  walk(costs, tree, probs, 0, 0);
}

/// The sequence of `(bit, node)` decisions leading to `value` in `tree`.
pub fn tree_path(
  tree: &[TreeIndex], value: usize,
) -> ArrayVec<(bool, usize), 16> {
  fn search(
    tree: &[TreeIndex], i: usize, value: usize,
    path: &mut ArrayVec<(bool, usize), 16>,
  ) -> bool {
    for b in 0..2 {
      path.push((b == 1, i >> 1));
      let ii = tree[i + b];
      let found = if ii <= 0 {
        (-ii) as usize == value
      } else {
        search(tree, ii as usize, value, path)
      };
      if found {
        return true;
      }
      path.pop();
    }
    false
  }
  let mut path = ArrayVec::new();
  let found = search(tree, 0, value, &mut path);
  debug_assert!(found, "symbol {} not in tree", value);
  path
}

pub trait Writer {
  /// Write a binary symbol.
  fn bit(&mut self, bit: bool, prob: Prob);
  /// Write `bits` equiprobable bits of `value`, MSB first.
  fn literal(&mut self, bits: u8, value: u32);
  /// Write `value` with a tree code.
  fn tree(&mut self, tree: &[TreeIndex], probs: &[Prob], value: usize) {
    for (bit, node) in tree_path(tree, value) {
      self.bit(bit, probs[node]);
    }
  }
  /// Return the amount of information written so far in 1/512 bits.
  fn tell_frac(&self) -> u64;
}

/// Writer that only accumulates the code length.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterCounter {
  frac_bits: u64,
}

impl WriterCounter {
  pub const fn new() -> Self {
    WriterCounter { frac_bits: 0 }
  }

  /// Whole bits written so far, rounded up.
  pub const fn bits(&self) -> u64 {
    (self.frac_bits + (1 << PROB_COST_SHIFT) - 1) >> PROB_COST_SHIFT
  }
}

impl Writer for WriterCounter {
  #[inline]
  fn bit(&mut self, bit: bool, prob: Prob) {
    self.frac_bits += cost_bit(prob, bit) as u64;
  }

  #[inline]
  fn literal(&mut self, bits: u8, _value: u32) {
    self.frac_bits += (bits as u64) << PROB_COST_SHIFT;
  }

  #[inline]
  fn tell_frac(&self) -> u64 {
    self.frac_bits
  }
}

#[cfg(test)]
mod test {
  use super::*;

  const TREE: [TreeIndex; 6] = [0, 2, -1, 4, -2, -3];

  #[test]
  fn bit_costs() {
    assert_eq!(cost_bit(128, false), 512);
    assert_eq!(cost_bit(128, true), 512);
    assert!(cost_bit(250, false) < cost_bit(250, true));
  }

  #[test]
  fn tree_costs_match_written_paths() {
    let probs = [200, 100, 30];
    let mut costs = [0u32; 4];
    tree_costs(&mut costs, &TREE, &probs);
    for v in 0..4 {
      let mut w = WriterCounter::new();
      w.tree(&TREE, &probs, v);
      assert_eq!(w.tell_frac(), costs[v] as u64);
    }
    assert_eq!(tree_path(&TREE, 3).len(), 3);
  }
}
