// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::transform::{TxSize, TX_SIZES};
use std::sync::OnceLock;

fn gen_zigzag(n: usize) -> Vec<u16> {
  let mut scan = Vec::with_capacity(n * n);
  for d in 0..(2 * n - 1) {
    let lo = d.saturating_sub(n - 1);
    let hi = d.min(n - 1);
    if d % 2 == 0 {
      for r in (lo..=hi).rev() {
        scan.push((r * n + d - r) as u16);
      }
    } else {
      for r in lo..=hi {
        scan.push((r * n + d - r) as u16);
      }
    }
  }
  scan
}

/// Zig-zag coefficient order for a square transform, as raster indices.
pub fn default_scan(tx_size: TxSize) -> &'static [u16] {
  static SCANS: OnceLock<[Vec<u16>; TX_SIZES]> = OnceLock::new();
  &SCANS.get_or_init(|| [4, 8, 16, 32].map(gen_zigzag))[tx_size as usize]
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::transform::TxSize::*;

  #[test]
  fn zigzag_4x4() {
    assert_eq!(
      default_scan(TX_4X4),
      &[0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15]
    );
  }

  #[test]
  fn scans_are_permutations() {
    for tx_size in [TX_4X4, TX_8X8, TX_16X16, TX_32X32] {
      let mut seen = vec![false; tx_size.area()];
      for &i in default_scan(tx_size) {
        assert!(!seen[i as usize]);
        seen[i as usize] = true;
      }
      assert!(seen.iter().all(|&s| s));
    }
  }
}
