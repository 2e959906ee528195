// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use av1core::context::{Block, FrameBlocks};
use av1core::dering::{dering_frame, MAX_DERING_LEVEL};
use av1core::frame::Frame;
use av1core::lrf::*;
use av1core::partition::BlockSize;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn noisy(width: usize, height: usize, seed: u64) -> Frame<u16> {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut f = Frame::new(width, height);
  for p in f.planes.iter_mut() {
    for v in p.data.iter_mut() {
      *v = rng.gen_range(0..1024);
    }
  }
  f
}

#[test]
fn no_restoration_is_identity() {
  let f = noisy(160, 96, 1);
  let rs = RestorationState::new(160, 96);
  let mut out = f.clone();
  rs.lrf_filter_frame(&mut out, false, 10).unwrap();
  assert!(out == f);
}

#[test]
fn wiener_keeps_flat_areas_flat() {
  let mut f = Frame::<u16>::new(128, 128);
  for p in f.planes.iter_mut() {
    p.fill(700);
  }
  let mut rs = RestorationState::new(128, 128);
  for rp in rs.planes.iter_mut() {
    rp.rtype = RestorationType::Wiener;
    rp.units.fill(RestorationFilter::Wiener {
      vfilter: WIENER_FILT_TAP_MAXV,
      hfilter: WIENER_FILT_TAP_MINV,
    });
  }
  let mut out = f.clone();
  rs.lrf_filter_frame(&mut out, true, 10).unwrap();
  assert!(out == f);
}

#[test]
fn skipped_frame_is_never_deringed() {
  let f = noisy(128, 64, 2);
  let mut fb = FrameBlocks::new(16, 8);
  for y in 0..fb.rows {
    for x in 0..fb.cols {
      fb[y][x] = Block { bsize: BlockSize::BLOCK_64X64, skip: true, ..Default::default() };
    }
  }
  let mut rec = f.clone();
  dering_frame(&mut rec, &fb, MAX_DERING_LEVEL - 1, 10).unwrap();
  assert!(rec == f);
}
