// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use av1core::context::FrameBlocks;
use av1core::frame::Frame;
use av1core::partition::BlockSize;
use av1core::*;

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn config(width: usize, height: usize, speed: usize) -> EncoderConfig {
  EncoderConfig {
    width,
    height,
    quantizer: 100,
    ..EncoderConfig::with_speed_preset(speed)
  }
}

/// Smooth gradients with a moving block of noise, so that inter frames
/// find real motion.
fn frame(width: usize, height: usize, t: usize, seed: u64) -> Frame<u8> {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut f = Frame::new(width, height);
  for (pli, p) in f.planes.iter_mut().enumerate() {
    let (pw, ph) = (p.cfg.width, p.cfg.height);
    let shift = if pli == 0 { 0 } else { 1 };
    for y in 0..ph {
      for x in 0..pw {
        let mut v = 40 + (x * 3 + y * 2) % 160;
        let (bx, by) = ((16 + 2 * t) >> shift, 24 >> shift);
        if (bx..bx + (24 >> shift)).contains(&x) && (by..by + (24 >> shift)).contains(&y) {
          v = 200 - (x ^ y) % 32;
        }
        p[y][x] = (v as i32 + rng.gen_range(-2..=2)).clamp(0, 255) as u8;
      }
    }
  }
  f
}

fn encode_sequence(cfg: Config, frames: usize) -> Vec<EncodedFrame<u8>> {
  let enc = cfg.encoder_config().clone();
  let mut encoder = cfg.new_encoder::<u8>().unwrap();
  (0..frames)
    .map(|t| {
      let params = FrameParams {
        frame_type: if t == 0 { FrameType::KEY } else { FrameType::INTER },
        ..Default::default()
      };
      encoder.encode_frame(frame(enc.width, enc.height, t, t as u64), &params).unwrap()
    })
    .collect()
}

fn assert_same(a: &[EncodedFrame<u8>], b: &[EncodedFrame<u8>]) {
  assert_eq!(a.len(), b.len());
  for (fa, fb) in a.iter().zip(b) {
    assert_eq!(fa.bits, fb.bits);
    assert_eq!(fa.dering_level, fb.dering_level);
    assert_eq!(fa.restoration, fb.restoration);
    assert!(fa.blocks == fb.blocks);
    assert!(fa.reference.frame == fb.reference.frame);
  }
}

/// Every unit carries the size of exactly one partition leaf: all units of
/// the aligned block around it agree.
fn assert_coverage(blocks: &FrameBlocks) {
  for y in 0..blocks.rows {
    for x in 0..blocks.cols {
      let b = blocks[y][x].bsize;
      assert!(b != BlockSize::BLOCK_INVALID, "unit ({}, {}) not coded", x, y);
      let (w, h) = (b.width_mi().max(1), b.height_mi().max(1));
      let (x0, y0) = (x - x % w, y - y % h);
      for yy in y0..(y0 + h).min(blocks.rows) {
        for xx in x0..(x0 + w).min(blocks.cols) {
          assert_eq!(blocks[yy][xx].bsize, b, "unit ({}, {})", xx, yy);
        }
      }
    }
  }
}

#[interpolate_test(speed_1, 1)]
#[interpolate_test(speed_5, 5)]
#[interpolate_test(speed_7, 7)]
#[interpolate_test(speed_10, 10)]
fn encoding_is_deterministic(speed: usize) {
  let cfg = || Config::new().with_encoder_config(config(96, 64, speed));
  let a = encode_sequence(cfg(), 3);
  let b = encode_sequence(cfg(), 3);
  assert_same(&a, &b);
  for f in a.iter() {
    assert_coverage(&f.blocks);
  }
}

#[test]
fn worker_count_does_not_change_the_result() {
  let mut enc = config(512, 64, 8);
  enc.tile_cols_log2 = 1;
  let single = Config::new().with_encoder_config(enc.clone()).with_threads(1);
  assert_eq!(single.tiling_info().unwrap().cols, 2);
  let many = Config::new().with_encoder_config(enc).with_threads(4);
  assert_same(&encode_sequence(single, 2), &encode_sequence(many, 2));
}

#[test]
fn tile_columns_stay_consistent() {
  let mut enc = config(512, 128, 8);
  enc.tile_cols_log2 = 1;
  let frames = encode_sequence(Config::new().with_encoder_config(enc), 2);
  for f in frames.iter() {
    assert_coverage(&f.blocks);
  }
}

#[test]
fn inter_frames_predict_from_the_key_frame() {
  let frames = encode_sequence(Config::new().with_encoder_config(config(96, 64, 6)), 2);
  let inter = &frames[1];
  assert_eq!(inter.frame_type, FrameType::INTER);
  let blocks = &inter.blocks;
  let inter_units = (0..blocks.rows)
    .flat_map(|y| blocks[y].iter())
    .filter(|b| b.is_inter())
    .count();
  assert!(inter_units > 0);
}

#[test]
fn disabled_filters_leave_the_reconstruction_alone() {
  let mut enc = config(64, 64, 6);
  enc.enable_dering = false;
  enc.enable_restoration = false;
  let frames = encode_sequence(Config::new().with_encoder_config(enc), 1);
  assert_eq!(frames[0].dering_level, 0);
  for rp in frames[0].restoration.planes.iter() {
    assert_eq!(rp.rtype, av1core::lrf::RestorationType::None);
  }
}

#[test]
fn segment_map_of_the_wrong_size_is_rejected() {
  let mut enc = config(64, 64, 8);
  enc.segmentation.enabled = true;
  let mut encoder = Config::new().with_encoder_config(enc).new_encoder::<u8>().unwrap();
  let params = FrameParams { segment_map: Some(vec![0; 3]), ..Default::default() };
  assert!(matches!(
    encoder.encode_frame(Frame::new(64, 64), &params),
    Err(CodecError::UnsupportedBitstream(_))
  ));
}

#[test]
fn invalid_configuration_is_reported() {
  let cfg = Config::new().with_encoder_config(EncoderConfig {
    bit_depth: 9,
    ..Default::default()
  });
  assert!(matches!(
    cfg.new_encoder::<u16>(),
    Err(CodecError::InvalidConfig(InvalidConfig::InvalidBitDepth(9)))
  ));
}
