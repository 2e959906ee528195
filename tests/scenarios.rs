// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::sync::Arc;

use av1core::context::*;
use av1core::encoder::FrameInvariants;
use av1core::encoder::FrameState;
use av1core::entropymode::FrameContext;
use av1core::frame::Frame;
use av1core::lrf::*;
use av1core::mc::{Av1Kernels, MotionVector};
use av1core::mvref::{find_mv_refs, MvRefParams};
use av1core::partition::*;
use av1core::predict::PredictionMode;
use av1core::rdo::rd_pick_sb_modes;
use av1core::segmentation::SegmentationState;
use av1core::tiling::*;
use av1core::*;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn flat(width: usize, height: usize, value: u8) -> Frame<u8> {
  let mut f = Frame::new(width, height);
  for p in f.planes.iter_mut() {
    p.fill(value);
  }
  f
}

#[test]
fn flat_block_takes_the_dc_skip_path() {
  let enc = EncoderConfig { width: 64, height: 64, ..EncoderConfig::with_speed_preset(0) };
  let fi = FrameInvariants::<u8>::new_key_frame(
    Arc::new(enc),
    FrameContext::default(),
    Arc::new(Av1Kernels),
    &FrameParams::default(),
    vec![0; 64],
  );
  let mut fs = FrameState::new(flat(64, 64, 128), SegmentationState::default());
  let mut fb = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
  let mut ts = TileStateMut::new(&mut fs, SuperBlockOffset { x: 0, y: 0 }, 64, 64);
  let mut tb = fb.as_tile_blocks_mut();
  let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));
  let bo = TileBlockOffset(BlockOffset { x: 0, y: 0 });

  let ctx = rd_pick_sb_modes(&fi, &mut ts, &mut cw, bo, BLOCK_32X32, i64::MAX).unwrap();
  assert_eq!(ctx.mic.mode, PredictionMode::DC_PRED);
  assert!(ctx.mic.skip);
  assert!(ctx.skippable);
  assert_eq!(ctx.rdc.dist, 0);
}

#[test]
fn identical_neighbours_share_one_stack_entry() {
  let mv = MotionVector { row: 4, col: -2 };
  let mut fb = FrameBlocks::new(8, 8);
  for (y, x) in [(1, 2), (2, 1)] {
    fb[y][x] = Block {
      mode: PredictionMode::NEWMV,
      bsize: BLOCK_8X8,
      ref_frames: [LAST_FRAME, NONE_FRAME],
      mv: [mv, MotionVector::default()],
      bmi: [SubBlockInfo {
        mode: PredictionMode::NEWMV,
        mv: [mv, MotionVector::default()],
      }; 4],
      ..Default::default()
    };
  }
  let tb = fb.as_tile_blocks();
  let bo = TileBlockOffset(BlockOffset { x: 2, y: 2 });
  let r = find_mv_refs(&tb, &MvRefParams::default(), bo, BLOCK_8X8, LAST_FRAME as usize);
  assert_eq!(r.stack.len(), 1);
  assert_eq!(r.stack[0].this_mv, mv);
  assert_eq!(r.nearest, mv);

  // The same grid gives the same answer every time.
  let again = find_mv_refs(&tb, &MvRefParams::default(), bo, BLOCK_8X8, LAST_FRAME as usize);
  assert_eq!(again, r);
}

#[test]
fn uniform_superblock_is_not_split_by_variance() {
  let enc = EncoderConfig {
    width: 64,
    height: 64,
    quantizer: 100,
    enable_dering: false,
    enable_restoration: false,
    ..EncoderConfig::with_speed_preset(7)
  };
  let mut encoder = Config::new().with_encoder_config(enc).new_encoder::<u8>().unwrap();
  let out = encoder.encode_frame(flat(64, 64, 60), &FrameParams::default()).unwrap();
  for y in 0..8 {
    for x in 0..8 {
      assert_eq!(out.blocks[y][x].bsize, BLOCK_64X64);
    }
  }
}

#[test]
fn skipped_bilateral_tile_is_unchanged() {
  let mut rng = StdRng::seed_from_u64(9);
  let mut frame = Frame::<u8>::new(128, 96);
  for p in frame.planes.iter_mut() {
    for v in p.data.iter_mut() {
      *v = rng.gen();
    }
  }
  let mut rs = RestorationState::new(128, 96);
  for rp in rs.planes.iter_mut() {
    rp.rtype = RestorationType::Bilateral;
    rp.units.fill(RestorationFilter::Bilateral { levels: [-1; BILATERAL_SUBTILES] });
  }
  let mut out = frame.clone();
  rs.lrf_filter_frame(&mut out, true, 8).unwrap();
  assert!(out == frame);
}

#[test]
fn invalid_reference_scale_is_fatal() {
  let enc = EncoderConfig { width: 64, height: 64, ..EncoderConfig::with_speed_preset(8) };
  let mut encoder = Config::new().with_encoder_config(enc).new_encoder::<u8>().unwrap();
  // More than twice as large as the frame it would predict.
  encoder.set_reference(LAST_FRAME, flat(256, 256, 128));
  let params = FrameParams { frame_type: FrameType::INTER, ..Default::default() };
  let err = encoder.encode_frame(flat(64, 64, 128), &params).unwrap_err();
  assert!(matches!(err, CodecError::UnsupportedBitstream(_)), "{}", err);
  // Nothing was coded, so the slot still holds the rejected frame.
  assert_eq!(encoder.references().get(LAST_FRAME).unwrap().frame.width(), 256);
}
