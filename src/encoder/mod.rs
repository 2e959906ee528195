// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! The frame driver.
//!
//! A frame is coded tile column by tile column on the worker pool. Once
//! every tile is done, the deringing and restoration passes run over the
//! whole reconstruction, which then becomes a reference for later frames.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::api::EncoderConfig;
use crate::context::*;
use crate::dering::dering_frame;
use crate::entropymode::{FrameContext, FrameCounts};
use crate::error::CodecError;
use crate::frame::*;
use crate::lrf::RestorationState;
use crate::mc::{Av1Kernels, InterpolationStrategy};
use crate::partition::RefType;
use crate::util::*;

pub use self::frame::*;
pub use self::reference::*;
pub use self::tile::*;

pub mod block;
pub mod dering;
pub mod frame;
pub mod motion_comp;
pub mod partition;
pub mod reference;
pub mod restoration;
pub mod segmentation;
pub mod tile;
pub mod transform;
pub mod var_partition;

/// What the driver reports about a coded frame.
#[derive(Debug, Clone)]
pub struct EncodedFrame<T: Pixel> {
  pub frame_type: FrameType,
  /// The filtered reconstruction, as stored in the reference slots.
  pub reference: Arc<ReferenceFrame<T>>,
  /// Mode info committed for every 8×8 unit.
  pub blocks: Arc<FrameBlocks>,
  /// Estimated size of the coded tiles in bits.
  pub bits: u64,
  /// Frame deringing level; zero when the filter is off.
  pub dering_level: usize,
  pub restoration: RestorationState,
}

/// Codes a sequence of frames, keeping the reference slots, the probability
/// context and the previous frame's decisions between them.
pub struct Encoder<T: Pixel> {
  config: Arc<EncoderConfig>,
  pool: Option<Arc<ThreadPool>>,
  kernels: Arc<dyn InterpolationStrategy>,
  fc: FrameContext,
  refs: ReferenceFramesSet<T>,
  prev: Option<Arc<ReferenceFrame<T>>>,
  prev_blocks: Option<Arc<FrameBlocks>>,
  prev_segment_map: Option<Vec<u8>>,
  frames: u64,
}

impl<T: Pixel> Encoder<T> {
  /// Tiles run on `pool`, or on the global rayon pool when it is `None`.
  pub fn new(config: Arc<EncoderConfig>, pool: Option<Arc<ThreadPool>>) -> Self {
    Encoder {
      config,
      pool,
      kernels: Arc::new(Av1Kernels),
      fc: FrameContext::default(),
      refs: ReferenceFramesSet::new(),
      prev: None,
      prev_blocks: None,
      prev_segment_map: None,
      frames: 0,
    }
  }

  /// Replaces the interpolation kernels used by motion compensation.
  pub fn with_interpolation(
    mut self, kernels: Arc<dyn InterpolationStrategy>,
  ) -> Self {
    self.kernels = kernels;
    self
  }

  pub fn config(&self) -> &EncoderConfig {
    &self.config
  }

  pub fn references(&self) -> &ReferenceFramesSet<T> {
    &self.refs
  }

  /// Stores an externally coded frame in slot `rf`. The frame carries no
  /// motion for temporal candidates.
  pub fn set_reference(&mut self, rf: RefType, frame: Frame<T>) {
    self.refs.frames[rf.to_index()] =
      Some(Arc::new(ReferenceFrame::from_frame(frame)));
  }

  /// Codes one frame and updates the reference slots.
  ///
  /// # Errors
  ///
  /// - Returns `UnsupportedBitstream` if the frame size does not match the
  ///   configuration, a reference cannot be scaled, or the segment map is
  ///   malformed.
  /// - Returns `NoViablePartition` if a superblock cannot be coded.
  /// - Returns `ResourceExhausted` if a frame buffer cannot be allocated.
  #[profiling::function]
  pub fn encode_frame(
    &mut self, input: Frame<T>, params: &FrameParams,
  ) -> Result<EncodedFrame<T>, CodecError> {
    let fi = self.frame_invariants(params)?;
    if input.width() != fi.width || input.height() != fi.height {
      log::error!(
        "frame of {}x{} sent to a {}x{} encoder",
        input.width(),
        input.height(),
        fi.width,
        fi.height
      );
      return Err(CodecError::UnsupportedBitstream(format!(
        "frame size {}x{} does not match {}x{}",
        input.width(),
        input.height(),
        fi.width,
        fi.height
      )));
    }
    log::debug!(
      "frame {}: {:?} q {} tiles {}x{}",
      self.frames,
      fi.frame_type,
      fi.base_q_idx,
      fi.tiling.cols,
      fi.tiling.rows
    );

    let mut fs = FrameState::try_new(input, self.config.segmentation.clone())?;
    let mut blocks = FrameBlocks::new(fi.mi_cols, fi.mi_rows);
    let (counts, bits) = self.encode_tiles(&fi, &mut fs, &mut blocks)?;

    let frame_mvs = Arc::new(FrameMvs::from_blocks(&blocks));
    let keyframe = fi.is_intra();
    let bit_depth = fi.bit_depth;

    let dering_level =
      if self.config.enable_dering && self.config.speed_settings.dering_search {
        let level = dering::dering_search(&fs.rec, &fs.input, &mut blocks, bit_depth)?;
        dering_frame(&mut fs.rec, &blocks, level, bit_depth)?;
        level
      } else {
        0
      };

    let search = &self.config.speed_settings.restoration_search;
    let restoration = if self.config.enable_restoration && search.any() {
      let rs = restoration::pick_filter_restoration(
        &fs.rec,
        &fs.input,
        keyframe,
        bit_depth,
        fi.base_q_idx,
        search,
      )?;
      rs.lrf_filter_frame(&mut fs.rec, keyframe, bit_depth)?;
      rs
    } else {
      RestorationState::new(fi.width, fi.height)
    };

    if !fi.error_resilient {
      let mut fc = fi.fc.clone();
      fc.adapt(
        &fi.fc,
        &counts,
        fi.intra_only,
        fi.interp_filter,
        fi.allow_high_precision_mv,
      );
      self.fc = fc;
    }

    let reference = Arc::new(ReferenceFrame {
      frame: fs.rec,
      frame_mvs,
      intra_only: fi.intra_only,
      show_frame: fi.show_frame,
    });
    self.refs.refresh(&reference, fi.refresh_frame_flags);
    let blocks = Arc::new(blocks);
    self.prev = Some(Arc::clone(&reference));
    self.prev_blocks = Some(Arc::clone(&blocks));
    self.prev_segment_map = Some(fi.segment_map);

    log::debug!(
      "frame {} done: {} bits, dering level {}, restoration {:?}",
      self.frames,
      bits,
      dering_level,
      restoration.planes.iter().map(|p| p.rtype).collect::<Vec<_>>()
    );
    self.frames += 1;

    Ok(EncodedFrame {
      frame_type: fi.frame_type,
      reference,
      blocks,
      bits,
      dering_level,
      restoration,
    })
  }

  fn frame_invariants(
    &mut self, params: &FrameParams,
  ) -> Result<FrameInvariants<T>, CodecError> {
    let config = Arc::clone(&self.config);
    let mi_cols = config.width.align_power_of_two_and_shift(MI_SIZE_LOG2);
    let mi_rows = config.height.align_power_of_two_and_shift(MI_SIZE_LOG2);
    let segment_map = segmentation::segment_map_for_frame(
      &config.segmentation,
      params.segment_map.clone(),
      self.prev_segment_map.as_deref(),
      mi_cols,
      mi_rows,
    )?;

    let kernels = Arc::clone(&self.kernels);
    let mut fi = match params.frame_type {
      FrameType::KEY | FrameType::INTRA_ONLY => {
        if params.frame_type == FrameType::KEY || config.error_resilient {
          self.fc = FrameContext::default();
        }
        FrameInvariants::new_key_frame(
          config,
          self.fc.clone(),
          kernels,
          params,
          segment_map,
        )
      }
      FrameType::INTER => FrameInvariants::new_inter_frame(
        config,
        self.fc.clone(),
        kernels,
        params,
        segment_map,
        &self.refs,
        self.prev.as_deref(),
      )?,
    };
    if fi.frame_type == FrameType::INTER {
      fi.prev_blocks = self
        .prev_blocks
        .as_ref()
        .filter(|b| b.cols == fi.mi_cols && b.rows == fi.mi_rows)
        .cloned();
    }
    Ok(fi)
  }

  /// Runs every tile column of the frame and merges their statistics.
  fn encode_tiles(
    &self, fi: &FrameInvariants<T>, fs: &mut FrameState<T>,
    blocks: &mut FrameBlocks,
  ) -> Result<(FrameCounts, u64), CodecError> {
    let tiles = fi.tiling.tile_iter_mut(fs, blocks).collect::<Vec<_>>();
    let run = move || {
      tiles
        .into_par_iter()
        .map(|ctx| encode_tile(fi, ctx))
        .collect::<Result<Vec<_>, _>>()
    };
    let summaries = match &self.pool {
      Some(pool) => pool.install(run),
      None => run(),
    }?;

    let mut counts = FrameCounts::default();
    let mut bits = 0;
    for s in summaries.iter() {
      counts.accumulate(&s.counts);
      bits += s.bits;
    }
    Ok((counts, bits))
  }
}

#[cfg(test)]
pub(crate) mod test_util {
  use super::*;
  use crate::segmentation::SegmentationState;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  pub(crate) fn config(
    width: usize, height: usize, bit_depth: usize, quantizer: usize,
  ) -> EncoderConfig {
    EncoderConfig {
      width,
      height,
      bit_depth,
      quantizer,
      ..EncoderConfig::with_speed_preset(0)
    }
  }

  fn blank_segment_map(width: usize, height: usize) -> Vec<u8> {
    let mi_cols = width.align_power_of_two_and_shift(MI_SIZE_LOG2);
    let mi_rows = height.align_power_of_two_and_shift(MI_SIZE_LOG2);
    vec![0; mi_cols * mi_rows]
  }

  pub(crate) fn key_frame<T: Pixel>(
    width: usize, height: usize, quantizer: usize,
  ) -> FrameInvariants<T> {
    let bit_depth = if std::mem::size_of::<T>() == 1 { 8 } else { 10 };
    FrameInvariants::new_key_frame(
      Arc::new(config(width, height, bit_depth, quantizer)),
      FrameContext::default(),
      Arc::new(Av1Kernels),
      &FrameParams::default(),
      blank_segment_map(width, height),
    )
  }

  fn filled<T: Pixel>(
    fi: &FrameInvariants<T>, mut f: impl FnMut() -> u16,
  ) -> Frame<T> {
    let mut frame = Frame::new(fi.width, fi.height);
    for p in frame.planes.iter_mut() {
      for v in p.data.iter_mut() {
        *v = T::cast_from(f());
      }
    }
    frame
  }

  pub(crate) fn noise_frame_state<T: Pixel>(
    fi: &FrameInvariants<T>, seed: u64,
  ) -> FrameState<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max = 1u16 << fi.bit_depth;
    let input = filled(fi, || rng.gen_range(0..max));
    FrameState::new(input, SegmentationState::default())
  }

  pub(crate) fn flat_frame_state<T: Pixel>(
    fi: &FrameInvariants<T>, value: u16,
  ) -> FrameState<T> {
    FrameState::new(filled(fi, || value), SegmentationState::default())
  }

  /// An inter frame whose LAST reference and source are both flat at
  /// `value`.
  pub(crate) fn inter_frame_from_flat<T: Pixel>(
    width: usize, height: usize, quantizer: usize, value: u16,
  ) -> (FrameInvariants<T>, FrameState<T>) {
    let key = key_frame::<T>(width, height, quantizer);
    let mut refs = ReferenceFramesSet::new();
    let reference =
      Arc::new(ReferenceFrame::from_frame(filled(&key, || value)));
    refs.refresh(&reference, LAST_FRAME_MASK);
    let params = FrameParams { frame_type: FrameType::INTER, ..Default::default() };
    let fi = FrameInvariants::new_inter_frame(
      Arc::clone(&key.config),
      FrameContext::default(),
      Arc::new(Av1Kernels),
      &params,
      blank_segment_map(width, height),
      &refs,
      None,
    )
    .unwrap();
    let fs = flat_frame_state(&fi, value);
    (fi, fs)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::Config;
  use crate::partition::*;
  use pretty_assertions::assert_eq;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn encoder(width: usize, height: usize, speed: usize) -> Encoder<u8> {
    let enc = EncoderConfig {
      width,
      height,
      quantizer: 120,
      ..EncoderConfig::with_speed_preset(speed)
    };
    Config::new().with_encoder_config(enc).new_encoder().unwrap()
  }

  fn noise(width: usize, height: usize, seed: u64) -> Frame<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut f = Frame::new(width, height);
    for p in f.planes.iter_mut() {
      for v in p.data.iter_mut() {
        *v = rng.gen_range(64..192);
      }
    }
    f
  }

  #[test]
  fn key_frame_refreshes_every_slot() {
    let mut enc = encoder(64, 64, 6);
    let out = enc.encode_frame(noise(64, 64, 1), &FrameParams::default()).unwrap();
    assert_eq!(out.frame_type, FrameType::KEY);
    for rf in ALL_INTER_REFS {
      assert!(Arc::ptr_eq(enc.references().get(rf).unwrap(), &out.reference));
    }
    assert!(out.bits > 0);

    let params = FrameParams { frame_type: FrameType::INTER, ..Default::default() };
    let inter = enc.encode_frame(noise(64, 64, 2), &params).unwrap();
    assert!(Arc::ptr_eq(enc.references().get(LAST_FRAME).unwrap(), &inter.reference));
    assert!(Arc::ptr_eq(
      enc.references().get(GOLDEN_FRAME).unwrap(),
      &out.reference
    ));
  }

  #[test]
  fn inter_frame_needs_a_reference() {
    let mut enc = encoder(64, 64, 6);
    let params = FrameParams { frame_type: FrameType::INTER, ..Default::default() };
    assert!(matches!(
      enc.encode_frame(noise(64, 64, 1), &params),
      Err(CodecError::UnsupportedBitstream(_))
    ));
  }

  #[test]
  fn mismatched_frame_size_is_rejected() {
    let mut enc = encoder(64, 64, 6);
    assert!(matches!(
      enc.encode_frame(noise(32, 64, 1), &FrameParams::default()),
      Err(CodecError::UnsupportedBitstream(_))
    ));
  }
}
