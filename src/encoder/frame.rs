// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::sync::Arc;

use crate::api::EncoderConfig;
use crate::context::*;
use crate::encoder::reference::*;
use crate::entropymode::{FrameContext, ModeCosts};
use crate::error::CodecError;
use crate::frame::*;
use crate::mc::{InterpFilter, InterpolationStrategy};
use crate::mvref::MvRefParams;
use crate::partition::*;
use crate::scale::ScaleFactors;
use crate::segmentation::{SegmentationState, MAX_SEGMENTS};
use crate::tiling::TilingInfo;
use crate::util::*;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameType {
  #[default]
  KEY,
  INTER,
  INTRA_ONLY,
}

/// Per-frame choices supplied by the caller of the frame driver.
#[derive(Debug, Clone, Default)]
pub struct FrameParams {
  pub frame_type: FrameType,
  /// Hidden frames are coded but never displayed.
  pub hidden: bool,
  /// Segment id of every 8×8 unit in raster order, when segmentation is
  /// enabled. Missing maps carry the previous one forward.
  pub segment_map: Option<Vec<u8>>,
  pub ref_frame_sign_bias: [bool; TOTAL_REFS_PER_FRAME],
}

/// Everything that stays constant while the blocks of one frame are coded.
#[derive(Clone)]
pub struct FrameInvariants<T: Pixel> {
  pub config: Arc<EncoderConfig>,
  /// Luma dimensions rounded up to whole 8×8 units.
  pub width: usize,
  pub height: usize,
  pub mi_cols: usize,
  pub mi_rows: usize,
  pub sb_cols: usize,
  pub sb_rows: usize,
  pub bit_depth: usize,
  pub frame_type: FrameType,
  pub intra_only: bool,
  pub show_frame: bool,
  pub base_q_idx: u8,
  /// Every segment codes at quantizer index 0.
  pub lossless: bool,
  pub allow_high_precision_mv: bool,
  pub interp_filter: InterpFilter,
  pub reference_mode: ReferenceMode,
  pub ref_frame_sign_bias: [bool; TOTAL_REFS_PER_FRAME],
  pub error_resilient: bool,
  pub use_prev_frame_mvs: bool,
  pub refresh_frame_flags: u8,
  pub segment_map: Vec<u8>,
  pub refs: [Option<Arc<ReferenceFrame<T>>>; INTER_REFS_PER_FRAME],
  pub ref_scale: [ScaleFactors; INTER_REFS_PER_FRAME],
  pub prev_frame_mvs: Option<Arc<FrameMvs>>,
  /// Decisions of the previous frame, for partition reuse.
  pub prev_blocks: Option<Arc<FrameBlocks>>,
  /// Probabilities the frame is coded with.
  pub fc: FrameContext,
  pub costs: ModeCosts,
  pub tiling: TilingInfo,
  pub kernels: Arc<dyn InterpolationStrategy>,
}

impl<T: Pixel> FrameInvariants<T> {
  fn new(
    config: Arc<EncoderConfig>, fc: FrameContext,
    kernels: Arc<dyn InterpolationStrategy>, segment_map: Vec<u8>,
  ) -> Self {
    let width = config.width.align_power_of_two(MI_SIZE_LOG2);
    let height = config.height.align_power_of_two(MI_SIZE_LOG2);
    let seg = &config.segmentation;
    let lossless = (0..MAX_SEGMENTS as u8)
      .all(|s| seg.qindex(s, config.base_q_idx()) == 0);
    let tiling = TilingInfo::new(
      width,
      height,
      config.tile_cols_log2,
      config.tile_rows_log2,
    );
    let costs = ModeCosts::new(&fc);

    FrameInvariants {
      width,
      height,
      mi_cols: width >> MI_SIZE_LOG2,
      mi_rows: height >> MI_SIZE_LOG2,
      sb_cols: width.align_power_of_two_and_shift(SB_SIZE_LOG2),
      sb_rows: height.align_power_of_two_and_shift(SB_SIZE_LOG2),
      bit_depth: config.bit_depth,
      frame_type: FrameType::KEY,
      intra_only: true,
      show_frame: true,
      base_q_idx: config.base_q_idx(),
      lossless,
      allow_high_precision_mv: config.allow_high_precision_mv,
      interp_filter: config.interp_filter,
      reference_mode: ReferenceMode::SINGLE,
      ref_frame_sign_bias: [false; TOTAL_REFS_PER_FRAME],
      error_resilient: config.error_resilient,
      use_prev_frame_mvs: false,
      refresh_frame_flags: ALL_REF_FRAMES_MASK,
      segment_map,
      refs: [None, None, None],
      ref_scale: [ScaleFactors::default(); INTER_REFS_PER_FRAME],
      prev_frame_mvs: None,
      prev_blocks: None,
      fc,
      costs,
      tiling,
      kernels,
      config,
    }
  }

  /// A frame coded without references. Key frames refresh every slot;
  /// intra-only frames refresh LAST.
  pub fn new_key_frame(
    config: Arc<EncoderConfig>, fc: FrameContext,
    kernels: Arc<dyn InterpolationStrategy>, params: &FrameParams,
    segment_map: Vec<u8>,
  ) -> Self {
    let mut fi = Self::new(config, fc, kernels, segment_map);
    fi.frame_type = params.frame_type;
    fi.show_frame = !params.hidden;
    if params.frame_type == FrameType::INTRA_ONLY {
      fi.refresh_frame_flags = LAST_FRAME_MASK;
    }
    fi
  }

  /// A frame predicted from the slots of `refs`.
  ///
  /// # Errors
  ///
  /// Returns `UnsupportedBitstream` when a reference cannot be scaled to
  /// the frame size, or when no reference is available at all.
  pub fn new_inter_frame(
    config: Arc<EncoderConfig>, fc: FrameContext,
    kernels: Arc<dyn InterpolationStrategy>, params: &FrameParams,
    segment_map: Vec<u8>, refs: &ReferenceFramesSet<T>,
    prev: Option<&ReferenceFrame<T>>,
  ) -> Result<Self, CodecError> {
    let mut fi = Self::new(config, fc, kernels, segment_map);
    fi.frame_type = FrameType::INTER;
    fi.intra_only = false;
    fi.show_frame = !params.hidden;
    fi.refresh_frame_flags = LAST_FRAME_MASK;
    fi.reference_mode = fi.config.reference_mode;
    fi.ref_frame_sign_bias = params.ref_frame_sign_bias;

    for (i, slot) in refs.frames.iter().enumerate() {
      if let Some(r) = slot {
        // Checked before any predictor is built from the reference.
        fi.ref_scale[i] = ScaleFactors::new(
          r.frame.width(),
          r.frame.height(),
          fi.width,
          fi.height,
        )?;
        fi.refs[i] = Some(Arc::clone(r));
      }
    }
    if fi.refs.iter().all(Option::is_none) {
      log::error!("inter frame coded without any reference");
      return Err(CodecError::UnsupportedBitstream(
        "inter frame without reference frames".to_string(),
      ));
    }
    // Compound prediction needs ALTREF and one of the other slots.
    if fi.refs[ALTREF_FRAME.to_index()].is_none()
      || (fi.refs[LAST_FRAME.to_index()].is_none()
        && fi.refs[GOLDEN_FRAME.to_index()].is_none())
    {
      fi.reference_mode = ReferenceMode::SINGLE;
    }

    if let Some(prev) = prev {
      fi.use_prev_frame_mvs = !fi.error_resilient
        && prev.frame.width() == fi.width
        && prev.frame.height() == fi.height
        && !prev.intra_only
        && prev.show_frame;
      if fi.use_prev_frame_mvs {
        fi.prev_frame_mvs = Some(Arc::clone(&prev.frame_mvs));
      }
    }
    Ok(fi)
  }

  #[inline]
  pub fn is_intra(&self) -> bool {
    self.frame_type != FrameType::INTER
  }

  #[inline]
  pub fn reference(&self, rf: RefType) -> Option<&ReferenceFrame<T>> {
    self.refs[rf.to_index()].as_deref()
  }

  /// Single references usable by blocks of segment `segment_id`.
  pub fn available_refs(
    &self, segmentation: &SegmentationState, segment_id: u8,
  ) -> impl Iterator<Item = RefType> + '_ {
    let restricted = segmentation.ref_frame(segment_id);
    ALL_INTER_REFS.into_iter().filter(move |&rf| {
      self.refs[rf.to_index()].is_some()
        && restricted.map_or(true, |only| only == rf)
    })
  }

  pub fn mv_ref_params(&self) -> MvRefParams<'_> {
    MvRefParams {
      prev_frame_mvs: if self.use_prev_frame_mvs {
        self.prev_frame_mvs.as_deref()
      } else {
        None
      },
      allow_high_precision_mv: self.allow_high_precision_mv,
      ref_frame_sign_bias: self.ref_frame_sign_bias,
    }
  }

  #[inline]
  pub fn segment_id(&self, bsize: BlockSize, bo: BlockOffset) -> u8 {
    crate::segmentation::get_segment_id(
      &self.segment_map,
      self.mi_cols,
      self.mi_rows,
      bsize,
      bo.y,
      bo.x,
    )
  }
}

/// Frame buffers written while a frame is coded.
#[derive(Debug, Clone)]
pub struct FrameState<T: Pixel> {
  pub input: Frame<T>,
  pub rec: Frame<T>,
  pub segmentation: SegmentationState,
}

impl<T: Pixel> FrameState<T> {
  /// # Panics
  ///
  /// Panics if the reconstruction buffer cannot be allocated.
  pub fn new(input: Frame<T>, segmentation: SegmentationState) -> Self {
    let rec = Frame::new(input.width(), input.height());
    FrameState { input, rec, segmentation }
  }

  /// # Errors
  ///
  /// Returns `ResourceExhausted` if the reconstruction buffer cannot be
  /// allocated.
  pub fn try_new(
    input: Frame<T>, segmentation: SegmentationState,
  ) -> Result<Self, CodecError> {
    let rec = Frame::try_new(input.width(), input.height())?;
    Ok(FrameState { input, rec, segmentation })
  }
}
