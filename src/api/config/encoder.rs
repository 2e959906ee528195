// Copyright (c) 2020-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use itertools::*;

use crate::api::SpeedSettings;
use crate::encoder::reference::ReferenceMode;
use crate::mc::InterpFilter;
use crate::segmentation::SegmentationState;

use std::fmt;

/// Encoder settings which impact the produced bitstream.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
  // output size
  /// Width of the frames in pixels.
  pub width: usize,
  /// Height of the frames in pixels.
  pub height: usize,

  /// Bit depth.
  pub bit_depth: usize,

  /// The base quantizer index, 0 to 255. Index 0 with no segment offsets
  /// codes losslessly.
  pub quantizer: usize,

  /// Code motion vectors in 1/8 pixel when they are small enough.
  pub allow_high_precision_mv: bool,
  /// Interpolation kernel of every inter frame, or `SWITCHABLE` to choose
  /// it per block.
  pub interp_filter: InterpFilter,
  /// Whether inter blocks predict from one or two references.
  pub reference_mode: ReferenceMode,

  /// `log2` of the number of tile columns.
  pub tile_cols_log2: usize,
  /// `log2` of the number of tile rows.
  pub tile_rows_log2: usize,

  /// Flag to force all frames to be error resilient, which disables
  /// temporal motion vector candidates.
  pub error_resilient: bool,

  /// Segment features. The per-frame segment map comes with each frame.
  pub segmentation: SegmentationState,

  /// Run the in-loop restoration search and filter.
  pub enable_restoration: bool,
  /// Run the deringing search and filter.
  pub enable_dering: bool,

  /// Settings which affect the encoding speed vs. quality trade-off.
  pub speed_settings: SpeedSettings,
}

/// Default preset for EncoderConfig: it is a balance between quality and
/// speed. See [`with_speed_preset()`].
///
/// [`with_speed_preset()`]: struct.EncoderConfig.html#method.with_speed_preset
impl Default for EncoderConfig {
  fn default() -> Self {
    const DEFAULT_SPEED: usize = 4;
    Self::with_speed_preset(DEFAULT_SPEED)
  }
}

impl EncoderConfig {
  /// This is a preset which provides default settings according to a speed
  /// value in the specific range 0..=10. Each speed value corresponds to a
  /// different preset. See [`from_preset()`]. If the input value is greater
  /// than 10, it will result in the same settings as 10.
  ///
  /// [`from_preset()`]: struct.SpeedSettings.html#method.from_preset
  pub fn with_speed_preset(speed: usize) -> Self {
    EncoderConfig {
      width: 640,
      height: 480,
      bit_depth: 8,
      quantizer: 100,
      allow_high_precision_mv: true,
      interp_filter: InterpFilter::SWITCHABLE,
      reference_mode: ReferenceMode::SINGLE,
      tile_cols_log2: 0,
      tile_rows_log2: 0,
      error_resilient: false,
      segmentation: SegmentationState::default(),
      enable_restoration: true,
      enable_dering: true,
      speed_settings: SpeedSettings::from_preset(speed),
    }
  }

  /// Base quantizer index as coded in the frame header.
  #[inline]
  pub fn base_q_idx(&self) -> u8 {
    self.quantizer.min(u8::MAX as usize) as u8
  }
}

impl fmt::Display for EncoderConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    let ss = &self.speed_settings;
    let pairs = [
      ("size", format!("{}x{}", self.width, self.height)),
      ("bit_depth", self.bit_depth.to_string()),
      ("quantizer", self.quantizer.to_string()),
      ("interp_filter", self.interp_filter.to_string()),
      ("reference_mode", self.reference_mode.to_string()),
      ("tile_cols_log2", self.tile_cols_log2.to_string()),
      ("tile_rows_log2", self.tile_rows_log2.to_string()),
      ("error_resilient", self.error_resilient.to_string()),
      ("partition_search", ss.partition_search_type.to_string()),
      ("rectangular_check", ss.less_rectangular_check.to_string()),
      ("min_block_size", ss.min_partition_size.to_string()),
      ("max_block_size", ss.max_partition_size.to_string()),
      ("motion_search_range", ss.motion_search_range.to_string()),
      ("subpel", ss.use_subpel_search.to_string()),
      ("dering", (self.enable_dering && ss.dering_search).to_string()),
      (
        "restoration",
        (self.enable_restoration && ss.restoration_search.any()).to_string(),
      ),
    ];
    write!(
      f,
      "{}",
      pairs.iter().map(|pair| format!("{}={}", pair.0, pair.1)).join(" ")
    )
  }
}
