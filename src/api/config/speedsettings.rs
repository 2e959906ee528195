// Copyright (c) 2020-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use arg_enum_proc_macro::ArgEnum;

use crate::partition::BlockSize;

use std::fmt;

/// How the partitioning of a superblock is decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionSearchType {
  /// Recursive rate-distortion search over every allowed partition.
  Search,
  /// Tile the superblock with blocks of one size.
  FixedPartition(BlockSize),
  /// Split by source variance, without rate-distortion search.
  VarBased,
}

impl fmt::Display for PartitionSearchType {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    match self {
      PartitionSearchType::Search => write!(f, "Search"),
      PartitionSearchType::FixedPartition(bsize) => {
        write!(f, "Fixed({}x{})", bsize.width(), bsize.height())
      }
      PartitionSearchType::VarBased => write!(f, "VarBased"),
    }
  }
}

/// Amount of rectangular partition testing.
#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub enum RectangularCheck {
  /// Test HORZ and VERT at every size.
  Full,
  /// Skip HORZ and VERT when NONE beat SPLIT.
  Reduced,
  /// Also skip them when NONE can be coded without residual.
  Minimal,
}

/// Restoration types the frame-level search considers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestorationSearch {
  pub bilateral: bool,
  pub wiener: bool,
  pub sgrproj: bool,
  pub domaintxfmrf: bool,
  pub switchable: bool,
}

impl RestorationSearch {
  pub const ALL: Self = RestorationSearch {
    bilateral: true,
    wiener: true,
    sgrproj: true,
    domaintxfmrf: true,
    switchable: true,
  };

  pub const fn any(&self) -> bool {
    self.bilateral || self.wiener || self.sgrproj || self.domaintxfmrf
  }
}

/// Contains the speed settings.
#[derive(Clone, Copy, Debug)]
pub struct SpeedSettings {
  /// How superblocks are partitioned.
  pub partition_search_type: PartitionSearchType,

  /// Rectangular partitions skipped by the recursive search.
  ///
  /// Less checking is faster.
  pub less_rectangular_check: RectangularCheck,

  /// Distortion below which a skippable NONE ends the search of a block,
  /// per 64 pixels. Zero disables the early exit.
  pub partition_breakout_dist_thr: u64,

  /// Rate in bits below which a skippable NONE ends the search of a block,
  /// per 64 pixels.
  pub partition_breakout_rate_thr: u32,

  /// Never test HORZ or VERT.
  ///
  /// Enabled is faster.
  pub use_square_partition_only: bool,

  /// Derive the searched size range from the neighbouring blocks.
  ///
  /// Enabled is faster.
  pub auto_min_max_partition_size: bool,

  /// Smallest block the search tries when the range is not derived.
  pub min_partition_size: BlockSize,

  /// Largest block the search tries when the range is not derived.
  pub max_partition_size: BlockSize,

  /// Refine the previous frame's partitioning instead of searching.
  ///
  /// Enabled is faster.
  pub adjust_partitioning_from_last_frame: bool,

  /// Search only DC, V, H and TM intra prediction.
  ///
  /// Enabled is faster.
  pub reduced_intra_modes: bool,

  /// Try only DCT and the transform type implied by the intra mode.
  ///
  /// Enabled is faster.
  pub reduced_tx_type_search: bool,

  /// Use the diamond pattern instead of the hexagon in full-pel search.
  pub diamond_search: bool,

  /// Full-pel search radius in pixels.
  ///
  /// Higher is slower.
  pub motion_search_range: isize,

  /// Refine motion vectors to sub-pixel precision.
  ///
  /// Enabled is slower.
  pub use_subpel_search: bool,

  /// Choose the interpolation kernel per block when the frame allows it.
  ///
  /// Enabled is slower.
  pub search_interp_filters: bool,

  /// Try wedge and difference-weighted blends of compound predictions
  /// besides averaging.
  ///
  /// Enabled is slower.
  pub search_compound_masks: bool,

  /// Restoration types searched after the frame is coded.
  pub restoration_search: RestorationSearch,

  /// Search the deringing levels of the frame and its superblocks.
  pub dering_search: bool,

  /// Left shift of the 16×16 split threshold of the variance based
  /// partitioning on inter frames.
  pub var_partition_shift: u8,
}

impl Default for SpeedSettings {
  /// The default settings are equivalent to speed 0
  fn default() -> Self {
    SpeedSettings {
      partition_search_type: PartitionSearchType::Search,
      less_rectangular_check: RectangularCheck::Full,
      partition_breakout_dist_thr: 0,
      partition_breakout_rate_thr: 0,
      use_square_partition_only: false,
      auto_min_max_partition_size: false,
      min_partition_size: BlockSize::BLOCK_4X4,
      max_partition_size: BlockSize::BLOCK_64X64,
      adjust_partitioning_from_last_frame: false,
      reduced_intra_modes: false,
      reduced_tx_type_search: false,
      diamond_search: false,
      motion_search_range: 64,
      use_subpel_search: true,
      search_interp_filters: true,
      search_compound_masks: true,
      restoration_search: RestorationSearch::ALL,
      dering_search: true,
      var_partition_shift: 0,
    }
  }
}

impl SpeedSettings {
  /// Set the speed setting according to a numeric speed preset.
  ///
  /// Presets above 10 are treated as 10.
  pub fn from_preset(speed: usize) -> Self {
    // The default settings are equivalent to speed 0
    let mut settings = SpeedSettings::default();

    if speed >= 1 {
      settings.less_rectangular_check = RectangularCheck::Reduced;
      settings.partition_breakout_dist_thr = 1 << 8;
      settings.partition_breakout_rate_thr = 80;
    }

    if speed >= 2 {
      settings.auto_min_max_partition_size = true;
      settings.reduced_tx_type_search = true;
    }

    if speed >= 3 {
      settings.less_rectangular_check = RectangularCheck::Minimal;
      settings.search_interp_filters = false;
      settings.restoration_search.domaintxfmrf = false;
    }

    if speed >= 4 {
      settings.use_square_partition_only = true;
      settings.motion_search_range = 32;
      settings.restoration_search.sgrproj = false;
    }

    if speed >= 5 {
      settings.adjust_partitioning_from_last_frame = true;
      settings.reduced_intra_modes = true;
      settings.partition_breakout_dist_thr = 1 << 10;
    }

    if speed >= 6 {
      settings.diamond_search = true;
      settings.search_compound_masks = false;
      settings.min_partition_size = BlockSize::BLOCK_8X8;
    }

    if speed >= 7 {
      settings.partition_search_type = PartitionSearchType::VarBased;
      settings.var_partition_shift = speed.min(10) as u8;
      settings.restoration_search.wiener = false;
      settings.restoration_search.switchable = false;
    }

    if speed >= 8 {
      settings.use_subpel_search = false;
      settings.motion_search_range = 16;
    }

    if speed >= 9 {
      settings.restoration_search.bilateral = false;
      settings.dering_search = false;
    }

    if speed >= 10 {
      settings.partition_search_type =
        PartitionSearchType::FixedPartition(BlockSize::BLOCK_16X16);
    }

    settings
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn presets_only_get_faster() {
    let slow = SpeedSettings::from_preset(0);
    let fast = SpeedSettings::from_preset(10);
    assert_eq!(slow.partition_search_type, PartitionSearchType::Search);
    assert_eq!(
      fast.partition_search_type,
      PartitionSearchType::FixedPartition(BlockSize::BLOCK_16X16)
    );
    assert!(slow.restoration_search.any());
    assert!(!fast.restoration_search.any());
    for speed in 0..10 {
      let a = SpeedSettings::from_preset(speed);
      let b = SpeedSettings::from_preset(speed + 1);
      assert!(a.less_rectangular_check <= b.less_rectangular_check);
      assert!(a.motion_search_range >= b.motion_search_range);
    }
  }
}
