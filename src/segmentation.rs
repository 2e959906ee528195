// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_camel_case_types)]

use crate::error::CodecError;
use crate::partition::*;
use crate::quantize::MAXQ;

pub const MAX_SEGMENTS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd)]
#[repr(C)]
pub enum SegLvl {
  SEG_LVL_ALT_Q = 0,
  SEG_LVL_ALT_LF = 1,
  SEG_LVL_REF_FRAME = 2,
  SEG_LVL_SKIP = 3,
}

pub const SEG_LVL_MAX: usize = 4;

const SEG_FEATURE_DATA_MAX: [i16; SEG_LVL_MAX] = [MAXQ as i16, 63, 3, 0];

/// Per-segment feature overrides of one frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentationState {
  pub enabled: bool,
  pub update_map: bool,
  pub update_data: bool,
  /// Quantizer data replaces the base index instead of offsetting it.
  pub abs_delta: bool,
  pub features: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
  pub data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],
  pub last_active_segid: u8,
}

impl Default for SegmentationState {
  fn default() -> Self {
    SegmentationState {
      enabled: false,
      update_map: false,
      update_data: false,
      abs_delta: false,
      features: [[false; SEG_LVL_MAX]; MAX_SEGMENTS],
      data: [[0; SEG_LVL_MAX]; MAX_SEGMENTS],
      last_active_segid: 0,
    }
  }
}

impl SegmentationState {
  /// Enable `lvl` on segment `seg` with the given data, clamped to the
  /// feature range.
  pub fn set_feature(&mut self, seg: usize, lvl: SegLvl, data: i16) {
    let max = SEG_FEATURE_DATA_MAX[lvl as usize];
    let data = match lvl {
      SegLvl::SEG_LVL_REF_FRAME => data.clamp(0, max),
      _ => data.clamp(-max, max),
    };
    if data != 0 || lvl >= SegLvl::SEG_LVL_REF_FRAME {
      self.enabled = true;
    }
    self.features[seg][lvl as usize] = true;
    self.data[seg][lvl as usize] = data;
    self.update_last_active();
  }

  fn update_last_active(&mut self) {
    self.last_active_segid = self
      .features
      .iter()
      .rposition(|f| f.iter().any(|&on| on))
      .unwrap_or(0) as u8;
  }

  #[inline]
  pub fn feature_active(&self, seg: u8, lvl: SegLvl) -> bool {
    self.enabled && self.features[seg as usize][lvl as usize]
  }

  #[inline]
  pub fn feature_data(&self, seg: u8, lvl: SegLvl) -> i16 {
    self.data[seg as usize][lvl as usize]
  }

  /// Quantizer index of a segment.
  pub fn qindex(&self, seg: u8, base_qindex: u8) -> u8 {
    if self.feature_active(seg, SegLvl::SEG_LVL_ALT_Q) {
      let data = self.feature_data(seg, SegLvl::SEG_LVL_ALT_Q);
      let q = if self.abs_delta { data } else { base_qindex as i16 + data };
      q.clamp(0, MAXQ as i16) as u8
    } else {
      base_qindex
    }
  }

  /// The only reference a segment may use, if restricted.
  pub fn ref_frame(&self, seg: u8) -> Option<RefType> {
    self.feature_active(seg, SegLvl::SEG_LVL_REF_FRAME).then(|| {
      set_ref_frame(self.feature_data(seg, SegLvl::SEG_LVL_REF_FRAME) as usize)
        [0]
    })
  }

  /// Reject block shapes the segment features cannot describe.
  ///
  /// # Errors
  ///
  /// Returns `UnsupportedBitstream` for a skip segment on a block smaller
  /// than 8×8.
  pub fn check_block(
    &self, seg: u8, bsize: BlockSize,
  ) -> Result<(), CodecError> {
    if bsize.is_sub8x8() && self.feature_active(seg, SegLvl::SEG_LVL_SKIP) {
      log::error!("skip segment {} used on a {} block", seg, bsize);
      return Err(CodecError::UnsupportedBitstream(format!(
        "segment {seg} forces skip on a {bsize} block"
      )));
    }
    Ok(())
  }
}

/// Segment of a block: the smallest id in its footprint of `map`.
pub fn get_segment_id(
  map: &[u8], mi_cols: usize, mi_rows: usize, bsize: BlockSize,
  mi_row: usize, mi_col: usize,
) -> u8 {
  let xmis = bsize.width_mi().min(mi_cols - mi_col);
  let ymis = bsize.height_mi().min(mi_rows - mi_row);
  let mut segment_id = MAX_SEGMENTS as u8;
  for y in 0..ymis {
    let row = &map[(mi_row + y) * mi_cols + mi_col..][..xmis];
    segment_id = row.iter().fold(segment_id, |s, &v| s.min(v));
  }
  debug_assert!((segment_id as usize) < MAX_SEGMENTS);
  segment_id
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn quantizer_deltas_are_clamped() {
    let mut seg = SegmentationState::default();
    seg.set_feature(1, SegLvl::SEG_LVL_ALT_Q, -40);
    assert!(seg.enabled);
    assert_eq!(seg.qindex(0, 30), 30);
    assert_eq!(seg.qindex(1, 30), 0);
    assert_eq!(seg.qindex(1, 200), 160);
    seg.abs_delta = true;
    seg.set_feature(2, SegLvl::SEG_LVL_ALT_Q, 17);
    assert_eq!(seg.qindex(2, 200), 17);
    assert_eq!(seg.last_active_segid, 2);
  }

  #[test]
  fn skip_segment_rejects_small_blocks() {
    let mut seg = SegmentationState::default();
    seg.set_feature(3, SegLvl::SEG_LVL_SKIP, 0);
    assert!(seg.check_block(3, BLOCK_8X8).is_ok());
    assert!(seg.check_block(0, BLOCK_4X4).is_ok());
    assert!(matches!(
      seg.check_block(3, BLOCK_4X8),
      Err(CodecError::UnsupportedBitstream(_))
    ));
  }

  #[test]
  fn segment_id_is_footprint_minimum() {
    let mut map = vec![5u8; 4 * 4];
    map[2 * 4 + 3] = 1;
    assert_eq!(get_segment_id(&map, 4, 4, BLOCK_16X16, 2, 2), 1);
    assert_eq!(get_segment_id(&map, 4, 4, BLOCK_16X16, 0, 0), 5);
    // Clipped at the frame edge.
    assert_eq!(get_segment_id(&map, 4, 4, BLOCK_64X64, 0, 0), 1);
  }

  #[test]
  fn reference_restriction() {
    let mut seg = SegmentationState::default();
    assert_eq!(seg.ref_frame(0), None);
    seg.set_feature(0, SegLvl::SEG_LVL_REF_FRAME, 2);
    assert_eq!(seg.ref_frame(0), Some(GOLDEN_FRAME));
  }
}
