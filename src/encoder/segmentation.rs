// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::error::CodecError;
use crate::segmentation::{SegmentationState, MAX_SEGMENTS};

/// Segment map of the next frame.
///
/// A supplied map must cover every 8×8 unit and only name existing
/// segments. Without one, the previous map is carried over when it has the
/// same shape; otherwise every unit is in segment 0.
pub fn segment_map_for_frame(
  segmentation: &SegmentationState, provided: Option<Vec<u8>>,
  prev: Option<&[u8]>, mi_cols: usize, mi_rows: usize,
) -> Result<Vec<u8>, CodecError> {
  let len = mi_cols * mi_rows;
  if !segmentation.enabled {
    return Ok(vec![0; len]);
  }
  match provided {
    Some(map) => {
      if map.len() != len {
        log::error!(
          "segment map has {} entries, the frame has {} units",
          map.len(),
          len
        );
        return Err(CodecError::UnsupportedBitstream(format!(
          "segment map of {} entries for {}x{} mode-info units",
          map.len(),
          mi_cols,
          mi_rows
        )));
      }
      if let Some(&bad) = map.iter().find(|&&s| s as usize >= MAX_SEGMENTS) {
        log::error!("segment id {} out of range", bad);
        return Err(CodecError::UnsupportedBitstream(format!(
          "segment id {bad} out of range"
        )));
      }
      Ok(map)
    }
    None => Ok(match prev {
      Some(prev) if prev.len() == len => prev.to_vec(),
      _ => vec![0; len],
    }),
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::segmentation::SegLvl;

  fn enabled() -> SegmentationState {
    let mut seg = SegmentationState::default();
    seg.set_feature(1, SegLvl::SEG_LVL_ALT_Q, -10);
    seg
  }

  #[test]
  fn disabled_segmentation_is_all_zero() {
    let seg = SegmentationState::default();
    let map = segment_map_for_frame(&seg, Some(vec![3; 4]), None, 2, 2);
    assert_eq!(map, Ok(vec![0; 4]));
  }

  #[test]
  fn previous_map_is_carried_over() {
    let seg = enabled();
    let prev = [0, 1, 1, 0];
    assert_eq!(
      segment_map_for_frame(&seg, None, Some(&prev), 2, 2),
      Ok(prev.to_vec())
    );
    assert_eq!(
      segment_map_for_frame(&seg, None, Some(&prev), 4, 2),
      Ok(vec![0; 8])
    );
  }

  #[test]
  fn malformed_maps_are_rejected() {
    let seg = enabled();
    assert!(matches!(
      segment_map_for_frame(&seg, Some(vec![0; 3]), None, 2, 2),
      Err(CodecError::UnsupportedBitstream(_))
    ));
    assert!(matches!(
      segment_map_for_frame(&seg, Some(vec![0, 0, 8, 0]), None, 2, 2),
      Err(CodecError::UnsupportedBitstream(_))
    ));
  }
}
