// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::sync::Arc;

use arg_enum_proc_macro::ArgEnum;

use crate::context::{FrameMvs, MI_SIZE_LOG2};
use crate::frame::Frame;
use crate::partition::*;
use crate::util::*;

/// A coded frame kept for prediction of later frames, together with the
/// motion it was coded with.
#[derive(Debug, Clone)]
pub struct ReferenceFrame<T: Pixel> {
  pub frame: Frame<T>,
  pub frame_mvs: Arc<FrameMvs>,
  pub intra_only: bool,
  pub show_frame: bool,
}

impl<T: Pixel> ReferenceFrame<T> {
  /// A reference with no usable motion, such as one supplied from outside
  /// the encoder.
  pub fn from_frame(frame: Frame<T>) -> Self {
    let cols = frame.width() >> MI_SIZE_LOG2;
    let rows = frame.height() >> MI_SIZE_LOG2;
    let frame_mvs = FrameMvs::new(cols, rows);
    frame_mvs.progress().finish();
    ReferenceFrame {
      frame,
      frame_mvs: Arc::new(frame_mvs),
      intra_only: true,
      show_frame: true,
    }
  }
}

/// The LAST, GOLDEN and ALTREF slots.
#[derive(Debug, Clone)]
pub struct ReferenceFramesSet<T: Pixel> {
  pub frames: [Option<Arc<ReferenceFrame<T>>>; INTER_REFS_PER_FRAME],
}

impl<T: Pixel> Default for ReferenceFramesSet<T> {
  fn default() -> Self {
    ReferenceFramesSet { frames: [None, None, None] }
  }
}

impl<T: Pixel> ReferenceFramesSet<T> {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn get(&self, rf: RefType) -> Option<&Arc<ReferenceFrame<T>>> {
    self.frames[rf.to_index()].as_ref()
  }

  /// Store `frame` in every slot whose bit is set in `refresh_mask`
  /// (bit 0 is LAST).
  pub fn refresh(&mut self, frame: &Arc<ReferenceFrame<T>>, refresh_mask: u8) {
    for (i, slot) in self.frames.iter_mut().enumerate() {
      if refresh_mask & (1 << i) != 0 {
        *slot = Some(Arc::clone(frame));
      }
    }
  }
}

/// Whether blocks use one reference, two, or choose per block.
#[allow(non_camel_case_types)]
#[derive(ArgEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferenceMode {
  #[default]
  SINGLE = 0,
  COMPOUND = 1,
  SELECT = 2,
}

pub const ALL_REF_FRAMES_MASK: u8 = (1 << INTER_REFS_PER_FRAME) - 1;
pub const LAST_FRAME_MASK: u8 = 1;

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn refresh_by_mask() {
    let mut set = ReferenceFramesSet::<u8>::new();
    let key = Arc::new(ReferenceFrame::from_frame(Frame::new(64, 64)));
    set.refresh(&key, ALL_REF_FRAMES_MASK);
    assert!(ALL_INTER_REFS.iter().all(|&rf| set.get(rf).is_some()));

    let inter = Arc::new(ReferenceFrame::from_frame(Frame::new(64, 64)));
    set.refresh(&inter, LAST_FRAME_MASK);
    assert!(Arc::ptr_eq(set.get(LAST_FRAME).unwrap(), &inter));
    assert!(Arc::ptr_eq(set.get(GOLDEN_FRAME).unwrap(), &key));
    assert!(Arc::ptr_eq(set.get(ALTREF_FRAME).unwrap(), &key));
  }

  #[test]
  fn external_reference_has_published_motion() {
    let r = ReferenceFrame::from_frame(Frame::<u16>::new(40, 24));
    assert_eq!(r.frame_mvs.cols, 5);
    assert_eq!(r.frame_mvs.rows, 3);
    assert!(r.frame_mvs.progress().is_finished());
  }
}
