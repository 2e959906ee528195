// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;

/// Motion stored per 8×8 unit for use by the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MvRef {
  pub ref_frames: [RefType; 2],
  pub mv: [MotionVector; 2],
}

impl Default for MvRef {
  fn default() -> Self {
    MvRef {
      ref_frames: [INTRA_FRAME, NONE_FRAME],
      mv: [MotionVector::default(); 2],
    }
  }
}

impl From<&Block> for MvRef {
  fn from(b: &Block) -> Self {
    MvRef { ref_frames: b.ref_frames, mv: b.mv }
  }
}

/// Motion vector grid of a coded frame, readable while the frame is still
/// being coded: readers wait until the producer has published the rows
/// they need.
#[derive(Debug)]
pub struct FrameMvs {
  mvs: Box<[MvRef]>,
  pub cols: usize,
  pub rows: usize,
  progress: RowProgress,
}

impl FrameMvs {
  /// An empty grid with no rows published.
  pub fn new(cols: usize, rows: usize) -> Self {
    FrameMvs {
      mvs: vec![MvRef::default(); cols * rows].into_boxed_slice(),
      cols,
      rows,
      progress: RowProgress::new(rows),
    }
  }

  /// Snapshot the motion of a fully coded frame, publishing each row as
  /// it is copied.
  pub fn from_blocks(blocks: &FrameBlocks) -> Self {
    let mut fm = FrameMvs::new(blocks.cols, blocks.rows);
    for (dst, y) in fm.mvs.chunks_exact_mut(blocks.cols).zip(0..blocks.rows) {
      for (d, b) in dst.iter_mut().zip(blocks[y].iter()) {
        *d = MvRef::from(b);
      }
      fm.progress.advance(y + 1);
    }
    fm
  }

  #[inline]
  pub fn progress(&self) -> &RowProgress {
    &self.progress
  }

  /// Row `y` of the grid, blocking until the producer has published it.
  pub fn wait_row(&self, y: usize) -> &[MvRef] {
    self.progress.wait_for(y + 1);
    &self.mvs[y * self.cols..(y + 1) * self.cols]
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn snapshot_copies_committed_motion() {
    let mut fb = FrameBlocks::new(3, 2);
    fb[1][2].ref_frames = [LAST_FRAME, NONE_FRAME];
    fb[1][2].mv[0] = MotionVector { row: 4, col: -2 };
    let fm = FrameMvs::from_blocks(&fb);
    assert!(fm.progress().is_finished());
    let row = fm.wait_row(1);
    assert_eq!(row[2].ref_frames[0], LAST_FRAME);
    assert_eq!(row[2].mv[0], MotionVector { row: 4, col: -2 });
    assert_eq!(row[0], MvRef::default());
  }
}
