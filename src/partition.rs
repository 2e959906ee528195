// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_camel_case_types)]

pub use self::BlockSize::*;
pub use self::PartitionType::*;
pub use self::RefType::*;
use crate::transform::TxSize;
use crate::transform::TxSize::*;

use num_derive::FromPrimitive;
use std::fmt;

/// Reference frame slots. `NONE_FRAME` marks an unused second slot.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Default, Hash)]
pub enum RefType {
  #[default]
  INTRA_FRAME = 0,
  LAST_FRAME = 1,
  GOLDEN_FRAME = 2,
  ALTREF_FRAME = 3,
  NONE_FRAME = 4,
}

pub const INTER_REFS_PER_FRAME: usize = 3;
pub const TOTAL_REFS_PER_FRAME: usize = 4;
/// Single references plus the two compound pairs.
pub const MODE_CTX_REF_FRAMES: usize = TOTAL_REFS_PER_FRAME + 2;

pub const ALL_INTER_REFS: [RefType; INTER_REFS_PER_FRAME] =
  [LAST_FRAME, GOLDEN_FRAME, ALTREF_FRAME];

impl RefType {
  /// Convert to a reference list index, 0-2.
  ///
  /// # Panics
  ///
  /// - If the ref type is a None or Intra frame
  #[inline]
  pub fn to_index(self) -> usize {
    match self {
      NONE_FRAME | INTRA_FRAME => {
        panic!("Tried to get slot of {:?}", self);
      }
      _ => (self as usize) - 1,
    }
  }

  #[inline]
  pub const fn is_inter(self) -> bool {
    matches!(self, LAST_FRAME | GOLDEN_FRAME | ALTREF_FRAME)
  }

  pub const fn from_index(i: usize) -> RefType {
    match i {
      0 => LAST_FRAME,
      1 => GOLDEN_FRAME,
      _ => ALTREF_FRAME,
    }
  }
}

/// Index of a single reference or a compound pair in the
/// `MODE_CTX_REF_FRAMES`-sized context tables.
#[inline]
pub fn ref_frame_type(rf: [RefType; 2]) -> usize {
  if rf[1].is_inter() {
    // Compound pairs always end in ALTREF.
    TOTAL_REFS_PER_FRAME + (rf[0] as usize - LAST_FRAME as usize)
  } else {
    rf[0] as usize
  }
}

/// Inverse of [`ref_frame_type`].
#[inline]
pub fn set_ref_frame(ref_frame_type: usize) -> [RefType; 2] {
  if ref_frame_type >= TOTAL_REFS_PER_FRAME {
    let first = if ref_frame_type == TOTAL_REFS_PER_FRAME {
      LAST_FRAME
    } else {
      GOLDEN_FRAME
    };
    [first, ALTREF_FRAME]
  } else {
    let rf = match ref_frame_type {
      0 => INTRA_FRAME,
      1 => LAST_FRAME,
      2 => GOLDEN_FRAME,
      _ => ALTREF_FRAME,
    };
    [rf, NONE_FRAME]
  }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug, FromPrimitive)]
pub enum PartitionType {
  PARTITION_NONE,
  PARTITION_HORZ,
  PARTITION_VERT,
  PARTITION_SPLIT,
  PARTITION_INVALID,
}

pub const PARTITION_TYPES: usize = 4;

#[derive(
  Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive,
)]
pub enum BlockSize {
  BLOCK_4X4,
  BLOCK_4X8,
  BLOCK_8X4,
  BLOCK_8X8,
  BLOCK_8X16,
  BLOCK_16X8,
  BLOCK_16X16,
  BLOCK_16X32,
  BLOCK_32X16,
  BLOCK_32X32,
  BLOCK_32X64,
  BLOCK_64X32,
  BLOCK_64X64,
  BLOCK_INVALID,
}

impl Default for BlockSize {
  fn default() -> Self {
    BLOCK_64X64
  }
}

impl BlockSize {
  pub const BLOCK_SIZES_ALL: usize = 13;

  const BLOCK_SIZE_WIDTH_LOG2: [usize; BlockSize::BLOCK_SIZES_ALL] =
    [2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6];

  const BLOCK_SIZE_HEIGHT_LOG2: [usize; BlockSize::BLOCK_SIZES_ALL] =
    [2, 3, 2, 3, 4, 3, 4, 5, 4, 5, 6, 5, 6];

  pub fn from_width_and_height(w: usize, h: usize) -> BlockSize {
    match (w, h) {
      (4, 4) => BLOCK_4X4,
      (4, 8) => BLOCK_4X8,
      (8, 4) => BLOCK_8X4,
      (8, 8) => BLOCK_8X8,
      (8, 16) => BLOCK_8X16,
      (16, 8) => BLOCK_16X8,
      (16, 16) => BLOCK_16X16,
      (16, 32) => BLOCK_16X32,
      (32, 16) => BLOCK_32X16,
      (32, 32) => BLOCK_32X32,
      (32, 64) => BLOCK_32X64,
      (64, 32) => BLOCK_64X32,
      (64, 64) => BLOCK_64X64,
      _ => BLOCK_INVALID,
    }
  }

  #[inline]
  pub const fn width(self) -> usize {
    1 << self.width_log2()
  }

  #[inline]
  pub const fn height(self) -> usize {
    1 << self.height_log2()
  }

  #[inline]
  pub const fn area(self) -> usize {
    self.width() * self.height()
  }

  #[inline]
  pub const fn width_log2(self) -> usize {
    Self::BLOCK_SIZE_WIDTH_LOG2[self as usize]
  }

  #[inline]
  pub const fn height_log2(self) -> usize {
    Self::BLOCK_SIZE_HEIGHT_LOG2[self as usize]
  }

  /// Width in 4-pixel units, log2.
  #[inline]
  pub const fn b_width_log2(self) -> usize {
    self.width_log2() - 2
  }

  #[inline]
  pub const fn b_height_log2(self) -> usize {
    self.height_log2() - 2
  }

  #[inline]
  pub const fn num_pels_log2(self) -> usize {
    self.width_log2() + self.height_log2()
  }

  /// Width in 8×8 mode-info units; sub-8×8 sizes occupy one unit.
  #[inline]
  pub const fn width_mi(self) -> usize {
    let w = self.width() >> 3;
    if w == 0 {
      1
    } else {
      w
    }
  }

  #[inline]
  pub const fn height_mi(self) -> usize {
    let h = self.height() >> 3;
    if h == 0 {
      1
    } else {
      h
    }
  }

  /// log2 of the width in mode-info units.
  #[inline]
  pub const fn width_mi_log2(self) -> usize {
    if self.width_log2() < 3 {
      0
    } else {
      self.width_log2() - 3
    }
  }

  #[inline]
  pub const fn height_mi_log2(self) -> usize {
    if self.height_log2() < 3 {
      0
    } else {
      self.height_log2() - 3
    }
  }

  #[inline]
  pub const fn is_sqr(self) -> bool {
    self.width_log2() == self.height_log2()
  }

  #[inline]
  pub fn is_sub8x8(self) -> bool {
    self < BLOCK_8X8
  }

  /// Largest transform that fits the block.
  pub const fn max_tx_size(self) -> TxSize {
    match self {
      BLOCK_4X4 | BLOCK_4X8 | BLOCK_8X4 => TX_4X4,
      BLOCK_8X8 | BLOCK_8X16 | BLOCK_16X8 => TX_8X8,
      BLOCK_16X16 | BLOCK_16X32 | BLOCK_32X16 => TX_16X16,
      _ => TX_32X32,
    }
  }

  /// Size of the co-located chroma block in 4:2:0, never below 4×4.
  pub fn uv_size(self) -> BlockSize {
    let w = (self.width() >> 1).max(4);
    let h = (self.height() >> 1).max(4);
    let uv = BlockSize::from_width_and_height(w, h);
    if uv == BLOCK_INVALID {
      // 4×8 and 8×4 halve to 2-pixel edges; both round up to 4×4.
      BLOCK_4X4
    } else {
      uv
    }
  }

  pub const fn subsize(self, partition: PartitionType) -> BlockSize {
    match partition {
      PARTITION_NONE => self,
      PARTITION_SPLIT => match self {
        BLOCK_8X8 => BLOCK_4X4,
        BLOCK_16X16 => BLOCK_8X8,
        BLOCK_32X32 => BLOCK_16X16,
        BLOCK_64X64 => BLOCK_32X32,
        _ => BLOCK_INVALID,
      },
      PARTITION_HORZ => match self {
        BLOCK_8X8 => BLOCK_8X4,
        BLOCK_16X16 => BLOCK_16X8,
        BLOCK_32X32 => BLOCK_32X16,
        BLOCK_64X64 => BLOCK_64X32,
        _ => BLOCK_INVALID,
      },
      PARTITION_VERT => match self {
        BLOCK_8X8 => BLOCK_4X8,
        BLOCK_16X16 => BLOCK_8X16,
        BLOCK_32X32 => BLOCK_16X32,
        BLOCK_64X64 => BLOCK_32X64,
        _ => BLOCK_INVALID,
      },
      PARTITION_INVALID => BLOCK_INVALID,
    }
  }

  /// The partition of a square `self` that yields `subsize`.
  pub fn partition_for(self, subsize: BlockSize) -> PartitionType {
    [PARTITION_NONE, PARTITION_HORZ, PARTITION_VERT, PARTITION_SPLIT]
      .into_iter()
      .find(|&p| self.subsize(p) == subsize)
      .unwrap_or(PARTITION_INVALID)
  }

  /// Next square block size less or equal than the current block size.
  pub const fn next_square(self) -> BlockSize {
    match self {
      BLOCK_4X4 | BLOCK_4X8 | BLOCK_8X4 => BLOCK_4X4,
      BLOCK_8X8 | BLOCK_8X16 | BLOCK_16X8 => BLOCK_8X8,
      BLOCK_16X16 | BLOCK_16X32 | BLOCK_32X16 => BLOCK_16X16,
      BLOCK_32X32 | BLOCK_32X64 | BLOCK_64X32 => BLOCK_32X32,
      _ => BLOCK_64X64,
    }
  }

  /// Relaxed lower bound used by the neighbouring min/max heuristic.
  pub const fn min_partition_size(self) -> BlockSize {
    match self {
      BLOCK_4X4 | BLOCK_4X8 | BLOCK_8X4 | BLOCK_8X8 | BLOCK_8X16
      | BLOCK_16X8 => BLOCK_4X4,
      BLOCK_16X16 | BLOCK_16X32 | BLOCK_32X16 => BLOCK_8X8,
      _ => BLOCK_16X16,
    }
  }

  /// Relaxed upper bound used by the neighbouring min/max heuristic.
  pub const fn max_partition_size(self) -> BlockSize {
    match self {
      BLOCK_4X4 => BLOCK_8X8,
      BLOCK_4X8 | BLOCK_8X4 | BLOCK_8X8 => BLOCK_16X16,
      BLOCK_8X16 | BLOCK_16X8 | BLOCK_16X16 => BLOCK_32X32,
      _ => BLOCK_64X64,
    }
  }

  /// Square size with the given mode-info edge.
  pub const fn square_from_mi(n8: usize) -> BlockSize {
    match n8 {
      0 | 1 => BLOCK_8X8,
      2 => BLOCK_16X16,
      3 | 4 => BLOCK_32X32,
      _ => BLOCK_64X64,
    }
  }
}

impl fmt::Display for BlockSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if *self == BLOCK_INVALID {
      write!(f, "invalid")
    } else {
      write!(f, "{}x{}", self.width(), self.height())
    }
  }
}

/* Symbols for coding which components are zero jointly */
pub const MV_JOINTS: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd)]
pub enum MvJointType {
  MV_JOINT_ZERO = 0,   /* Zero vector */
  MV_JOINT_HNZVZ = 1,  /* Vert zero, hor nonzero */
  MV_JOINT_HZVNZ = 2,  /* Hor zero, vert nonzero */
  MV_JOINT_HNZVNZ = 3, /* Both components nonzero */
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn block_size_geometry() {
    assert_eq!(BLOCK_4X8.width(), 4);
    assert_eq!(BLOCK_4X8.height(), 8);
    assert_eq!(BLOCK_4X8.width_mi(), 1);
    assert_eq!(BLOCK_64X32.width_mi(), 8);
    assert_eq!(BLOCK_64X32.height_mi(), 4);
    assert_eq!(BLOCK_32X32.b_width_log2(), 3);
    assert_eq!(BLOCK_16X16.num_pels_log2(), 8);
    assert!(BLOCK_8X4.is_sub8x8());
    assert!(!BLOCK_8X8.is_sub8x8());
  }

  #[test]
  fn subsize_round_trips_partition() {
    for bsize in [BLOCK_8X8, BLOCK_16X16, BLOCK_32X32, BLOCK_64X64] {
      for p in [PARTITION_NONE, PARTITION_HORZ, PARTITION_VERT, PARTITION_SPLIT]
      {
        let sub = bsize.subsize(p);
        assert_ne!(sub, BLOCK_INVALID);
        assert_eq!(bsize.partition_for(sub), p);
      }
    }
    assert_eq!(BLOCK_16X8.subsize(PARTITION_SPLIT), BLOCK_INVALID);
  }

  #[test]
  fn ref_frame_type_mapping() {
    for t in 0..MODE_CTX_REF_FRAMES {
      assert_eq!(ref_frame_type(set_ref_frame(t)), t);
    }
    assert_eq!(ref_frame_type([LAST_FRAME, ALTREF_FRAME]), 4);
    assert_eq!(ref_frame_type([GOLDEN_FRAME, ALTREF_FRAME]), 5);
  }
}
