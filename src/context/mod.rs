// Copyright (c) 2017-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]

use crate::ec::Writer;
use crate::entropymode::*;
use crate::frame::*;
use crate::mc::MotionVector;
use crate::partition::*;
use crate::predict::PredictionMode;
use crate::tiling::*;
use crate::transform::*;

use std::cmp;

mod block_unit;
pub use block_unit::*;

mod frame_mvs;
pub use frame_mvs::*;

mod partition_unit;
pub use partition_unit::*;

mod superblock_unit;
pub use superblock_unit::*;

mod transform_unit;
pub use transform_unit::*;

pub const MAX_PLANES: usize = 3;

pub const MAX_REF_MV_STACK_SIZE: usize = 8;
/// Weight bonus of candidates found in the nearest neighbour ring.
pub const REF_CAT_LEVEL: u32 = 160;

/// Widest tile, in luma pixels.
pub const MAX_TILE_WIDTH: usize = 4096;
pub const MAX_TILE_WIDTH_MI: usize = MAX_TILE_WIDTH >> MI_SIZE_LOG2;

/* Symbols for coding magnitude class of nonzero components */
pub const MV_CLASSES: usize = 11;

// MV Class Types
pub const MV_CLASS_0: usize = 0; /* (0, 2]     integer pel */
pub const MV_CLASS_1: usize = 1; /* (2, 4]     integer pel */
pub const MV_CLASS_2: usize = 2; /* (4, 8]     integer pel */
pub const MV_CLASS_3: usize = 3; /* (8, 16]    integer pel */
pub const MV_CLASS_4: usize = 4; /* (16, 32]   integer pel */
pub const MV_CLASS_5: usize = 5; /* (32, 64]   integer pel */
pub const MV_CLASS_6: usize = 6; /* (64, 128]  integer pel */
pub const MV_CLASS_7: usize = 7; /* (128, 256] integer pel */
pub const MV_CLASS_8: usize = 8; /* (256, 512] integer pel */
pub const MV_CLASS_9: usize = 9; /* (512, 1024] integer pel */
pub const MV_CLASS_10: usize = 10; /* (1024,2048] integer pel */

pub const CLASS0_BITS: usize = 1; /* bits at integer precision for class 0 */
pub const CLASS0_SIZE: usize = 1 << CLASS0_BITS;
pub const MV_OFFSET_BITS: usize = MV_CLASSES + CLASS0_BITS - 2;
pub const MV_FP_SIZE: usize = 4;

pub const MV_MAX_BITS: usize = MV_CLASSES + CLASS0_BITS + 2;
pub const MV_MAX: usize = (1 << MV_MAX_BITS) - 1;

const MV_IN_USE_BITS: usize = 14;
pub const MV_UPP: i32 = 1 << MV_IN_USE_BITS;
pub const MV_LOW: i32 = -(1 << MV_IN_USE_BITS);

/// Predictors at least this many full pels away code without the high
/// precision bit.
pub const COMPANDED_MVREF_THRESH: i32 = 8;

#[inline(always)]
pub const fn av1_get_mv_joint(mv: MotionVector) -> MvJointType {
  match (mv.row, mv.col) {
    (0, 0) => MvJointType::MV_JOINT_ZERO,
    (0, _) => MvJointType::MV_JOINT_HNZVZ,
    (_, 0) => MvJointType::MV_JOINT_HZVNZ,
    (_, _) => MvJointType::MV_JOINT_HNZVNZ,
  }
}
#[inline(always)]
pub fn mv_joint_vertical(joint_type: MvJointType) -> bool {
  joint_type == MvJointType::MV_JOINT_HZVNZ
    || joint_type == MvJointType::MV_JOINT_HNZVNZ
}
#[inline(always)]
pub fn mv_joint_horizontal(joint_type: MvJointType) -> bool {
  joint_type == MvJointType::MV_JOINT_HNZVZ
    || joint_type == MvJointType::MV_JOINT_HNZVNZ
}
#[inline(always)]
pub const fn mv_class_base(mv_class: usize) -> u32 {
  if mv_class != MV_CLASS_0 {
    (CLASS0_SIZE << (mv_class + 2)) as u32
  } else {
    0
  }
}
#[inline(always)]
// If n != 0, returns the floor of log base 2 of n. If n == 0, returns 0.
pub fn log_in_base_2(n: u32) -> u8 {
  31 - cmp::min(31, n.leading_zeros() as u8)
}

/// Returns `(mv_class, offset)`
#[inline(always)]
pub fn get_mv_class(z: u32) -> (usize, u32) {
  let c = if z >= CLASS0_SIZE as u32 * 4096 {
    MV_CLASS_10
  } else {
    log_in_base_2(z >> 3) as usize
  };

  let offset = z - mv_class_base(c);
  (c, offset)
}

/// Whether a predictor is close enough to zero for the high precision bit
/// to be coded.
#[inline]
pub fn use_mv_hp(ref_mv: MotionVector) -> bool {
  (ref_mv.row as i32).abs() >> 3 < COMPANDED_MVREF_THRESH
    && (ref_mv.col as i32).abs() >> 3 < COMPANDED_MVREF_THRESH
}

/// Mode info plus the contexts needed to code it.
pub struct ContextWriter<'a> {
  pub bc: BlockContext<'a>,
  pub fc: &'a FrameContext,
}

impl<'a> ContextWriter<'a> {
  pub fn new(fc: &'a FrameContext, bc: BlockContext<'a>) -> Self {
    ContextWriter { bc, fc }
  }

  /// # Panics
  ///
  /// - If the `comp` is 0
  /// - If the `comp` is outside the bounds of `MV_LOW` and `MV_UPP`
  pub fn encode_mv_component<W: Writer>(
    &self, w: &mut W, comp: i32, axis: usize, usehp: bool,
  ) {
    assert!(comp != 0);
    assert!((MV_LOW..=MV_UPP).contains(&comp));
    let sign: u32 = u32::from(comp < 0);
    let mag: u32 = if sign == 1 { -comp as u32 } else { comp as u32 };
    let (mv_class, offset) = get_mv_class(mag - 1);
    let d = offset >> 3; // int mv data
    let fr = (offset >> 1) & 3; // fractional mv data
    let hp = offset & 1; // high precision mv data
    let mvcomp = &self.fc.nmv.comps[axis];

    // Sign
    w.bit(sign == 1, mvcomp.sign);

    // Class
    w.tree(&mv_class_tree, &mvcomp.classes, mv_class);

    // Integer bits
    if mv_class == MV_CLASS_0 {
      w.tree(&mv_class0_tree, &mvcomp.class0, d as usize);
    } else {
      let n = mv_class + CLASS0_BITS - 1; // number of bits
      for i in 0..n {
        w.bit((d >> i) & 1 == 1, mvcomp.bits[i]);
      }
    }

    // Fractional bits
    let fp_probs = if mv_class == MV_CLASS_0 {
      &mvcomp.class0_fp[d as usize]
    } else {
      &mvcomp.fp
    };
    w.tree(&mv_fp_tree, fp_probs, fr as usize);

    // High precision bit
    if usehp {
      let prob =
        if mv_class == MV_CLASS_0 { mvcomp.class0_hp } else { mvcomp.hp };
      w.bit(hp == 1, prob);
    }
  }

  pub fn write_mv<W: Writer>(
    &self, w: &mut W, mv: MotionVector, ref_mv: MotionVector, usehp: bool,
  ) {
    let diff = mv - ref_mv;
    let j = av1_get_mv_joint(diff);
    w.tree(&mv_joint_tree, &self.fc.nmv.joints, j as usize);
    if mv_joint_vertical(j) {
      self.encode_mv_component(w, diff.row as i32, 0, usehp);
    }
    if mv_joint_horizontal(j) {
      self.encode_mv_component(w, diff.col as i32, 1, usehp);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ec::WriterCounter;

  #[test]
  fn mv_classes() {
    assert_eq!(get_mv_class(0), (MV_CLASS_0, 0));
    assert_eq!(get_mv_class(15), (MV_CLASS_0, 15));
    assert_eq!(get_mv_class(16), (MV_CLASS_1, 0));
    assert_eq!(get_mv_class(100), (MV_CLASS_3, 36));
  }

  #[test]
  fn written_mv_matches_cost_table() {
    let fc = FrameContext::default();
    let costs = ModeCosts::new(&fc);
    let mut blocks = FrameBlocks::new(8, 8);
    let mut tb = blocks.as_tile_blocks_mut();
    let cw = ContextWriter::new(&fc, BlockContext::new(&mut tb));
    let ref_mv = MotionVector { row: 4, col: -2 };
    for mv in [
      MotionVector { row: 4, col: -2 },
      MotionVector { row: 36, col: -2 },
      MotionVector { row: -60, col: 130 },
    ] {
      let mut w = WriterCounter::new();
      cw.write_mv(&mut w, mv, ref_mv, true);
      assert_eq!(w.tell_frac(), costs.mv_cost(mv, ref_mv, true) as u64);
    }
  }

  #[test]
  fn high_precision_depends_on_predictor() {
    assert!(use_mv_hp(MotionVector { row: 63, col: -63 }));
    assert!(!use_mv_hp(MotionVector { row: 64, col: 0 }));
  }
}
