// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Default symbol probabilities, symbol counts and backward adaptation.

#![allow(non_upper_case_globals)]

use crate::context::*;
use crate::ec::*;
use crate::mc::{InterpFilter, MotionVector, COMPOUND_TYPES, SWITCHABLE_FILTERS};
use crate::partition::*;
use crate::predict::{PredictionMode, INTRA_MODES};
use crate::transform::{TxSize, TX_TYPES};

use std::ops::AddAssign;

pub const PARTITION_PLOFFSET: usize = 4;
pub const PARTITION_CONTEXTS: usize = 4 * PARTITION_PLOFFSET;
pub const BLOCK_SIZE_GROUPS: usize = 4;
pub const SKIP_CONTEXTS: usize = 3;
pub const INTRA_INTER_CONTEXTS: usize = 4;
pub const COMP_INTER_CONTEXTS: usize = 5;
pub const REF_CONTEXTS: usize = 5;
pub const SINGLE_REFS: usize = 3;
pub const NEWMV_MODE_CONTEXTS: usize = 7;
pub const ZEROMV_MODE_CONTEXTS: usize = 2;
pub const REFMV_MODE_CONTEXTS: usize = 9;
pub const DRL_MODE_CONTEXTS: usize = 5;
pub const SWITCHABLE_FILTER_CONTEXTS: usize = SWITCHABLE_FILTERS + 1;
pub const EXT_TX_SIZES: usize = 3;
pub const COMPOUND_TYPE_CONTEXTS: usize = BlockSize::BLOCK_SIZES_ALL;

const MODE_MV_COUNT_SAT: u32 = 20;
const count_to_update_factor: [u32; MODE_MV_COUNT_SAT as usize + 1] = [
  0, 6, 12, 19, 25, 32, 38, 44, 51, 57, 64, 70, 76, 83, 89, 96, 102, 108, 115,
  121, 128,
];

/// Block size group used by the non key-frame luma mode probabilities.
pub static size_group_lookup: [usize; BlockSize::BLOCK_SIZES_ALL] =
  [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 3];

pub static intra_mode_tree: [TreeIndex; 2 * (INTRA_MODES - 1)] = [
  -(PredictionMode::DC_PRED as TreeIndex),
  2,
  -(PredictionMode::TM_PRED as TreeIndex),
  4,
  -(PredictionMode::V_PRED as TreeIndex),
  6,
  8,
  12,
  -(PredictionMode::H_PRED as TreeIndex),
  10,
  -(PredictionMode::D135_PRED as TreeIndex),
  -(PredictionMode::D117_PRED as TreeIndex),
  -(PredictionMode::D45_PRED as TreeIndex),
  14,
  -(PredictionMode::D63_PRED as TreeIndex),
  16,
  -(PredictionMode::D153_PRED as TreeIndex),
  -(PredictionMode::D207_PRED as TreeIndex),
];

pub static partition_tree: [TreeIndex; 2 * (PARTITION_TYPES - 1)] = [
  -(PartitionType::PARTITION_NONE as TreeIndex),
  2,
  -(PartitionType::PARTITION_HORZ as TreeIndex),
  4,
  -(PartitionType::PARTITION_VERT as TreeIndex),
  -(PartitionType::PARTITION_SPLIT as TreeIndex),
];

// Leaves are CompoundType symbols: average, wedge, difference weighted.
pub static compound_type_tree: [TreeIndex; 2 * (COMPOUND_TYPES - 1)] =
  [0, 2, -1, -2];

// Leaves are TxType discriminants: DCT_DCT, ADST_ADST, ADST_DCT, DCT_ADST.
pub static ext_tx_tree: [TreeIndex; 2 * (TX_TYPES - 1)] = [0, 2, -3, 4, -1, -2];

pub static switchable_interp_tree: [TreeIndex; 2 * (SWITCHABLE_FILTERS - 1)] =
  [
    -(InterpFilter::EIGHTTAP_REGULAR as TreeIndex),
    2,
    -(InterpFilter::EIGHTTAP_SMOOTH as TreeIndex),
    -(InterpFilter::MULTITAP_SHARP as TreeIndex),
  ];

pub static mv_joint_tree: [TreeIndex; 2 * (MV_JOINTS - 1)] =
  [0, 2, -1, 4, -2, -3];

pub static mv_class_tree: [TreeIndex; 2 * (MV_CLASSES - 1)] = [
  0, 2, -1, 4, 6, 8, -2, -3, 10, 12, -4, -5, -6, 14, 16, 18, -7, -8, -9, -10,
];

pub static mv_class0_tree: [TreeIndex; 2] = [0, -1];

pub static mv_fp_tree: [TreeIndex; 2 * (MV_FP_SIZE - 1)] = [0, 2, -1, 4, -2, -3];

pub static kf_y_mode_prob: [[[Prob; INTRA_MODES - 1]; INTRA_MODES];
  INTRA_MODES] = [
  [
    [137, 30, 42, 148, 151, 207, 70, 52, 91],
    [92, 45, 102, 136, 116, 180, 74, 90, 100],
    [73, 32, 19, 187, 222, 215, 46, 34, 100],
    [91, 30, 32, 116, 121, 186, 93, 86, 94],
    [72, 35, 36, 149, 68, 206, 68, 63, 105],
    [73, 31, 28, 138, 57, 124, 55, 122, 151],
    [67, 23, 21, 140, 126, 197, 40, 37, 171],
    [86, 27, 28, 128, 154, 212, 45, 43, 53],
    [74, 32, 27, 107, 86, 160, 63, 134, 102],
    [59, 67, 44, 140, 161, 202, 78, 67, 119],
  ],
  [
    [63, 36, 126, 146, 123, 158, 60, 90, 96],
    [43, 46, 168, 134, 107, 128, 69, 142, 92],
    [44, 29, 68, 159, 201, 177, 50, 57, 77],
    [58, 38, 76, 114, 97, 172, 78, 133, 92],
    [46, 41, 76, 140, 63, 184, 69, 112, 57],
    [38, 32, 85, 140, 46, 112, 54, 151, 133],
    [39, 27, 61, 131, 110, 175, 44, 75, 136],
    [52, 30, 74, 113, 130, 175, 51, 64, 58],
    [47, 35, 80, 100, 74, 143, 64, 163, 74],
    [36, 61, 116, 114, 128, 162, 80, 125, 82],
  ],
  [
    [82, 26, 26, 171, 208, 204, 44, 32, 105],
    [55, 44, 68, 166, 179, 192, 57, 57, 108],
    [42, 26, 11, 199, 241, 228, 23, 15, 85],
    [68, 42, 19, 131, 160, 199, 55, 52, 83],
    [58, 50, 25, 139, 115, 232, 39, 52, 118],
    [50, 35, 33, 153, 104, 162, 64, 59, 131],
    [44, 24, 16, 150, 177, 202, 33, 19, 156],
    [55, 27, 12, 153, 203, 218, 26, 27, 49],
    [53, 49, 21, 110, 116, 168, 59, 80, 76],
    [38, 72, 19, 168, 203, 212, 50, 50, 107],
  ],
  [
    [103, 26, 36, 129, 132, 201, 83, 80, 93],
    [59, 38, 83, 112, 103, 162, 98, 136, 90],
    [62, 30, 23, 158, 200, 207, 59, 57, 50],
    [67, 30, 29, 84, 86, 191, 102, 91, 59],
    [60, 32, 33, 112, 71, 220, 64, 89, 104],
    [53, 26, 34, 130, 56, 149, 84, 120, 103],
    [53, 21, 23, 133, 109, 210, 56, 77, 172],
    [77, 19, 29, 112, 142, 228, 55, 66, 36],
    [61, 29, 29, 93, 97, 165, 83, 175, 162],
    [47, 47, 43, 114, 137, 181, 100, 99, 95],
  ],
  [
    [69, 23, 29, 128, 83, 199, 46, 44, 101],
    [53, 40, 55, 139, 69, 183, 61, 80, 110],
    [40, 29, 19, 161, 180, 207, 43, 24, 91],
    [60, 34, 19, 105, 61, 198, 53, 64, 89],
    [52, 31, 22, 158, 40, 209, 58, 62, 89],
    [44, 31, 29, 147, 46, 158, 56, 102, 198],
    [35, 19, 12, 135, 87, 209, 41, 45, 167],
    [55, 25, 21, 118, 95, 215, 38, 39, 66],
    [51, 38, 25, 113, 58, 164, 70, 93, 97],
    [47, 54, 34, 146, 108, 203, 72, 103, 151],
  ],
  [
    [64, 19, 37, 156, 66, 138, 49, 95, 133],
    [46, 27, 80, 150, 55, 124, 55, 121, 135],
    [36, 23, 27, 165, 149, 166, 54, 64, 118],
    [53, 21, 36, 131, 63, 163, 60, 109, 81],
    [40, 26, 35, 154, 40, 185, 51, 97, 123],
    [35, 19, 34, 179, 19, 97, 48, 129, 124],
    [36, 20, 26, 136, 62, 164, 33, 77, 154],
    [45, 18, 32, 130, 90, 157, 40, 79, 91],
    [45, 26, 28, 129, 45, 129, 49, 147, 123],
    [38, 44, 51, 136, 74, 162, 57, 97, 121],
  ],
  [
    [75, 17, 22, 136, 138, 185, 32, 34, 166],
    [56, 39, 58, 133, 117, 173, 48, 53, 187],
    [35, 21, 12, 161, 212, 207, 20, 23, 145],
    [56, 29, 19, 117, 109, 181, 55, 68, 112],
    [47, 29, 17, 153, 64, 220, 59, 51, 114],
    [46, 16, 24, 136, 76, 147, 41, 64, 172],
    [34, 17, 11, 108, 152, 187, 13, 15, 209],
    [51, 24, 14, 115, 133, 209, 32, 26, 104],
    [55, 30, 18, 122, 79, 179, 44, 88, 116],
    [37, 49, 25, 129, 168, 164, 41, 54, 148],
  ],
  [
    [82, 22, 32, 127, 143, 213, 39, 41, 70],
    [62, 44, 61, 123, 105, 189, 48, 57, 64],
    [47, 25, 17, 175, 222, 220, 24, 30, 86],
    [68, 36, 17, 106, 102, 206, 59, 74, 74],
    [57, 39, 23, 151, 68, 216, 55, 63, 58],
    [49, 30, 35, 141, 70, 168, 82, 40, 115],
    [51, 25, 15, 136, 129, 202, 38, 35, 139],
    [68, 26, 16, 111, 141, 215, 29, 28, 28],
    [59, 39, 19, 114, 75, 180, 77, 104, 42],
    [40, 61, 26, 126, 152, 206, 61, 59, 93],
  ],
  [
    [78, 23, 39, 111, 117, 170, 74, 124, 94],
    [48, 34, 86, 101, 92, 146, 78, 179, 134],
    [47, 22, 24, 138, 187, 178, 68, 69, 59],
    [56, 25, 33, 105, 112, 187, 95, 177, 129],
    [48, 31, 27, 114, 63, 183, 82, 116, 56],
    [43, 28, 37, 121, 63, 123, 61, 192, 169],
    [42, 17, 24, 109, 97, 177, 56, 76, 122],
    [58, 18, 28, 105, 139, 182, 70, 92, 63],
    [46, 23, 32, 74, 86, 150, 67, 183, 88],
    [36, 38, 48, 92, 122, 165, 88, 137, 91],
  ],
  [
    [65, 70, 60, 155, 159, 199, 61, 60, 81],
    [44, 78, 115, 132, 119, 173, 71, 112, 93],
    [39, 38, 21, 184, 227, 206, 42, 32, 64],
    [58, 47, 36, 124, 137, 193, 80, 82, 78],
    [49, 50, 35, 144, 95, 205, 63, 78, 59],
    [41, 53, 52, 148, 71, 142, 65, 128, 51],
    [40, 36, 28, 143, 143, 202, 40, 55, 137],
    [52, 34, 29, 129, 183, 227, 42, 35, 43],
    [42, 44, 44, 104, 105, 164, 64, 130, 80],
    [43, 81, 53, 140, 169, 204, 68, 84, 72],
  ],];

pub static default_if_y_probs: [[Prob; INTRA_MODES - 1]; BLOCK_SIZE_GROUPS] = [
  [65, 32, 18, 144, 162, 194, 41, 51, 98],
  [132, 68, 18, 165, 217, 196, 45, 40, 78],
  [173, 80, 19, 176, 240, 193, 64, 35, 46],
  [221, 135, 38, 194, 248, 121, 96, 85, 29],
];

pub static default_uv_probs: [[Prob; INTRA_MODES - 1]; INTRA_MODES] = [
  [120, 7, 76, 176, 208, 126, 28, 54, 103],
  [48, 12, 154, 155, 139, 90, 34, 117, 119],
  [67, 6, 25, 204, 243, 158, 13, 21, 96],
  [97, 5, 44, 131, 176, 139, 48, 68, 97],
  [83, 5, 42, 156, 111, 152, 26, 49, 152],
  [80, 5, 58, 178, 74, 83, 33, 62, 145],
  [86, 5, 32, 154, 192, 168, 14, 22, 163],
  [85, 5, 32, 156, 216, 148, 19, 29, 73],
  [77, 7, 64, 116, 132, 122, 37, 126, 120],
  [101, 21, 107, 181, 192, 103, 19, 67, 125],
];

pub static default_partition_probs: [[Prob; PARTITION_TYPES - 1];
  PARTITION_CONTEXTS] = [
  // 8x8 -> 4x4
  [199, 122, 141],
  [147, 63, 159],
  [148, 133, 118],
  [121, 104, 114],
  // 16x16 -> 8x8
  [174, 73, 87],
  [92, 41, 83],
  [82, 99, 50],
  [53, 39, 39],
  // 32x32 -> 16x16
  [177, 58, 59],
  [68, 26, 63],
  [52, 79, 25],
  [17, 14, 12],
  // 64x64 -> 32x32
  [222, 34, 30],
  [72, 16, 44],
  [58, 32, 12],
  [10, 7, 6],
];

static default_newmv_prob: [Prob; NEWMV_MODE_CONTEXTS] =
  [200, 180, 150, 150, 110, 70, 60];
static default_zeromv_prob: [Prob; ZEROMV_MODE_CONTEXTS] = [192, 64];
static default_refmv_prob: [Prob; REFMV_MODE_CONTEXTS] =
  [220, 220, 200, 200, 180, 128, 30, 220, 30];
static default_drl_prob: [Prob; DRL_MODE_CONTEXTS] =
  [128, 160, 180, 128, 160];

static default_intra_inter_p: [Prob; INTRA_INTER_CONTEXTS] =
  [9, 102, 187, 225];
static default_comp_inter_p: [Prob; COMP_INTER_CONTEXTS] =
  [239, 183, 119, 96, 41];
static default_comp_ref_p: [Prob; REF_CONTEXTS] = [50, 126, 123, 221, 226];
static default_single_ref_p: [[Prob; SINGLE_REFS - 1]; REF_CONTEXTS] =
  [[33, 16], [77, 74], [142, 142], [172, 170], [238, 247]];

// Only block sizes that may use a wedge code the symbol.
static default_compound_type_probs: [[Prob; COMPOUND_TYPES - 1];
  COMPOUND_TYPE_CONTEXTS] = [
  [255, 128],
  [255, 128],
  [255, 128],
  [216, 128],
  [200, 128],
  [200, 128],
  [192, 128],
  [176, 128],
  [176, 128],
  [160, 128],
  [255, 128],
  [255, 128],
  [255, 128],
];

static default_skip_probs: [Prob; SKIP_CONTEXTS] = [192, 128, 64];

static default_switchable_interp_prob: [[Prob; SWITCHABLE_FILTERS - 1];
  SWITCHABLE_FILTER_CONTEXTS] = [[235, 162], [36, 255], [34, 3], [149, 144]];

static default_intra_ext_tx_prob: [[[Prob; TX_TYPES - 1]; TX_TYPES];
  EXT_TX_SIZES] = [
  [[240, 85, 128], [4, 1, 248], [4, 1, 8], [4, 248, 128]],
  [[244, 85, 128], [8, 2, 248], [8, 2, 8], [8, 248, 128]],
  [[248, 85, 128], [16, 4, 248], [16, 4, 8], [16, 248, 128]],
];

static default_inter_ext_tx_prob: [[Prob; TX_TYPES - 1]; EXT_TX_SIZES] =
  [[160, 85, 128], [176, 85, 128], [192, 85, 128]];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NmvComponent {
  pub sign: Prob,
  pub classes: [Prob; MV_CLASSES - 1],
  pub class0: [Prob; CLASS0_SIZE - 1],
  pub bits: [Prob; MV_OFFSET_BITS],
  pub class0_fp: [[Prob; MV_FP_SIZE - 1]; CLASS0_SIZE],
  pub fp: [Prob; MV_FP_SIZE - 1],
  pub class0_hp: Prob,
  pub hp: Prob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NmvContext {
  pub joints: [Prob; MV_JOINTS - 1],
  pub comps: [NmvComponent; 2],
}

const default_nmv_bits: [Prob; MV_OFFSET_BITS] =
  [136, 140, 148, 160, 176, 192, 224, 234, 234, 240];

pub static default_nmv_context: NmvContext = NmvContext {
  joints: [32, 64, 96],
  comps: [
    // Vertical component
    NmvComponent {
      sign: 128,
      classes: [224, 144, 192, 168, 192, 176, 192, 198, 198, 245],
      class0: [216],
      bits: default_nmv_bits,
      class0_fp: [[128, 128, 64], [96, 112, 64]],
      fp: [64, 96, 64],
      class0_hp: 160,
      hp: 128,
    },
    // Horizontal component
    NmvComponent {
      sign: 128,
      classes: [216, 128, 176, 160, 176, 176, 192, 198, 198, 208],
      class0: [208],
      bits: default_nmv_bits,
      class0_fp: [[128, 128, 64], [96, 112, 64]],
      fp: [64, 96, 64],
      class0_hp: 160,
      hp: 128,
    },
  ],
};

/// Adaptive symbol probabilities of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameContext {
  pub partition: [[Prob; PARTITION_TYPES - 1]; PARTITION_CONTEXTS],
  pub y_mode: [[Prob; INTRA_MODES - 1]; BLOCK_SIZE_GROUPS],
  pub uv_mode: [[Prob; INTRA_MODES - 1]; INTRA_MODES],
  pub skip: [Prob; SKIP_CONTEXTS],
  pub intra_inter: [Prob; INTRA_INTER_CONTEXTS],
  pub comp_inter: [Prob; COMP_INTER_CONTEXTS],
  pub comp_ref: [Prob; REF_CONTEXTS],
  pub single_ref: [[Prob; SINGLE_REFS - 1]; REF_CONTEXTS],
  pub newmv: [Prob; NEWMV_MODE_CONTEXTS],
  pub zeromv: [Prob; ZEROMV_MODE_CONTEXTS],
  pub refmv: [Prob; REFMV_MODE_CONTEXTS],
  pub drl: [Prob; DRL_MODE_CONTEXTS],
  pub switchable_interp:
    [[Prob; SWITCHABLE_FILTERS - 1]; SWITCHABLE_FILTER_CONTEXTS],
  pub compound_type: [[Prob; COMPOUND_TYPES - 1]; COMPOUND_TYPE_CONTEXTS],
  pub intra_ext_tx: [[[Prob; TX_TYPES - 1]; TX_TYPES]; EXT_TX_SIZES],
  pub inter_ext_tx: [[Prob; TX_TYPES - 1]; EXT_TX_SIZES],
  pub nmv: NmvContext,
}

impl Default for FrameContext {
  fn default() -> Self {
    FrameContext {
      partition: default_partition_probs,
      y_mode: default_if_y_probs,
      uv_mode: default_uv_probs,
      skip: default_skip_probs,
      intra_inter: default_intra_inter_p,
      comp_inter: default_comp_inter_p,
      comp_ref: default_comp_ref_p,
      single_ref: default_single_ref_p,
      newmv: default_newmv_prob,
      zeromv: default_zeromv_prob,
      refmv: default_refmv_prob,
      drl: default_drl_prob,
      switchable_interp: default_switchable_interp_prob,
      compound_type: default_compound_type_probs,
      intra_ext_tx: default_intra_ext_tx_prob,
      inter_ext_tx: default_inter_ext_tx_prob,
      nmv: default_nmv_context,
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NmvComponentCounts {
  pub sign: [u32; 2],
  pub classes: [u32; MV_CLASSES],
  pub class0: [u32; CLASS0_SIZE],
  pub bits: [[u32; 2]; MV_OFFSET_BITS],
  pub class0_fp: [[u32; MV_FP_SIZE]; CLASS0_SIZE],
  pub fp: [u32; MV_FP_SIZE],
  pub class0_hp: [u32; 2],
  pub hp: [u32; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NmvCounts {
  pub joints: [u32; MV_JOINTS],
  pub comps: [NmvComponentCounts; 2],
}

impl NmvComponentCounts {
  fn inc(&mut self, v: i32, usehp: bool) {
    debug_assert!(v != 0);
    let sign = v < 0;
    let z = v.unsigned_abs() - 1;
    let (c, o) = get_mv_class(z);
    let d = (o >> 3) as usize;
    let f = ((o >> 1) & 3) as usize;
    let e = (o & 1) as usize;

    self.sign[sign as usize] += 1;
    self.classes[c] += 1;
    if c == MV_CLASS_0 {
      self.class0[d] += 1;
      self.class0_fp[d][f] += 1;
      self.class0_hp[e] += usehp as u32;
    } else {
      let n = c + CLASS0_BITS - 1;
      for i in 0..n {
        self.bits[i][(d >> i) & 1] += 1;
      }
      self.fp[f] += 1;
      self.hp[e] += usehp as u32;
    }
  }
}

impl NmvCounts {
  /// Record a coded motion vector difference.
  pub fn inc_mv(&mut self, diff: MotionVector, usehp: bool) {
    let j = av1_get_mv_joint(diff);
    self.joints[j as usize] += 1;
    if mv_joint_vertical(j) {
      self.comps[0].inc(diff.row as i32, usehp);
    }
    if mv_joint_horizontal(j) {
      self.comps[1].inc(diff.col as i32, usehp);
    }
  }
}

/// Symbol occurrence counts gathered while committing a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounts {
  pub partition: [[u32; PARTITION_TYPES]; PARTITION_CONTEXTS],
  pub y_mode: [[u32; INTRA_MODES]; BLOCK_SIZE_GROUPS],
  pub uv_mode: [[u32; INTRA_MODES]; INTRA_MODES],
  pub skip: [[u32; 2]; SKIP_CONTEXTS],
  pub intra_inter: [[u32; 2]; INTRA_INTER_CONTEXTS],
  pub comp_inter: [[u32; 2]; COMP_INTER_CONTEXTS],
  pub comp_ref: [[u32; 2]; REF_CONTEXTS],
  pub single_ref: [[[u32; 2]; SINGLE_REFS - 1]; REF_CONTEXTS],
  pub newmv: [[u32; 2]; NEWMV_MODE_CONTEXTS],
  pub zeromv: [[u32; 2]; ZEROMV_MODE_CONTEXTS],
  pub refmv: [[u32; 2]; REFMV_MODE_CONTEXTS],
  pub drl: [[u32; 2]; DRL_MODE_CONTEXTS],
  pub switchable_interp: [[u32; SWITCHABLE_FILTERS]; SWITCHABLE_FILTER_CONTEXTS],
  pub compound_type: [[u32; COMPOUND_TYPES]; COMPOUND_TYPE_CONTEXTS],
  pub intra_ext_tx: [[[u32; TX_TYPES]; TX_TYPES]; EXT_TX_SIZES],
  pub inter_ext_tx: [[u32; TX_TYPES]; EXT_TX_SIZES],
  pub mv: NmvCounts,
}

fn add_counts<const N: usize>(dst: &mut [u32; N], src: &[u32; N]) {
  for (d, s) in dst.iter_mut().zip(src.iter()) {
    *d += s;
  }
}

fn add_counts_2d<const N: usize, const M: usize>(
  dst: &mut [[u32; N]; M], src: &[[u32; N]; M],
) {
  for (d, s) in dst.iter_mut().zip(src.iter()) {
    add_counts(d, s);
  }
}

impl AddAssign<&NmvComponentCounts> for NmvComponentCounts {
  fn add_assign(&mut self, rhs: &NmvComponentCounts) {
    add_counts(&mut self.sign, &rhs.sign);
    add_counts(&mut self.classes, &rhs.classes);
    add_counts(&mut self.class0, &rhs.class0);
    add_counts_2d(&mut self.bits, &rhs.bits);
    add_counts_2d(&mut self.class0_fp, &rhs.class0_fp);
    add_counts(&mut self.fp, &rhs.fp);
    add_counts(&mut self.class0_hp, &rhs.class0_hp);
    add_counts(&mut self.hp, &rhs.hp);
  }
}

impl FrameCounts {
  /// Merge the counts of another tile into these.
  pub fn accumulate(&mut self, other: &FrameCounts) {
    add_counts_2d(&mut self.partition, &other.partition);
    add_counts_2d(&mut self.y_mode, &other.y_mode);
    add_counts_2d(&mut self.uv_mode, &other.uv_mode);
    add_counts_2d(&mut self.skip, &other.skip);
    add_counts_2d(&mut self.intra_inter, &other.intra_inter);
    add_counts_2d(&mut self.comp_inter, &other.comp_inter);
    add_counts_2d(&mut self.comp_ref, &other.comp_ref);
    for (d, s) in self.single_ref.iter_mut().zip(other.single_ref.iter()) {
      add_counts_2d(d, s);
    }
    add_counts_2d(&mut self.newmv, &other.newmv);
    add_counts_2d(&mut self.zeromv, &other.zeromv);
    add_counts_2d(&mut self.refmv, &other.refmv);
    add_counts_2d(&mut self.drl, &other.drl);
    add_counts_2d(&mut self.switchable_interp, &other.switchable_interp);
    add_counts_2d(&mut self.compound_type, &other.compound_type);
    for (d, s) in self.intra_ext_tx.iter_mut().zip(other.intra_ext_tx.iter())
    {
      add_counts_2d(d, s);
    }
    add_counts_2d(&mut self.inter_ext_tx, &other.inter_ext_tx);
    add_counts(&mut self.mv.joints, &other.mv.joints);
    for (d, s) in self.mv.comps.iter_mut().zip(other.mv.comps.iter()) {
      *d += s;
    }
  }
}

#[inline]
fn get_prob(num: u32, den: u32) -> Prob {
  debug_assert!(den != 0);
  let p = ((num as u64 * 256 + (den as u64 >> 1)) / den as u64) as u32;
  p.clamp(1, 255) as Prob
}

#[inline]
fn weighted_prob(prob1: Prob, prob2: Prob, factor: u32) -> Prob {
  let v = prob1 as u32 * (256 - factor) + prob2 as u32 * factor;
  ((v + 128) >> 8) as Prob
}

/// Blend a pre-frame probability toward the observed frequency, trusting
/// the observation more as its count grows.
pub fn mode_mv_merge_probs(pre_prob: Prob, ct: [u32; 2]) -> Prob {
  let den = ct[0] + ct[1];
  if den == 0 {
    pre_prob
  } else {
    let count = den.min(MODE_MV_COUNT_SAT);
    let factor = count_to_update_factor[count as usize];
    let prob = get_prob(ct[0], den);
    weighted_prob(pre_prob, prob, factor)
  }
}

/// Adapt every node of `tree` from the leaf counts.
pub fn tree_merge_probs(
  tree: &[TreeIndex], pre_probs: &[Prob], counts: &[u32], probs: &mut [Prob],
) {
  fn merge(
    i: usize, tree: &[TreeIndex], pre_probs: &[Prob], counts: &[u32],
    probs: &mut [Prob],
  ) -> u32 {
    let mut branch = [0u32; 2];
    for (b, ct) in branch.iter_mut().enumerate() {
      let n = tree[i + b];
      *ct = if n <= 0 {
        counts[(-n) as usize]
      } else {
        merge(n as usize, tree, pre_probs, counts, probs)
      };
    }
    probs[i >> 1] = mode_mv_merge_probs(pre_probs[i >> 1], branch);
    branch[0] + branch[1]
  }
  merge(0, tree, pre_probs, counts, probs);
}

fn merge_binary<const N: usize>(
  probs: &mut [Prob; N], pre: &[Prob; N], counts: &[[u32; 2]; N],
) {
  for ((p, &pre), &ct) in probs.iter_mut().zip(pre.iter()).zip(counts.iter())
  {
    *p = mode_mv_merge_probs(pre, ct);
  }
}

impl NmvComponent {
  fn adapt(
    &mut self, pre: &NmvComponent, c: &NmvComponentCounts, allow_hp: bool,
  ) {
    self.sign = mode_mv_merge_probs(pre.sign, c.sign);
    tree_merge_probs(&mv_class_tree, &pre.classes, &c.classes, &mut self.classes);
    tree_merge_probs(&mv_class0_tree, &pre.class0, &c.class0, &mut self.class0);
    merge_binary(&mut self.bits, &pre.bits, &c.bits);
    for j in 0..CLASS0_SIZE {
      tree_merge_probs(
        &mv_fp_tree,
        &pre.class0_fp[j],
        &c.class0_fp[j],
        &mut self.class0_fp[j],
      );
    }
    tree_merge_probs(&mv_fp_tree, &pre.fp, &c.fp, &mut self.fp);
    if allow_hp {
      self.class0_hp = mode_mv_merge_probs(pre.class0_hp, c.class0_hp);
      self.hp = mode_mv_merge_probs(pre.hp, c.hp);
    }
  }
}

impl FrameContext {
  /// Backward adaptation at the end of a frame. `self` holds the
  /// probabilities the frame was coded with on entry and the adapted ones
  /// on return; `pre` is the context the frame started from.
  pub fn adapt(
    &mut self, pre: &FrameContext, counts: &FrameCounts, intra_only: bool,
    interp_filter: InterpFilter, allow_hp: bool,
  ) {
    // Intra part, adapted on every frame.
    merge_binary(&mut self.skip, &pre.skip, &counts.skip);
    for s in 0..EXT_TX_SIZES {
      for t in 0..TX_TYPES {
        tree_merge_probs(
          &ext_tx_tree,
          &pre.intra_ext_tx[s][t],
          &counts.intra_ext_tx[s][t],
          &mut self.intra_ext_tx[s][t],
        );
      }
      tree_merge_probs(
        &ext_tx_tree,
        &pre.inter_ext_tx[s],
        &counts.inter_ext_tx[s],
        &mut self.inter_ext_tx[s],
      );
    }
    for i in 0..INTRA_MODES {
      tree_merge_probs(
        &intra_mode_tree,
        &pre.uv_mode[i],
        &counts.uv_mode[i],
        &mut self.uv_mode[i],
      );
    }
    for i in 0..PARTITION_CONTEXTS {
      tree_merge_probs(
        &partition_tree,
        &pre.partition[i],
        &counts.partition[i],
        &mut self.partition[i],
      );
    }

    if intra_only {
      return;
    }

    merge_binary(&mut self.intra_inter, &pre.intra_inter, &counts.intra_inter);
    merge_binary(&mut self.comp_inter, &pre.comp_inter, &counts.comp_inter);
    merge_binary(&mut self.comp_ref, &pre.comp_ref, &counts.comp_ref);
    for i in 0..REF_CONTEXTS {
      merge_binary(
        &mut self.single_ref[i],
        &pre.single_ref[i],
        &counts.single_ref[i],
      );
    }
    merge_binary(&mut self.newmv, &pre.newmv, &counts.newmv);
    merge_binary(&mut self.zeromv, &pre.zeromv, &counts.zeromv);
    merge_binary(&mut self.refmv, &pre.refmv, &counts.refmv);
    merge_binary(&mut self.drl, &pre.drl, &counts.drl);
    for i in 0..BLOCK_SIZE_GROUPS {
      tree_merge_probs(
        &intra_mode_tree,
        &pre.y_mode[i],
        &counts.y_mode[i],
        &mut self.y_mode[i],
      );
    }
    if interp_filter == InterpFilter::SWITCHABLE {
      for i in 0..SWITCHABLE_FILTER_CONTEXTS {
        tree_merge_probs(
          &switchable_interp_tree,
          &pre.switchable_interp[i],
          &counts.switchable_interp[i],
          &mut self.switchable_interp[i],
        );
      }
    }

    for i in 0..COMPOUND_TYPE_CONTEXTS {
      tree_merge_probs(
        &compound_type_tree,
        &pre.compound_type[i],
        &counts.compound_type[i],
        &mut self.compound_type[i],
      );
    }

    tree_merge_probs(
      &mv_joint_tree,
      &pre.nmv.joints,
      &counts.mv.joints,
      &mut self.nmv.joints,
    );
    for i in 0..2 {
      self.nmv.comps[i].adapt(&pre.nmv.comps[i], &counts.mv.comps[i], allow_hp);
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct MvComponentCosts {
  sign: [u32; 2],
  classes: [u32; MV_CLASSES],
  class0: [u32; CLASS0_SIZE],
  bits: [[u32; 2]; MV_OFFSET_BITS],
  class0_fp: [[u32; MV_FP_SIZE]; CLASS0_SIZE],
  fp: [u32; MV_FP_SIZE],
  class0_hp: [u32; 2],
  hp: [u32; 2],
}

impl MvComponentCosts {
  fn new(c: &NmvComponent) -> Self {
    let mut costs = MvComponentCosts {
      sign: [cost_bit(c.sign, false), cost_bit(c.sign, true)],
      class0_hp: [cost_bit(c.class0_hp, false), cost_bit(c.class0_hp, true)],
      hp: [cost_bit(c.hp, false), cost_bit(c.hp, true)],
      ..Default::default()
    };
    tree_costs(&mut costs.classes, &mv_class_tree, &c.classes);
    tree_costs(&mut costs.class0, &mv_class0_tree, &c.class0);
    for (b, &p) in costs.bits.iter_mut().zip(c.bits.iter()) {
      *b = [cost_bit(p, false), cost_bit(p, true)];
    }
    for (cf, p) in costs.class0_fp.iter_mut().zip(c.class0_fp.iter()) {
      tree_costs(cf, &mv_fp_tree, p);
    }
    tree_costs(&mut costs.fp, &mv_fp_tree, &c.fp);
    costs
  }

  /// Cost of a nonzero component value in 1/8 pel.
  pub fn cost(&self, v: i32, usehp: bool) -> u32 {
    debug_assert!(v != 0);
    let z = v.unsigned_abs() - 1;
    let (c, o) = get_mv_class(z);
    let d = (o >> 3) as usize;
    let f = ((o >> 1) & 3) as usize;
    let e = (o & 1) as usize;
    let mut cost = self.sign[(v < 0) as usize] + self.classes[c];
    if c == MV_CLASS_0 {
      cost += self.class0[d] + self.class0_fp[d][f];
      if usehp {
        cost += self.class0_hp[e];
      }
    } else {
      let n = c + CLASS0_BITS - 1;
      for i in 0..n {
        cost += self.bits[i][(d >> i) & 1];
      }
      cost += self.fp[f];
      if usehp {
        cost += self.hp[e];
      }
    }
    cost
  }
}

/// Per-symbol code lengths derived from a [`FrameContext`], in 1/512 bits.
#[derive(Clone, Debug)]
pub struct ModeCosts {
  pub partition: [[u32; PARTITION_TYPES]; PARTITION_CONTEXTS],
  pub kf_y_mode: [[[u32; INTRA_MODES]; INTRA_MODES]; INTRA_MODES],
  pub y_mode: [[u32; INTRA_MODES]; BLOCK_SIZE_GROUPS],
  pub uv_mode: [[u32; INTRA_MODES]; INTRA_MODES],
  pub skip: [[u32; 2]; SKIP_CONTEXTS],
  pub intra_inter: [[u32; 2]; INTRA_INTER_CONTEXTS],
  pub comp_inter: [[u32; 2]; COMP_INTER_CONTEXTS],
  pub comp_ref: [[u32; 2]; REF_CONTEXTS],
  pub single_ref: [[[u32; 2]; SINGLE_REFS - 1]; REF_CONTEXTS],
  pub newmv: [[u32; 2]; NEWMV_MODE_CONTEXTS],
  pub zeromv: [[u32; 2]; ZEROMV_MODE_CONTEXTS],
  pub refmv: [[u32; 2]; REFMV_MODE_CONTEXTS],
  pub drl: [[u32; 2]; DRL_MODE_CONTEXTS],
  pub switchable_interp: [[u32; SWITCHABLE_FILTERS]; SWITCHABLE_FILTER_CONTEXTS],
  pub compound_type: [[u32; COMPOUND_TYPES]; COMPOUND_TYPE_CONTEXTS],
  pub intra_ext_tx: [[[u32; TX_TYPES]; TX_TYPES]; EXT_TX_SIZES],
  pub inter_ext_tx: [[u32; TX_TYPES]; EXT_TX_SIZES],
  pub mv_joints: [u32; MV_JOINTS],
  pub mv_comps: [MvComponentCosts; 2],
}

fn binary_costs<const N: usize>(probs: &[Prob; N]) -> [[u32; 2]; N] {
  let mut costs = [[0; 2]; N];
  for (c, &p) in costs.iter_mut().zip(probs.iter()) {
    *c = [cost_bit(p, false), cost_bit(p, true)];
  }
  costs
}

impl ModeCosts {
  #[profiling::function]
  pub fn new(fc: &FrameContext) -> Self {
    let mut mc = ModeCosts {
      partition: [[0; PARTITION_TYPES]; PARTITION_CONTEXTS],
      kf_y_mode: [[[0; INTRA_MODES]; INTRA_MODES]; INTRA_MODES],
      y_mode: [[0; INTRA_MODES]; BLOCK_SIZE_GROUPS],
      uv_mode: [[0; INTRA_MODES]; INTRA_MODES],
      skip: binary_costs(&fc.skip),
      intra_inter: binary_costs(&fc.intra_inter),
      comp_inter: binary_costs(&fc.comp_inter),
      comp_ref: binary_costs(&fc.comp_ref),
      single_ref: [[[0; 2]; SINGLE_REFS - 1]; REF_CONTEXTS],
      newmv: binary_costs(&fc.newmv),
      zeromv: binary_costs(&fc.zeromv),
      refmv: binary_costs(&fc.refmv),
      drl: binary_costs(&fc.drl),
      switchable_interp: [[0; SWITCHABLE_FILTERS]; SWITCHABLE_FILTER_CONTEXTS],
      compound_type: [[0; COMPOUND_TYPES]; COMPOUND_TYPE_CONTEXTS],
      intra_ext_tx: [[[0; TX_TYPES]; TX_TYPES]; EXT_TX_SIZES],
      inter_ext_tx: [[0; TX_TYPES]; EXT_TX_SIZES],
      mv_joints: [0; MV_JOINTS],
      mv_comps: [
        MvComponentCosts::new(&fc.nmv.comps[0]),
        MvComponentCosts::new(&fc.nmv.comps[1]),
      ],
    };
    for (c, p) in mc.partition.iter_mut().zip(fc.partition.iter()) {
      tree_costs(c, &partition_tree, p);
    }
    for (ca, pa) in mc.kf_y_mode.iter_mut().zip(kf_y_mode_prob.iter()) {
      for (c, p) in ca.iter_mut().zip(pa.iter()) {
        tree_costs(c, &intra_mode_tree, p);
      }
    }
    for (c, p) in mc.y_mode.iter_mut().zip(fc.y_mode.iter()) {
      tree_costs(c, &intra_mode_tree, p);
    }
    for (c, p) in mc.uv_mode.iter_mut().zip(fc.uv_mode.iter()) {
      tree_costs(c, &intra_mode_tree, p);
    }
    for (c, p) in mc.single_ref.iter_mut().zip(fc.single_ref.iter()) {
      *c = binary_costs(p);
    }
    for (c, p) in
      mc.switchable_interp.iter_mut().zip(fc.switchable_interp.iter())
    {
      tree_costs(c, &switchable_interp_tree, p);
    }
    for (c, p) in mc.compound_type.iter_mut().zip(fc.compound_type.iter()) {
      tree_costs(c, &compound_type_tree, p);
    }
    for s in 0..EXT_TX_SIZES {
      for t in 0..TX_TYPES {
        tree_costs(
          &mut mc.intra_ext_tx[s][t],
          &ext_tx_tree,
          &fc.intra_ext_tx[s][t],
        );
      }
      tree_costs(&mut mc.inter_ext_tx[s], &ext_tx_tree, &fc.inter_ext_tx[s]);
    }
    tree_costs(&mut mc.mv_joints, &mv_joint_tree, &fc.nmv.joints);
    mc
  }

  /// Rate of coding `mv` against the predictor `ref_mv`.
  pub fn mv_cost(
    &self, mv: MotionVector, ref_mv: MotionVector, usehp: bool,
  ) -> u32 {
    let diff = mv - ref_mv;
    let j = av1_get_mv_joint(diff);
    let mut cost = self.mv_joints[j as usize];
    if mv_joint_vertical(j) {
      cost += self.mv_comps[0].cost(diff.row as i32, usehp);
    }
    if mv_joint_horizontal(j) {
      cost += self.mv_comps[1].cost(diff.col as i32, usehp);
    }
    cost
  }
}

/// Transform size class of the transform type probabilities.
#[inline]
pub fn ext_tx_size(tx_size: TxSize) -> Option<usize> {
  if (tx_size as usize) < EXT_TX_SIZES {
    Some(tx_size as usize)
  } else {
    None
  }
}

/// Size group of the luma mode probabilities on non key frames.
#[inline]
pub fn y_mode_group(bsize: BlockSize) -> usize {
  size_group_lookup[bsize as usize]
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn merge_keeps_probability_without_counts() {
    assert_eq!(mode_mv_merge_probs(77, [0, 0]), 77);
  }

  #[test]
  fn merge_saturates_at_half_weight() {
    // 20 or more observations all on the zero branch.
    let p = mode_mv_merge_probs(128, [1000, 0]);
    assert_eq!(p, ((128 * 128 + 255 * 128 + 128) >> 8) as Prob);
    assert_eq!(mode_mv_merge_probs(128, [1, 0]), 131);
  }

  #[test]
  fn tree_merge_moves_toward_counts() {
    let pre = default_partition_probs[0];
    let mut probs = pre;
    tree_merge_probs(&partition_tree, &pre, &[0, 0, 0, 40], &mut probs);
    for (p, q) in probs.iter().zip(pre.iter()) {
      assert!(p < q);
    }
  }

  #[test]
  fn adaptation_of_intra_frames_leaves_inter_symbols() {
    let pre = FrameContext::default();
    let mut counts = FrameCounts::default();
    counts.skip[0] = [0, 50];
    counts.intra_inter[0] = [50, 0];
    let mut fc = pre;
    fc.adapt(&pre, &counts, true, InterpFilter::EIGHTTAP_REGULAR, false);
    assert!(fc.skip[0] < pre.skip[0]);
    assert_eq!(fc.intra_inter, pre.intra_inter);
  }

  #[test]
  fn mv_counts_accumulate() {
    let mut a = FrameCounts::default();
    let mut b = FrameCounts::default();
    a.mv.inc_mv(MotionVector { row: 8, col: 0 }, true);
    b.mv.inc_mv(MotionVector { row: -3, col: 17 }, true);
    a.accumulate(&b);
    assert_eq!(a.mv.joints, [0, 0, 1, 1]);
    assert_eq!(a.mv.comps[0].sign, [1, 1]);
    assert_eq!(a.mv.comps[1].sign, [1, 0]);
  }

  #[test]
  fn mv_cost_grows_with_magnitude() {
    let mc = ModeCosts::new(&FrameContext::default());
    let zero = MotionVector::default();
    let small = mc.mv_cost(MotionVector { row: 2, col: 0 }, zero, false);
    let large = mc.mv_cost(MotionVector { row: 512, col: 0 }, zero, false);
    assert!(small < large);
    assert_eq!(mc.mv_cost(zero, zero, true), mc.mv_joints[0]);
  }
}
