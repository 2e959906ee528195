// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use crate::api::InvalidConfig;

/// Fatal conditions reported by the coding core.
///
/// Search degeneracy below the superblock level is not an error: the mode
/// picker reports it with an infinite RD cost and the partition search
/// chooses something else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
  /// The frame references state that cannot be represented, such as a
  /// reference frame with an invalid scale factor.
  #[error("unsupported bitstream: {0}")]
  UnsupportedBitstream(String),
  /// A scratch buffer could not be allocated.
  #[error("failed to allocate {what} ({bytes} bytes)")]
  ResourceExhausted {
    /// The buffer that was being allocated.
    what: &'static str,
    /// The requested size.
    bytes: usize,
  },
  /// A superblock produced no finite-cost partition.
  #[error("no viable partition for superblock at ({sbx}, {sby})")]
  NoViablePartition {
    /// Superblock column.
    sbx: usize,
    /// Superblock row.
    sby: usize,
  },
  /// The encoder configuration was rejected.
  #[error("invalid configuration: {0}")]
  InvalidConfig(#[from] InvalidConfig),
}
