// Copyright (c) 2018-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::context::*;
use crate::ec::WriterCounter;
use crate::encoder::frame::FrameInvariants;
use crate::encoder::partition::encode_rd_sb_row;
use crate::entropymode::FrameCounts;
use crate::error::CodecError;
use crate::tiling::*;
use crate::util::Pixel;

/// What a tile worker hands back to the frame driver.
#[derive(Debug, Default, Clone)]
pub struct TileSummary {
  /// Symbol statistics, merged into the frame counts.
  pub counts: FrameCounts,
  /// Estimated size of the tile in whole bits.
  pub bits: u64,
}

/// Codes every superblock of a tile in raster order.
///
/// Coding contexts never cross a tile column, so workers for different
/// tiles of one frame may run concurrently.
#[profiling::function]
pub fn encode_tile<T: Pixel>(
  fi: &FrameInvariants<T>, ctx: TileContextMut<'_, T>,
) -> Result<TileSummary, CodecError> {
  let TileContextMut { mut ts, mut tb } = ctx;
  let mut w = WriterCounter::new();
  let mut cw = ContextWriter::new(&fi.fc, BlockContext::new(&mut tb));

  for sby in 0..ts.sb_height {
    encode_rd_sb_row(fi, &mut ts, &mut cw, &mut w, sby)?;
  }

  log::trace!(
    "tile at sb column {}: {} superblock rows, {} bits",
    ts.sbo.x,
    ts.sb_height,
    w.bits()
  );
  Ok(TileSummary { counts: ts.counts, bits: w.bits() })
}
