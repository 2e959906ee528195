// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

mod math;
mod pixel;

pub use self::math::*;
pub use self::pixel::*;

use crate::error::CodecError;

/// Allocates a zero-initialized scratch buffer, reporting allocation
/// failure instead of aborting the process.
pub fn try_alloc_zeroed<T: Copy + Default>(
  len: usize, what: &'static str,
) -> Result<Vec<T>, CodecError> {
  let mut v = Vec::new();
  v.try_reserve_exact(len).map_err(|_| {
    log::error!("failed to allocate {} ({} elements)", what, len);
    CodecError::ResourceExhausted {
      what,
      bytes: len.saturating_mul(std::mem::size_of::<T>()),
    }
  })?;
  v.resize(len, T::default());
  Ok(v)
}
