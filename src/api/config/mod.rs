// Copyright (c) 2020-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::encoder::Encoder;
use crate::error::CodecError;
use crate::util::Pixel;

mod encoder;
pub use encoder::*;

mod speedsettings;
pub use speedsettings::*;

pub use crate::tiling::TilingInfo;

const MAX_DIMENSION: usize = u16::MAX as usize;
const MAX_THREADS: usize = 256;
const MAX_TILE_COLS_LOG2: usize = 6;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 8, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 8, <= 65535)")]
  InvalidHeight(usize),
  /// The bit depth is not supported.
  #[error("invalid bit depth {0} (expected 8, 10 or 12)")]
  InvalidBitDepth(usize),
  /// The quantizer index is out of range.
  #[error("invalid quantizer {0} (expected <= 255)")]
  InvalidQuantizer(usize),
  /// Tile columns is invalid.
  #[error("invalid tile cols log2 {0} (expected <= 6)")]
  InvalidTileCols(usize),
  /// Tile rows is invalid.
  #[error("invalid tile rows log2 {0} (expected <= 2)")]
  InvalidTileRows(usize),
  /// The thread count is invalid.
  #[error("invalid thread count {0} (expected <= 256)")]
  InvalidThreads(usize),
  /// The pixel type is narrower than the bit depth.
  #[error("pixel type of {pixel_bits} bits cannot hold bit depth {bit_depth}")]
  PixelTypeMismatch {
    /// Width of the pixel type.
    pixel_bits: usize,
    /// The configured bit depth.
    bit_depth: usize,
  },
}

/// Contains the encoder configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
  /// Settings which impact the produced bitstream.
  pub(crate) enc: EncoderConfig,
  /// The number of threads in the threadpool.
  pub(crate) threads: usize,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the encoder configuration
  ///
  /// `EncoderConfig` contains the settings impacting the
  /// codec features used in the produced bitstream.
  pub fn with_encoder_config(mut self, enc: EncoderConfig) -> Self {
    self.enc = enc;
    self
  }

  /// Set the number of workers in the threadpool
  ///
  /// The threadpool runs the tile workers of a frame.
  ///
  /// If it is left unset, the encoder will use the default global
  /// threadpool provided by Rayon instead.
  pub const fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  pub fn encoder_config(&self) -> &EncoderConfig {
    &self.enc
  }

  /// Create a new threadpool with this configuration if set,
  /// or return `None` if global threadpool should be used instead.
  pub(crate) fn new_thread_pool(
    &self,
  ) -> Result<Option<Arc<ThreadPool>>, CodecError> {
    if self.threads == 0 {
      return Ok(None);
    }
    match ThreadPoolBuilder::new().num_threads(self.threads).build() {
      Ok(pool) => Ok(Some(Arc::new(pool))),
      Err(e) => {
        log::error!("cannot start {} worker threads: {}", self.threads, e);
        Err(CodecError::ResourceExhausted {
          what: "worker threads",
          bytes: 0,
        })
      }
    }
  }

  /// Creates an [`Encoder`] with this configuration.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid, or
  /// `ResourceExhausted` if the thread pool cannot be started.
  pub fn new_encoder<T: Pixel>(&self) -> Result<Encoder<T>, CodecError> {
    self.validate()?;
    let pixel_bits = 8 * std::mem::size_of::<T>();
    if pixel_bits < self.enc.bit_depth {
      return Err(
        InvalidConfig::PixelTypeMismatch {
          pixel_bits,
          bit_depth: self.enc.bit_depth,
        }
        .into(),
      );
    }
    let pool = self.new_thread_pool()?;
    log::info!("encoder settings: {}", self.enc);
    Ok(Encoder::new(Arc::new(self.enc.clone()), pool))
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if a dimension, the bit depth, the
  ///   quantizer, the tiling or the thread count is out of range.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let config = &self.enc;

    if config.width < 8 || config.width > MAX_DIMENSION {
      return Err(InvalidWidth(config.width));
    }
    if config.height < 8 || config.height > MAX_DIMENSION {
      return Err(InvalidHeight(config.height));
    }
    if !matches!(config.bit_depth, 8 | 10 | 12) {
      return Err(InvalidBitDepth(config.bit_depth));
    }
    if config.quantizer > u8::MAX as usize {
      return Err(InvalidQuantizer(config.quantizer));
    }
    if config.tile_cols_log2 > MAX_TILE_COLS_LOG2 {
      return Err(InvalidTileCols(config.tile_cols_log2));
    }
    if config.tile_rows_log2 > crate::tiling::MAX_TILE_ROWS_LOG2 {
      return Err(InvalidTileRows(config.tile_rows_log2));
    }
    if self.threads > MAX_THREADS {
      return Err(InvalidThreads(self.threads));
    }

    Ok(())
  }

  /// Provide the tiling information for the current Config
  ///
  /// Useful for reporting and debugging.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the tiling config is invalid.
  pub fn tiling_info(&self) -> Result<TilingInfo, InvalidConfig> {
    self.validate()?;

    Ok(TilingInfo::new(
      self.enc.width,
      self.enc.height,
      self.enc.tile_cols_log2,
      self.enc.tile_rows_log2,
    ))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;

  fn with(f: impl FnOnce(&mut EncoderConfig)) -> Config {
    let mut enc = EncoderConfig::default();
    f(&mut enc);
    Config::new().with_encoder_config(enc)
  }

  #[test]
  fn default_config_is_valid() {
    assert_eq!(Config::default().validate(), Ok(()));
  }

  #[test]
  fn out_of_range_values_are_rejected() {
    use InvalidConfig::*;
    assert_eq!(with(|c| c.width = 0).validate(), Err(InvalidWidth(0)));
    assert_eq!(
      with(|c| c.height = 70000).validate(),
      Err(InvalidHeight(70000))
    );
    assert_eq!(with(|c| c.bit_depth = 9).validate(), Err(InvalidBitDepth(9)));
    assert_eq!(
      with(|c| c.quantizer = 256).validate(),
      Err(InvalidQuantizer(256))
    );
    assert_eq!(
      with(|c| c.tile_rows_log2 = 3).validate(),
      Err(InvalidTileRows(3))
    );
    assert_eq!(
      Config::new().with_threads(100_000).validate(),
      Err(InvalidThreads(100_000))
    );
  }

  #[test]
  fn wide_bit_depth_needs_wide_pixels() {
    let cfg = with(|c| c.bit_depth = 10);
    assert!(matches!(
      cfg.new_encoder::<u8>(),
      Err(CodecError::InvalidConfig(InvalidConfig::PixelTypeMismatch { .. }))
    ));
    assert!(cfg.new_encoder::<u16>().is_ok());
  }

  #[test]
  fn tiling_info_follows_config() {
    let cfg = with(|c| {
      c.width = 1920;
      c.height = 1080;
      c.tile_cols_log2 = 2;
    });
    let ti = cfg.tiling_info().unwrap();
    assert_eq!(ti.cols, 4);
    assert_eq!(ti.rows, 1);
  }

  #[test]
  fn settings_are_printable() {
    let s = with(|c| c.quantizer = 42).encoder_config().to_string();
    assert!(s.starts_with("size=640x480 bit_depth=8 quantizer=42 "), "{}", s);
    assert!(s.contains("partition_search=Search"));
  }
}
