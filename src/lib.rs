// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! The coding core of an AV1-family video encoder.
//!
//! The crate covers block-level decisions and the in-loop filters:
//! motion vector reference candidates, rate-distortion mode and partition
//! search, superblock reconstruction, deringing and loop restoration.
//! Frames are coded tile by tile on a [rayon] pool.
//!
//! Symbol coding is modelled by bit costs only; no bitstream is written.
//!
//! # Example
//!
//! ```
//! use av1core::*;
//! use av1core::frame::Frame;
//!
//! # fn main() -> Result<(), CodecError> {
//! let enc = EncoderConfig { width: 64, height: 64, ..EncoderConfig::with_speed_preset(8) };
//! let cfg = Config::new().with_encoder_config(enc);
//! let mut encoder = cfg.new_encoder::<u8>()?;
//! let out = encoder.encode_frame(Frame::new(64, 64), &FrameParams::default())?;
//! assert_eq!(out.frame_type, FrameType::KEY);
//! # Ok(())
//! # }
//! ```

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::verbose_bit_mask)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::many_single_char_names)]
#![warn(clippy::expl_impl_clone_on_copy)]
#![warn(clippy::linkedlist)]
#![warn(clippy::map_flatten)]
#![warn(clippy::mem_forget)]
#![warn(clippy::mut_mut)]
#![warn(clippy::mutex_integer)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_continue)]
#![warn(clippy::path_buf_push_overwrite)]
#![warn(clippy::range_plus_one)]

pub mod ec;
pub mod partition;
pub mod transform;
pub mod quantize;
pub mod predict;
pub mod rdo;
pub mod util;
pub mod context;
pub mod entropymode;
pub mod segmentation;
pub mod dering;
pub mod lrf;
pub mod encoder;
pub mod mc;
pub mod wedge;
pub mod me;
pub mod mvref;
pub mod scan_order;
pub mod scale;
pub mod dist;
pub mod frame;
pub mod tiling;

mod api;
mod error;

pub use crate::api::*;
pub use crate::encoder::{
  EncodedFrame, Encoder, FrameParams, FrameType, ReferenceFrame,
  ReferenceFramesSet, ReferenceMode,
};
pub use crate::error::CodecError;
