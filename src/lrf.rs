// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! In-loop restoration filters.
//!
//! Every plane is cut into restoration tiles and every tile carries its own
//! filter: bilateral, Wiener, self-guided projection or domain transform.
//! The frame-level restoration type decides which of them may appear.

use std::sync::OnceLock;

use crate::context::MAX_PLANES;
use crate::ec::{Prob, TreeIndex};
use crate::error::CodecError;
use crate::frame::*;
use crate::util::*;

pub const RESTORATION_TILESIZE_SML: usize = 128;
pub const RESTORATION_TILESIZE_BIG: usize = 256;

pub const RESTORATION_HALFWIN: usize = 3;
pub const RESTORATION_HALFWIN1: usize = RESTORATION_HALFWIN + 1;
pub const RESTORATION_WIN: usize = 2 * RESTORATION_HALFWIN + 1;
pub const RESTORATION_WIN2: usize = RESTORATION_WIN * RESTORATION_WIN;
pub const RESTORATION_FILT_BITS: usize = 7;
pub const RESTORATION_FILT_STEP: i32 = 1 << RESTORATION_FILT_BITS;

pub const BILATERAL_SUBTILE_BITS: usize = 1;
pub const BILATERAL_SUBTILES: usize = 1 << (2 * BILATERAL_SUBTILE_BITS);
pub const BILATERAL_LEVEL_BITS_KF: usize = 4;
pub const BILATERAL_LEVELS_KF: usize = 1 << BILATERAL_LEVEL_BITS_KF;
pub const BILATERAL_LEVEL_BITS: usize = 3;
pub const BILATERAL_LEVELS: usize = 1 << BILATERAL_LEVEL_BITS;
const BILATERAL_PARAM_PRECISION: f64 = 16.0;
const BILATERAL_AMP_RANGE: usize = 256;

pub const WIENER_FILT_TAP_MINV: [i8; 3] = [-5, -23, -16];
pub const WIENER_FILT_TAP_BITS: [usize; 3] = [4, 5, 6];
pub const WIENER_FILT_TAP_MAXV: [i8; 3] = [10, 8, 47];
pub const WIENER_FILT_BITS: usize =
  (WIENER_FILT_TAP_BITS[0] + WIENER_FILT_TAP_BITS[1] + WIENER_FILT_TAP_BITS[2])
    * 2;

pub const SGRPROJ_PARAMS_BITS: usize = 3;
pub const SGRPROJ_PARAMS: usize = 1 << SGRPROJ_PARAMS_BITS;
pub const SGRPROJ_PRJ_BITS: usize = 7;
pub const SGRPROJ_RST_BITS: usize = 4;
pub const SGRPROJ_SGR_BITS: usize = 8;
pub const SGRPROJ_SGR: i64 = 1 << SGRPROJ_SGR_BITS;
pub const SGRPROJ_PRJ_MIN0: i32 = -(1 << SGRPROJ_PRJ_BITS) / 4;
pub const SGRPROJ_PRJ_MAX0: i32 = SGRPROJ_PRJ_MIN0 + (1 << SGRPROJ_PRJ_BITS) - 1;
pub const SGRPROJ_PRJ_MIN1: i32 = -(1 << SGRPROJ_PRJ_BITS) / 4;
pub const SGRPROJ_PRJ_MAX1: i32 = SGRPROJ_PRJ_MIN1 + (1 << SGRPROJ_PRJ_BITS) - 1;
pub const SGRPROJ_BITS: usize = SGRPROJ_PRJ_BITS * 2 + SGRPROJ_PARAMS_BITS;

/// Radius and noise parameter of both guided passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SgrParams {
  pub r1: usize,
  pub e1: i64,
  pub r2: usize,
  pub e2: i64,
}

pub const SGR_PARAMS: [SgrParams; SGRPROJ_PARAMS] = [
  SgrParams { r1: 2, e1: 27, r2: 1, e2: 11 },
  SgrParams { r1: 2, e1: 31, r2: 1, e2: 12 },
  SgrParams { r1: 2, e1: 37, r2: 1, e2: 12 },
  SgrParams { r1: 2, e1: 44, r2: 1, e2: 12 },
  SgrParams { r1: 2, e1: 49, r2: 1, e2: 13 },
  SgrParams { r1: 2, e1: 54, r2: 1, e2: 14 },
  SgrParams { r1: 2, e1: 60, r2: 1, e2: 15 },
  SgrParams { r1: 2, e1: 68, r2: 1, e2: 15 },
];

pub const DOMAINTXFMRF_PARAMS_BITS: usize = 6;
pub const DOMAINTXFMRF_PARAMS: usize = 1 << DOMAINTXFMRF_PARAMS_BITS;
const DOMAINTXFMRF_SIGMA_SCALE: f64 = 16.0;
const DOMAINTXFMRF_ITERS: usize = 3;
const DOMAINTXFMRF_VTABLE_PRECBITS: usize = 8;
const DOMAINTXFMRF_VTABLE_PREC: i32 = 1 << DOMAINTXFMRF_VTABLE_PRECBITS;

/// Range sigma of every domain transform parameter, scaled by 16.
const DOMAINTXFMRF_SIGMA_R: [u8; DOMAINTXFMRF_PARAMS] = [
  48, 52, 56, 60, 64, 68, 72, 76, 80, 82, 84, 86, 88, 90, 92, 94, 96, 97, 98,
  99, 100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113,
  114, 115, 116, 117, 118, 119, 120, 121, 122, 123, 124, 125, 126, 127, 128,
  130, 132, 134, 136, 138, 140, 142, 146, 150, 154, 158, 162, 166, 170, 174,
];

/// Probability that a tile of a single-type plane is left unfiltered.
pub const RESTORE_NONE_SGRPROJ_PROB: Prob = 64;
pub const RESTORE_NONE_BILATERAL_PROB: Prob = 16;
pub const RESTORE_NONE_WIENER_PROB: Prob = 64;
pub const RESTORE_NONE_DOMAINTXFMRF_PROB: Prob = 64;

/// Per-tile type of a switchable plane, in [`RestorationType`] order.
pub const SWITCHABLE_RESTORE_TREE: [TreeIndex; 8] = [0, 2, -1, 4, -2, 6, -3, -4];
pub const DEFAULT_SWITCHABLE_RESTORE_PROBS: [Prob; 4] = [32, 85, 128, 186];

/// Frame-level restoration type of one plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestorationType {
  #[default]
  None,
  Sgrproj,
  Bilateral,
  Wiener,
  DomainTxfmRf,
  /// Every tile picks one of the other types.
  Switchable,
}

impl RestorationType {
  /// Types a switchable tile may pick from, in signaling order.
  pub const SWITCHABLE_TYPES: [RestorationType; 5] = [
    RestorationType::None,
    RestorationType::Sgrproj,
    RestorationType::Bilateral,
    RestorationType::Wiener,
    RestorationType::DomainTxfmRf,
  ];
}

/// The filter of one restoration tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestorationFilter {
  #[default]
  None,
  /// Gain level of each subtile, negative for an unfiltered subtile.
  Bilateral { levels: [i8; BILATERAL_SUBTILES] },
  /// The three outer taps of the symmetric vertical and horizontal kernels.
  Wiener { vfilter: [i8; 3], hfilter: [i8; 3] },
  Sgrproj { ep: u8, xqd: [i8; 2] },
  DomainTxfmRf { sigma_r: u8 },
}

impl RestorationFilter {
  pub const fn restoration_type(&self) -> RestorationType {
    match self {
      RestorationFilter::None => RestorationType::None,
      RestorationFilter::Bilateral { .. } => RestorationType::Bilateral,
      RestorationFilter::Wiener { .. } => RestorationType::Wiener,
      RestorationFilter::Sgrproj { .. } => RestorationType::Sgrproj,
      RestorationFilter::DomainTxfmRf { .. } => RestorationType::DomainTxfmRf,
    }
  }
}

/// Expands three signaled taps into the full 7-tap kernel. The center tap
/// takes whatever is left of the unity gain.
pub fn wiener_taps(side: [i8; 3]) -> [i32; RESTORATION_WIN] {
  let mut taps = [0; RESTORATION_WIN];
  taps[RESTORATION_HALFWIN] = RESTORATION_FILT_STEP;
  for (i, &t) in side.iter().enumerate() {
    taps[i] = t as i32;
    taps[RESTORATION_WIN - 1 - i] = t as i32;
    taps[RESTORATION_HALFWIN] -= 2 * t as i32;
  }
  taps
}

/// Maps a projection pair to the blend weights of both guided outputs.
pub const fn decode_xq(xqd: [i8; 2]) -> [i32; 2] {
  let xq0 = -(xqd[0] as i32);
  [xq0, (1 << SGRPROJ_PRJ_BITS) - xq0 - xqd[1] as i32]
}

/// Layout of the restoration tiles of a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestorationTiles {
  pub tile_width: usize,
  pub tile_height: usize,
  pub nhtiles: usize,
  pub nvtiles: usize,
}

impl RestorationTiles {
  /// Tiles of a luma plane; frames above CIF use the larger tile size.
  /// Trailing partial tiles narrower than half a tile merge into their
  /// neighbour.
  pub fn new(width: usize, height: usize) -> Self {
    let tilesize = if width * height > 352 * 288 {
      RESTORATION_TILESIZE_BIG
    } else {
      RESTORATION_TILESIZE_SML
    };
    let tile_width = tilesize.min(width).max(1);
    let tile_height = tilesize.min(height).max(1);
    RestorationTiles {
      tile_width,
      tile_height,
      nhtiles: ((width + (tile_width >> 1)) / tile_width).max(1),
      nvtiles: ((height + (tile_height >> 1)) / tile_height).max(1),
    }
  }

  /// The same tile grid seen from a subsampled plane.
  pub fn for_plane(&self, xdec: usize, ydec: usize) -> Self {
    RestorationTiles {
      tile_width: (self.tile_width >> xdec).max(1),
      tile_height: (self.tile_height >> ydec).max(1),
      ..*self
    }
  }

  #[inline]
  pub const fn ntiles(&self) -> usize {
    self.nhtiles * self.nvtiles
  }
}

/// Half-open pixel rectangle of a tile or subtile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileLimits {
  pub h_start: usize,
  pub h_end: usize,
  pub v_start: usize,
  pub v_end: usize,
}

impl TileLimits {
  #[inline]
  pub fn width(&self) -> usize {
    self.h_end.saturating_sub(self.h_start)
  }

  #[inline]
  pub fn height(&self) -> usize {
    self.v_end.saturating_sub(self.v_start)
  }
}

/// Pixel limits of tile `tile_idx`, or of one of its `1 << (2 * subtile_bits)`
/// subtiles.
///
/// The last tile of a row or column runs to the plane edge. `clamp_h` and
/// `clamp_v` keep the filter window inside the plane by trimming the
/// limits at the plane edges. Searching and filtering must both go through
/// here so that they see the same pixels.
#[allow(clippy::too_many_arguments)]
pub fn get_rest_tile_limits(
  tiles: &RestorationTiles, tile_idx: usize, subtile_idx: usize,
  subtile_bits: usize, im_width: usize, im_height: usize, clamp_h: bool,
  clamp_v: bool,
) -> TileLimits {
  let htile_idx = tile_idx % tiles.nhtiles;
  let vtile_idx = tile_idx / tiles.nhtiles;
  let mut l = TileLimits {
    h_start: htile_idx * tiles.tile_width,
    v_start: vtile_idx * tiles.tile_height,
    ..Default::default()
  };
  l.h_end = if htile_idx < tiles.nhtiles - 1 {
    l.h_start + tiles.tile_width
  } else {
    im_width
  };
  l.v_end = if vtile_idx < tiles.nvtiles - 1 {
    l.v_start + tiles.tile_height
  } else {
    im_height
  };
  if subtile_bits > 0 {
    let num_subtiles_1d = 1 << subtile_bits;
    let subtile_width = l.width() >> subtile_bits;
    let subtile_height = l.height() >> subtile_bits;
    let subtile_idx_h = subtile_idx & (num_subtiles_1d - 1);
    let subtile_idx_v = subtile_idx >> subtile_bits;
    l.h_start += subtile_idx_h * subtile_width;
    l.v_start += subtile_idx_v * subtile_height;
    if subtile_idx_h != num_subtiles_1d - 1 {
      l.h_end = l.h_start + subtile_width;
    }
    if subtile_idx_v != num_subtiles_1d - 1 {
      l.v_end = l.v_start + subtile_height;
    }
  }
  if clamp_h {
    l.h_start = l.h_start.max(RESTORATION_HALFWIN);
    l.h_end = l.h_end.min(im_width.saturating_sub(RESTORATION_HALFWIN));
  }
  if clamp_v {
    l.v_start = l.v_start.max(RESTORATION_HALFWIN);
    l.v_end = l.v_end.min(im_height.saturating_sub(RESTORATION_HALFWIN));
  }
  l
}

#[derive(Clone, Copy)]
struct BilateralParams {
  sigma_x: u8,
  sigma_y: u8,
  sigma_r: u8,
}

const fn bp(sigma_x: u8, sigma_y: u8, sigma_r: u8) -> BilateralParams {
  BilateralParams { sigma_x, sigma_y, sigma_r }
}

const BILATERAL_LEVEL_TO_PARAMS: [BilateralParams; BILATERAL_LEVELS] = [
  bp(8, 9, 30),
  bp(9, 8, 30),
  bp(9, 11, 32),
  bp(11, 9, 32),
  bp(14, 14, 36),
  bp(18, 18, 36),
  bp(24, 24, 40),
  bp(32, 32, 40),
];

const BILATERAL_LEVEL_TO_PARAMS_KF: [BilateralParams; BILATERAL_LEVELS_KF] = [
  bp(8, 8, 30),
  bp(9, 9, 32),
  bp(10, 10, 32),
  bp(12, 12, 32),
  bp(14, 14, 32),
  bp(18, 18, 36),
  bp(24, 24, 40),
  bp(30, 30, 44),
  bp(36, 36, 48),
  bp(42, 42, 48),
  bp(48, 48, 48),
  bp(48, 48, 56),
  bp(56, 56, 48),
  bp(56, 56, 56),
  bp(56, 56, 64),
  bp(64, 64, 48),
];

/// Weight tables of one bilateral level.
struct BilateralKernel {
  /// Indexed by the sample difference plus `BILATERAL_AMP_RANGE`.
  range: [u8; 2 * BILATERAL_AMP_RANGE + 1],
  spatial: [[u8; RESTORATION_WIN]; RESTORATION_WIN],
}

impl BilateralKernel {
  fn new(p: BilateralParams) -> Self {
    let sigma_r = p.sigma_r as f64 / BILATERAL_PARAM_PRECISION;
    let sigma_x = p.sigma_x as f64 / BILATERAL_PARAM_PRECISION;
    let sigma_y = p.sigma_y as f64 / BILATERAL_PARAM_PRECISION;
    let step = RESTORATION_FILT_STEP as f64;

    let mut range = [0u8; 2 * BILATERAL_AMP_RANGE + 1];
    for j in 0..=BILATERAL_AMP_RANGE {
      let d = (j * j) as f64;
      let w = (0.5 + step * (-d / (2. * sigma_r * sigma_r)).exp()) as u8;
      range[BILATERAL_AMP_RANGE + j] = w;
      range[BILATERAL_AMP_RANGE - j] = w;
    }
    let mut spatial = [[0u8; RESTORATION_WIN]; RESTORATION_WIN];
    for (y, row) in spatial.iter_mut().enumerate() {
      let dy = y as f64 - RESTORATION_HALFWIN as f64;
      for (x, w) in row.iter_mut().enumerate() {
        let dx = x as f64 - RESTORATION_HALFWIN as f64;
        let e = -(dx * dx) / (2. * sigma_x * sigma_x)
          - (dy * dy) / (2. * sigma_y * sigma_y);
        *w = (0.5 + step * e.exp()) as u8;
      }
    }
    BilateralKernel { range, spatial }
  }
}

fn bilateral_kernels(keyframe: bool) -> &'static [BilateralKernel] {
  static KF: OnceLock<Vec<BilateralKernel>> = OnceLock::new();
  static INTER: OnceLock<Vec<BilateralKernel>> = OnceLock::new();
  if keyframe {
    KF.get_or_init(|| {
      BILATERAL_LEVEL_TO_PARAMS_KF.iter().map(|&p| BilateralKernel::new(p)).collect()
    })
  } else {
    INTER.get_or_init(|| {
      BILATERAL_LEVEL_TO_PARAMS.iter().map(|&p| BilateralKernel::new(p)).collect()
    })
  }
}

/// Number of signaled bilateral levels.
pub const fn bilateral_levels(keyframe: bool) -> usize {
  if keyframe {
    BILATERAL_LEVELS_KF
  } else {
    BILATERAL_LEVELS
  }
}

pub const fn bilateral_level_bits(keyframe: bool) -> usize {
  if keyframe {
    BILATERAL_LEVEL_BITS_KF
  } else {
    BILATERAL_LEVEL_BITS
  }
}

type DomainTxfmVtable = [[[i32; 256]; DOMAINTXFMRF_PARAMS]; DOMAINTXFMRF_ITERS];

/// Recursion weight per iteration, parameter and gradient.
fn domaintxfmrf_vtable() -> &'static DomainTxfmVtable {
  static VTABLE: OnceLock<Box<DomainTxfmVtable>> = OnceLock::new();
  VTABLE.get_or_init(|| {
    let mut t = Box::new([[[0i32; 256]; DOMAINTXFMRF_PARAMS]; DOMAINTXFMRF_ITERS]);
    let mult = ((((1 << (DOMAINTXFMRF_ITERS * 2)) - 1) as f64) * 2.0 / 3.0).sqrt();
    let sigma_s = 2f64.sqrt();
    for (i, iter) in t.iter_mut().enumerate() {
      let nm = (1 << (DOMAINTXFMRF_ITERS - i - 1)) as f64;
      let a = (-mult / (sigma_s * nm)).exp();
      for (param, weights) in iter.iter_mut().enumerate() {
        let sigma_r = DOMAINTXFMRF_SIGMA_R[param] as f64 / DOMAINTXFMRF_SIGMA_SCALE;
        let scale = sigma_s / sigma_r;
        for (k, v) in weights.iter_mut().enumerate() {
          *v = (DOMAINTXFMRF_VTABLE_PREC as f64 * a.powf(1.0 + k as f64 * scale))
            .round() as i32;
        }
      }
    }
    t
  })
}

#[allow(clippy::too_many_arguments)]
fn bilateral_filter_tile<T: Pixel>(
  data: &mut Plane<T>, tmp: &mut Plane<T>, tiles: &RestorationTiles,
  tile_idx: usize, levels: &[i8; BILATERAL_SUBTILES], keyframe: bool,
  bit_depth: usize,
) {
  let (width, height) = (data.cfg.width, data.cfg.height);
  let shift = bit_depth - 8;
  let kernels = bilateral_kernels(keyframe);

  for (subtile_idx, &level) in levels.iter().enumerate() {
    let kernel = match usize::try_from(level).ok().and_then(|l| kernels.get(l)) {
      Some(kernel) => kernel,
      None => continue,
    };
    let l = get_rest_tile_limits(
      tiles,
      tile_idx,
      subtile_idx,
      BILATERAL_SUBTILE_BITS,
      width,
      height,
      true,
      true,
    );

    for y in l.v_start..l.v_end {
      for x in l.h_start..l.h_end {
        let c: i32 = data[y][x].into();
        let mut flsum = 0i64;
        let mut wtsum = 0i64;
        for (dy, spatial) in kernel.spatial.iter().enumerate() {
          let row = &data[y + dy - RESTORATION_HALFWIN];
          let win = &row[x - RESTORATION_HALFWIN..=x + RESTORATION_HALFWIN];
          for (&ws, &p) in spatial.iter().zip(win) {
            let p: i32 = p.into();
            let d = (p >> shift) - (c >> shift) + BILATERAL_AMP_RANGE as i32;
            let wt = ws as i64 * kernel.range[d as usize] as i64;
            wtsum += wt;
            flsum += wt * p as i64;
          }
        }
        tmp[y][x] = if wtsum > 0 {
          T::clip(((flsum + wtsum / 2) / wtsum) as i32, bit_depth)
        } else {
          data[y][x]
        };
      }
    }
    for y in l.v_start..l.v_end {
      if l.h_start < l.h_end {
        data[y][l.h_start..l.h_end].copy_from_slice(&tmp[y][l.h_start..l.h_end]);
      }
    }
  }
}

#[inline]
fn sym_filter(taps: &[i32; RESTORATION_WIN], px: impl Fn(usize) -> i32) -> i32 {
  let s = taps
    .iter()
    .enumerate()
    .fold(1 << (RESTORATION_FILT_BITS - 1), |s, (i, &t)| s + t * px(i));
  s >> RESTORATION_FILT_BITS
}

/// Separable Wiener filter: rows of `data` into `tmp`, then columns of
/// `tmp` back into `data`.
fn wiener_filter_tile<T: Pixel>(
  data: &mut Plane<T>, tmp: &mut Plane<T>, tiles: &RestorationTiles,
  tile_idx: usize, vfilter: [i8; 3], hfilter: [i8; 3], bit_depth: usize,
) {
  let (width, height) = (data.cfg.width, data.cfg.height);
  let htaps = wiener_taps(hfilter);
  let vtaps = wiener_taps(vfilter);

  let l = get_rest_tile_limits(tiles, tile_idx, 0, 0, width, height, true, false);
  for y in l.v_start..l.v_end {
    let src = &data[y];
    let dst = &mut tmp[y];
    for x in l.h_start..l.h_end {
      let v = sym_filter(&htaps, |i| src[x + i - RESTORATION_HALFWIN].into());
      dst[x] = T::clip(v, bit_depth);
    }
  }

  let l = get_rest_tile_limits(tiles, tile_idx, 0, 0, width, height, false, true);
  for y in l.v_start..l.v_end {
    for x in l.h_start..l.h_end {
      let v = sym_filter(&vtaps, |i| tmp[y + i - RESTORATION_HALFWIN][x].into());
      data[y][x] = T::clip(v, bit_depth);
    }
  }
}

/// Sums of `src` (or of its squares) over the `(2r+1)×(2r+1)` box around
/// every sample, with the box cut at the buffer edges.
fn boxsum(
  src: &[i64], width: usize, height: usize, r: usize, sqr: bool,
  dst: &mut [i64], tmp: &mut [i64],
) {
  // Running column sums.
  for j in 0..width {
    let mut acc = 0;
    for i in 0..height {
      let v = src[i * width + j];
      acc += if sqr { v * v } else { v };
      tmp[i * width + j] = acc;
    }
  }
  for i in 0..height {
    let hi = (i + r).min(height - 1);
    for j in 0..width {
      dst[i * width + j] = tmp[hi * width + j]
        - if i > r { tmp[(i - r - 1) * width + j] } else { 0 };
    }
  }
  // Running row sums of the column boxes.
  for i in 0..height {
    let mut acc = 0;
    for j in 0..width {
      acc += dst[i * width + j];
      tmp[i * width + j] = acc;
    }
  }
  for i in 0..height {
    for j in 0..width {
      let hi = (j + r).min(width - 1);
      dst[i * width + j] = tmp[i * width + hi]
        - if j > r { tmp[i * width + j - r - 1] } else { 0 };
    }
  }
}

/// Number of samples inside the cut box around `(i, j)`.
#[inline]
fn boxnum(width: usize, height: usize, r: usize, i: usize, j: usize) -> i64 {
  let rows = (i + r).min(height - 1) + 1 - i.saturating_sub(r);
  let cols = (j + r).min(width - 1) + 1 - j.saturating_sub(r);
  (rows * cols) as i64
}

/// Self-guided filter of radius `r` over `dgd`, in place. The output
/// carries `SGRPROJ_RST_BITS` of extra precision.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the box tables cannot be allocated.
pub fn selfguided_restoration(
  dgd: &mut [i64], width: usize, height: usize, bit_depth: usize, r: usize,
  eps: i64,
) -> Result<(), CodecError> {
  if width < 2 || height < 2 {
    dgd.iter_mut().for_each(|v| *v <<= SGRPROJ_RST_BITS);
    return Ok(());
  }
  let n_px = width * height;
  let eps = eps << (2 * (bit_depth - 8));
  let mut a: Vec<i64> = try_alloc_zeroed(n_px, "sgrproj A")?;
  let mut b: Vec<i64> = try_alloc_zeroed(n_px, "sgrproj B")?;
  let mut t: Vec<i64> = try_alloc_zeroed(n_px, "sgrproj scratch")?;

  boxsum(dgd, width, height, r, false, &mut b, &mut t);
  boxsum(dgd, width, height, r, true, &mut a, &mut t);
  for i in 0..height {
    for j in 0..width {
      let k = i * width + j;
      let n = boxnum(width, height, r, i, j);
      let var = a[k] * n - b[k] * b[k];
      let den = var + n * n * eps;
      a[k] = ((var << SGRPROJ_SGR_BITS) + (den >> 1)) / den;
      b[k] = ((SGRPROJ_SGR - a[k]) * b[k] + (n >> 1)) / n;
    }
  }

  let w = width as isize;
  let (last_i, last_j) = (height - 1, width - 1);
  for i in 0..height {
    for j in 0..width {
      let k = (i * width + j) as isize;
      let at = |m: &[i64], di: isize, dj: isize| m[(k + di * w + dj) as usize];
      let di = if i == 0 { 1 } else { -1 };
      let dj = if j == 0 { 1 } else { -1 };
      let v_edge = i == 0 || i == last_i;
      let h_edge = j == 0 || j == last_j;
      let weigh = |m: &[i64]| -> (i64, usize) {
        match (v_edge, h_edge) {
          (true, true) => (
            3 * at(m, 0, 0) + 2 * at(m, 0, dj) + 2 * at(m, di, 0) + at(m, di, dj),
            3,
          ),
          (true, false) => (
            at(m, 0, 0)
              + 2 * (at(m, 0, -1) + at(m, 0, 1))
              + at(m, di, 0)
              + at(m, di, -1)
              + at(m, di, 1),
            3,
          ),
          (false, true) => (
            at(m, 0, 0)
              + 2 * (at(m, -1, 0) + at(m, 1, 0))
              + at(m, 0, dj)
              + at(m, -1, dj)
              + at(m, 1, dj),
            3,
          ),
          (false, false) => (
            (at(m, 0, 0) + at(m, 0, -1) + at(m, 0, 1) + at(m, -1, 0) + at(m, 1, 0))
              * 4
              + (at(m, -1, -1) + at(m, 1, -1) + at(m, -1, 1) + at(m, 1, 1)) * 3,
            5,
          ),
        }
      };
      let (wa, nb) = weigh(&a);
      let (wb, _) = weigh(&b);
      let l = k as usize;
      let v = (((wa * dgd[l] + wb) << SGRPROJ_RST_BITS) + (1 << nb >> 1)) >> nb;
      dgd[l] = round_shift_i64(v, SGRPROJ_SGR_BITS);
    }
  }
  Ok(())
}

/// Both guided passes of parameter set `ep` over `dat`, each one returned
/// with `SGRPROJ_RST_BITS` of extra precision.
///
/// # Errors
///
/// Returns `ResourceExhausted` if a scratch buffer cannot be allocated.
pub fn selfguided_pair(
  dat: &[i64], width: usize, height: usize, bit_depth: usize, ep: usize,
) -> Result<(Vec<i64>, Vec<i64>), CodecError> {
  let params = SGR_PARAMS[ep];
  let mut flt1: Vec<i64> = try_alloc_zeroed(dat.len(), "sgrproj flt1")?;
  let mut flt2: Vec<i64> = try_alloc_zeroed(dat.len(), "sgrproj flt2")?;
  flt1.copy_from_slice(dat);
  flt2.copy_from_slice(dat);
  selfguided_restoration(&mut flt1, width, height, bit_depth, params.r1, params.e1)?;
  selfguided_restoration(&mut flt2, width, height, bit_depth, params.r2, params.e2)?;
  Ok((flt1, flt2))
}

fn sgrproj_filter_tile<T: Pixel>(
  data: &mut Plane<T>, tiles: &RestorationTiles, tile_idx: usize, ep: u8,
  xqd: [i8; 2], bit_depth: usize,
) -> Result<(), CodecError> {
  let (width, height) = (data.cfg.width, data.cfg.height);
  let l = get_rest_tile_limits(tiles, tile_idx, 0, 0, width, height, false, false);
  let (w, h) = (l.width(), l.height());
  if w == 0 || h == 0 {
    return Ok(());
  }
  let mut dat: Vec<i64> = try_alloc_zeroed(w * h, "sgrproj tile")?;
  for (y, row) in dat.chunks_mut(w).enumerate() {
    for (d, &p) in row.iter_mut().zip(&data[l.v_start + y][l.h_start..l.h_end]) {
      *d = i32::cast_from(p) as i64;
    }
  }

  let (flt1, flt2) = selfguided_pair(&dat, w, h, bit_depth, ep as usize)?;
  let xq = decode_xq(xqd);
  for (y, row) in dat.chunks(w).enumerate() {
    let out = &mut data[l.v_start + y][l.h_start..l.h_end];
    for (x, (o, &d)) in out.iter_mut().zip(row).enumerate() {
      let k = y * w + x;
      let u = d << SGRPROJ_RST_BITS;
      let v = xq[0] as i64 * (flt1[k] - u)
        + xq[1] as i64 * (flt2[k] - u)
        + (u << SGRPROJ_PRJ_BITS);
      let r = round_shift_i64(v, SGRPROJ_PRJ_BITS + SGRPROJ_RST_BITS);
      *o = T::clip(r.clamp(i32::MIN as i64, i32::MAX as i64) as i32, bit_depth);
    }
  }
  Ok(())
}

/// Domain transform filter of the rectangle `l` of `plane`, in place.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the accumulator cannot be allocated.
pub fn domaintxfmrf_restoration<T: Pixel>(
  plane: &mut Plane<T>, l: TileLimits, param: usize, bit_depth: usize,
) -> Result<(), CodecError> {
  let (w, h) = (l.width(), l.height());
  if w == 0 || h == 0 {
    return Ok(());
  }
  let vtable = domaintxfmrf_vtable();
  let shift = bit_depth - 8;
  let prec = DOMAINTXFMRF_VTABLE_PREC;
  let half = prec / 2;
  let img = |y: usize, x: usize| -> i32 {
    i32::cast_from(plane[l.v_start + y][l.h_start + x]) >> shift
  };
  let grad = |a: i32, b: i32| ((a - b).unsigned_abs() as usize).min(255);

  let mut dat: Vec<i32> = try_alloc_zeroed(w * h, "domaintxfmrf tile")?;
  for (y, row) in dat.chunks_mut(w).enumerate() {
    for (x, d) in row.iter_mut().enumerate() {
      *d = i32::cast_from(plane[l.v_start + y][l.h_start + x]);
    }
  }

  for vt in vtable.iter() {
    let vt = &vt[param];
    // Rows: left to right, then right to left.
    for (y, dp) in dat.chunks_mut(w).enumerate() {
      dp[0] *= prec;
      for x in 1..w {
        let v = vt[grad(img(y, x), img(y, x - 1))];
        dp[x] = dp[x] * (prec - v) + ((v * dp[x - 1] + half) >> DOMAINTXFMRF_VTABLE_PRECBITS);
      }
      for x in (0..w - 1).rev() {
        let v = vt[grad(img(y, x + 1), img(y, x))];
        dp[x] = (dp[x] * (prec - v) + v * dp[x + 1] + half) >> DOMAINTXFMRF_VTABLE_PRECBITS;
      }
    }
    // Columns: top to bottom, then bottom to top.
    for x in 0..w {
      for y in 1..h {
        let v = vt[grad(img(y, x), img(y - 1, x))];
        dat[y * w + x] = (dat[y * w + x] * (prec - v) + dat[(y - 1) * w + x] * v + half)
          >> DOMAINTXFMRF_VTABLE_PRECBITS;
      }
      for y in (0..h - 1).rev() {
        let v = vt[grad(img(y + 1, x), img(y, x))];
        dat[y * w + x] = (dat[y * w + x] * (prec - v) + dat[(y + 1) * w + x] * v + half)
          >> DOMAINTXFMRF_VTABLE_PRECBITS;
      }
    }
    for d in dat.iter_mut() {
      *d = round_shift_signed(*d as i64, DOMAINTXFMRF_VTABLE_PRECBITS) as i32;
    }
  }

  for (y, row) in dat.chunks(w).enumerate() {
    let out = &mut plane[l.v_start + y][l.h_start..l.h_end];
    for (o, &d) in out.iter_mut().zip(row) {
      *o = T::clip(d, bit_depth);
    }
  }
  Ok(())
}

/// Applies `filter` to tile `tile_idx` of `data`.
///
/// `tmp` is the row-pass buffer of the bilateral and Wiener filters. It must
/// start out as a copy of `data`.
///
/// # Errors
///
/// Returns `ResourceExhausted` if a scratch buffer cannot be allocated.
#[allow(clippy::too_many_arguments)]
pub fn lrf_filter_tile<T: Pixel>(
  data: &mut Plane<T>, tmp: &mut Plane<T>, tiles: &RestorationTiles,
  tile_idx: usize, filter: &RestorationFilter, keyframe: bool,
  bit_depth: usize,
) -> Result<(), CodecError> {
  match *filter {
    RestorationFilter::None => Ok(()),
    RestorationFilter::Bilateral { ref levels } => {
      bilateral_filter_tile(data, tmp, tiles, tile_idx, levels, keyframe, bit_depth);
      Ok(())
    }
    RestorationFilter::Wiener { vfilter, hfilter } => {
      wiener_filter_tile(data, tmp, tiles, tile_idx, vfilter, hfilter, bit_depth);
      Ok(())
    }
    RestorationFilter::Sgrproj { ep, xqd } => {
      sgrproj_filter_tile(data, tiles, tile_idx, ep, xqd, bit_depth)
    }
    RestorationFilter::DomainTxfmRf { sigma_r } => {
      let l = get_rest_tile_limits(
        tiles,
        tile_idx,
        0,
        0,
        data.cfg.width,
        data.cfg.height,
        false,
        false,
      );
      domaintxfmrf_restoration(data, l, sigma_r as usize, bit_depth)
    }
  }
}

/// Restoration choice of one plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestorationPlane {
  pub rtype: RestorationType,
  /// One filter per tile, in raster order.
  pub units: Vec<RestorationFilter>,
}

impl RestorationPlane {
  pub fn new(ntiles: usize) -> Self {
    RestorationPlane {
      rtype: RestorationType::None,
      units: vec![RestorationFilter::None; ntiles],
    }
  }
}

/// Allocates a copy of `plane`.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the copy cannot be allocated.
pub fn try_clone_plane<T: Pixel>(plane: &Plane<T>) -> Result<Plane<T>, CodecError> {
  let mut data = try_alloc_zeroed::<T>(plane.data.len(), "restoration tmp")?;
  data.copy_from_slice(&plane.data);
  Ok(Plane { data, cfg: plane.cfg.clone() })
}

/// Filters a whole plane with the choice in `rp`. `tiles` must already be
/// scaled to the plane. A plane of type `None` is left untouched.
///
/// # Errors
///
/// Returns `ResourceExhausted` if the temporary plane cannot be allocated.
#[profiling::function]
pub fn lrf_filter_plane<T: Pixel>(
  plane: &mut Plane<T>, rp: &RestorationPlane, tiles: &RestorationTiles,
  keyframe: bool, bit_depth: usize,
) -> Result<(), CodecError> {
  if rp.rtype == RestorationType::None {
    return Ok(());
  }
  debug_assert_eq!(rp.units.len(), tiles.ntiles());
  let mut tmp = try_clone_plane(plane)?;
  for (tile_idx, filter) in rp.units.iter().enumerate() {
    debug_assert!(
      rp.rtype == RestorationType::Switchable
        || *filter == RestorationFilter::None
        || filter.restoration_type() == rp.rtype
    );
    lrf_filter_tile(plane, &mut tmp, tiles, tile_idx, filter, keyframe, bit_depth)?;
  }
  Ok(())
}

/// Restoration choices of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestorationState {
  /// Luma tile layout; chroma planes scale it by their subsampling.
  pub tiles: RestorationTiles,
  pub planes: [RestorationPlane; MAX_PLANES],
}

impl RestorationState {
  /// A state that leaves every plane untouched.
  pub fn new(width: usize, height: usize) -> Self {
    let tiles = RestorationTiles::new(width, height);
    let n = tiles.ntiles();
    RestorationState {
      tiles,
      planes: [
        RestorationPlane::new(n),
        RestorationPlane::new(n),
        RestorationPlane::new(n),
      ],
    }
  }

  /// Runs the restoration filters over `frame` in place.
  ///
  /// # Errors
  ///
  /// Returns `ResourceExhausted` if a temporary buffer cannot be allocated.
  pub fn lrf_filter_frame<T: Pixel>(
    &self, frame: &mut Frame<T>, keyframe: bool, bit_depth: usize,
  ) -> Result<(), CodecError> {
    for (plane, rp) in frame.planes.iter_mut().zip(self.planes.iter()) {
      let tiles = self.tiles.for_plane(plane.cfg.xdec, plane.cfg.ydec);
      lrf_filter_plane(plane, rp, &tiles, keyframe, bit_depth)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use interpolate_name::interpolate_test;
  use pretty_assertions::assert_eq;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn noisy_frame<T: Pixel>(w: usize, h: usize, bit_depth: usize) -> Frame<T> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut f = Frame::new(w, h);
    for p in f.planes.iter_mut() {
      for row in p.rows_iter_mut() {
        for v in row.iter_mut() {
          *v = T::cast_from(rng.gen_range(0..(1u32 << bit_depth)));
        }
      }
    }
    f
  }

  fn every_filter() -> Vec<RestorationFilter> {
    vec![
      RestorationFilter::Bilateral { levels: [0, 3, 7, 5] },
      RestorationFilter::Wiener { vfilter: [3, -7, 15], hfilter: [-5, 8, 47] },
      RestorationFilter::Sgrproj { ep: 4, xqd: [-16, 40] },
      RestorationFilter::DomainTxfmRf { sigma_r: 20 },
    ]
  }

  #[test]
  fn wiener_taps_have_unity_gain() {
    for t0 in WIENER_FILT_TAP_MINV[0]..=WIENER_FILT_TAP_MAXV[0] {
      for t1 in WIENER_FILT_TAP_MINV[1]..=WIENER_FILT_TAP_MAXV[1] {
        for t2 in [WIENER_FILT_TAP_MINV[2], 0, WIENER_FILT_TAP_MAXV[2]] {
          let taps = wiener_taps([t0, t1, t2]);
          assert_eq!(taps.iter().sum::<i32>(), RESTORATION_FILT_STEP);
          assert_eq!(taps[0], taps[6]);
          assert_eq!(taps[2], taps[4]);
        }
      }
    }
  }

  #[test]
  fn decode_xq_projects_back() {
    assert_eq!(decode_xq([0, 0]), [0, 128]);
    assert_eq!(decode_xq([-32, 31]), [32, 65]);
  }

  #[test]
  fn tile_limits_cover_the_plane() {
    for &(w, h) in &[(64, 64), (300, 200), (720, 480), (40, 136)] {
      let luma = RestorationTiles::new(w, h);
      for (dec, pw, ph) in [(0, w, h), (1, w >> 1, h >> 1)] {
        let tiles = luma.for_plane(dec, dec);
        let mut hits = vec![0u8; pw * ph];
        for tile_idx in 0..tiles.ntiles() {
          for sub in 0..BILATERAL_SUBTILES {
            let l = get_rest_tile_limits(
              &tiles,
              tile_idx,
              sub,
              BILATERAL_SUBTILE_BITS,
              pw,
              ph,
              false,
              false,
            );
            for y in l.v_start..l.v_end {
              for x in l.h_start..l.h_end {
                hits[y * pw + x] += 1;
              }
            }
          }
        }
        assert!(hits.iter().all(|&n| n == 1), "{}x{} dec {}", w, h, dec);
      }
    }
  }

  #[test]
  fn clamped_limits_keep_the_window_inside() {
    let tiles = RestorationTiles::new(64, 64);
    let l = get_rest_tile_limits(&tiles, 0, 0, 0, 64, 64, true, true);
    assert_eq!(
      l,
      TileLimits { h_start: 3, h_end: 61, v_start: 3, v_end: 61 }
    );
  }

  #[interpolate_test(8, 8)]
  #[interpolate_test(10, 10)]
  fn none_is_identity(bit_depth: usize) {
    let f = noisy_frame::<u16>(96, 72, bit_depth);
    let mut rs = RestorationState::new(96, 72);
    let mut rec = f.clone();
    rs.lrf_filter_frame(&mut rec, true, bit_depth).unwrap();
    assert_eq!(rec, f);

    // A switchable plane whose tiles all chose nothing is untouched too.
    rs.planes[0].rtype = RestorationType::Switchable;
    rs.lrf_filter_frame(&mut rec, false, bit_depth).unwrap();
    assert_eq!(rec, f);
  }

  #[test]
  fn skipped_bilateral_subtiles_are_identity() {
    let f = noisy_frame::<u8>(64, 64, 8);
    let mut rs = RestorationState::new(64, 64);
    for rp in rs.planes.iter_mut() {
      rp.rtype = RestorationType::Bilateral;
      rp.units.fill(RestorationFilter::Bilateral { levels: [-1; BILATERAL_SUBTILES] });
    }
    let mut rec = f.clone();
    rs.lrf_filter_frame(&mut rec, true, 8).unwrap();
    assert_eq!(rec, f);
  }

  #[interpolate_test(8, 8)]
  #[interpolate_test(12, 12)]
  fn flat_planes_are_fixed_points(bit_depth: usize) {
    let value = 100u16 << (bit_depth - 8);
    for filter in every_filter() {
      let mut plane = Plane::<u16>::new(48, 40, 0, 0);
      plane.fill(value);
      let tiles = RestorationTiles::new(48, 40);
      let rp = RestorationPlane { rtype: filter.restoration_type(), units: vec![filter] };
      lrf_filter_plane(&mut plane, &rp, &tiles, true, bit_depth).unwrap();
      assert!(plane.data.iter().all(|&v| v == value), "{:?}", filter);
    }
  }

  #[test]
  fn filters_stay_inside_their_tile() {
    let f = noisy_frame::<u8>(512, 256, 8);
    let tiles = RestorationTiles::new(512, 256);
    assert!(tiles.ntiles() > 1);
    for filter in every_filter() {
      let mut rp = RestorationPlane::new(tiles.ntiles());
      rp.rtype = RestorationType::Switchable;
      rp.units[1] = filter;
      let mut plane = f.planes[0].clone();
      lrf_filter_plane(&mut plane, &rp, &tiles, false, 8).unwrap();
      let inside = get_rest_tile_limits(&tiles, 1, 0, 0, 512, 256, false, false);
      for y in 0..256 {
        for x in 0..512 {
          let in_tile = (inside.v_start..inside.v_end).contains(&y)
            && (inside.h_start..inside.h_end).contains(&x);
          if !in_tile {
            assert_eq!(plane[y][x], f.planes[0][y][x], "{:?} at {},{}", filter, x, y);
          }
        }
      }
      assert_ne!(plane, f.planes[0], "{:?} did nothing", filter);
    }
  }

  #[test]
  fn bilateral_reduces_noise() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut clean = Plane::<u8>::new(64, 64, 0, 0);
    for (y, row) in clean.rows_iter_mut().enumerate() {
      for (x, v) in row.iter_mut().enumerate() {
        *v = (64 + x + y) as u8;
      }
    }
    let mut noisy = clean.clone();
    for v in noisy.data.iter_mut() {
      *v = (*v as i32 + rng.gen_range(-3..=3)) as u8;
    }
    let sse = |p: &Plane<u8>| -> i64 {
      p.data.iter().zip(&clean.data).map(|(&a, &b)| (a as i64 - b as i64).pow(2)).sum()
    };
    let before = sse(&noisy);
    let tiles = RestorationTiles::new(64, 64);
    let rp = RestorationPlane {
      rtype: RestorationType::Bilateral,
      units: vec![RestorationFilter::Bilateral { levels: [15; BILATERAL_SUBTILES] }],
    };
    lrf_filter_plane(&mut noisy, &rp, &tiles, true, 8).unwrap();
    assert!(sse(&noisy) < before);
  }
}
