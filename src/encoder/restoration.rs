// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Encoder-side choice of the restoration filters.
//!
//! Each restoration type is searched on its own, tile by tile, and priced
//! as a whole plane. The cheapest type, switchable included, wins.

use crate::api::RestorationSearch;
use crate::ec::{cost_bit, tree_costs, Prob, PROB_COST_SHIFT};
use crate::error::CodecError;
use crate::frame::*;
use crate::lrf::*;
use crate::rdo::{rd_mult, rdcost};
use crate::util::*;

/// Bits that signal the restoration type of a plane, in
/// [`RestorationType`] order.
pub const FRAME_LEVEL_RESTORE_BITS: [u32; 6] = [2, 3, 3, 3, 3, 2];

const TYPES: usize = RestorationType::SWITCHABLE_TYPES.len();

/// Squared error between `a` and `b` inside `l`.
fn sse_region<T: Pixel>(a: &Plane<T>, b: &Plane<T>, l: TileLimits) -> u64 {
  if l.width() == 0 {
    return 0;
  }
  (l.v_start..l.v_end)
    .map(|y| {
      a[y][l.h_start..l.h_end]
        .iter()
        .zip(&b[y][l.h_start..l.h_end])
        .map(|(&p, &q)| {
          let d = i32::cast_from(p) - i32::cast_from(q);
          (d * d) as u64
        })
        .sum::<u64>()
    })
    .sum()
}

/// Outcome of searching one restoration type over a plane.
#[derive(Debug, Clone)]
struct TypeSearch {
  /// Cost of coding the whole plane with this type.
  cost: i64,
  units: Vec<RestorationFilter>,
  /// Cost of each tile when picked inside a switchable plane.
  tile_cost: Vec<i64>,
}

struct PlaneSearch<'a, T: Pixel> {
  src: &'a Plane<T>,
  rec: &'a Plane<T>,
  tiles: RestorationTiles,
  keyframe: bool,
  bit_depth: usize,
  rdmult: u32,
  switchable_cost: [u32; TYPES],
  /// Trial buffers; they equal `rec` between trials.
  scratch: Plane<T>,
  tmp: Plane<T>,
}

impl<'a, T: Pixel> PlaneSearch<'a, T> {
  fn new(
    src: &'a Plane<T>, rec: &'a Plane<T>, tiles: RestorationTiles,
    keyframe: bool, bit_depth: usize, rdmult: u32,
  ) -> Result<Self, CodecError> {
    let mut switchable_cost = [0; TYPES];
    tree_costs(
      &mut switchable_cost,
      &SWITCHABLE_RESTORE_TREE,
      &DEFAULT_SWITCHABLE_RESTORE_PROBS,
    );
    Ok(PlaneSearch {
      src,
      rec,
      tiles,
      keyframe,
      bit_depth,
      rdmult,
      switchable_cost,
      scratch: try_clone_plane(rec)?,
      tmp: try_clone_plane(rec)?,
    })
  }

  #[inline]
  fn rd(&self, rate: u32, sse: u64) -> i64 {
    rdcost(rate, sse << 4, self.rdmult)
  }

  fn limits(
    &self, tile_idx: usize, subtile_idx: usize, subtile_bits: usize,
    clamp: bool,
  ) -> TileLimits {
    get_rest_tile_limits(
      &self.tiles,
      tile_idx,
      subtile_idx,
      subtile_bits,
      self.rec.cfg.width,
      self.rec.cfg.height,
      clamp,
      clamp,
    )
  }

  /// Error of the unfiltered reconstruction inside a tile or subtile.
  fn base_sse(
    &self, tile_idx: usize, subtile_idx: usize, subtile_bits: usize,
  ) -> u64 {
    sse_region(self.src, self.rec, self.limits(tile_idx, subtile_idx, subtile_bits, false))
  }

  /// Error inside a tile or subtile after filtering only that tile.
  fn try_tile(
    &mut self, filter: &RestorationFilter, tile_idx: usize,
    subtile_idx: usize, subtile_bits: usize,
  ) -> Result<u64, CodecError> {
    lrf_filter_tile(
      &mut self.scratch,
      &mut self.tmp,
      &self.tiles,
      tile_idx,
      filter,
      self.keyframe,
      self.bit_depth,
    )?;
    let l = self.limits(tile_idx, subtile_idx, subtile_bits, false);
    let err = sse_region(self.src, &self.scratch, l);

    let whole = self.limits(tile_idx, 0, 0, false);
    let po = PlaneOffset { x: whole.h_start as isize, y: whole.v_start as isize };
    self.scratch.copy_rect(self.rec, po, whole.width(), whole.height());
    self.tmp.copy_rect(self.rec, po, whole.width(), whole.height());
    Ok(err)
  }

  /// Error of the whole plane filtered with `rp`.
  fn try_plane(&self, rp: &RestorationPlane) -> Result<u64, CodecError> {
    let mut out = try_clone_plane(self.rec)?;
    lrf_filter_plane(&mut out, rp, &self.tiles, self.keyframe, self.bit_depth)?;
    let full = TileLimits {
      h_start: 0,
      h_end: out.cfg.width,
      v_start: 0,
      v_end: out.cfg.height,
    };
    Ok(sse_region(self.src, &out, full))
  }

  /// Prices a plane of type `rtype` whose active tiles each cost
  /// `tile_bits` on top of the active flag coded with `none_prob`.
  fn plane_cost(
    &self, rtype: RestorationType, units: Vec<RestorationFilter>,
    none_prob: Prob, tile_bits: impl Fn(&RestorationFilter) -> u32,
  ) -> Result<(i64, Vec<RestorationFilter>), CodecError> {
    let mut rate = FRAME_LEVEL_RESTORE_BITS[rtype as usize] << PROB_COST_SHIFT;
    for unit in units.iter() {
      let active = *unit != RestorationFilter::None;
      rate += cost_bit(none_prob, active);
      if active {
        rate += tile_bits(unit) << PROB_COST_SHIFT;
      }
    }
    let rp = RestorationPlane { rtype, units };
    let err = self.try_plane(&rp)?;
    Ok((self.rd(rate, err), rp.units))
  }

  fn search_norestore(&self) -> TypeSearch {
    let n = self.tiles.ntiles();
    let tile_cost = (0..n)
      .map(|t| self.rd(self.switchable_cost[0], self.base_sse(t, 0, 0)))
      .collect();
    let full = TileLimits {
      h_start: 0,
      h_end: self.rec.cfg.width,
      v_start: 0,
      v_end: self.rec.cfg.height,
    };
    let err = sse_region(self.src, self.rec, full);
    TypeSearch {
      cost: self.rd(
        FRAME_LEVEL_RESTORE_BITS[RestorationType::None as usize] << PROB_COST_SHIFT,
        err,
      ),
      units: vec![RestorationFilter::None; n],
      tile_cost,
    }
  }

  /// Keeps `filter` for tile `tile_idx` when it beats leaving the tile
  /// alone.
  fn settle_tile(
    &mut self, filter: RestorationFilter, tile_idx: usize, filter_bits: usize,
    none_prob: Prob, units: &mut [RestorationFilter], tile_cost: &mut [i64],
  ) -> Result<(), CodecError> {
    let cost_norestore = self.rd(cost_bit(none_prob, false), self.base_sse(tile_idx, 0, 0));
    let err = self.try_tile(&filter, tile_idx, 0, 0)?;
    let bits = (filter_bits as u32) << PROB_COST_SHIFT;
    let cost = self.rd(bits + cost_bit(none_prob, true), err);
    if cost < cost_norestore {
      units[tile_idx] = filter;
      let rtype = filter.restoration_type() as usize;
      tile_cost[tile_idx] = self.rd(bits + self.switchable_cost[rtype], err);
    }
    Ok(())
  }

  fn search_bilateral(&mut self) -> Result<TypeSearch, CodecError> {
    let n = self.tiles.ntiles();
    let level_bits = bilateral_level_bits(self.keyframe) as u32;
    let levels_n = bilateral_levels(self.keyframe);
    let mut units = vec![RestorationFilter::None; n];
    let mut tile_cost = vec![i64::MAX; n];

    for (tile_idx, unit) in units.iter_mut().enumerate() {
      let mut levels = [-1i8; BILATERAL_SUBTILES];
      for (subtile_idx, best_level) in levels.iter_mut().enumerate() {
        let err = self.base_sse(tile_idx, subtile_idx, BILATERAL_SUBTILE_BITS);
        let mut best_cost =
          self.rd(cost_bit(RESTORE_NONE_BILATERAL_PROB, false), err);
        for level in 0..levels_n {
          let mut trial = [-1i8; BILATERAL_SUBTILES];
          trial[subtile_idx] = level as i8;
          let err = self.try_tile(
            &RestorationFilter::Bilateral { levels: trial },
            tile_idx,
            subtile_idx,
            BILATERAL_SUBTILE_BITS,
          )?;
          let rate = (level_bits << PROB_COST_SHIFT)
            + cost_bit(RESTORE_NONE_BILATERAL_PROB, true);
          let cost = self.rd(rate, err);
          if cost < best_cost {
            *best_level = level as i8;
            best_cost = cost;
          }
        }
      }

      let rate = levels
        .iter()
        .map(|&l| {
          let active = l >= 0;
          cost_bit(RESTORE_NONE_BILATERAL_PROB, active)
            + if active { level_bits << PROB_COST_SHIFT } else { 0 }
        })
        .sum::<u32>();
      let filter = RestorationFilter::Bilateral { levels };
      let err = self.try_tile(&filter, tile_idx, 0, 0)?;
      let sw = self.switchable_cost[RestorationType::Bilateral as usize];
      tile_cost[tile_idx] = self.rd(rate + sw, err);
      *unit = filter;
    }

    // Every bilateral tile codes its subtile flags, so the whole plane is
    // priced per subtile rather than per tile.
    let mut rate =
      FRAME_LEVEL_RESTORE_BITS[RestorationType::Bilateral as usize] << PROB_COST_SHIFT;
    for unit in units.iter() {
      if let RestorationFilter::Bilateral { levels } = unit {
        for &l in levels.iter() {
          rate += cost_bit(RESTORE_NONE_BILATERAL_PROB, l >= 0);
          if l >= 0 {
            rate += level_bits << PROB_COST_SHIFT;
          }
        }
      }
    }
    let rp = RestorationPlane { rtype: RestorationType::Bilateral, units };
    let err = self.try_plane(&rp)?;
    Ok(TypeSearch { cost: self.rd(rate, err), units: rp.units, tile_cost })
  }

  fn search_wiener(&mut self) -> Result<TypeSearch, CodecError> {
    let n = self.tiles.ntiles();
    let mut units = vec![RestorationFilter::None; n];
    let mut tile_cost = vec![i64::MAX; n];

    for tile_idx in 0..n {
      let l = self.limits(tile_idx, 0, 0, true);
      if l.width() == 0 || l.height() == 0 {
        continue;
      }
      let (m, h) = compute_stats(self.rec, self.src, l)?;
      let (vfilterd, hfilterd) = wiener_decompose_sep_sym(&m, &h);
      let vfilter = quantize_sym_filter(&vfilterd);
      let hfilter = quantize_sym_filter(&hfilterd);
      // Filters that do not lower the quadratic error over identity are
      // dropped before trying them.
      if compute_score(&m, &h, vfilter, hfilter) > 0.0 {
        continue;
      }
      self.settle_tile(
        RestorationFilter::Wiener { vfilter, hfilter },
        tile_idx,
        WIENER_FILT_BITS,
        RESTORE_NONE_WIENER_PROB,
        &mut units,
        &mut tile_cost,
      )?;
    }

    let (cost, units) = self.plane_cost(
      RestorationType::Wiener,
      units,
      RESTORE_NONE_WIENER_PROB,
      |_| WIENER_FILT_BITS as u32,
    )?;
    Ok(TypeSearch { cost, units, tile_cost })
  }

  fn search_sgrproj(&mut self) -> Result<TypeSearch, CodecError> {
    let n = self.tiles.ntiles();
    let mut units = vec![RestorationFilter::None; n];
    let mut tile_cost = vec![i64::MAX; n];

    for tile_idx in 0..n {
      let l = self.limits(tile_idx, 0, 0, false);
      let (ep, xqd) =
        search_selfguided_restoration(self.rec, self.src, l, self.bit_depth)?;
      self.settle_tile(
        RestorationFilter::Sgrproj { ep, xqd },
        tile_idx,
        SGRPROJ_BITS,
        RESTORE_NONE_SGRPROJ_PROB,
        &mut units,
        &mut tile_cost,
      )?;
    }

    let (cost, units) = self.plane_cost(
      RestorationType::Sgrproj,
      units,
      RESTORE_NONE_SGRPROJ_PROB,
      |_| SGRPROJ_BITS as u32,
    )?;
    Ok(TypeSearch { cost, units, tile_cost })
  }

  /// Coarse to fine search of the domain transform parameter of a tile.
  fn search_domaintxfmrf_param(&mut self, tile_idx: usize) -> Result<u8, CodecError> {
    const FIRST_STEP: usize = 8;
    let mut best: Option<(usize, u64)> = None;
    for p in (FIRST_STEP / 2..DOMAINTXFMRF_PARAMS).step_by(FIRST_STEP) {
      let filter = RestorationFilter::DomainTxfmRf { sigma_r: p as u8 };
      let sse = self.try_tile(&filter, tile_idx, 0, 0)?;
      if best.map_or(true, |(_, b)| sse < b) {
        best = Some((p, sse));
      }
    }
    let (mut best_p, mut best_sse) = best.unwrap_or((0, u64::MAX));
    for (range, step) in [(FIRST_STEP / 2, 2), (1, 1)] {
      let center = best_p;
      let lo = center.saturating_sub(range);
      for p in (lo..=center + range).step_by(step) {
        if p == best_p || p >= DOMAINTXFMRF_PARAMS {
          continue;
        }
        let filter = RestorationFilter::DomainTxfmRf { sigma_r: p as u8 };
        let sse = self.try_tile(&filter, tile_idx, 0, 0)?;
        if sse < best_sse {
          best_p = p;
          best_sse = sse;
        }
      }
    }
    Ok(best_p as u8)
  }

  fn search_domaintxfmrf(&mut self) -> Result<TypeSearch, CodecError> {
    let n = self.tiles.ntiles();
    let mut units = vec![RestorationFilter::None; n];
    let mut tile_cost = vec![i64::MAX; n];

    for tile_idx in 0..n {
      let sigma_r = self.search_domaintxfmrf_param(tile_idx)?;
      self.settle_tile(
        RestorationFilter::DomainTxfmRf { sigma_r },
        tile_idx,
        DOMAINTXFMRF_PARAMS_BITS,
        RESTORE_NONE_DOMAINTXFMRF_PROB,
        &mut units,
        &mut tile_cost,
      )?;
    }

    let (cost, units) = self.plane_cost(
      RestorationType::DomainTxfmRf,
      units,
      RESTORE_NONE_DOMAINTXFMRF_PROB,
      |_| DOMAINTXFMRF_PARAMS_BITS as u32,
    )?;
    Ok(TypeSearch { cost, units, tile_cost })
  }
}

/// Picks the cheapest type of every tile from the per-type tile costs,
/// indexed like [`RestorationType::SWITCHABLE_TYPES`]. Returns the cost of
/// the switchable plane and the chosen types.
fn search_switchable(
  tile_cost: &[Vec<i64>], rdmult: u32,
) -> (i64, Vec<RestorationType>) {
  let rate =
    FRAME_LEVEL_RESTORE_BITS[RestorationType::Switchable as usize] << PROB_COST_SHIFT;
  let mut cost = rdcost(rate, 0, rdmult);
  let ntiles = tile_cost.first().map_or(0, |c| c.len());
  let mut types = Vec::with_capacity(ntiles);
  for t in 0..ntiles {
    let mut best = (RestorationType::None, tile_cost[0][t]);
    for (r, costs) in tile_cost.iter().enumerate().skip(1) {
      if costs[t] < best.1 {
        best = (RestorationType::SWITCHABLE_TYPES[r], costs[t]);
      }
    }
    types.push(best.0);
    cost = cost.saturating_add(best.1);
  }
  (cost, types)
}

/// Wiener statistics of a tile: the cross-correlation `M` of the source
/// with every 7×7 window of the reconstruction, and the autocorrelation
/// `H` of those windows. Window entries are ordered column-major, so the
/// index is `dx * RESTORATION_WIN + dy`.
fn compute_stats<T: Pixel>(
  dgd: &Plane<T>, src: &Plane<T>, l: TileLimits,
) -> Result<([f64; RESTORATION_WIN2], Vec<f64>), CodecError> {
  let mut m = [0f64; RESTORATION_WIN2];
  let mut h: Vec<f64> =
    try_alloc_zeroed(RESTORATION_WIN2 * RESTORATION_WIN2, "wiener stats")?;

  let count = (l.width() * l.height()) as f64;
  let sum: u64 = (l.v_start..l.v_end)
    .flat_map(|y| dgd[y][l.h_start..l.h_end].iter())
    .map(|&p| i32::cast_from(p) as u64)
    .sum();
  let avg = sum as f64 / count;

  let mut yw = [0f64; RESTORATION_WIN2];
  for i in l.v_start..l.v_end {
    for j in l.h_start..l.h_end {
      let x = i32::cast_from(src[i][j]) as f64 - avg;
      for (idx, y) in yw.iter_mut().enumerate() {
        let k = idx / RESTORATION_WIN;
        let ll = idx % RESTORATION_WIN;
        *y = i32::cast_from(dgd[i + ll - RESTORATION_HALFWIN][j + k - RESTORATION_HALFWIN])
          as f64
          - avg;
      }
      for k in 0..RESTORATION_WIN2 {
        m[k] += yw[k] * x;
        h[k * RESTORATION_WIN2 + k] += yw[k] * yw[k];
        for ll in k + 1..RESTORATION_WIN2 {
          let value = yw[k] * yw[ll];
          h[k * RESTORATION_WIN2 + ll] += value;
          h[ll * RESTORATION_WIN2 + k] += value;
        }
      }
    }
  }
  Ok((m, h))
}

/// Solves `a · x = b` for the leading `n` unknowns. Returns `None` when the
/// system is singular.
fn linsolve(n: usize, a: &mut [f64], stride: usize, b: &mut [f64]) -> Option<[f64; RESTORATION_WIN]> {
  // Partial pivoting
  for i in (1..n).rev() {
    if a[(i - 1) * stride] < a[i * stride] {
      for j in 0..n {
        a.swap(i * stride + j, (i - 1) * stride + j);
      }
      b.swap(i, i - 1);
    }
  }
  // Forward elimination
  for k in 0..n - 1 {
    if a[k * stride + k].abs() < 1e-10 {
      return None;
    }
    for i in k..n - 1 {
      let c = a[(i + 1) * stride + k] / a[k * stride + k];
      for j in 0..n {
        a[(i + 1) * stride + j] -= c * a[k * stride + j];
      }
      b[i + 1] -= c * b[k];
    }
  }
  // Backward substitution
  let mut x = [0f64; RESTORATION_WIN];
  for i in (0..n).rev() {
    if a[i * stride + i].abs() < 1e-10 {
      return None;
    }
    let c: f64 = (i + 1..n).map(|j| a[i * stride + j] * x[j]).sum();
    x[i] = (b[i] - c) / a[i * stride + i];
  }
  Some(x)
}

#[inline]
const fn wrap_index(i: usize) -> usize {
  if i >= RESTORATION_HALFWIN1 {
    RESTORATION_WIN - 1 - i
  } else {
    i
  }
}

/// `H` entry of the window pair (`h1`, `v1`) × (`h2`, `v2`).
#[inline]
fn h_at(h: &[f64], h1: usize, v1: usize, h2: usize, v2: usize) -> f64 {
  h[(h1 * RESTORATION_WIN + v1) * RESTORATION_WIN2 + h2 * RESTORATION_WIN + v2]
}

/// Solves the folded symmetric system for one kernel, constrained to unity
/// gain. Returns the full 7-tap kernel.
fn solve_sym_filter(
  mut a: [f64; RESTORATION_WIN], mut b: [f64; RESTORATION_HALFWIN1 * RESTORATION_HALFWIN1],
) -> Option<[f64; RESTORATION_WIN]> {
  let w = RESTORATION_WIN;
  let w2 = RESTORATION_HALFWIN1;
  let c = w2 - 1;
  for i in 0..c {
    a[i] -= a[c] * 2. + b[i * w2 + c] - 2. * b[c * w2 + c];
  }
  for i in 0..c {
    for j in 0..c {
      b[i * w2 + j] -= 2. * (b[i * w2 + c] + b[c * w2 + j] - 2. * b[c * w2 + c]);
    }
  }
  let mut s = linsolve(c, &mut b, w2, &mut a)?;
  s[c] = 1.0;
  for i in w2..w {
    s[i] = s[w - 1 - i];
    s[c] -= 2. * s[i];
  }
  Some(s)
}

/// Fixes the horizontal kernel `b` and refits the vertical kernel `a`.
fn update_a_sep_sym(m: &[f64], h: &[f64], a: &mut [f64; RESTORATION_WIN], b: &[f64; RESTORATION_WIN]) {
  let mut av = [0f64; RESTORATION_WIN];
  let mut bm = [0f64; RESTORATION_HALFWIN1 * RESTORATION_HALFWIN1];
  for i in 0..RESTORATION_WIN {
    for j in 0..RESTORATION_WIN {
      av[wrap_index(j)] += m[i * RESTORATION_WIN + j] * b[i];
    }
  }
  for i in 0..RESTORATION_WIN {
    for j in 0..RESTORATION_WIN {
      let bb = b[i] * b[j];
      for k in 0..RESTORATION_WIN {
        for l in 0..RESTORATION_WIN {
          bm[wrap_index(l) * RESTORATION_HALFWIN1 + wrap_index(k)] +=
            h_at(h, j, k, i, l) * bb;
        }
      }
    }
  }
  if let Some(s) = solve_sym_filter(av, bm) {
    *a = s;
  }
}

/// Fixes the vertical kernel `a` and refits the horizontal kernel `b`.
fn update_b_sep_sym(m: &[f64], h: &[f64], a: &[f64; RESTORATION_WIN], b: &mut [f64; RESTORATION_WIN]) {
  let mut av = [0f64; RESTORATION_WIN];
  let mut bm = [0f64; RESTORATION_HALFWIN1 * RESTORATION_HALFWIN1];
  for i in 0..RESTORATION_WIN {
    for j in 0..RESTORATION_WIN {
      av[wrap_index(i)] += m[i * RESTORATION_WIN + j] * a[j];
    }
  }
  for i in 0..RESTORATION_WIN {
    for j in 0..RESTORATION_WIN {
      let cell = wrap_index(j) * RESTORATION_HALFWIN1 + wrap_index(i);
      for k in 0..RESTORATION_WIN {
        for l in 0..RESTORATION_WIN {
          bm[cell] += h_at(h, i, k, j, l) * a[k] * a[l];
        }
      }
    }
  }
  if let Some(s) = solve_sym_filter(av, bm) {
    *b = s;
  }
}

/// Splits the 2-D Wiener solution into a vertical and a horizontal
/// symmetric kernel by alternating least squares.
fn wiener_decompose_sep_sym(
  m: &[f64; RESTORATION_WIN2], h: &[f64],
) -> ([f64; RESTORATION_WIN], [f64; RESTORATION_WIN]) {
  const INIT_FILT: [f64; RESTORATION_WIN] =
    [0.035623, -0.127154, 0.211436, 0.760190, 0.211436, -0.127154, 0.035623];
  let mut a = INIT_FILT;
  let mut b = INIT_FILT;
  for _ in 1..10 {
    update_a_sep_sym(m, h, &mut a, &b);
    update_b_sep_sym(m, h, &a, &mut b);
  }
  (a, b)
}

/// Quadratic error of the quantized kernels minus that of the identity
/// filter. Negative means the filter helps.
fn compute_score(
  m: &[f64; RESTORATION_WIN2], h: &[f64], vfilter: [i8; 3], hfilter: [i8; 3],
) -> f64 {
  let step = RESTORATION_FILT_STEP as f64;
  let a = wiener_taps(vfilter).map(|t| t as f64 / step);
  let b = wiener_taps(hfilter).map(|t| t as f64 / step);
  let mut ab = [0f64; RESTORATION_WIN2];
  for k in 0..RESTORATION_WIN {
    for l in 0..RESTORATION_WIN {
      ab[k * RESTORATION_WIN + l] = a[l] * b[k];
    }
  }
  let mut p = 0.;
  let mut q = 0.;
  for k in 0..RESTORATION_WIN2 {
    p += ab[k] * m[k];
    for l in 0..RESTORATION_WIN2 {
      q += ab[k] * h[k * RESTORATION_WIN2 + l] * ab[l];
    }
  }
  let center = RESTORATION_WIN2 >> 1;
  let identity = h[center * RESTORATION_WIN2 + center] - 2. * m[center];
  (q - 2. * p) - identity
}

fn quantize_sym_filter(f: &[f64; RESTORATION_WIN]) -> [i8; 3] {
  let mut taps = [0i8; 3];
  for (i, t) in taps.iter_mut().enumerate() {
    let q = (f[i] * RESTORATION_FILT_STEP as f64).round() as i32;
    *t = q.clamp(WIENER_FILT_TAP_MINV[i] as i32, WIENER_FILT_TAP_MAXV[i] as i32)
      as i8;
  }
  taps
}

/// Least-squares blend weights of both guided outputs, falling back to a
/// fixed blend when the system is ill-posed.
fn get_proj_subspace(
  src: &[i64], dgd: &[i64], flt1: &[i64], flt2: &[i64],
) -> [i32; 2] {
  let mut xq = [-(1 << SGRPROJ_PRJ_BITS) / 4, 0];
  xq[1] = (1 << SGRPROJ_PRJ_BITS) - xq[0];
  let mut h = [[0f64; 2]; 2];
  let mut c = [0f64; 2];
  for (((&s, &u), &f1), &f2) in src.iter().zip(dgd).zip(flt1).zip(flt2) {
    let u = u as f64;
    let s = s as f64 - u;
    let f1 = f1 as f64 - u;
    let f2 = f2 as f64 - u;
    h[0][0] += f1 * f1;
    h[1][1] += f2 * f2;
    h[0][1] += f1 * f2;
    c[0] += f1 * s;
    c[1] += f2 * s;
  }
  let size = src.len() as f64;
  h[0][0] /= size;
  h[0][1] /= size;
  h[1][1] /= size;
  h[1][0] = h[0][1];
  c[0] /= size;
  c[1] /= size;
  let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
  if det < 1e-8 {
    return xq;
  }
  let x0 = (h[1][1] * c[0] - h[0][1] * c[1]) / det;
  let x1 = (h[0][0] * c[1] - h[1][0] * c[0]) / det;
  let scale = (1 << SGRPROJ_PRJ_BITS) as f64;
  [(x0 * scale).round() as i32, (x1 * scale).round() as i32]
}

/// Inverse of [`decode_xq`], clamped to the codable range.
pub fn encode_xq(xq: [i32; 2]) -> [i8; 2] {
  let xqd0 = (-xq[0]).clamp(SGRPROJ_PRJ_MIN0, SGRPROJ_PRJ_MAX0);
  let xqd1 = ((1 << SGRPROJ_PRJ_BITS) + xqd0 - xq[1])
    .clamp(SGRPROJ_PRJ_MIN1, SGRPROJ_PRJ_MAX1);
  [xqd0 as i8, xqd1 as i8]
}

fn get_pixel_proj_error(
  src: &[i64], dgd: &[i64], flt1: &[i64], flt2: &[i64], xqd: [i8; 2],
) -> i64 {
  let xq = decode_xq(xqd);
  src
    .iter()
    .zip(dgd)
    .zip(flt1)
    .zip(flt2)
    .map(|(((&s, &u), &f1), &f2)| {
      let v = xq[0] as i64 * (f1 - u) + xq[1] as i64 * (f2 - u)
        + (u << SGRPROJ_PRJ_BITS);
      let e = round_shift_i64(v, SGRPROJ_RST_BITS + SGRPROJ_PRJ_BITS)
        - round_shift_i64(s, SGRPROJ_RST_BITS);
      e * e
    })
    .sum()
}

/// Best parameter set and projection of the self-guided filter for the
/// rectangle `l`.
fn search_selfguided_restoration<T: Pixel>(
  dat: &Plane<T>, src: &Plane<T>, l: TileLimits, bit_depth: usize,
) -> Result<(u8, [i8; 2]), CodecError> {
  let (w, h) = (l.width(), l.height());
  let mut pixels: Vec<i64> = try_alloc_zeroed(w * h, "sgrproj search")?;
  let mut dgd: Vec<i64> = try_alloc_zeroed(w * h, "sgrproj search")?;
  let mut srd: Vec<i64> = try_alloc_zeroed(w * h, "sgrproj search")?;
  for y in 0..h {
    for x in 0..w {
      let k = y * w + x;
      pixels[k] = i32::cast_from(dat[l.v_start + y][l.h_start + x]) as i64;
      dgd[k] = pixels[k] << SGRPROJ_RST_BITS;
      srd[k] = (i32::cast_from(src[l.v_start + y][l.h_start + x]) as i64)
        << SGRPROJ_RST_BITS;
    }
  }

  let mut best: Option<(i64, u8, [i8; 2])> = None;
  for ep in 0..SGRPROJ_PARAMS {
    let (flt1, flt2) = selfguided_pair(&pixels, w, h, bit_depth, ep)?;
    let exqd = encode_xq(get_proj_subspace(&srd, &dgd, &flt1, &flt2));
    let err = get_pixel_proj_error(&srd, &dgd, &flt1, &flt2, exqd);
    if best.map_or(true, |(b, ..)| err < b) {
      best = Some((err, ep as u8, exqd));
    }
  }
  Ok(best.map_or((0, [0, 0]), |(_, ep, xqd)| (ep, xqd)))
}

/// Chooses the restoration filters of every plane of `rec`, the
/// reconstruction of `src`.
///
/// `search` limits the types tried; leaving a plane alone is always an
/// option.
///
/// # Errors
///
/// Returns `ResourceExhausted` if a trial buffer cannot be allocated.
#[profiling::function]
pub fn pick_filter_restoration<T: Pixel>(
  rec: &Frame<T>, src: &Frame<T>, keyframe: bool, bit_depth: usize,
  qindex: u8, search: &RestorationSearch,
) -> Result<RestorationState, CodecError> {
  let mut rs = RestorationState::new(rec.width(), rec.height());
  let rdmult = rd_mult(qindex, bit_depth);

  for (pli, rp) in rs.planes.iter_mut().enumerate() {
    let (rec_p, src_p) = (&rec.planes[pli], &src.planes[pli]);
    let tiles = rs.tiles.for_plane(rec_p.cfg.xdec, rec_p.cfg.ydec);
    let mut ps =
      PlaneSearch::new(src_p, rec_p, tiles, keyframe, bit_depth, rdmult)?;

    let mut results: Vec<(RestorationType, TypeSearch)> =
      vec![(RestorationType::None, ps.search_norestore())];
    if search.sgrproj {
      results.push((RestorationType::Sgrproj, ps.search_sgrproj()?));
    }
    if search.bilateral {
      results.push((RestorationType::Bilateral, ps.search_bilateral()?));
    }
    if search.wiener {
      results.push((RestorationType::Wiener, ps.search_wiener()?));
    }
    if search.domaintxfmrf {
      results.push((RestorationType::DomainTxfmRf, ps.search_domaintxfmrf()?));
    }

    let mut best_type = RestorationType::None;
    let mut best_cost = results[0].1.cost;
    let mut best_units = results[0].1.units.clone();
    for (rtype, r) in results.iter().skip(1) {
      if r.cost < best_cost {
        best_type = *rtype;
        best_cost = r.cost;
        best_units = r.units.clone();
      }
    }

    if search.switchable && results.len() > 2 {
      let n = tiles.ntiles();
      let mut tile_cost = vec![vec![i64::MAX; n]; TYPES];
      for (rtype, r) in results.iter() {
        tile_cost[*rtype as usize] = r.tile_cost.clone();
      }
      let (cost, types) = search_switchable(&tile_cost, rdmult);
      if cost < best_cost {
        best_type = RestorationType::Switchable;
        best_cost = cost;
        best_units = types
          .iter()
          .enumerate()
          .map(|(t, rtype)| {
            results
              .iter()
              .find(|(r, _)| r == rtype)
              .map_or(RestorationFilter::None, |(_, s)| s.units[t])
          })
          .collect();
      }
    }

    log::debug!(
      "restoration: plane {} type {:?}, rd cost {}, {} tiles",
      pli,
      best_type,
      best_cost,
      tiles.ntiles()
    );
    rp.rtype = best_type;
    rp.units = best_units;
  }
  Ok(rs)
}

#[cfg(test)]
mod test {
  use super::*;
  use pretty_assertions::assert_eq;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn ramp_frame(w: usize, h: usize) -> Frame<u8> {
    let mut f = Frame::<u8>::new(w, h);
    for p in f.planes.iter_mut() {
      for (y, row) in p.rows_iter_mut().enumerate() {
        for (x, v) in row.iter_mut().enumerate() {
          *v = (60 + x + 2 * y).min(255) as u8;
        }
      }
    }
    f
  }

  fn plane_sse(a: &Plane<u8>, b: &Plane<u8>) -> u64 {
    let l = TileLimits { h_start: 0, h_end: a.cfg.width, v_start: 0, v_end: a.cfg.height };
    sse_region(a, b, l)
  }

  #[test]
  fn encode_xq_inverts_decode_xq() {
    for xqd in [[-32i8, 0], [0, 95], [10, -20], [95, 95]] {
      assert_eq!(encode_xq(decode_xq(xqd)), xqd);
    }
    // Out of range weights saturate.
    assert_eq!(encode_xq([200, -300]), [SGRPROJ_PRJ_MIN0 as i8, SGRPROJ_PRJ_MAX1 as i8]);
  }

  #[test]
  fn quantized_wiener_taps_are_clamped() {
    let f = [0.5, -0.9, 0.9, 0.0, 0.9, -0.9, 0.5];
    assert_eq!(quantize_sym_filter(&f), [10, -23, 47]);
    let identity = [0., 0., 0., 1., 0., 0., 0.];
    assert_eq!(quantize_sym_filter(&identity), [0, 0, 0]);
  }

  #[test]
  fn switchable_takes_the_cheapest_type_per_tile() {
    let tile_cost = vec![
      vec![100, 100, 100],
      vec![90, i64::MAX, 120],
      vec![i64::MAX, 50, 130],
      vec![95, 60, 100],
      vec![i64::MAX, i64::MAX, i64::MAX],
    ];
    let (cost, types) = search_switchable(&tile_cost, 1000);
    assert_eq!(
      types,
      vec![RestorationType::Sgrproj, RestorationType::Bilateral, RestorationType::None]
    );
    let header = rdcost(2 << PROB_COST_SHIFT, 0, 1000);
    assert_eq!(cost, header + 90 + 50 + 100);
  }

  #[test]
  fn clean_reconstruction_is_left_alone() {
    let src = ramp_frame(64, 64);
    let rs = pick_filter_restoration(&src, &src, true, 8, 100, &RestorationSearch::ALL)
      .unwrap();
    for rp in rs.planes.iter() {
      assert_eq!(rp.rtype, RestorationType::None);
    }
  }

  #[test]
  fn noisy_reconstruction_gets_filtered() {
    let src = ramp_frame(64, 64);
    let mut rec = src.clone();
    let mut rng = StdRng::seed_from_u64(11);
    for v in rec.planes[0].data.iter_mut() {
      *v = (*v as i32 + rng.gen_range(-4..=4)).clamp(0, 255) as u8;
    }
    let rs = pick_filter_restoration(&rec, &src, true, 8, 60, &RestorationSearch::ALL)
      .unwrap();
    assert_ne!(rs.planes[0].rtype, RestorationType::None);

    let before = plane_sse(&src.planes[0], &rec.planes[0]);
    let mut out = rec.clone();
    rs.lrf_filter_frame(&mut out, true, 8).unwrap();
    assert!(plane_sse(&src.planes[0], &out.planes[0]) < before);
  }

  #[test]
  fn wiener_search_undoes_a_blur() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut src = Plane::<u8>::new(64, 64, 0, 0);
    for v in src.data.iter_mut() {
      *v = rng.gen_range(40..200);
    }
    // Mild horizontal blur.
    let mut rec = src.clone();
    for y in 0..64 {
      for x in 1..63 {
        let s = src[y][x - 1] as u32 + 2 * src[y][x] as u32 + src[y][x + 1] as u32;
        rec[y][x] = ((s + 2) / 4) as u8;
      }
    }
    let tiles = RestorationTiles::new(64, 64);
    let mut ps = PlaneSearch::new(&src, &rec, tiles, true, 8, 1).unwrap();
    let r = ps.search_wiener().unwrap();
    assert!(matches!(r.units[0], RestorationFilter::Wiener { .. }));
    assert!(r.cost < ps.search_norestore().cost);
  }
}
