// Copyright (c) 2017-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use num_traits::PrimInt;
use std::mem::size_of;

pub trait Fixed {
  fn align_power_of_two(&self, n: usize) -> usize;
  fn align_power_of_two_and_shift(&self, n: usize) -> usize;
}

impl Fixed for usize {
  #[inline]
  fn align_power_of_two(&self, n: usize) -> usize {
    (self + (1 << n) - 1) & !((1 << n) - 1)
  }
  #[inline]
  fn align_power_of_two_and_shift(&self, n: usize) -> usize {
    (self + (1 << n) - 1) >> n
  }
}

pub fn clamp<T: PartialOrd>(input: T, min: T, max: T) -> T {
  if input < min {
    min
  } else if input > max {
    max
  } else {
    input
  }
}

pub trait ILog: PrimInt {
  // Integer binary logarithm of an integer value.
  // Returns floor(log2(self)) + 1, or 0 if self == 0.
  fn ilog(self) -> usize {
    size_of::<Self>() * 8 - self.leading_zeros() as usize
  }
}

impl<T> ILog for T where T: PrimInt {}

#[inline(always)]
pub fn msb(x: i32) -> i32 {
  debug_assert!(x > 0);
  31 ^ (x.leading_zeros() as i32)
}

#[inline(always)]
pub const fn round_shift(value: i32, bit: usize) -> i32 {
  (value + (1 << bit >> 1)) >> bit
}

#[inline(always)]
pub const fn round_shift_i64(value: i64, bit: usize) -> i64 {
  (value + (1 << bit >> 1)) >> bit
}

/// Rounding shift that is symmetric around zero.
#[inline(always)]
pub const fn round_shift_signed(value: i64, bit: usize) -> i64 {
  if value < 0 {
    -round_shift_i64(-value, bit)
  } else {
    round_shift_i64(value, bit)
  }
}

#[inline(always)]
pub const fn ceil_log2(n: usize) -> usize {
  if n < 2 {
    0
  } else {
    (usize::BITS - (n - 1).leading_zeros()) as usize
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn log_helpers() {
    assert_eq!(ILog::ilog(0u32), 0);
    assert_eq!(ILog::ilog(1u32), 1);
    assert_eq!(ILog::ilog(255u32), 8);
    assert_eq!(msb(1), 0);
    assert_eq!(msb(64), 6);
    assert_eq!(ceil_log2(1), 0);
    assert_eq!(ceil_log2(5), 3);
  }

  #[test]
  fn rounding() {
    assert_eq!(round_shift(5, 1), 3);
    assert_eq!(round_shift_signed(-5, 1), -3);
    assert_eq!(13usize.align_power_of_two(3), 16);
    assert_eq!(13usize.align_power_of_two_and_shift(3), 2);
  }
}
