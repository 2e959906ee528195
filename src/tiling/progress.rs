// Copyright (c) 2019-2022, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crossbeam::utils::Backoff;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of mode-info rows of a frame that have been fully coded.
///
/// One producer publishes rows in increasing order; any number of readers
/// wait for the rows they depend on.
#[derive(Debug)]
pub struct RowProgress {
  done: AtomicUsize,
  rows: usize,
}

impl RowProgress {
  pub const fn new(rows: usize) -> Self {
    RowProgress { done: AtomicUsize::new(0), rows }
  }

  /// Publish that the first `rows` rows are final.
  pub fn advance(&self, rows: usize) {
    let rows = rows.min(self.rows);
    let prev = self.done.fetch_max(rows, Ordering::Release);
    debug_assert!(prev <= rows || prev == self.rows);
  }

  pub fn finish(&self) {
    self.done.store(self.rows, Ordering::Release);
  }

  #[inline]
  pub fn rows_done(&self) -> usize {
    self.done.load(Ordering::Acquire)
  }

  #[inline]
  pub fn is_finished(&self) -> bool {
    self.rows_done() >= self.rows
  }

  /// Block until at least `rows` rows are published.
  pub fn wait_for(&self, rows: usize) {
    let rows = rows.min(self.rows);
    let backoff = Backoff::new();
    while self.rows_done() < rows {
      if backoff.is_completed() {
        std::thread::yield_now();
      } else {
        backoff.snooze();
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn waiter_sees_published_rows() {
    let progress = Arc::new(RowProgress::new(16));
    let producer = {
      let progress = Arc::clone(&progress);
      std::thread::spawn(move || {
        for r in 1..=16 {
          progress.advance(r);
        }
      })
    };
    progress.wait_for(12);
    assert!(progress.rows_done() >= 12);
    producer.join().unwrap();
    assert!(progress.is_finished());
  }

  #[test]
  fn requests_past_the_end_are_clamped() {
    let progress = RowProgress::new(4);
    progress.finish();
    progress.wait_for(100);
    assert_eq!(progress.rows_done(), 4);
  }
}
