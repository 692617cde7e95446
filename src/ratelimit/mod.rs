// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Sliding two-window rate counter with a bounded wait queue and an
//! advisory block window.
//!
//! A "tick" is one full rate period; a "subtick" is a tick scaled by 256
//! (precision 2^8). Every admission check converts `now` into subticks over
//! the configured period, derives a tick and a two-bucket index, and admits
//! iff the carried-over fraction of the previous bucket plus the current
//! bucket's count stays under the limit.

pub mod spec;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::monitoring::metrics::Metrics;

const SUBTICK_BITS: u64 = 8;
const SUBTICK_SCALE: u64 = 1 << SUBTICK_BITS;

/// Errors surfaced by the rate limiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateError {
    /// The request was denied; retry no sooner than `retry_after`, and if
    /// `block_until` is set, an upstream gate may want to hold the caller
    /// off for that much longer.
    #[error("rate limit exceeded")]
    RateExceeded {
        /// Advisory minimum wait before retrying.
        retry_after: Duration,
        /// Advisory block-window hint, if `BlockAfter` was configured and
        /// tripped.
        block_until: Option<Duration>,
        /// Whether the caller should suppress the `Retry-After` header.
        no_header: bool,
    },
    /// The request's deadline was reached while waiting in the queue.
    #[error("deadline exceeded while waiting for rate limit slot")]
    DeadlineExceeded,
}

/// A single packed window cell: `{ tick_index: 32, count: 32 }` in one
/// atomic u64 so increments and resets are lock-free.
#[derive(Default)]
struct WindowCell(AtomicU64);

impl WindowCell {
    fn pack(tick: u32, count: u32) -> u64 {
        ((tick as u64) << 32) | count as u64
    }

    fn unpack(v: u64) -> (u32, u32) {
        ((v >> 32) as u32, v as u32)
    }

    /// Read `(tick, count)`, treating a stale tick as a zero count.
    fn read_for_tick(&self, tick: u32) -> u32 {
        let (t, c) = Self::unpack(self.0.load(Ordering::Acquire));
        if t == tick {
            c
        } else {
            0
        }
    }

    /// CAS-increment the cell for `tick`, resetting the count to 1 if the
    /// stored tick is stale. Returns the post-increment count.
    fn increment(&self, tick: u32) -> u32 {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let (t, c) = Self::unpack(current);
            let (new_count, fresh) = if t == tick { (c + 1, c) } else { (1, 0) };
            let new_val = Self::pack(tick, new_count);
            if self
                .0
                .compare_exchange_weak(current, new_val, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return fresh + 1;
            }
        }
    }
}

/// Configuration for one keyed limit.
#[derive(Clone, Copy, Debug)]
pub struct LimitConfig {
    /// Maximum admissions per `period`.
    pub limit: u32,
    /// The rolling period the limit applies over.
    pub period: Duration,
    /// Size of the bounded wait queue; `0` disables queueing (outright
    /// rejection on denial).
    pub burst: u32,
    /// Optional advisory block window: `(threshold_per_period, for)`.
    pub block: Option<(u32, Duration)>,
    /// Suppress the `Retry-After` header hint.
    pub no_header: bool,
}

impl LimitConfig {
    /// A bare `limit/period` with no queueing or advisory block.
    pub fn simple(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            burst: 0,
            block: None,
            no_header: false,
        }
    }
}

/// Per-key sliding-window counter, wait queue, and block-window counter.
pub struct LimitCounter {
    cfg: LimitConfig,
    windows: [WindowCell; 2],
    block_window: WindowCell,
    /// Count of callers currently waiting in the bounded queue; doubles as
    /// the next caller's queue position.
    queue_depth: AtomicU64,
    start: Instant,
    metrics: Option<Arc<Metrics>>,
}

// Subticks = (elapsed / period) * 256, computed in nanosecond precision so
// short periods don't truncate to zero.
fn subticks_since(start: Instant, period: Duration, now: Instant) -> u64 {
    let elapsed_ns = now.saturating_duration_since(start).as_nanos();
    let period_ns = period.as_nanos().max(1);
    ((elapsed_ns * SUBTICK_SCALE as u128) / period_ns) as u64
}

impl LimitCounter {
    /// Create a fresh counter for `cfg`, anchored at `start` (normally
    /// `Instant::now()`; exposed for deterministic tests).
    pub fn new(cfg: LimitConfig) -> Self {
        Self {
            cfg,
            windows: [WindowCell::default(), WindowCell::default()],
            block_window: WindowCell::default(),
            queue_depth: AtomicU64::new(0),
            start: Instant::now(),
            metrics: None,
        }
    }

    /// Record admit/queue/reject/block events into a shared metrics
    /// registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The per-admission slot interval a queued caller waits out: the
    /// period divided across the limit, so `limit` queued callers drain
    /// across one `period`.
    fn slot_interval(&self) -> Duration {
        self.cfg.period / self.cfg.limit.max(1)
    }

    fn tick_and_bucket(&self, now: Instant) -> (u32, u32, u64) {
        let subticks = subticks_since(self.start, self.cfg.period, now);
        let tick = subticks >> SUBTICK_BITS;
        let bucket = (tick & 1) as usize as u32;
        (tick as u32, bucket, subticks)
    }

    fn carry(&self, prev_bucket: usize, tick: u32, subticks: u64) -> u32 {
        let prev_count = self.windows[prev_bucket].read_for_tick(tick.wrapping_sub(1));
        let frac = ((!subticks) & 0xFF) as u64;
        let carried = (prev_count as u64 * frac) >> SUBTICK_BITS;
        carried.min((self.cfg.limit / 2) as u64) as u32
    }

    /// Attempt an immediate (non-blocking) admission check.
    fn try_admit_now(&self) -> Result<(), u32> {
        let now = Instant::now();
        let (tick, bucket, subticks) = self.tick_and_bucket(now);
        let prev_bucket = (1 - bucket) as usize;
        let current_bucket = bucket as usize;

        let current_count = self.windows[current_bucket].read_for_tick(tick);
        let carry = self.carry(prev_bucket, tick, subticks);

        if carry + current_count < self.cfg.limit {
            self.windows[current_bucket].increment(tick);
            Ok(())
        } else {
            Err(carry + current_count)
        }
    }

    fn note_block_window(&self) -> bool {
        let Some((threshold, _for)) = self.cfg.block else {
            return false;
        };
        // Reuse the tick granularity of the main period for the block
        // window's own fixed window.
        let now = Instant::now();
        let (tick, _, _) = self.tick_and_bucket(now);
        let count = self.block_window.increment(tick);
        count > threshold
    }

    fn retry_after(&self, position: u64) -> Duration {
        self.slot_interval() * (position as u32 + 1)
    }

    /// Admit a request, waiting in the bounded queue (if configured) until
    /// forced admission, `deadline`, or outright rejection.
    pub async fn admit(&self, deadline: Option<Instant>) -> Result<(), RateError> {
        if self.try_admit_now().is_ok() {
            if let Some(m) = &self.metrics {
                m.ratelimit_admit_total.inc();
            }
            return Ok(());
        }

        if self.cfg.burst == 0 {
            return Err(self.deny());
        }

        if let Some(m) = &self.metrics {
            m.ratelimit_queue_total.inc();
        }
        let position = self.queue_depth.fetch_add(1, Ordering::AcqRel);
        let result = self.wait_in_queue(position, deadline).await;
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
        if result.is_ok() {
            if let Some(m) = &self.metrics {
                m.ratelimit_admit_total.inc();
            }
        }
        result
    }

    async fn wait_in_queue(
        &self,
        position: u64,
        deadline: Option<Instant>,
    ) -> Result<(), RateError> {
        if position >= self.cfg.burst as u64 {
            return Err(self.deny());
        }

        let wait = self.slot_interval() * (position as u32 + 1);
        let wake_at = Instant::now() + wait;

        if let Some(dl) = deadline {
            if dl < wake_at {
                return Err(RateError::DeadlineExceeded);
            }
        }

        tokio::time::sleep_until(wake_at).await;

        // Forced admission: bookkeeping still happens, but the cap is
        // treated as unbounded so the queued caller is never re-rejected
        // (spec's chosen reading of the burst-wait open question).
        let now = Instant::now();
        let (tick, bucket, _) = self.tick_and_bucket(now);
        self.windows[bucket as usize].increment(tick);
        Ok(())
    }

    fn deny(&self) -> RateError {
        if let Some(m) = &self.metrics {
            m.ratelimit_reject_total.inc();
        }
        let position = self.queue_depth.load(Ordering::Acquire);
        let block_tripped = self.note_block_window();
        if block_tripped {
            if let Some(m) = &self.metrics {
                m.ratelimit_block_total.inc();
            }
        }
        RateError::RateExceeded {
            retry_after: self.retry_after(position),
            block_until: if block_tripped {
                self.cfg.block.map(|(_, for_)| for_)
            } else {
                None
            },
            no_header: self.cfg.no_header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_immediately() {
        let counter = LimitCounter::new(LimitConfig::simple(5, Duration::from_secs(1)));
        for _ in 0..5 {
            counter.admit(None).await.unwrap();
        }
        let err = counter.admit(None).await.unwrap_err();
        assert!(matches!(err, RateError::RateExceeded { .. }));
    }

    #[tokio::test]
    async fn queued_admission_eventually_succeeds() {
        let cfg = LimitConfig {
            limit: 1,
            period: Duration::from_millis(50),
            burst: 2,
            block: None,
            no_header: false,
        };
        let counter = LimitCounter::new(cfg);
        counter.admit(None).await.unwrap();
        // Denied immediately, but queued and eventually force-admitted.
        counter.admit(None).await.unwrap();
    }

    #[tokio::test]
    async fn deadline_exceeded_when_wait_too_long() {
        let cfg = LimitConfig {
            limit: 1,
            period: Duration::from_secs(10),
            burst: 5,
            block: None,
            no_header: false,
        };
        let counter = LimitCounter::new(cfg);
        counter.admit(None).await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = counter.admit(Some(deadline)).await.unwrap_err();
        assert_eq!(err, RateError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn block_window_trips_after_repeated_denials() {
        let cfg = LimitConfig {
            limit: 1,
            period: Duration::from_secs(5),
            burst: 0,
            block: Some((2, Duration::from_secs(30))),
            no_header: false,
        };
        let counter = LimitCounter::new(cfg);
        counter.admit(None).await.unwrap();
        let _ = counter.admit(None).await;
        let _ = counter.admit(None).await;
        let err = counter.admit(None).await.unwrap_err();
        match err {
            RateError::RateExceeded { block_until, .. } => assert!(block_until.is_some()),
            _ => panic!("expected RateExceeded"),
        }
    }
}
