//! Transfer progress reporting
//!
//! Two strategies:
//! - Streaming copies measure real throughput with [`SpeedMeter`].
//! - Buffered copies cannot observe their own progress, so a ticker feeds a
//!   deterministic estimate ([`simulated_bytes`]) that is capped below the
//!   total until the copy confirms completion.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Simulated progress never claims more than this share of the total
pub const SIMULATED_CAP_PERCENT: u64 = 95;

/// Bytes an estimator claims after `elapsed` at `rate_bps`, capped at 95% of `total`
pub fn simulated_bytes(total: u64, elapsed: Duration, rate_bps: u64) -> u64 {
    let cap = total.saturating_mul(SIMULATED_CAP_PERCENT) / 100;
    let claimed = (rate_bps as u128 * elapsed.as_millis()) / 1000;
    claimed.min(cap as u128) as u64
}

/// Running byte/second measurement for a streaming copy
#[derive(Debug)]
pub struct SpeedMeter {
    started: Instant,
}

impl SpeedMeter {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn speed(&self, transferred: u64) -> u64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0;
        }
        (transferred as f64 / elapsed) as u64
    }
}

/// Stops the simulation ticker when stopped or dropped
pub struct SimulationHandle {
    token: CancellationToken,
    _guard: DropGuard,
}

impl SimulationHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Spawn a ticker that reports `(transferred, speed)` every `tick` until stopped.
///
/// Reported values only ever grow and stop changing once the cap is reached.
pub fn spawn_simulation<F>(total: u64, rate_bps: u64, tick: Duration, mut on_tick: F) -> SimulationHandle
where
    F: FnMut(u64, u64) + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    tokio::spawn(async move {
        let started = Instant::now();
        let mut interval = tokio::time::interval_at(started + tick, tick);
        let mut last = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = child.cancelled() => break,
                _ = interval.tick() => {
                    let claimed = simulated_bytes(total, started.elapsed(), rate_bps);
                    if claimed > last {
                        last = claimed;
                        on_tick(claimed, rate_bps);
                    }
                }
            }
        }
        debug!("Progress simulation stopped at {} of {} bytes", last, total);
    });

    SimulationHandle {
        _guard: token.clone().drop_guard(),
        token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_estimate_is_capped_below_total() {
        let total = 1_000;
        assert_eq!(simulated_bytes(total, Duration::from_millis(500), 1_000), 500);
        assert_eq!(simulated_bytes(total, Duration::from_secs(60), 1_000), 950);
        assert_eq!(simulated_bytes(0, Duration::from_secs(1), 1_000), 0);
    }

    #[test]
    fn test_estimate_is_monotonic() {
        let mut last = 0;
        for ms in (0..5_000).step_by(100) {
            let now = simulated_bytes(10_000, Duration::from_millis(ms), 3_000);
            assert!(now >= last);
            last = now;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_reports_and_stops() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = spawn_simulation(1_000, 1_000, Duration::from_millis(100), move |bytes, _| {
            sink.lock().push(bytes);
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.stop();
        let count = seen.lock().len();
        assert_eq!(*seen.lock(), vec![100, 200, 300]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(seen.lock().len(), count);
    }
}
