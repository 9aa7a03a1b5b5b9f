//! Engine counters, rendered as Prometheus exposition text.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of one `AddLabel` call, used to bucket write latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Noop,
    Error,
}

impl WriteOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Noop => "noop",
            Self::Error => "error",
        }
    }
}

const OUTCOMES: [WriteOutcome; 3] = [WriteOutcome::Written, WriteOutcome::Noop, WriteOutcome::Error];

/// Upper bounds (seconds) of the write latency histogram buckets.
const BUCKET_BOUNDS: [f64; 8] = [0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

#[derive(Default)]
struct Histogram {
    buckets: [AtomicU64; BUCKET_BOUNDS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        for (bound, bucket) in BUCKET_BOUNDS.iter().zip(&self.buckets) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Process-wide engine metrics: write latency by outcome, the highest
/// allocated cursor value, and the number of live subscriptions.
#[derive(Default)]
pub struct Metrics {
    write: [Histogram; OUTCOMES.len()],
    highest_seq: AtomicI64,
    active_subscriptions: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_write(&self, outcome: WriteOutcome, elapsed: Duration) {
        let idx = OUTCOMES.iter().position(|o| *o == outcome).unwrap_or(0);
        self.write[idx].observe(elapsed);
    }

    pub fn set_highest_seq(&self, seq: i64) {
        self.highest_seq.store(seq, Ordering::Relaxed);
    }

    pub fn set_active_subscriptions(&self, n: usize) {
        self.active_subscriptions.store(n as i64, Ordering::Relaxed);
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "# TYPE tern_server_write_duration_seconds histogram"
        );
        for (outcome, histogram) in OUTCOMES.iter().zip(&self.write) {
            let status = outcome.as_str();
            for (bound, bucket) in BUCKET_BOUNDS.iter().zip(&histogram.buckets) {
                let _ = writeln!(
                    out,
                    "tern_server_write_duration_seconds_bucket{{status=\"{status}\",le=\"{bound}\"}} {}",
                    bucket.load(Ordering::Relaxed)
                );
            }
            let count = histogram.count.load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "tern_server_write_duration_seconds_bucket{{status=\"{status}\",le=\"+Inf\"}} {count}"
            );
            let _ = writeln!(
                out,
                "tern_server_write_duration_seconds_sum{{status=\"{status}\"}} {}",
                histogram.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
            );
            let _ = writeln!(
                out,
                "tern_server_write_duration_seconds_count{{status=\"{status}\"}} {count}"
            );
        }

        let _ = writeln!(out, "# TYPE tern_server_highest_cursor_value gauge");
        let _ = writeln!(
            out,
            "tern_server_highest_cursor_value {}",
            self.highest_seq.load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "# TYPE tern_server_active_subscriptions_count gauge");
        let _ = writeln!(
            out,
            "tern_server_active_subscriptions_count {}",
            self.active_subscriptions.load(Ordering::Relaxed)
        );
        out
    }
}
