use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{Instrument, info, info_span};

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Counters for the Clash of Clans API requests, reported once per minute.
#[derive(Debug)]
pub struct RequestMetrics {
    started: Instant,
    requests: AtomicU64,
    failures: AtomicU64,
    label: &'static str,
}

/// Counter values at the previous report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Snapshot {
    requests: u64,
    failures: u64,
}

impl RequestMetrics {
    pub fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            label,
        })
    }

    pub fn inc(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            requests: self.total(),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn log_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        let mut previous = Snapshot::default();
        loop {
            ticker.tick().await;
            let current = self.snapshot();
            let minutes = self.started.elapsed().as_secs_f64() / 60.0;
            report(previous, current, minutes)
                .instrument(info_span!("📊", api = self.label))
                .await;
            previous = current;
        }
    }
}

async fn report(previous: Snapshot, current: Snapshot, minutes: f64) {
    let per_minute = if minutes > 0.0 {
        current.requests as f64 / minutes
    } else {
        0.0
    };
    info!(
        last_interval = current.requests - previous.requests,
        failed = current.failures - previous.failures,
        total = current.requests,
        per_minute = format!("{per_minute:.2}"),
        "📊 API requests"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_separate() {
        let metrics = RequestMetrics::new("test");
        metrics.inc();
        metrics.inc();
        metrics.inc_failure();

        assert_eq!(
            metrics.snapshot(),
            Snapshot {
                requests: 2,
                failures: 1
            }
        );
        assert_eq!(metrics.total(), 2);
    }

    #[tokio::test]
    async fn log_loop_keeps_running() {
        tokio::time::pause();

        let metrics = RequestMetrics::new("test");
        let handle = tokio::spawn(metrics.clone().log_loop());

        tokio::time::advance(REPORT_INTERVAL * 2 + Duration::from_secs(1)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
