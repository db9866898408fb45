use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept for the percentile window; older samples are dropped
pub const LATENCY_WINDOW: usize = 1000;

/// Process-wide metrics collector.
///
/// Tracks frame throughput, region/text yield, fallback usage and latency.
/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Frame Metrics
    frames_processed: AtomicUsize,
    frame_latency_ms: RwLock<VecDeque<u64>>,

    // Failures keyed by error kind (decode, detection, internal, bad_request)
    frame_failures: DashMap<String, AtomicUsize>,

    // Region Metrics
    regions_detected: AtomicUsize,
    regions_with_text: AtomicUsize,
    recognition_failures: AtomicUsize,

    // Fallback Metrics
    fallback_runs: AtomicUsize,
    fallback_hits: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                frames_processed: AtomicUsize::new(0),
                frame_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                frame_failures: DashMap::new(),
                regions_detected: AtomicUsize::new(0),
                regions_with_text: AtomicUsize::new(0),
                recognition_failures: AtomicUsize::new(0),
                fallback_runs: AtomicUsize::new(0),
                fallback_hits: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_frame(&self, duration: Duration) {
        self.inner.frames_processed.fetch_add(1, Ordering::Relaxed);
        let mut latency = self.inner.frame_latency_ms.write();
        if latency.len() == LATENCY_WINDOW {
            latency.pop_front();
        }
        latency.push_back(duration.as_millis() as u64);
    }

    pub fn record_failure(&self, kind: &str) {
        self.inner
            .frame_failures
            .entry(kind.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_region(&self, has_text: bool) {
        self.inner.regions_detected.fetch_add(1, Ordering::Relaxed);
        if has_text {
            self.inner.regions_with_text.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_recognition_failure(&self) {
        self.inner
            .recognition_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, hit: bool) {
        self.inner.fallback_runs.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.fallback_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut latency: Vec<u64> = self.inner.frame_latency_ms.read().iter().copied().collect();
        latency.sort_unstable();
        let frame_latency_avg_ms = avg(&latency);
        let frame_latency_p50_ms = percentile(&latency, 0.5);
        let frame_latency_p95_ms = percentile(&latency, 0.95);
        let frame_latency_p99_ms = percentile(&latency, 0.99);

        let mut frames_failed: Vec<(String, usize)> = self
            .inner
            .frame_failures
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        frames_failed.sort();

        MetricsSnapshot {
            frames_processed: self.inner.frames_processed.load(Ordering::Relaxed),
            frames_failed,
            frame_latency_avg_ms,
            frame_latency_p50_ms,
            frame_latency_p95_ms,
            frame_latency_p99_ms,
            regions_detected: self.inner.regions_detected.load(Ordering::Relaxed),
            regions_with_text: self.inner.regions_with_text.load(Ordering::Relaxed),
            recognition_failures: self.inner.recognition_failures.load(Ordering::Relaxed),
            fallback_runs: self.inner.fallback_runs.load(Ordering::Relaxed),
            fallback_hits: self.inner.fallback_hits.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();

        let mut failures = String::new();
        for (kind, count) in &snapshot.frames_failed {
            failures.push_str(&format!("frames_failed_total {{kind=\"{}\"}} {}\n", kind, count));
        }

        format!(
            r#"# HELP frames_processed_total Frames that produced a detection set
# TYPE frames_processed_total counter
frames_processed_total {{}} {}

# HELP frames_failed_total Frames that failed, by error kind
# TYPE frames_failed_total counter
{}
# HELP frame_latency_avg_ms Average per-frame pipeline latency in milliseconds
# TYPE frame_latency_avg_ms gauge
frame_latency_avg_ms {{}} {}

# HELP regions_detected_total Regions emitted (detector and fallback)
# TYPE regions_detected_total counter
regions_detected_total {{}} {}

# HELP regions_with_text_total Regions emitted with non-empty text
# TYPE regions_with_text_total counter
regions_with_text_total {{}} {}

# HELP recognition_failures_total Per-region recognizer failures absorbed as empty text
# TYPE recognition_failures_total counter
recognition_failures_total {{}} {}

# HELP fallback_runs_total Whole-frame fallback recognitions attempted
# TYPE fallback_runs_total counter
fallback_runs_total {{}} {}

# HELP fallback_hits_total Whole-frame fallbacks that produced a region
# TYPE fallback_hits_total counter
fallback_hits_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.frames_processed,
            failures,
            snapshot.frame_latency_avg_ms,
            snapshot.regions_detected,
            snapshot.regions_with_text,
            snapshot.recognition_failures,
            snapshot.fallback_runs,
            snapshot.fallback_hits,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_processed: usize,
    pub frames_failed: Vec<(String, usize)>,
    pub frame_latency_avg_ms: u64,
    pub frame_latency_p50_ms: u64,
    pub frame_latency_p95_ms: u64,
    pub frame_latency_p99_ms: u64,
    pub regions_detected: usize,
    pub regions_with_text: usize,
    pub recognition_failures: usize,
    pub fallback_runs: usize,
    pub fallback_hits: usize,
    pub uptime_seconds: u64,
}

// `sorted` must be in ascending order
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_frame(Duration::from_millis(100));
        metrics.record_frame(Duration::from_millis(50));
        metrics.record_failure("decode");
        metrics.record_failure("decode");
        metrics.record_failure("detection");
        metrics.record_region(true);
        metrics.record_region(false);
        metrics.record_recognition_failure();
        metrics.record_fallback(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_processed, 2);
        assert_eq!(snapshot.frame_latency_avg_ms, 75);
        assert_eq!(
            snapshot.frames_failed,
            vec![("decode".to_string(), 2), ("detection".to_string(), 1)]
        );
        assert_eq!(snapshot.regions_detected, 2);
        assert_eq!(snapshot.regions_with_text, 1);
        assert_eq!(snapshot.recognition_failures, 1);
        assert_eq!(snapshot.fallback_runs, 1);
        assert_eq!(snapshot.fallback_hits, 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_frame(Duration::from_millis(20));
        metrics.record_failure("decode");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("frames_processed_total {} 1"));
        assert!(prometheus.contains("frames_failed_total {kind=\"decode\"} 1"));
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 0.5), 0);
        assert_eq!(percentile(&[1, 3, 5], 0.5), 3);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = Metrics::new();
        for _ in 0..LATENCY_WINDOW {
            metrics.record_frame(Duration::from_millis(500));
        }
        for _ in 0..(LATENCY_WINDOW * 3) {
            metrics.record_frame(Duration::from_millis(10));
        }

        assert_eq!(metrics.inner.frame_latency_ms.read().len(), LATENCY_WINDOW);

        // Old slow samples have rotated out; the counter still sees every frame
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_processed, LATENCY_WINDOW * 4);
        assert_eq!(snapshot.frame_latency_avg_ms, 10);
        assert_eq!(snapshot.frame_latency_p99_ms, 10);
    }
}
