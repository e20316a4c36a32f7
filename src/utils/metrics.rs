use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide metrics collector.
///
/// Tracks detection volume, ordering, layer store traffic, OCR merges
/// and phase durations. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Detection
    detections_run: AtomicUsize,
    candidates_decoded: AtomicUsize,
    boxes_kept: AtomicUsize,
    boxes_suppressed: AtomicUsize,
    detection_latency_us: RwLock<Vec<u64>>,
    label_counters: DashMap<String, AtomicUsize>,

    // Ordering
    regions_ordered: AtomicUsize,
    stale_discards: AtomicUsize,

    // Layer store
    store_reads: AtomicUsize,
    store_writes: AtomicUsize,
    store_misses: AtomicUsize,

    // OCR
    ocr_updates: AtomicUsize,
    ocr_failures: AtomicUsize,

    // Phases
    phase1_duration_ms: RwLock<Vec<u64>>,
    phase2_duration_ms: RwLock<Vec<u64>>,
    phase3_duration_ms: RwLock<Vec<u64>>,

    images_processed: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                detections_run: AtomicUsize::new(0),
                candidates_decoded: AtomicUsize::new(0),
                boxes_kept: AtomicUsize::new(0),
                boxes_suppressed: AtomicUsize::new(0),
                detection_latency_us: RwLock::new(Vec::new()),
                label_counters: DashMap::new(),
                regions_ordered: AtomicUsize::new(0),
                stale_discards: AtomicUsize::new(0),
                store_reads: AtomicUsize::new(0),
                store_writes: AtomicUsize::new(0),
                store_misses: AtomicUsize::new(0),
                ocr_updates: AtomicUsize::new(0),
                ocr_failures: AtomicUsize::new(0),
                phase1_duration_ms: RwLock::new(Vec::new()),
                phase2_duration_ms: RwLock::new(Vec::new()),
                phase3_duration_ms: RwLock::new(Vec::new()),
                images_processed: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Detection
    pub fn record_detection(&self, candidates: usize, kept: usize, duration: Duration) {
        self.inner.detections_run.fetch_add(1, Ordering::Relaxed);
        self.inner.candidates_decoded.fetch_add(candidates, Ordering::Relaxed);
        self.inner.boxes_kept.fetch_add(kept, Ordering::Relaxed);
        self.inner
            .boxes_suppressed
            .fetch_add(candidates.saturating_sub(kept), Ordering::Relaxed);
        self.inner
            .detection_latency_us
            .write()
            .push(duration.as_micros() as u64);
    }

    pub fn record_label(&self, label: &str) {
        self.inner
            .label_counters
            .entry(label.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Ordering
    pub fn record_ordering(&self, regions: usize) {
        self.inner.regions_ordered.fetch_add(regions, Ordering::Relaxed);
        self.inner.images_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.inner.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    // Layer store
    pub fn record_store_read(&self) {
        self.inner.store_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write(&self) {
        self.inner.store_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_miss(&self) {
        self.inner.store_misses.fetch_add(1, Ordering::Relaxed);
    }

    // OCR
    pub fn record_ocr_update(&self) {
        self.inner.ocr_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ocr_failure(&self) {
        self.inner.ocr_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Phases
    pub fn record_phase1_duration(&self, duration: Duration) {
        self.inner.phase1_duration_ms.write().push(duration.as_millis() as u64);
    }

    pub fn record_phase2_duration(&self, duration: Duration) {
        self.inner.phase2_duration_ms.write().push(duration.as_millis() as u64);
    }

    pub fn record_phase3_duration(&self, duration: Duration) {
        self.inner.phase3_duration_ms.write().push(duration.as_millis() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.detection_latency_us.read();
        let detection_latency_avg_us = avg(&latency);
        let detection_latency_p50_us = percentile(&latency, 0.5);
        let detection_latency_p95_us = percentile(&latency, 0.95);
        drop(latency);

        let phase1_avg = avg(&self.inner.phase1_duration_ms.read());
        let phase2_avg = avg(&self.inner.phase2_duration_ms.read());
        let phase3_avg = avg(&self.inner.phase3_duration_ms.read());

        let candidates = self.inner.candidates_decoded.load(Ordering::Relaxed);
        let suppressed = self.inner.boxes_suppressed.load(Ordering::Relaxed);
        let suppression_rate = if candidates > 0 {
            suppressed as f64 / candidates as f64
        } else {
            0.0
        };

        let labels = self
            .inner
            .label_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            detections_run: self.inner.detections_run.load(Ordering::Relaxed),
            candidates_decoded: candidates,
            boxes_kept: self.inner.boxes_kept.load(Ordering::Relaxed),
            boxes_suppressed: suppressed,
            suppression_rate,
            detection_latency_avg_us,
            detection_latency_p50_us,
            detection_latency_p95_us,
            labels,
            regions_ordered: self.inner.regions_ordered.load(Ordering::Relaxed),
            stale_discards: self.inner.stale_discards.load(Ordering::Relaxed),
            store_reads: self.inner.store_reads.load(Ordering::Relaxed),
            store_writes: self.inner.store_writes.load(Ordering::Relaxed),
            store_misses: self.inner.store_misses.load(Ordering::Relaxed),
            ocr_updates: self.inner.ocr_updates.load(Ordering::Relaxed),
            ocr_failures: self.inner.ocr_failures.load(Ordering::Relaxed),
            phase1_avg_ms: phase1_avg,
            phase2_avg_ms: phase2_avg,
            phase3_avg_ms: phase3_avg,
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();

        let mut label_lines = String::new();
        for (label, count) in &snapshot.labels {
            label_lines.push_str(&format!("detections_by_label {{label=\"{}\"}} {}\n", label, count));
        }

        format!(
            r#"# HELP candidates_decoded_total Candidate boxes produced by the decoder
# TYPE candidates_decoded_total counter
candidates_decoded_total {{}} {}

# HELP boxes_suppressed_total Candidates removed by suppression
# TYPE boxes_suppressed_total counter
boxes_suppressed_total {{}} {}

# HELP detection_latency_avg_us Average decode + suppress latency in microseconds
# TYPE detection_latency_avg_us gauge
detection_latency_avg_us {{}} {}

# HELP detections_by_label Kept boxes per class label
# TYPE detections_by_label counter
{}
# HELP regions_ordered_total Text regions placed in reading order
# TYPE regions_ordered_total counter
regions_ordered_total {{}} {}

# HELP stale_discards_total Detection results dropped because the image changed
# TYPE stale_discards_total counter
stale_discards_total {{}} {}

# HELP store_operations_total Layer store traffic
# TYPE store_operations_total counter
store_operations_total {{op="read"}} {}
store_operations_total {{op="write"}} {}
store_operations_total {{op="miss"}} {}

# HELP ocr_results_total OCR merges by outcome
# TYPE ocr_results_total counter
ocr_results_total {{outcome="updated"}} {}
ocr_results_total {{outcome="failed"}} {}

# HELP phase_avg_duration_ms Average phase duration in milliseconds
# TYPE phase_avg_duration_ms gauge
phase_avg_duration_ms {{phase="1"}} {}
phase_avg_duration_ms {{phase="2"}} {}
phase_avg_duration_ms {{phase="3"}} {}

# HELP images_processed_total Images that went through ordering
# TYPE images_processed_total counter
images_processed_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.candidates_decoded,
            snapshot.boxes_suppressed,
            snapshot.detection_latency_avg_us,
            label_lines,
            snapshot.regions_ordered,
            snapshot.stale_discards,
            snapshot.store_reads,
            snapshot.store_writes,
            snapshot.store_misses,
            snapshot.ocr_updates,
            snapshot.ocr_failures,
            snapshot.phase1_avg_ms,
            snapshot.phase2_avg_ms,
            snapshot.phase3_avg_ms,
            snapshot.images_processed,
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
    pub detections_run: usize,
    pub candidates_decoded: usize,
    pub boxes_kept: usize,
    pub boxes_suppressed: usize,
    pub suppression_rate: f64,
    pub detection_latency_avg_us: u64,
    pub detection_latency_p50_us: u64,
    pub detection_latency_p95_us: u64,
    pub labels: BTreeMap<String, usize>,
    pub regions_ordered: usize,
    pub stale_discards: usize,
    pub store_reads: usize,
    pub store_writes: usize,
    pub store_misses: usize,
    pub ocr_updates: usize,
    pub ocr_failures: usize,
    pub phase1_avg_ms: u64,
    pub phase2_avg_ms: u64,
    pub phase3_avg_ms: u64,
    pub images_processed: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
