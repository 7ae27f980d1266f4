//! In-process atomic counters for pipeline stages and ingest sources.
//! `prometheus` backs an optional exposition endpoint the api binary can
//! mount.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Metrics {
    inner: Arc<MetricsInner>,
    pub registry: Registry,
    pub documents_processed_total: IntCounter,
    pub documents_failed_total: IntCounter,
    pub stage_transitions_total: IntCounterVec,
    pub ingest_errors_total: IntCounterVec,
}

struct MetricsInner {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_created: AtomicU64,
    total_processing_time_ms: AtomicU64,
    embeddings_generated: AtomicU64,
    ingest_files_seen: AtomicU64,
    ingest_duplicates_skipped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let documents_processed_total =
            IntCounter::with_opts(Opts::new("documents_processed_total", "documents processed"))
                .unwrap();
        let documents_failed_total =
            IntCounter::with_opts(Opts::new("documents_failed_total", "documents failed"))
                .unwrap();
        let stage_transitions_total = IntCounterVec::new(
            Opts::new("stage_transitions_total", "pipeline stage transitions"),
            &["stage"],
        )
        .unwrap();
        let ingest_errors_total = IntCounterVec::new(
            Opts::new("ingest_errors_total", "ingest source errors"),
            &["source_type"],
        )
        .unwrap();

        registry
            .register(Box::new(documents_processed_total.clone()))
            .ok();
        registry
            .register(Box::new(documents_failed_total.clone()))
            .ok();
        registry
            .register(Box::new(stage_transitions_total.clone()))
            .ok();
        registry
            .register(Box::new(ingest_errors_total.clone()))
            .ok();

        Self {
            inner: Arc::new(MetricsInner {
                documents_processed: AtomicU64::new(0),
                documents_failed: AtomicU64::new(0),
                chunks_created: AtomicU64::new(0),
                total_processing_time_ms: AtomicU64::new(0),
                embeddings_generated: AtomicU64::new(0),
                ingest_files_seen: AtomicU64::new(0),
                ingest_duplicates_skipped: AtomicU64::new(0),
            }),
            registry,
            documents_processed_total,
            documents_failed_total,
            stage_transitions_total,
            ingest_errors_total,
        }
    }

    pub fn record_stage(&self, stage: &str) {
        self.stage_transitions_total.with_label_values(&[stage]).inc();
    }

    pub fn record_ingest_error(&self, source_type: &str) {
        self.ingest_errors_total.with_label_values(&[source_type]).inc();
    }

    pub fn increment_documents_processed(&self) {
        self.inner.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_processed_total.inc();
    }

    pub fn increment_documents_failed(&self) {
        self.inner.documents_failed.fetch_add(1, Ordering::Relaxed);
        self.documents_failed_total.inc();
    }

    pub fn add_chunks_created(&self, count: u64) {
        self.inner.chunks_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_processing_time(&self, duration: Duration) {
        self.inner
            .total_processing_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn add_embeddings_generated(&self, count: u64) {
        self.inner.embeddings_generated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_ingest_files_seen(&self) {
        self.inner.ingest_files_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ingest_duplicates_skipped(&self) {
        self.inner
            .ingest_duplicates_skipped
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_documents_processed(&self) -> u64 {
        self.inner.documents_processed.load(Ordering::Relaxed)
    }

    pub fn get_average_processing_time_ms(&self) -> f64 {
        let processed = self.get_documents_processed();
        if processed == 0 {
            return 0.0;
        }
        let total = self.inner.total_processing_time_ms.load(Ordering::Relaxed);
        total as f64 / processed as f64
    }

    pub fn print_summary(&self) {
        println!("\n=== METRICS SUMMARY ===");
        println!("Documents processed: {}", self.get_documents_processed());
        println!(
            "Documents failed: {}",
            self.inner.documents_failed.load(Ordering::Relaxed)
        );
        println!(
            "Chunks created: {}",
            self.inner.chunks_created.load(Ordering::Relaxed)
        );
        println!(
            "Embeddings generated: {}",
            self.inner.embeddings_generated.load(Ordering::Relaxed)
        );
        println!(
            "Ingest files seen: {}",
            self.inner.ingest_files_seen.load(Ordering::Relaxed)
        );
        println!(
            "Ingest duplicates skipped: {}",
            self.inner.ingest_duplicates_skipped.load(Ordering::Relaxed)
        );
        println!(
            "Average processing time: {:.2}ms",
            self.get_average_processing_time_ms()
        );
        println!("========================\n");
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
