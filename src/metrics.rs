//! Prometheus exposition via `metrics` + `metrics-exporter-prometheus`. The
//! vector DB, embedding provider, and LLM provider are capability providers
//! and are not reimplemented here, but the core still emits counters and
//! histograms around calls to them, matching the intent of the Python
//! original's `core/metrics.py`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the process-wide recorder once at startup. Panics if called
/// twice, matching `PrometheusBuilder::install_recorder`'s own contract.
pub fn install() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    HANDLE.set(handle).expect("metrics::install called more than once");
}

/// Renders the current Prometheus exposition text for `GET /metrics`.
/// Empty string if `install` was never called (e.g. in unit tests).
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub mod names {
    pub const INGESTION_STARTED: &str = "coderag_ingestion_started_total";
    pub const INGESTION_COMPLETED: &str = "coderag_ingestion_completed_total";
    pub const INGESTION_FAILED: &str = "coderag_ingestion_failed_total";
    pub const CHUNKS_CREATED: &str = "coderag_chunks_created_total";
    pub const SECRETS_DETECTED: &str = "coderag_secrets_detected_total";
    pub const QUERY_REQUESTS: &str = "coderag_query_requests_total";
    pub const QUERY_RATE_LIMITED: &str = "coderag_query_rate_limited_total";
    pub const VECTOR_INDEX_CALL_SECONDS: &str = "coderag_vector_index_call_seconds";
    pub const EMBEDDING_CALL_SECONDS: &str = "coderag_embedding_call_seconds";
    pub const LLM_CALL_SECONDS: &str = "coderag_llm_call_seconds";
}

pub fn record_ingestion_started() {
    metrics::counter!(names::INGESTION_STARTED).increment(1);
}

pub fn record_ingestion_completed(chunks: u64, secrets: u64) {
    metrics::counter!(names::INGESTION_COMPLETED).increment(1);
    metrics::counter!(names::CHUNKS_CREATED).increment(chunks);
    metrics::counter!(names::SECRETS_DETECTED).increment(secrets);
}

pub fn record_ingestion_failed() {
    metrics::counter!(names::INGESTION_FAILED).increment(1);
}

pub fn record_query_request() {
    metrics::counter!(names::QUERY_REQUESTS).increment(1);
}

pub fn record_query_rate_limited() {
    metrics::counter!(names::QUERY_RATE_LIMITED).increment(1);
}

pub fn record_vector_index_call(seconds: f64) {
    metrics::histogram!(names::VECTOR_INDEX_CALL_SECONDS).record(seconds);
}

pub fn record_embedding_call(seconds: f64) {
    metrics::histogram!(names::EMBEDDING_CALL_SECONDS).record(seconds);
}

pub fn record_llm_call(seconds: f64) {
    metrics::histogram!(names::LLM_CALL_SECONDS).record(seconds);
}
