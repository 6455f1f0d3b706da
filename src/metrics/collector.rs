//! Metrics collection and registry.

use crate::camera::CameraManager;
use crate::pipeline::PipelineStats;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of camera manager state for metrics update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Cameras currently published.
    pub cameras: usize,
    /// Pipeline handler instances currently matched.
    pub handlers: usize,
    /// Counters summed over every handler.
    pub stats: PipelineStats,
}

impl MetricsSnapshot {
    /// Captures the current state of `manager`.
    pub fn from_manager(manager: &CameraManager) -> Self {
        Self {
            cameras: manager.cameras().len(),
            handlers: manager.handlers().len(),
            stats: manager.stats(),
        }
    }
}

/// Prometheus metrics registry for capture pipelines.
pub struct MetricsRegistry {
    registry: Registry,

    cameras: IntGauge,
    handlers: IntGauge,
    requests_in_flight: IntGauge,

    requests_queued: IntCounter,
    requests_completed: IntCounter,
    requests_cancelled: IntCounter,
    buffers_completed: IntCounter,
    buffers_cancelled: IntCounter,
    hotplug_disconnects: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let cameras = IntGauge::new("capture_pipeline_cameras", "Cameras currently published")?;
        let handlers = IntGauge::new(
            "capture_pipeline_handlers",
            "Pipeline handler instances currently matched",
        )?;
        let requests_in_flight = IntGauge::new(
            "capture_pipeline_requests_in_flight",
            "Requests queued and not yet completed",
        )?;

        let requests_queued = IntCounter::new(
            "capture_pipeline_requests_queued_total",
            "Total requests queued to pipeline handlers",
        )?;
        let requests_completed = IntCounter::new(
            "capture_pipeline_requests_completed_total",
            "Total requests completed with data",
        )?;
        let requests_cancelled = IntCounter::new(
            "capture_pipeline_requests_cancelled_total",
            "Total requests cancelled by stop or unplug",
        )?;
        let buffers_completed = IntCounter::new(
            "capture_pipeline_buffers_completed_total",
            "Total buffers filled by hardware",
        )?;
        let buffers_cancelled = IntCounter::new(
            "capture_pipeline_buffers_cancelled_total",
            "Total buffers returned without data",
        )?;
        let hotplug_disconnects = IntCounter::new(
            "capture_pipeline_hotplug_disconnects_total",
            "Total pipeline disconnections caused by device removal",
        )?;

        registry.register(Box::new(cameras.clone()))?;
        registry.register(Box::new(handlers.clone()))?;
        registry.register(Box::new(requests_in_flight.clone()))?;
        registry.register(Box::new(requests_queued.clone()))?;
        registry.register(Box::new(requests_completed.clone()))?;
        registry.register(Box::new(requests_cancelled.clone()))?;
        registry.register(Box::new(buffers_completed.clone()))?;
        registry.register(Box::new(buffers_cancelled.clone()))?;
        registry.register(Box::new(hotplug_disconnects.clone()))?;

        Ok(Self {
            registry,
            cameras,
            handlers,
            requests_in_flight,
            requests_queued,
            requests_completed,
            requests_cancelled,
            buffers_completed,
            buffers_cancelled,
            hotplug_disconnects,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        let stats = &snapshot.stats;

        self.cameras.set(snapshot.cameras as i64);
        self.handlers.set(snapshot.handlers as i64);
        self.requests_in_flight.set(stats.requests_in_flight() as i64);

        // Counters only move forward. Handlers dropped at unplug take their
        // counts with them, so the totals never decrease here.
        advance(&self.requests_queued, stats.requests_queued);
        advance(&self.requests_completed, stats.requests_completed);
        advance(&self.requests_cancelled, stats.requests_cancelled);
        advance(&self.buffers_completed, stats.buffers_completed);
        advance(&self.buffers_cancelled, stats.buffers_cancelled);
        advance(&self.hotplug_disconnects, stats.disconnects);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
