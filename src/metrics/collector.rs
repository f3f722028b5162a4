//! Metrics collection and registry.

use crate::capture::FrameService;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of capture state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether the capture port is enabled.
    pub capture_active: bool,
    pub frames_delivered: u64,
    pub buffers_discarded: u64,
    pub buffers_resubmitted: u64,
    pub recycle_failures: u64,
    pub captures_triggered: u64,
    pub trigger_failures: u64,
    /// Buffers waiting in the hand-off queue.
    pub buffers_queued: usize,
    /// Buffers parked in the pool.
    pub buffers_pooled: usize,
}

/// Prometheus metrics registry for the capture service.
pub struct MetricsRegistry {
    registry: Registry,

    // Frame flow
    frames_delivered: IntCounter,
    buffers_discarded: IntCounter,
    buffers_resubmitted: IntCounter,
    recycle_failures: IntCounter,

    // Triggering
    captures_triggered: IntCounter,
    trigger_failures: IntCounter,

    // Buffer whereabouts
    buffers_queued: IntGauge,
    buffers_pooled: IntGauge,
    capture_active: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_delivered = IntCounter::new(
            "picam_frames_delivered_total",
            "Frames copied out to the host",
        )?;
        let buffers_discarded = IntCounter::new(
            "picam_buffers_discarded_total",
            "Deliveries discarded as incomplete, mis-sized or control events",
        )?;
        let buffers_resubmitted = IntCounter::new(
            "picam_buffers_resubmitted_total",
            "Buffers returned directly to the capture port",
        )?;
        let recycle_failures = IntCounter::new(
            "picam_recycle_failures_total",
            "Buffers the capture port refused on return",
        )?;
        let captures_triggered = IntCounter::new(
            "picam_captures_triggered_total",
            "Capture requests issued to the camera",
        )?;
        let trigger_failures = IntCounter::new(
            "picam_trigger_failures_total",
            "Capture requests the camera refused",
        )?;
        let buffers_queued = IntGauge::new(
            "picam_buffers_queued",
            "Buffers waiting in the hand-off queue",
        )?;
        let buffers_pooled = IntGauge::new(
            "picam_buffers_pooled",
            "Buffers parked in the pool instead of the port",
        )?;
        let capture_active = IntGauge::new(
            "picam_capture_active",
            "Capture port enabled (1) or not (0)",
        )?;

        registry.register(Box::new(frames_delivered.clone()))?;
        registry.register(Box::new(buffers_discarded.clone()))?;
        registry.register(Box::new(buffers_resubmitted.clone()))?;
        registry.register(Box::new(recycle_failures.clone()))?;
        registry.register(Box::new(captures_triggered.clone()))?;
        registry.register(Box::new(trigger_failures.clone()))?;
        registry.register(Box::new(buffers_queued.clone()))?;
        registry.register(Box::new(buffers_pooled.clone()))?;
        registry.register(Box::new(capture_active.clone()))?;

        Ok(Self {
            registry,
            frames_delivered,
            buffers_discarded,
            buffers_resubmitted,
            recycle_failures,
            captures_triggered,
            trigger_failures,
            buffers_queued,
            buffers_pooled,
            capture_active,
        })
    }

    /// Updates all metrics from a snapshot of capture state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Counters only move forward; add the difference.
        advance(&self.frames_delivered, snapshot.frames_delivered);
        advance(&self.buffers_discarded, snapshot.buffers_discarded);
        advance(&self.buffers_resubmitted, snapshot.buffers_resubmitted);
        advance(&self.recycle_failures, snapshot.recycle_failures);
        advance(&self.captures_triggered, snapshot.captures_triggered);
        advance(&self.trigger_failures, snapshot.trigger_failures);

        self.buffers_queued.set(snapshot.buffers_queued as i64);
        self.buffers_pooled.set(snapshot.buffers_pooled as i64);
        self.capture_active.set(i64::from(snapshot.capture_active));
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

impl MetricsSnapshot {
    /// Creates a snapshot from the current state of a frame service.
    pub fn from_service(service: &FrameService) -> Self {
        let stats = service.stats();
        let census = service.census().unwrap_or_default();

        Self {
            capture_active: service.is_capturing(),
            frames_delivered: stats.frames_delivered,
            buffers_discarded: stats.buffers_discarded,
            buffers_resubmitted: stats.buffers_resubmitted,
            recycle_failures: stats.recycle_failures,
            captures_triggered: stats.captures_triggered,
            trigger_failures: stats.trigger_failures,
            buffers_queued: census.queued,
            buffers_pooled: census.pooled,
        }
    }
}
