//! Prometheus metrics for the capture service.
//!
//! # Metrics Exposed
//!
//! ## Frame flow
//! - `picam_frames_delivered_total` - Frames copied out to the host
//! - `picam_buffers_discarded_total` - Incomplete, mis-sized or event deliveries
//! - `picam_buffers_resubmitted_total` - Buffers returned straight to the port
//! - `picam_recycle_failures_total` - Buffers the port refused on return
//!
//! ## Triggering
//! - `picam_captures_triggered_total` - Capture requests issued
//! - `picam_trigger_failures_total` - Capture requests refused
//!
//! ## Buffers
//! - `picam_buffers_queued` - Buffers waiting for the consumer
//! - `picam_buffers_pooled` - Buffers parked in the pool
//! - `picam_capture_active` - Capture port enabled (1) or not (0)
//!
//! # Example
//!
//! ```no_run
//! use picam_source::capture::{CaptureConfig, FrameService};
//! use picam_source::firmware::SimulatedFirmware;
//! use picam_source::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let firmware = SimulatedFirmware::new().with_autoplay();
//! let mut service = FrameService::start(&firmware, &CaptureConfig::default()).unwrap();
//!
//! service.next_frame().unwrap();
//! registry.update(&MetricsSnapshot::from_service(&service));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError, SharedMetrics};
