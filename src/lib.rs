//! Raspberry Pi Camera Frame Source
//!
//! Turns the camera firmware's asynchronous component/port/buffer interface
//! into a synchronous "fetch the next frame" service for a motion-detection
//! host. Frames come out as planar YUV 4:2:0.
//!
//! # Architecture
//!
//! ```text
//!            firmware callback thread          host capture thread
//!  camera ──▶ port ──▶ QueueProducer ══queue══▶ FrameService::next ──▶ host
//!               ▲                                   │
//!               └────────── recycle ────────────────┘
//!                      (CaptureScheduler retriggers stills here)
//! ```
//!
//! - `firmware`: the component interface as traits, plus a simulated
//!   implementation
//! - `capture`: component configuration, buffer exchange, scheduling and
//!   the frame service
//! - `metrics`: Prometheus counters for the service
//!
//! # Example
//!
//! ```no_run
//! use picam_source::{CaptureConfig, FrameService, SimulatedFirmware};
//!
//! let firmware = SimulatedFirmware::new().with_autoplay();
//! let config = CaptureConfig::with_dimensions(640, 480);
//! let mut service = FrameService::start(&firmware, &config).unwrap();
//!
//! let mut frame = vec![0u8; 640 * 480 * 3 / 2];
//! for _ in 0..10 {
//!     service.next(&mut frame).unwrap();
//! }
//! service.cleanup();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod error;
pub mod firmware;
pub mod metrics;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureMode, CaptureStats, Frame, FrameGeometry, FrameService};
pub use error::CaptureError;
pub use firmware::{Firmware, SimulatedFirmware};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
