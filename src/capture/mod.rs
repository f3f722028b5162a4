//! Camera capture: configuration, buffer exchange, scheduling and the
//! synchronous frame service built from them.
//!
//! [`FrameService`] is the entry point. The other modules are public so a
//! host can drive the pieces directly, for example to configure a camera
//! without streaming from it.

mod config;
mod configurator;
mod exchange;
mod frame;
mod params;
mod scheduler;
mod service;

pub use config::{CaptureConfig, CaptureMode, CaptureModeKind, ConfigError, FileConfig, OutputConfig};
pub use configurator::{camera_config, configure, ConfiguredCamera, PortPlan, MIN_CAPTURE_BUFFERS};
pub use exchange::{
    buffer_queue, BufferCensus, BufferExchange, BufferPool, BufferPort, BufferQueue,
    ComponentPort, QueueProducer, RecycleOutcome,
};
pub use frame::{Frame, FrameGeometry};
pub use params::{CameraParameters, ParameterError};
pub use scheduler::{CaptureScheduler, Clock, ManualClock, MonotonicClock, SchedulerState, Trigger};
pub use service::{BufferRejection, CaptureStats, FrameService, PostProcess};
