//! The camera firmware's component interface.
//!
//! The firmware exposes components with typed output ports. Ports need a
//! committed format and an explicit enable, and completed buffers come back
//! asynchronously through a callback registered when the port is enabled.
//! This module describes that capability surface as traits so the capture
//! core can run against real firmware bindings or [`SimulatedFirmware`].

mod buffer;
mod control;
mod simulated;

pub use buffer::{BufferFlags, EventCode, FrameBuffer};
pub use control::{
    AwbMode, CameraControl, DrcLevel, ExposureMode, ImageEffect, MeteringMode, RegionOfInterest,
    UnknownMode,
};
pub use simulated::{FailurePoint, FirmwareEvent, Ledger, SimulatedFirmware};

use std::fmt;
use thiserror::Error;

/// Component name of the default camera.
pub const DEFAULT_CAMERA: &str = "vc.ril.camera";
/// Component name of the discard sink.
pub const NULL_SINK: &str = "vc.null_sink";

/// Errors reported by the firmware.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("component '{0}' is not available")]
    ComponentUnavailable(String),
    #[error("component has no output ports")]
    NoOutputPorts,
    #[error("{port} port rejected format: {reason}")]
    FormatRejected { port: OutputPort, reason: String },
    #[error("{0} port is not enabled")]
    PortDisabled(OutputPort),
    #[error("{operation} failed: {detail}")]
    Rejected {
        operation: &'static str,
        detail: String,
    },
}

/// Result type for firmware operations.
pub type FirmwareResult<T> = Result<T, FirmwareError>;

/// A buffer the port refused, handed back to the sender.
#[derive(Debug, Error)]
#[error("port refused buffer {}: {source}", .buffer.id())]
pub struct SendBufferError {
    /// The refused buffer; ownership returns to the caller.
    pub buffer: FrameBuffer,
    #[source]
    pub source: FirmwareError,
}

/// Callback invoked on the firmware's own thread for every completed buffer.
pub type BufferCallback = Box<dyn FnMut(FrameBuffer) + Send>;

/// Output ports of the camera component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPort {
    Preview,
    Video,
    Still,
}

impl OutputPort {
    /// All camera output ports in firmware index order.
    pub const ALL: [Self; 3] = [Self::Preview, Self::Video, Self::Still];

    /// Firmware port index.
    pub fn index(self) -> usize {
        match self {
            Self::Preview => 0,
            Self::Video => 1,
            Self::Still => 2,
        }
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preview => f.write_str("preview"),
            Self::Video => f.write_str("video"),
            Self::Still => f.write_str("still"),
        }
    }
}

/// Elementary stream encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Firmware-internal opaque image handles.
    Opaque,
    /// Planar YUV 4:2:0.
    I420,
}

/// Rational frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Frame period; zero for a zero rate.
    pub fn period(self) -> std::time::Duration {
        if self.num == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs(u64::from(self.den)) / self.num
    }
}

/// Crop rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Format committed to an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortFormat {
    pub encoding: Encoding,
    pub encoding_variant: Option<Encoding>,
    pub width: u32,
    pub height: u32,
    pub crop: Crop,
    pub frame_rate: FrameRate,
}

impl PortFormat {
    /// Opaque I420-variant video format with a full-frame crop.
    pub fn video(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        Self {
            encoding: Encoding::Opaque,
            encoding_variant: Some(Encoding::I420),
            width,
            height,
            crop: Crop {
                x: 0,
                y: 0,
                width,
                height,
            },
            frame_rate,
        }
    }

    /// Same geometry with a planar I420 encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Same format at a different frame rate.
    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }
}

/// Timestamp source for captured buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    Zero,
    RawStc,
    ResetStc,
}

/// Camera-wide configuration block written to the control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    pub max_stills_width: u32,
    pub max_stills_height: u32,
    pub stills_yuv422: bool,
    /// Each capture request yields exactly one still frame.
    pub one_shot_stills: bool,
    pub max_preview_video_width: u32,
    pub max_preview_video_height: u32,
    pub num_preview_video_frames: u32,
    pub stills_capture_circular_buffer_height: u32,
    pub fast_preview_resume: bool,
    pub timestamp_mode: TimestampMode,
}

/// Buffer count and size a port needs to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub count: usize,
    pub size: usize,
}

/// Factory for firmware components.
pub trait Firmware: Send + Sync {
    /// Creates a camera component by name.
    fn create_camera(&self, name: &str) -> FirmwareResult<Box<dyn CameraComponent>>;

    /// Creates a sink component that accepts and drops every buffer.
    fn create_discard_sink(&self) -> FirmwareResult<Box<dyn DiscardSink>>;
}

/// A camera component and its ports.
///
/// Dropping the component destroys it. Configuration calls take `&mut self`
/// and happen before capture starts; the calls made while capturing take
/// `&self`.
pub trait CameraComponent: Send {
    /// Number of output ports the component exposes.
    fn output_count(&self) -> usize;

    /// Enables the control port. `callback` receives control events.
    fn enable_control(&mut self, callback: BufferCallback) -> FirmwareResult<()>;

    /// Writes the camera-wide configuration block.
    fn set_config(&mut self, config: &CameraConfig) -> FirmwareResult<()>;

    /// Writes one camera control value.
    fn set_control(&self, control: &CameraControl) -> FirmwareResult<()>;

    /// Commits `format` to an output port.
    fn commit_format(&mut self, port: OutputPort, format: &PortFormat) -> FirmwareResult<()>;

    /// Buffer count and size the port currently requires.
    fn buffer_requirements(&self, port: OutputPort) -> BufferRequirements;

    /// Overrides the number of buffers the port will circulate.
    fn set_buffer_count(&mut self, port: OutputPort, count: usize);

    fn enable(&mut self) -> FirmwareResult<()>;

    fn disable(&mut self);

    /// Tunnels an output port into a discard sink.
    fn connect(&mut self, port: OutputPort, sink: &mut dyn DiscardSink) -> FirmwareResult<()>;

    /// Tears down the tunnel on `port`, if any.
    fn disconnect(&mut self, port: OutputPort);

    /// Enables an output port; completed buffers go to `callback`.
    fn enable_port(&mut self, port: OutputPort, callback: BufferCallback) -> FirmwareResult<()>;

    /// Disables an output port.
    ///
    /// Buffers held by the port are flushed back through the callback, then
    /// the callback is released.
    fn disable_port(&mut self, port: OutputPort);

    fn is_port_enabled(&self, port: OutputPort) -> bool;

    /// Hands an empty buffer to the port for filling.
    fn send_buffer(&self, port: OutputPort, buffer: FrameBuffer) -> Result<(), SendBufferError>;

    /// Starts (or requests one frame on a one-shot still port) capture.
    fn start_capture(&self, port: OutputPort) -> FirmwareResult<()>;
}

/// A component that swallows everything sent to its input.
///
/// Dropping the sink destroys it.
pub trait DiscardSink: Send {
    fn enable(&mut self) -> FirmwareResult<()>;

    fn disable(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_rate_period() {
        assert_eq!(FrameRate::new(15, 1).period(), Duration::from_nanos(66_666_666));
        assert_eq!(FrameRate::new(0, 1).period(), Duration::ZERO);
    }

    #[test]
    fn test_video_format_crop_covers_frame() {
        let format = PortFormat::video(640, 480, FrameRate::new(30, 1));
        assert_eq!(format.crop.width, 640);
        assert_eq!(format.crop.height, 480);
        assert_eq!(format.encoding_variant, Some(Encoding::I420));
    }
}
