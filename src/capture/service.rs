//! Synchronous frame service over the asynchronous camera.
//!
//! The host calls [`FrameService::start`], then [`FrameService::next`] from a
//! dedicated capture thread, then [`FrameService::cleanup`]. `next` blocks
//! without a timeout; the only way out of a wait that will never be satisfied
//! is the capture port going away, which surfaces as
//! [`CaptureError::FatalHardware`].

use super::config::CaptureConfig;
use super::configurator::{configure, ConfiguredCamera};
use super::exchange::{BufferCensus, BufferExchange, ComponentPort, RecycleOutcome};
use super::frame::{Frame, FrameGeometry};
use super::params::CameraParameters;
use super::scheduler::{CaptureScheduler, Clock, MonotonicClock, SchedulerState};
use crate::error::CaptureError;
use crate::firmware::{EventCode, Firmware, FrameBuffer};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Host-side post-processing run on every delivered frame, such as rotation.
pub type PostProcess = Box<dyn FnMut(&mut [u8], FrameGeometry) + Send>;

/// Counters for one service instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames copied out to the host.
    pub frames_delivered: u64,
    /// Deliveries that were not a complete frame of the expected size.
    pub buffers_discarded: u64,
    /// Buffers handed straight back to the capture port.
    pub buffers_resubmitted: u64,
    /// Buffers the port refused; they wait in the pool.
    pub recycle_failures: u64,
    pub captures_triggered: u64,
    pub trigger_failures: u64,
}

/// Why a delivered buffer was not handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferRejection {
    #[error("control event {0}")]
    Event(EventCode),
    #[error("buffer is not a complete frame")]
    Incomplete,
    #[error("payload is {actual} bytes, expected {expected}")]
    WrongSize { expected: usize, actual: usize },
}

impl BufferRejection {
    /// Accepts only frame-end data buffers carrying exactly `expected` bytes.
    pub fn check(buffer: &FrameBuffer, expected: usize) -> Result<(), Self> {
        if let Some(event) = buffer.event() {
            return Err(Self::Event(event));
        }
        if !buffer.is_frame_end() {
            return Err(Self::Incomplete);
        }
        if buffer.len() != expected {
            return Err(Self::WrongSize {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(())
    }
}

/// File receiving the raw bytes of every delivered frame.
struct RawSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RawSink {
    /// Opens the sink; a failure is logged and capture continues without it.
    fn open(path: &Path) -> Option<Self> {
        match File::create(path) {
            Ok(file) => {
                info!(path = %path.display(), "Writing raw frames");
                Some(Self {
                    path: path.to_owned(),
                    writer: BufWriter::new(file),
                })
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Couldn't open raw capture file");
                None
            }
        }
    }

    fn write(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(frame)
    }
}

impl Drop for RawSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), error = %e, "Raw capture file not flushed");
        }
    }
}

/// Everything one capture session owns.
///
/// Field order is teardown order. `Drop` stops the scheduler and disables the
/// capture port first, so nothing is delivered into a half-dismantled
/// session.
struct CaptureContext {
    scheduler: CaptureScheduler,
    camera: ConfiguredCamera,
    exchange: BufferExchange,
    raw_sink: Option<RawSink>,
    parameters: CameraParameters,
    geometry: FrameGeometry,
    still: bool,
}

impl CaptureContext {
    fn recycle(&mut self, buffer: FrameBuffer, stats: &mut CaptureStats) {
        let port = ComponentPort {
            component: self.camera.component(),
            port: self.camera.capture_port(),
        };
        match self.exchange.recycle(buffer, &port) {
            RecycleOutcome::Resubmitted => stats.buffers_resubmitted += 1,
            RecycleOutcome::Refused => stats.recycle_failures += 1,
            RecycleOutcome::Parked => {}
        }
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        self.scheduler.terminate();
        self.camera.disable_capture();
    }
}

/// The frame source handed to the host.
pub struct FrameService {
    context: Option<CaptureContext>,
    post_process: Option<PostProcess>,
    stats: CaptureStats,
}

impl FrameService {
    /// Starts a capture session on the system clock.
    pub fn start(firmware: &dyn Firmware, config: &CaptureConfig) -> Result<Self, CaptureError> {
        Self::start_with_clock(firmware, config, Box::new(MonotonicClock::new()))
    }

    /// Starts a capture session, rate limiting stills against `clock`.
    ///
    /// On error everything built so far has already been released.
    pub fn start_with_clock(
        firmware: &dyn Firmware,
        config: &CaptureConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        let mode = config.capture_mode();
        let geometry = FrameGeometry::new(config.width, config.height);
        info!(
            camera = %config.camera_name,
            width = config.width,
            height = config.height,
            framerate = config.framerate,
            still = mode.is_still(),
            "Starting camera"
        );

        let parameters = config
            .control_params
            .as_deref()
            .map(CameraParameters::from_directives)
            .unwrap_or_default();

        let mut camera = configure(firmware, &config.camera_name, &mode, &parameters)?;
        let (exchange, producer) = BufferExchange::create(camera.capture_requirements())
            .inspect_err(|e| error!(error = %e, "Couldn't create buffer pool"))?;
        camera
            .enable_capture(producer.into_callback())
            .inspect_err(|e| error!(error = %e, "Capture port enabling failed"))?;

        let mut context = CaptureContext {
            scheduler: CaptureScheduler::new(mode.is_still(), config.min_capture_interval(), clock),
            camera,
            exchange,
            raw_sink: None,
            parameters,
            geometry,
            still: mode.is_still(),
        };

        context
            .scheduler
            .arm(&context.camera, config.still_settle())
            .inspect_err(|e| error!(error = %e, "Camera capture start failed"))?;

        let port = ComponentPort {
            component: context.camera.component(),
            port: context.camera.capture_port(),
        };
        let seeded = context.exchange.seed(&port);
        context.raw_sink = config.raw_capture_path.as_deref().and_then(RawSink::open);

        let stats = CaptureStats {
            captures_triggered: context.scheduler.triggers_issued(),
            ..CaptureStats::default()
        };
        info!(seeded, frame_size = geometry.frame_size(), "Camera started");
        Ok(Self {
            context: Some(context),
            post_process: None,
            stats,
        })
    }

    /// Registers a step run on each frame after it is copied out.
    pub fn with_post_process(
        mut self,
        hook: impl FnMut(&mut [u8], FrameGeometry) + Send + 'static,
    ) -> Self {
        self.post_process = Some(Box::new(hook));
        self
    }

    /// Blocks until the next complete frame and copies it into `out`.
    ///
    /// `out` must be exactly `width * height * 3 / 2` bytes. Malformed
    /// deliveries are skipped silently. In still mode the next capture is
    /// triggered before this returns, after waiting out the minimum delay.
    pub fn next(&mut self, out: &mut [u8]) -> Result<(), CaptureError> {
        let Self {
            context,
            post_process,
            stats,
        } = self;
        let ctx = context.as_mut().ok_or(CaptureError::NotStarted)?;

        let expected = ctx.geometry.frame_size();
        if out.len() != expected {
            return Err(CaptureError::OutputSize {
                expected,
                actual: out.len(),
            });
        }

        loop {
            let Some(buffer) = ctx.exchange.wait_next() else {
                error!("Capture port closed while waiting for a frame");
                return Err(CaptureError::FatalHardware(
                    "capture port closed while waiting for a frame".to_owned(),
                ));
            };

            let accepted = match BufferRejection::check(&buffer, expected) {
                Ok(()) => {
                    out.copy_from_slice(buffer.payload());
                    true
                }
                Err(rejection) => {
                    stats.buffers_discarded += 1;
                    debug!(buffer = buffer.id(), %rejection, "Discarding delivery");
                    false
                }
            };
            ctx.recycle(buffer, stats);

            if accepted {
                break;
            }
            if !ctx.camera.is_capture_enabled() {
                error!("Capture port disabled while waiting for a frame");
                return Err(CaptureError::FatalHardware(
                    "capture port disabled".to_owned(),
                ));
            }
        }
        stats.frames_delivered += 1;
        trace!(frame = stats.frames_delivered, "Frame copied");

        if ctx.still {
            ctx.scheduler.on_frame_delivered(&ctx.camera);
            stats.captures_triggered = ctx.scheduler.triggers_issued();
            stats.trigger_failures = ctx.scheduler.trigger_failures();
        }

        let write_failed = match ctx.raw_sink.as_mut() {
            Some(sink) => sink.write(out).err(),
            None => None,
        };
        if let Some(e) = write_failed {
            warn!(error = %e, "Raw capture write failed, closing raw file");
            ctx.raw_sink = None;
        }

        if let Some(hook) = post_process.as_mut() {
            hook(out, ctx.geometry);
        }
        Ok(())
    }

    /// Like [`next`](Self::next), into a freshly allocated [`Frame`].
    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let geometry = self.geometry().ok_or(CaptureError::NotStarted)?;
        let mut data = vec![0u8; geometry.frame_size()];
        self.next(&mut data)?;
        Ok(Frame::new(data, geometry, self.stats.frames_delivered))
    }

    /// Releases the session. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if let Some(context) = self.context.take() {
            info!(
                frames = self.stats.frames_delivered,
                discarded = self.stats.buffers_discarded,
                "Camera cleanup"
            );
            drop(context);
        }
    }

    pub fn is_started(&self) -> bool {
        self.context.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.context.as_ref().map(|ctx| ctx.geometry)
    }

    /// Buffer whereabouts, while started.
    pub fn census(&self) -> Option<BufferCensus> {
        self.context.as_ref().map(|ctx| ctx.exchange.census())
    }

    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.context.as_ref().map(|ctx| ctx.scheduler.state())
    }

    /// Camera parameters in effect, while started.
    pub fn parameters(&self) -> Option<&CameraParameters> {
        self.context.as_ref().map(|ctx| &ctx.parameters)
    }

    /// Whether the capture port is still enabled.
    pub fn is_capturing(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| ctx.camera.is_capture_enabled())
    }
}

impl Drop for FrameService {
    fn drop(&mut self) {
        self.cleanup();
    }
}
