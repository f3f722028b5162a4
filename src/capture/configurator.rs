//! Builds and enables the camera component for a capture mode.
//!
//! Both modes go through one routine driven by a [`PortPlan`]: the plan
//! names the capture port, the preview port that feeds the discard sink, and
//! the unused third port, with the format each one gets.
//!
//! Resources are owned by [`ConfiguredCamera`] from the moment they exist, so
//! an error returned from any step drops it and tears down whatever was built
//! in reverse order.

use super::config::CaptureMode;
use super::params::CameraParameters;
use super::scheduler::Trigger;
use crate::error::CaptureError;
use crate::firmware::{
    BufferCallback, BufferRequirements, CameraComponent, CameraConfig, CameraControl,
    DiscardSink, Encoding, EventCode, Firmware, FirmwareError, FirmwareResult, FrameBuffer,
    FrameRate, OutputPort, PortFormat, TimestampMode,
};
use tracing::{debug, error, info};

/// Fewest buffers the capture port may circulate.
pub const MIN_CAPTURE_BUFFERS: usize = 3;

const STILL_PREVIEW_WIDTH: u32 = 320;
const STILL_PREVIEW_HEIGHT: u32 = 240;
const STILL_PREVIEW_RATE: FrameRate = FrameRate::new(30, 1);
const STILL_CAPTURE_RATE: FrameRate = FrameRate::new(15, 1);
const UNUSED_STILL_RATE: FrameRate = FrameRate::new(1, 1);
const PREVIEW_VIDEO_FRAMES: u32 = 3;

/// Which port does what, and with which format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    pub capture: OutputPort,
    pub capture_format: PortFormat,
    pub preview: OutputPort,
    pub preview_format: PortFormat,
    /// Port neither captured nor previewed. The firmware still wants a
    /// format on it before the component will enable.
    pub unused: OutputPort,
    pub unused_format: PortFormat,
}

impl PortPlan {
    pub fn for_mode(mode: &CaptureMode) -> Self {
        match *mode {
            CaptureMode::Video {
                width,
                height,
                framerate,
            } => {
                let preview = PortFormat::video(width, height, FrameRate::new(framerate, 1));
                Self {
                    capture: OutputPort::Video,
                    capture_format: preview.with_encoding(Encoding::I420),
                    preview: OutputPort::Preview,
                    preview_format: preview,
                    unused: OutputPort::Still,
                    unused_format: preview.with_frame_rate(UNUSED_STILL_RATE),
                }
            }
            CaptureMode::Still { width, height } => {
                let preview =
                    PortFormat::video(STILL_PREVIEW_WIDTH, STILL_PREVIEW_HEIGHT, STILL_PREVIEW_RATE);
                Self {
                    capture: OutputPort::Still,
                    capture_format: PortFormat::video(width, height, STILL_CAPTURE_RATE)
                        .with_encoding(Encoding::I420),
                    preview: OutputPort::Preview,
                    preview_format: preview,
                    unused: OutputPort::Video,
                    unused_format: preview,
                }
            }
        }
    }

    /// Commit order: preview first, then the rest in firmware port order.
    fn commits(&self) -> [(OutputPort, PortFormat, &'static str); 3] {
        let mut rest = [
            (self.capture, self.capture_format, "capture"),
            (self.unused, self.unused_format, "unused"),
        ];
        rest.sort_by_key(|(port, ..)| port.index());
        [(self.preview, self.preview_format, "preview"), rest[0], rest[1]]
    }
}

/// Camera-wide settings for a capture mode.
pub fn camera_config(mode: &CaptureMode) -> CameraConfig {
    let (width, height) = mode.dimensions();
    CameraConfig {
        max_stills_width: width,
        max_stills_height: height,
        stills_yuv422: false,
        one_shot_stills: mode.is_still(),
        max_preview_video_width: width,
        max_preview_video_height: height,
        num_preview_video_frames: PREVIEW_VIDEO_FRAMES,
        stills_capture_circular_buffer_height: 0,
        fast_preview_resume: false,
        timestamp_mode: TimestampMode::ResetStc,
    }
}

/// An enabled camera component with its preview wired to a discard sink.
///
/// Dropping it disables the capture port, disconnects the preview, disables
/// the sink and the component, then destroys the sink and the component.
pub struct ConfiguredCamera {
    // Declared before `camera` so the sink is destroyed first.
    sink: Option<Box<dyn DiscardSink>>,
    camera: Box<dyn CameraComponent>,
    connected: Option<OutputPort>,
    plan: PortPlan,
    shutter_speed: u32,
}

impl ConfiguredCamera {
    pub fn capture_port(&self) -> OutputPort {
        self.plan.capture
    }

    pub fn plan(&self) -> &PortPlan {
        &self.plan
    }

    pub fn component(&self) -> &dyn CameraComponent {
        self.camera.as_ref()
    }

    pub fn capture_requirements(&self) -> BufferRequirements {
        self.camera.buffer_requirements(self.plan.capture)
    }

    /// Enables the capture port. Completed buffers go to `callback`.
    pub fn enable_capture(&mut self, callback: BufferCallback) -> Result<(), CaptureError> {
        let port = self.plan.capture;
        self.camera
            .enable_port(port, callback)
            .map_err(|e| CaptureError::enable(format!("{port} capture port"), e))?;
        debug!(%port, "Capture port enabled");
        Ok(())
    }

    pub fn is_capture_enabled(&self) -> bool {
        self.camera.is_port_enabled(self.plan.capture)
    }

    /// Disables the capture port if it is enabled.
    ///
    /// Held buffers are flushed through the callback, and the callback is
    /// released, before this returns.
    pub fn disable_capture(&mut self) {
        let port = self.plan.capture;
        if self.camera.is_port_enabled(port) {
            self.camera.disable_port(port);
            debug!(%port, "Capture port disabled");
        }
    }

    pub fn set_shutter_speed(&self, micros: u32) -> FirmwareResult<()> {
        self.camera.set_control(&CameraControl::ShutterSpeed(micros))
    }
}

impl Trigger for ConfiguredCamera {
    fn reapply_exposure(&self) -> Result<(), FirmwareError> {
        self.set_shutter_speed(self.shutter_speed)
    }

    fn start_capture(&self) -> Result<(), FirmwareError> {
        self.camera.start_capture(self.plan.capture)
    }
}

impl Drop for ConfiguredCamera {
    fn drop(&mut self) {
        self.disable_capture();
        if let Some(port) = self.connected.take() {
            self.camera.disconnect(port);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.disable();
        }
        self.camera.disable();
        debug!("Camera component released");
    }
}

/// Creates the named camera and configures it for `mode`.
pub fn configure(
    firmware: &dyn Firmware,
    camera_name: &str,
    mode: &CaptureMode,
    parameters: &CameraParameters,
) -> Result<ConfiguredCamera, CaptureError> {
    let plan = PortPlan::for_mode(mode);

    let camera = firmware.create_camera(camera_name).map_err(|e| {
        error!(camera = camera_name, error = %e, "Failed to create camera component");
        CaptureError::firmware_resource(format!("camera component '{camera_name}'"), e)
    })?;
    let mut configured = ConfiguredCamera {
        sink: None,
        camera,
        connected: None,
        plan,
        shutter_speed: parameters.shutter_speed,
    };

    let outputs = configured.camera.output_count();
    if outputs < OutputPort::ALL.len() {
        error!(camera = camera_name, outputs, "Camera lacks output ports");
        return Err(CaptureError::firmware_resource(
            format!("camera '{camera_name}' exposes {outputs} output ports"),
            FirmwareError::NoOutputPorts,
        ));
    }

    configured
        .camera
        .enable_control(Box::new(control_event))
        .map_err(|e| {
            error!(error = %e, "Unable to enable control port");
            CaptureError::enable("control port", e)
        })?;

    if let Err(e) = configured.camera.set_config(&camera_config(mode)) {
        error!(error = %e, "Camera configuration block rejected");
    }
    let failed = parameters.apply(configured.camera.as_ref());
    if failed > 0 {
        debug!(failed, "Some camera parameters were not applied");
    }

    for (port, format, role) in plan.commits() {
        configured.camera.commit_format(port, &format).map_err(|e| {
            error!(%port, role, error = %e, "Couldn't configure port format");
            CaptureError::format(format!("{role} port ({port})"), e)
        })?;
    }

    let reported = configured.capture_requirements().count;
    if reported < MIN_CAPTURE_BUFFERS {
        configured
            .camera
            .set_buffer_count(plan.capture, MIN_CAPTURE_BUFFERS);
        debug!(reported, min = MIN_CAPTURE_BUFFERS, "Raised capture buffer count");
    }

    configured.camera.enable().map_err(|e| {
        error!(error = %e, "Camera component couldn't be enabled");
        CaptureError::enable("camera component", e)
    })?;

    let sink = firmware.create_discard_sink().map_err(|e| {
        error!(error = %e, "Discard sink couldn't be created");
        CaptureError::firmware_resource("discard sink", e)
    })?;
    let sink = configured.sink.insert(sink);
    sink.enable().map_err(|e| {
        error!(error = %e, "Discard sink couldn't be enabled");
        CaptureError::enable("discard sink", e)
    })?;

    let ConfiguredCamera { sink, camera, .. } = &mut configured;
    if let Some(sink) = sink.as_deref_mut() {
        camera.connect(plan.preview, sink).map_err(|e| {
            error!(error = %e, "Preview connection setup failed");
            CaptureError::enable("preview connection", e)
        })?;
    }
    configured.connected = Some(plan.preview);

    let (width, height) = mode.dimensions();
    info!(
        camera = camera_name,
        width,
        height,
        still = mode.is_still(),
        capture_port = %plan.capture,
        "Camera component created"
    );
    Ok(configured)
}

/// Control port callback: acknowledgements only, the buffer is released on
/// return.
fn control_event(buffer: FrameBuffer) {
    match buffer.event() {
        Some(EventCode::ParameterChanged) => {}
        other => error!(event = ?other, "Unexpected camera control callback event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{FailurePoint, FirmwareEvent, SimulatedFirmware, DEFAULT_CAMERA};

    fn video() -> CaptureMode {
        CaptureMode::Video {
            width: 640,
            height: 480,
            framerate: 15,
        }
    }

    fn still() -> CaptureMode {
        CaptureMode::Still {
            width: 1296,
            height: 972,
        }
    }

    fn build(firmware: &SimulatedFirmware, mode: CaptureMode) -> Result<ConfiguredCamera, CaptureError> {
        configure(firmware, DEFAULT_CAMERA, &mode, &CameraParameters::default())
    }

    fn committed(events: &[FirmwareEvent]) -> Vec<(OutputPort, PortFormat)> {
        events
            .iter()
            .filter_map(|event| match event {
                FirmwareEvent::FormatCommitted(port, format) => Some((*port, *format)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_video_plan_formats() {
        let firmware = SimulatedFirmware::new();
        let camera = build(&firmware, video()).unwrap();
        assert_eq!(camera.capture_port(), OutputPort::Video);

        let formats = committed(&firmware.events());
        let ports: Vec<OutputPort> = formats.iter().map(|(port, _)| *port).collect();
        assert_eq!(ports, vec![OutputPort::Preview, OutputPort::Video, OutputPort::Still]);

        let (_, preview) = formats[0];
        assert_eq!(preview.encoding, Encoding::Opaque);
        assert_eq!(preview.frame_rate, FrameRate::new(15, 1));
        let (_, capture) = formats[1];
        assert_eq!(capture.encoding, Encoding::I420);
        assert_eq!((capture.width, capture.height), (640, 480));
        let (_, unused) = formats[2];
        assert_eq!(unused.frame_rate, FrameRate::new(1, 1));
        assert_eq!(unused.width, 640);
    }

    #[test]
    fn test_still_plan_formats() {
        let firmware = SimulatedFirmware::new();
        let camera = build(&firmware, still()).unwrap();
        assert_eq!(camera.capture_port(), OutputPort::Still);

        let formats = committed(&firmware.events());
        let ports: Vec<OutputPort> = formats.iter().map(|(port, _)| *port).collect();
        assert_eq!(ports, vec![OutputPort::Preview, OutputPort::Video, OutputPort::Still]);

        let (_, preview) = formats[0];
        assert_eq!((preview.width, preview.height), (320, 240));
        assert_eq!(preview.frame_rate, FrameRate::new(30, 1));
        assert_eq!(formats[1].1, preview);
        let (_, capture) = formats[2];
        assert_eq!((capture.width, capture.height), (1296, 972));
        assert_eq!(capture.frame_rate, FrameRate::new(15, 1));
        assert_eq!(capture.encoding, Encoding::I420);
    }

    #[test]
    fn test_camera_config_block() {
        let firmware = SimulatedFirmware::new();
        let _camera = build(&firmware, still()).unwrap();

        let config = firmware
            .events()
            .into_iter()
            .find_map(|event| match event {
                FirmwareEvent::ConfigSet(config) => Some(config),
                _ => None,
            })
            .unwrap();
        assert!(config.one_shot_stills);
        assert_eq!(config.max_stills_width, 1296);
        assert_eq!(config.max_preview_video_height, 972);
        assert_eq!(config.num_preview_video_frames, 3);
        assert_eq!(config.timestamp_mode, TimestampMode::ResetStc);
        assert!(!camera_config(&video()).one_shot_stills);
    }

    #[test]
    fn test_buffer_count_raised_to_minimum() {
        let firmware = SimulatedFirmware::new().with_reported_buffer_count(1);
        let camera = build(&firmware, video()).unwrap();

        let requirements = camera.capture_requirements();
        assert_eq!(requirements.count, MIN_CAPTURE_BUFFERS);
        assert_eq!(requirements.size, 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_generous_buffer_count_is_kept() {
        let firmware = SimulatedFirmware::new().with_reported_buffer_count(6);
        let camera = build(&firmware, video()).unwrap();

        assert_eq!(camera.capture_requirements().count, 6);
        assert!(!firmware
            .events()
            .iter()
            .any(|event| matches!(event, FirmwareEvent::BufferCountSet(..))));
    }

    #[test]
    fn test_preview_wired_to_sink_after_enable() {
        let firmware = SimulatedFirmware::new();
        let _camera = build(&firmware, video()).unwrap();

        let events = firmware.events();
        let position = |wanted: &FirmwareEvent| events.iter().position(|e| e == wanted).unwrap();
        let enabled = position(&FirmwareEvent::ComponentEnabled);
        let created = position(&FirmwareEvent::SinkCreated);
        let sink_enabled = position(&FirmwareEvent::SinkEnabled);
        let connected = position(&FirmwareEvent::Connected(OutputPort::Preview));
        assert!(enabled < created && created < sink_enabled && sink_enabled < connected);
        assert_eq!(firmware.ledger().live_sinks, 1);
    }

    #[test]
    fn test_parameters_applied() {
        let firmware = SimulatedFirmware::new();
        let parameters = CameraParameters::from_directives("-ss 20000");
        let _camera = configure(&firmware, DEFAULT_CAMERA, &still(), &parameters).unwrap();

        assert!(firmware
            .events()
            .contains(&FirmwareEvent::ControlSet(CameraControl::ShutterSpeed(20000))));
    }

    #[test]
    fn test_drop_tears_down_in_reverse_order() {
        let firmware = SimulatedFirmware::new();
        let camera = build(&firmware, video()).unwrap();
        let before = firmware.events().len();
        drop(camera);

        let events = firmware.events();
        assert_eq!(
            &events[before..],
            &[
                FirmwareEvent::Disconnected(OutputPort::Preview),
                FirmwareEvent::SinkDisabled,
                FirmwareEvent::ComponentDisabled,
                FirmwareEvent::SinkDestroyed,
                FirmwareEvent::CameraDestroyed,
            ]
        );
        let ledger = firmware.ledger();
        assert_eq!((ledger.live_cameras, ledger.live_sinks), (0, 0));
    }

    #[test]
    fn test_unknown_camera_is_resource_error() {
        let firmware = SimulatedFirmware::new();
        let result = configure(&firmware, "vc.ril.nothing", &video(), &CameraParameters::default());
        assert!(matches!(result, Err(CaptureError::ResourceCreation { .. })));
        assert_eq!(firmware.ledger().live_cameras, 0);
    }

    #[test]
    fn test_missing_outputs_rolls_back() {
        let firmware = SimulatedFirmware::new().with_output_ports(0);
        let result = build(&firmware, video());
        assert!(matches!(result, Err(CaptureError::ResourceCreation { .. })));
        assert_eq!(firmware.ledger().live_cameras, 0);
    }

    #[test]
    fn test_failure_at_each_step_rolls_back() {
        let cases = [
            (FailurePoint::EnableControl, "PortEnable"),
            (FailurePoint::CommitFormat(OutputPort::Preview), "FormatNegotiation"),
            (FailurePoint::CommitFormat(OutputPort::Video), "FormatNegotiation"),
            (FailurePoint::CommitFormat(OutputPort::Still), "FormatNegotiation"),
            (FailurePoint::EnableComponent, "PortEnable"),
            (FailurePoint::CreateSink, "ResourceCreation"),
            (FailurePoint::EnableSink, "PortEnable"),
            (FailurePoint::Connect, "PortEnable"),
        ];

        for mode in [video(), still()] {
            for (point, kind) in cases {
                let firmware = SimulatedFirmware::new();
                firmware.fail_at(point);
                let err = match build(&firmware, mode) {
                    Ok(_) => panic!("{point:?} did not fail"),
                    Err(err) => err,
                };
                let actual = match err {
                    CaptureError::ResourceCreation { .. } => "ResourceCreation",
                    CaptureError::FormatNegotiation { .. } => "FormatNegotiation",
                    CaptureError::PortEnable { .. } => "PortEnable",
                    _ => "other",
                };
                assert_eq!(actual, kind, "{point:?}");

                let ledger = firmware.ledger();
                assert_eq!(ledger.live_cameras, 0, "{point:?}");
                assert_eq!(ledger.live_sinks, 0, "{point:?}");
                assert_eq!(ledger.events.last(), Some(&FirmwareEvent::CameraDestroyed));
            }
        }
    }

    #[test]
    fn test_sink_failure_rollback_order() {
        let firmware = SimulatedFirmware::new();
        firmware.fail_at(FailurePoint::Connect);
        assert!(build(&firmware, still()).is_err());

        let events = firmware.events();
        let tail = &events[events.len() - 4..];
        assert_eq!(
            tail,
            &[
                FirmwareEvent::SinkDisabled,
                FirmwareEvent::ComponentDisabled,
                FirmwareEvent::SinkDestroyed,
                FirmwareEvent::CameraDestroyed,
            ]
        );
    }
}
