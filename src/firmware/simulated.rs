//! In-process firmware for tests and demonstrations.
//!
//! `SimulatedFirmware` follows the buffer semantics of the real camera
//! firmware: ports only fill buffers they were sent, completed buffers are
//! delivered through the port callback, and disabling a port flushes held
//! buffers back through the callback before releasing it. Frames are either
//! pushed manually (`deliver_frame` and friends) or, with autoplay, painted by
//! a generator thread at the port frame rate.

use super::{
    BufferCallback, BufferFlags, BufferRequirements, CameraComponent, CameraConfig,
    CameraControl, DiscardSink, EventCode, Firmware, FirmwareError, FirmwareResult, FrameBuffer,
    OutputPort, PortFormat, SendBufferError, DEFAULT_CAMERA,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest frame the simulated sensor accepts.
const MAX_WIDTH: u32 = 3280;
const MAX_HEIGHT: u32 = 2464;

/// Poll interval of an idle autoplay generator.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Firmware step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    CreateCamera,
    EnableControl,
    CommitFormat(OutputPort),
    EnableComponent,
    CreateSink,
    EnableSink,
    Connect,
    EnablePort(OutputPort),
    StartCapture,
    SendBuffer,
}

/// Observable firmware operations, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareEvent {
    CameraCreated,
    ControlEnabled,
    ConfigSet(CameraConfig),
    ControlSet(CameraControl),
    FormatCommitted(OutputPort, PortFormat),
    BufferCountSet(OutputPort, usize),
    ComponentEnabled,
    ComponentDisabled,
    SinkCreated,
    SinkEnabled,
    SinkDisabled,
    SinkDestroyed,
    Connected(OutputPort),
    Disconnected(OutputPort),
    PortEnabled(OutputPort),
    PortDisabled(OutputPort),
    CaptureStarted(OutputPort),
    CameraDestroyed,
}

/// Live resources and event history.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Camera components created and not yet destroyed.
    pub live_cameras: usize,
    /// Discard sinks created and not yet destroyed.
    pub live_sinks: usize,
    pub events: Vec<FirmwareEvent>,
}

#[derive(Debug)]
struct Settings {
    failure: Option<FailurePoint>,
    output_ports: usize,
    reported_buffer_count: usize,
    autoplay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failure: None,
            output_ports: 3,
            reported_buffer_count: 1,
            autoplay: false,
        }
    }
}

#[derive(Default)]
struct Shared {
    settings: Mutex<Settings>,
    ledger: Mutex<Ledger>,
    active: Mutex<Option<Arc<CameraCore>>>,
}

impl Shared {
    fn record(&self, event: FirmwareEvent) {
        lock(&self.ledger).events.push(event);
    }

    fn check(&self, point: FailurePoint, operation: &'static str) -> FirmwareResult<()> {
        if lock(&self.settings).failure == Some(point) {
            return Err(FirmwareError::Rejected {
                operation,
                detail: format!("injected failure at {point:?}"),
            });
        }
        Ok(())
    }
}

/// Simulated camera firmware.
///
/// Cloning yields another handle to the same firmware, so a test can keep one
/// handle to drive deliveries while the capture code owns the components.
#[derive(Clone, Default)]
pub struct SimulatedFirmware {
    shared: Arc<Shared>,
}

impl SimulatedFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of output ports reported by created cameras.
    pub fn with_output_ports(self, count: usize) -> Self {
        lock(&self.shared.settings).output_ports = count;
        self
    }

    /// Buffer count a port asks for before the host overrides it.
    pub fn with_reported_buffer_count(self, count: usize) -> Self {
        lock(&self.shared.settings).reported_buffer_count = count;
        self
    }

    /// Paint frames automatically on an enabled, capturing port.
    pub fn with_autoplay(self) -> Self {
        lock(&self.shared.settings).autoplay = true;
        self
    }

    /// Makes the given step fail until cleared.
    pub fn fail_at(&self, point: FailurePoint) {
        lock(&self.shared.settings).failure = Some(point);
    }

    pub fn clear_failure(&self) {
        lock(&self.shared.settings).failure = None;
    }

    /// Snapshot of live resources and the event history.
    pub fn ledger(&self) -> Ledger {
        lock(&self.shared.ledger).clone()
    }

    pub fn events(&self) -> Vec<FirmwareEvent> {
        lock(&self.shared.ledger).events.clone()
    }

    /// Buffers currently held by the enabled capture port.
    pub fn held_buffers(&self) -> usize {
        self.capture_port()
            .map(|(core, port)| lock(&core.port(port).state).held.len())
            .unwrap_or(0)
    }

    /// Ids of the buffers held by the enabled capture port.
    pub fn held_buffer_ids(&self) -> Vec<usize> {
        self.capture_port()
            .map(|(core, port)| {
                lock(&core.port(port).state)
                    .held
                    .iter()
                    .map(FrameBuffer::id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total capture requests seen by the enabled capture port.
    pub fn captures_started(&self) -> usize {
        self.capture_port()
            .map(|(core, port)| lock(&core.port(port).state).captures)
            .unwrap_or(0)
    }

    /// Completes a held buffer as a full frame carrying `payload`.
    ///
    /// Returns false if no capture port is enabled or it holds no buffer.
    pub fn deliver_frame(&self, payload: &[u8]) -> bool {
        self.deliver_with(|buffer| {
            buffer.fill(payload, BufferFlags::FRAME_END);
        })
    }

    /// Completes a held buffer without the frame-end flag.
    pub fn deliver_incomplete(&self, payload: &[u8]) -> bool {
        self.deliver_with(|buffer| {
            buffer.fill(payload, BufferFlags::EMPTY);
        })
    }

    /// Returns a held buffer as a control event.
    pub fn deliver_event(&self, event: EventCode) -> bool {
        self.deliver_with(|buffer| buffer.mark_event(event))
    }

    /// Disables the capture port from the firmware side, as on a hardware fault.
    pub fn fault_port(&self) -> bool {
        match self.capture_port() {
            Some((core, port)) => core.shut_port(&self.shared, port),
            None => false,
        }
    }

    fn deliver_with(&self, fill: impl FnOnce(&mut FrameBuffer)) -> bool {
        match self.capture_port() {
            Some((core, port)) => core.deliver(port, fill),
            None => false,
        }
    }

    fn capture_port(&self) -> Option<(Arc<CameraCore>, OutputPort)> {
        let core = lock(&self.shared.active).clone()?;
        let port = [OutputPort::Video, OutputPort::Still]
            .into_iter()
            .find(|port| lock(&core.port(*port).state).enabled)?;
        Some((core, port))
    }
}

impl Firmware for SimulatedFirmware {
    fn create_camera(&self, name: &str) -> FirmwareResult<Box<dyn CameraComponent>> {
        if name != DEFAULT_CAMERA {
            return Err(FirmwareError::ComponentUnavailable(name.to_owned()));
        }
        self.shared.check(FailurePoint::CreateCamera, "camera create")?;

        let output_ports = lock(&self.shared.settings).output_ports;
        let core = Arc::new(CameraCore::default());
        *lock(&self.shared.active) = Some(Arc::clone(&core));
        {
            let mut ledger = lock(&self.shared.ledger);
            ledger.live_cameras += 1;
            ledger.events.push(FirmwareEvent::CameraCreated);
        }

        Ok(Box::new(SimCamera {
            shared: Arc::clone(&self.shared),
            core,
            output_ports,
        }))
    }

    fn create_discard_sink(&self) -> FirmwareResult<Box<dyn DiscardSink>> {
        self.shared.check(FailurePoint::CreateSink, "sink create")?;
        {
            let mut ledger = lock(&self.shared.ledger);
            ledger.live_sinks += 1;
            ledger.events.push(FirmwareEvent::SinkCreated);
        }
        Ok(Box::new(SimSink {
            shared: Arc::clone(&self.shared),
            enabled: false,
        }))
    }
}

#[derive(Default)]
struct CameraState {
    enabled: bool,
    control: Option<BufferCallback>,
    config: Option<CameraConfig>,
}

#[derive(Default)]
struct PortState {
    enabled: bool,
    capturing: bool,
    captures: usize,
    held: VecDeque<FrameBuffer>,
    format: Option<PortFormat>,
    buffer_count: Option<usize>,
    connected: bool,
}

#[derive(Default)]
struct PortCore {
    state: Mutex<PortState>,
    callback: Mutex<Option<BufferCallback>>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct CameraCore {
    state: Mutex<CameraState>,
    ports: [PortCore; 3],
}

impl CameraCore {
    fn port(&self, port: OutputPort) -> &PortCore {
        &self.ports[port.index()]
    }

    /// Completes the oldest held buffer and hands it to the callback.
    ///
    /// The callback lock is taken first and held across the hand-off, so a
    /// concurrent `shut_port` cannot release the callback mid-delivery.
    fn deliver(&self, port: OutputPort, fill: impl FnOnce(&mut FrameBuffer)) -> bool {
        let core = self.port(port);
        let mut callback = lock(&core.callback);
        let Some(callback) = callback.as_mut() else {
            return false;
        };
        let buffer = {
            let mut state = lock(&core.state);
            if !state.enabled {
                return false;
            }
            state.held.pop_front()
        };
        let Some(mut buffer) = buffer else {
            return false;
        };
        fill(&mut buffer);
        callback(buffer);
        true
    }

    fn shut_port(&self, shared: &Shared, port: OutputPort) -> bool {
        let core = self.port(port);
        {
            let mut state = lock(&core.state);
            if !state.enabled {
                return false;
            }
            state.enabled = false;
            state.capturing = false;
        }

        if let Some(generator) = lock(&core.generator).take() {
            let _ = generator.join();
        }

        let mut callback = lock(&core.callback);
        let flushed: Vec<FrameBuffer> = lock(&core.state).held.drain(..).collect();
        if let Some(callback) = callback.as_mut() {
            for mut buffer in flushed {
                buffer.reset();
                callback(buffer);
            }
        }
        *callback = None;
        drop(callback);

        shared.record(FirmwareEvent::PortDisabled(port));
        true
    }
}

struct SimCamera {
    shared: Arc<Shared>,
    core: Arc<CameraCore>,
    output_ports: usize,
}

impl SimCamera {
    fn record(&self, event: FirmwareEvent) {
        self.shared.record(event);
    }
}

impl CameraComponent for SimCamera {
    fn output_count(&self) -> usize {
        self.output_ports
    }

    fn enable_control(&mut self, callback: BufferCallback) -> FirmwareResult<()> {
        self.shared.check(FailurePoint::EnableControl, "control port enable")?;
        lock(&self.core.state).control = Some(callback);
        self.record(FirmwareEvent::ControlEnabled);
        Ok(())
    }

    fn set_config(&mut self, config: &CameraConfig) -> FirmwareResult<()> {
        lock(&self.core.state).config = Some(*config);
        self.record(FirmwareEvent::ConfigSet(*config));
        Ok(())
    }

    fn set_control(&self, control: &CameraControl) -> FirmwareResult<()> {
        self.record(FirmwareEvent::ControlSet(control.clone()));

        // Real firmware acknowledges parameter writes with a control event.
        let mut state = lock(&self.core.state);
        if let Some(callback) = state.control.as_mut() {
            let mut ack = FrameBuffer::new(usize::MAX, Vec::new());
            ack.mark_event(EventCode::ParameterChanged);
            callback(ack);
        }
        Ok(())
    }

    fn commit_format(&mut self, port: OutputPort, format: &PortFormat) -> FirmwareResult<()> {
        self.shared
            .check(FailurePoint::CommitFormat(port), "format commit")?;
        if format.width == 0 || format.height == 0 {
            return Err(FirmwareError::FormatRejected {
                port,
                reason: "zero-sized frame".to_owned(),
            });
        }
        if format.width > MAX_WIDTH || format.height > MAX_HEIGHT {
            return Err(FirmwareError::FormatRejected {
                port,
                reason: format!(
                    "{}x{} exceeds sensor maximum {MAX_WIDTH}x{MAX_HEIGHT}",
                    format.width, format.height
                ),
            });
        }
        if format.frame_rate.num == 0 || format.frame_rate.den == 0 {
            return Err(FirmwareError::FormatRejected {
                port,
                reason: "zero frame rate".to_owned(),
            });
        }

        lock(&self.core.port(port).state).format = Some(*format);
        self.record(FirmwareEvent::FormatCommitted(port, *format));
        Ok(())
    }

    fn buffer_requirements(&self, port: OutputPort) -> BufferRequirements {
        let reported = lock(&self.shared.settings).reported_buffer_count;
        let state = lock(&self.core.port(port).state);
        BufferRequirements {
            count: state.buffer_count.unwrap_or(reported),
            size: state
                .format
                .map(|format| i420_size(format.width, format.height))
                .unwrap_or(0),
        }
    }

    fn set_buffer_count(&mut self, port: OutputPort, count: usize) {
        lock(&self.core.port(port).state).buffer_count = Some(count);
        self.record(FirmwareEvent::BufferCountSet(port, count));
    }

    fn enable(&mut self) -> FirmwareResult<()> {
        self.shared
            .check(FailurePoint::EnableComponent, "component enable")?;
        for port in OutputPort::ALL {
            if lock(&self.core.port(port).state).format.is_none() {
                return Err(FirmwareError::Rejected {
                    operation: "component enable",
                    detail: format!("{port} port has no committed format"),
                });
            }
        }
        lock(&self.core.state).enabled = true;
        self.record(FirmwareEvent::ComponentEnabled);
        Ok(())
    }

    fn disable(&mut self) {
        let mut state = lock(&self.core.state);
        if state.enabled {
            state.enabled = false;
            drop(state);
            self.record(FirmwareEvent::ComponentDisabled);
        }
    }

    fn connect(&mut self, port: OutputPort, _sink: &mut dyn DiscardSink) -> FirmwareResult<()> {
        self.shared.check(FailurePoint::Connect, "connection create")?;
        let mut state = lock(&self.core.port(port).state);
        if state.format.is_none() {
            return Err(FirmwareError::FormatRejected {
                port,
                reason: "connection on unformatted port".to_owned(),
            });
        }
        state.connected = true;
        drop(state);
        self.record(FirmwareEvent::Connected(port));
        Ok(())
    }

    fn disconnect(&mut self, port: OutputPort) {
        let mut state = lock(&self.core.port(port).state);
        if state.connected {
            state.connected = false;
            drop(state);
            self.record(FirmwareEvent::Disconnected(port));
        }
    }

    fn enable_port(&mut self, port: OutputPort, callback: BufferCallback) -> FirmwareResult<()> {
        self.shared
            .check(FailurePoint::EnablePort(port), "port enable")?;
        if !lock(&self.core.state).enabled {
            return Err(FirmwareError::Rejected {
                operation: "port enable",
                detail: "component is not enabled".to_owned(),
            });
        }

        if lock(&self.core.port(port).state).enabled {
            return Err(FirmwareError::Rejected {
                operation: "port enable",
                detail: format!("{port} port already enabled"),
            });
        }
        *lock(&self.core.port(port).callback) = Some(callback);
        lock(&self.core.port(port).state).enabled = true;
        self.record(FirmwareEvent::PortEnabled(port));

        if lock(&self.shared.settings).autoplay && port != OutputPort::Preview {
            let core = Arc::clone(&self.core);
            let handle = thread::Builder::new()
                .name(format!("sim-{port}"))
                .spawn(move || autoplay(&core, port))
                .map_err(|err| FirmwareError::Rejected {
                    operation: "port enable",
                    detail: err.to_string(),
                })?;
            *lock(&self.core.port(port).generator) = Some(handle);
        }
        Ok(())
    }

    fn disable_port(&mut self, port: OutputPort) {
        self.core.shut_port(&self.shared, port);
    }

    fn is_port_enabled(&self, port: OutputPort) -> bool {
        lock(&self.core.port(port).state).enabled
    }

    fn send_buffer(&self, port: OutputPort, buffer: FrameBuffer) -> Result<(), SendBufferError> {
        if let Err(source) = self.shared.check(FailurePoint::SendBuffer, "buffer send") {
            return Err(SendBufferError { buffer, source });
        }
        let mut state = lock(&self.core.port(port).state);
        if !state.enabled {
            return Err(SendBufferError {
                buffer,
                source: FirmwareError::PortDisabled(port),
            });
        }
        state.held.push_back(buffer);
        Ok(())
    }

    fn start_capture(&self, port: OutputPort) -> FirmwareResult<()> {
        self.shared
            .check(FailurePoint::StartCapture, "capture start")?;
        let mut state = lock(&self.core.port(port).state);
        if !state.enabled {
            return Err(FirmwareError::PortDisabled(port));
        }
        state.capturing = true;
        state.captures += 1;
        drop(state);
        self.record(FirmwareEvent::CaptureStarted(port));
        Ok(())
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        for port in OutputPort::ALL {
            self.core.shut_port(&self.shared, port);
        }
        lock(&self.core.state).control = None;

        {
            let mut active = lock(&self.shared.active);
            if active
                .as_ref()
                .is_some_and(|core| Arc::ptr_eq(core, &self.core))
            {
                *active = None;
            }
        }

        let mut ledger = lock(&self.shared.ledger);
        ledger.live_cameras = ledger.live_cameras.saturating_sub(1);
        ledger.events.push(FirmwareEvent::CameraDestroyed);
    }
}

struct SimSink {
    shared: Arc<Shared>,
    enabled: bool,
}

impl DiscardSink for SimSink {
    fn enable(&mut self) -> FirmwareResult<()> {
        self.shared.check(FailurePoint::EnableSink, "sink enable")?;
        self.enabled = true;
        self.shared.record(FirmwareEvent::SinkEnabled);
        Ok(())
    }

    fn disable(&mut self) {
        if self.enabled {
            self.enabled = false;
            self.shared.record(FirmwareEvent::SinkDisabled);
        }
    }
}

impl Drop for SimSink {
    fn drop(&mut self) {
        let mut ledger = lock(&self.shared.ledger);
        ledger.live_sinks = ledger.live_sinks.saturating_sub(1);
        ledger.events.push(FirmwareEvent::SinkDestroyed);
    }
}

/// Generator loop for autoplay: one frame per period while capturing.
fn autoplay(core: &CameraCore, port: OutputPort) {
    let mut sequence: u32 = 0;
    loop {
        let (enabled, capturing, format) = {
            let state = lock(&core.port(port).state);
            (state.enabled, state.capturing, state.format)
        };
        if !enabled {
            break;
        }
        let Some(format) = format else {
            break;
        };
        if !capturing {
            thread::sleep(IDLE_POLL);
            continue;
        }

        thread::sleep(format.frame_rate.period());
        let delivered = core.deliver(port, |buffer| {
            buffer.fill_with(BufferFlags::FRAME_END, |data| {
                paint_gradient(data, format.width, format.height, sequence)
            });
        });
        if !delivered {
            continue;
        }
        sequence = sequence.wrapping_add(1);

        let one_shot = lock(&core.state)
            .config
            .is_some_and(|config| config.one_shot_stills);
        if one_shot && port == OutputPort::Still {
            lock(&core.port(port).state).capturing = false;
        }
    }
}

/// Paints a horizontally scrolling luma ramp with neutral chroma.
fn paint_gradient(data: &mut [u8], width: u32, height: u32, sequence: u32) -> usize {
    let width = width as usize;
    let height = height as usize;
    let luma = width * height;
    let total = i420_size(width as u32, height as u32).min(data.len());
    let shift = sequence as usize;

    for (index, byte) in data[..total].iter_mut().enumerate() {
        *byte = if index < luma {
            ((index % width + shift) % 256) as u8
        } else {
            128
        };
    }
    total
}

fn i420_size(width: u32, height: u32) -> usize {
    (width as usize * height as usize * 3) / 2
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FrameRate;
    use std::sync::mpsc;

    fn enabled_camera(firmware: &SimulatedFirmware) -> Box<dyn CameraComponent> {
        let mut camera = firmware.create_camera(DEFAULT_CAMERA).unwrap();
        let format = PortFormat::video(64, 48, FrameRate::new(30, 1));
        for port in OutputPort::ALL {
            camera.commit_format(port, &format).unwrap();
        }
        camera.enable().unwrap();
        camera
    }

    #[test]
    fn test_unknown_component_is_unavailable() {
        let firmware = SimulatedFirmware::new();
        assert!(matches!(
            firmware.create_camera("vc.ril.nothing"),
            Err(FirmwareError::ComponentUnavailable(_))
        ));
        assert_eq!(firmware.ledger().live_cameras, 0);
    }

    #[test]
    fn test_enable_requires_all_formats() {
        let firmware = SimulatedFirmware::new();
        let mut camera = firmware.create_camera(DEFAULT_CAMERA).unwrap();
        let format = PortFormat::video(64, 48, FrameRate::new(30, 1));
        camera.commit_format(OutputPort::Preview, &format).unwrap();

        assert!(camera.enable().is_err());
    }

    #[test]
    fn test_delivery_hands_buffer_to_callback() {
        let firmware = SimulatedFirmware::new();
        let mut camera = enabled_camera(&firmware);
        let (tx, rx) = mpsc::channel();
        camera
            .enable_port(OutputPort::Video, Box::new(move |buffer| tx.send(buffer).unwrap()))
            .unwrap();

        camera
            .send_buffer(OutputPort::Video, FrameBuffer::new(7, vec![0u8; 16]))
            .unwrap();
        assert_eq!(firmware.held_buffers(), 1);
        assert!(firmware.deliver_frame(&[5u8; 16]));

        let buffer = rx.recv().unwrap();
        assert_eq!(buffer.id(), 7);
        assert!(buffer.is_frame_end());
        assert_eq!(firmware.held_buffers(), 0);
        assert!(!firmware.deliver_frame(&[5u8; 16]));
    }

    #[test]
    fn test_disable_flushes_and_releases_callback() {
        let firmware = SimulatedFirmware::new();
        let mut camera = enabled_camera(&firmware);
        let (tx, rx) = mpsc::channel();
        camera
            .enable_port(OutputPort::Video, Box::new(move |buffer| tx.send(buffer).unwrap()))
            .unwrap();
        for id in 0..3 {
            camera
                .send_buffer(OutputPort::Video, FrameBuffer::new(id, vec![0u8; 16]))
                .unwrap();
        }

        camera.disable_port(OutputPort::Video);

        let flushed: Vec<usize> = rx.iter().map(|buffer| buffer.id()).collect();
        assert_eq!(flushed, vec![0, 1, 2]);
        assert!(!camera.is_port_enabled(OutputPort::Video));
    }

    #[test]
    fn test_send_to_disabled_port_returns_buffer() {
        let firmware = SimulatedFirmware::new();
        let camera = enabled_camera(&firmware);

        let err = camera
            .send_buffer(OutputPort::Video, FrameBuffer::new(4, vec![0u8; 4]))
            .unwrap_err();
        assert_eq!(err.buffer.id(), 4);
        assert!(matches!(err.source, FirmwareError::PortDisabled(OutputPort::Video)));
    }

    #[test]
    fn test_drop_destroys_camera() {
        let firmware = SimulatedFirmware::new();
        let camera = enabled_camera(&firmware);
        assert_eq!(firmware.ledger().live_cameras, 1);

        drop(camera);
        let ledger = firmware.ledger();
        assert_eq!(ledger.live_cameras, 0);
        assert_eq!(ledger.events.last(), Some(&FirmwareEvent::CameraDestroyed));
    }

    #[test]
    fn test_paint_gradient_fills_planes() {
        let mut data = vec![0u8; i420_size(8, 4)];
        let written = paint_gradient(&mut data, 8, 4, 1);

        assert_eq!(written, 48);
        assert_eq!(&data[..3], &[1, 2, 3]);
        assert!(data[32..].iter().all(|&byte| byte == 128));
    }
}
