//! Pi Camera Frame Source CLI
//!
//! Runs the frame service against the simulated camera firmware and reports
//! capture statistics.

use clap::Parser;
use picam_source::{
    capture::{CaptureModeKind, FileConfig},
    CaptureError, FrameService, SimulatedFirmware,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Fetch frames from the camera.
#[derive(Debug, Parser)]
#[command(name = "picam-source", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to fetch; 0 runs until interrupted.
    #[arg(short = 'n', long)]
    frames: Option<u32>,

    /// Use rate-limited still captures instead of video.
    #[arg(long)]
    still: bool,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    framerate: Option<u32>,

    /// Camera tuning directives, e.g. "-ss 20000 -ISO 400".
    #[arg(long, allow_hyphen_values = true)]
    params: Option<String>,

    /// Append every frame's raw bytes to this file.
    #[arg(long)]
    raw_output: Option<PathBuf>,

    /// Serve Prometheus metrics on this port (requires the `metrics` feature).
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut FileConfig) {
        let capture = &mut config.capture;
        if let Some(width) = self.width {
            capture.width = width;
        }
        if let Some(height) = self.height {
            capture.height = height;
        }
        if let Some(framerate) = self.framerate {
            capture.framerate = framerate;
        }
        if self.still {
            capture.mode = CaptureModeKind::Still;
        }
        if let Some(params) = &self.params {
            capture.control_params = Some(params.clone());
        }
        if let Some(path) = &self.raw_output {
            capture.raw_capture_path = Some(path.clone());
        }

        let output = &mut config.output;
        match self.frames {
            Some(0) => output.continuous = true,
            Some(count) => {
                output.continuous = false;
                output.frame_count = count;
            }
            None => {}
        }
        if let Some(port) = self.metrics_port {
            output.metrics_port = port;
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => FileConfig::default(),
    };
    args.apply(&mut config);

    info!("Pi Camera Frame Source v{}", picam_source::VERSION);
    info!("This is a demonstration using simulated camera firmware");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("Ctrl-C handler not installed: {}", e);
        }
    }

    let firmware = SimulatedFirmware::new().with_autoplay();
    let mut service = match FrameService::start(&firmware, &config.capture) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Failed to start camera: {}", e);
            std::process::exit(1);
        }
    };

    let metrics = metrics_exporter(config.output.metrics_port);

    let mut frame = vec![0u8; config.capture.width as usize * config.capture.height as usize * 3 / 2];
    let mut fetched: u64 = 0;
    let mut exit_code = 0;

    while !stop.load(Ordering::SeqCst)
        && (config.output.continuous || fetched < u64::from(config.output.frame_count))
    {
        match service.next(&mut frame) {
            Ok(()) => {
                fetched += 1;
                let luma = config.capture.width as usize * config.capture.height as usize;
                let mean = frame[..luma].iter().map(|&b| u64::from(b)).sum::<u64>() / luma as u64;
                info!(frame = fetched, mean_luma = mean, "Frame fetched");
            }
            Err(CaptureError::FatalHardware(reason)) => {
                error!("Camera lost: {}", reason);
                exit_code = 1;
                break;
            }
            Err(e) => {
                error!("Frame fetch failed: {}", e);
                exit_code = 1;
                break;
            }
        }
        metrics.publish(&service);
    }

    let stats = service.stats();
    info!(
        "Fetched {} frames: {} discarded, {} resubmitted, {} recycle failures, {} triggers ({} failed)",
        stats.frames_delivered,
        stats.buffers_discarded,
        stats.buffers_resubmitted,
        stats.recycle_failures,
        stats.captures_triggered,
        stats.trigger_failures
    );

    service.cleanup();
    metrics.publish(&service);
    info!("Done.");
    std::process::exit(exit_code);
}

#[cfg(feature = "metrics")]
struct Exporter(Option<picam_source::metrics::SharedMetrics>);

#[cfg(feature = "metrics")]
impl Exporter {
    fn publish(&self, service: &FrameService) {
        if let Some(state) = &self.0 {
            let snapshot = picam_source::metrics::MetricsSnapshot::from_service(service);
            state.blocking_write().update(&snapshot);
        }
    }
}

#[cfg(feature = "metrics")]
fn metrics_exporter(port: u16) -> Exporter {
    use picam_source::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    if port == 0 {
        return Exporter(None);
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            return Exporter(None);
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();

    let spawned = std::thread::Builder::new()
        .name("metrics".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Metrics runtime failed: {}", e);
                    return;
                }
            };
            if let Err(e) = runtime.block_on(server.run()) {
                error!("Metrics server stopped: {}", e);
            }
        });
    match spawned {
        Ok(_) => Exporter(Some(state)),
        Err(e) => {
            warn!("Metrics thread not started: {}", e);
            Exporter(None)
        }
    }
}

#[cfg(not(feature = "metrics"))]
struct Exporter;

#[cfg(not(feature = "metrics"))]
impl Exporter {
    fn publish(&self, _service: &FrameService) {}
}

#[cfg(not(feature = "metrics"))]
fn metrics_exporter(port: u16) -> Exporter {
    if port != 0 {
        warn!("Built without the `metrics` feature; --metrics-port {} ignored", port);
    }
    Exporter
}
