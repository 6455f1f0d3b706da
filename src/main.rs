//! Capture Pipeline CLI
//!
//! Command-line interface for exercising pipeline handlers over simulated
//! media devices, including hot-unplug in the middle of a session.

use capture_pipeline::{
    camera::{Camera, CameraManager},
    capture::{Buffer, DeviceConfig, FileConfig, Request, RequestStatus, StreamId},
    device::DeviceEnumerator,
    metrics::MetricsSnapshot,
    pipeline::PipelineError,
    registry,
};
use clap::{Args, Parser, Subcommand};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "capture-pipeline", version, about = "Drive capture pipelines over simulated devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered pipeline handlers
    List,
    /// Run a capture session
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Requests queued per camera at start
    #[arg(long)]
    requests: Option<u32>,
    /// Frames to capture before stopping
    #[arg(long)]
    frames: Option<u32>,
    /// Unplug the first device after this many frames
    #[arg(long)]
    unplug_after: Option<u32>,
    /// Capture until interrupted
    #[arg(long)]
    continuous: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] capture_pipeline::capture::ConfigError),
    #[error("{camera}: {source}")]
    Pipeline {
        camera: String,
        source: PipelineError,
    },
    #[error("no camera matched any pipeline handler")]
    NoCameras,
}

/// Per-camera state of a running session.
struct Session {
    camera: Rc<Camera>,
    streams: Vec<StreamId>,
    completed: Rc<RefCell<Vec<(u64, RequestStatus)>>>,
}

impl Session {
    fn queue(&self, slot: u64) -> Result<(), PipelineError> {
        let mut request = Request::new(slot);
        for stream in &self.streams {
            request.add_buffer(Buffer::new(*stream, slot as usize))?;
        }
        self.camera.queue_request(request)
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

    let cli = Cli::parse();
    capture_pipeline::pipelines::register_builtin();

    match cli.command {
        Command::List => {
            for factory in registry::all() {
                println!("{}", factory.name());
            }
        }
        Command::Run(args) => {
            if let Err(e) = run(args) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            driver: "sim".to_string(),
            model: "Sim Sensor".to_string(),
            dev_node: "/dev/media0".to_string(),
            entities: vec!["sensor".to_string()],
        },
        DeviceConfig {
            driver: "uvcvideo".to_string(),
            model: "USB Camera".to_string(),
            dev_node: "/dev/media1".to_string(),
            entities: Vec::new(),
        },
    ]
}

fn run(args: RunArgs) -> Result<(), CliError> {
    info!("Capture Pipeline v{}", capture_pipeline::VERSION);

    let mut config = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(requests) = args.requests {
        config.session.requests = requests;
    }
    if let Some(frames) = args.frames {
        config.session.frames = frames;
    }
    if let Some(unplug_after) = args.unplug_after {
        config.session.unplug_after = unplug_after;
    }
    config.output.continuous |= args.continuous;
    if config.devices.is_empty() {
        info!("No devices configured, using simulated defaults");
        config.devices = default_devices();
    }

    let manager = CameraManager::new(DeviceEnumerator::from_configs(&config.devices));
    manager.camera_removed().connect(|camera: &Rc<Camera>| {
        warn!(camera = camera.name(), "Camera removed");
    });
    manager.start(&config.manager.pipelines);

    let cameras = manager.cameras();
    if cameras.is_empty() {
        return Err(CliError::NoCameras);
    }

    let running = Arc::new(AtomicBool::new(true));
    if config.output.continuous {
        let r = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    #[cfg(feature = "metrics")]
    let metrics = spawn_metrics_server(config.output.metrics_port);

    let mut sessions = Vec::new();
    for camera in cameras {
        if let Some(session) = open_session(&camera, &config)? {
            sessions.push(session);
        }
    }

    let mut frames = 0u64;
    let mut unplugged = config.session.unplug_after == 0;

    while running.load(Ordering::SeqCst) {
        let completed = manager.process_events();
        frames += completed as u64;

        for session in &sessions {
            let done: Vec<(u64, RequestStatus)> = session.completed.borrow_mut().drain(..).collect();
            for (slot, status) in done {
                if status != RequestStatus::Complete || !session.camera.is_connected() {
                    continue;
                }
                if let Err(e) = session.queue(slot) {
                    warn!(camera = session.camera.name(), "Requeue failed: {}", e);
                }
            }
        }

        if !unplugged && frames >= config.session.unplug_after as u64 {
            unplugged = true;
            if let Some(device) = config.devices.first() {
                info!(dev_node = %device.dev_node, "Unplugging device");
                if !manager.unplug(&device.dev_node) {
                    warn!(dev_node = %device.dev_node, "Device already gone");
                }
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Some(state) = &metrics {
                state
                    .blocking_write()
                    .update(&MetricsSnapshot::from_manager(&manager));
            }
        }

        if !config.output.continuous
            && (frames >= config.session.frames as u64 || completed == 0)
        {
            break;
        }
        if sessions.iter().all(|s| !s.camera.is_connected()) {
            warn!("All cameras disconnected");
            break;
        }
        if config.output.continuous {
            std::thread::sleep(Duration::from_millis(33));
        }
    }

    for session in &sessions {
        close_session(session);
    }

    let snapshot = MetricsSnapshot::from_manager(&manager);
    info!(
        frames,
        queued = snapshot.stats.requests_queued,
        completed = snapshot.stats.requests_completed,
        cancelled = snapshot.stats.requests_cancelled,
        disconnects = snapshot.stats.disconnects,
        "Session finished"
    );
    println!(
        "Captured {} frames, {} requests cancelled",
        frames, snapshot.stats.requests_cancelled
    );

    manager.stop();
    Ok(())
}

fn open_session(camera: &Rc<Camera>, config: &FileConfig) -> Result<Option<Session>, CliError> {
    let fail = |source: PipelineError| CliError::Pipeline {
        camera: camera.name().to_string(),
        source,
    };

    let Some(camera_config) = camera.generate_configuration(&config.session.roles) else {
        warn!(camera = camera.name(), roles = ?config.session.roles, "Roles not supported, skipping");
        return Ok(None);
    };
    camera.configure(&camera_config).map_err(fail)?;

    let streams: Vec<StreamId> = camera_config.stream_ids().collect();
    camera.allocate_buffers(&streams).map_err(fail)?;

    let completed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&completed);
    let name = camera.name().to_string();
    camera.request_completed().connect(move |request: &Request| {
        tracing::debug!(camera = %name, request = %request.id(), status = ?request.status(), "Completed");
        sink.borrow_mut().push((request.cookie(), request.status()));
    });

    camera.start().map_err(fail)?;

    let slots = camera_config
        .streams()
        .iter()
        .map(|s| s.buffer_count)
        .min()
        .unwrap_or(0)
        .min(config.session.requests);

    let session = Session {
        camera: Rc::clone(camera),
        streams,
        completed,
    };
    for slot in 0..slots as u64 {
        session.queue(slot).map_err(fail)?;
    }

    info!(camera = camera.name(), streams = session.streams.len(), requests = slots, "Session started");
    Ok(Some(session))
}

fn close_session(session: &Session) {
    let camera = &session.camera;
    if !camera.is_connected() {
        return;
    }
    if let Err(e) = camera.stop() {
        warn!(camera = camera.name(), "Stop failed: {}", e);
    }
    if let Err(e) = camera.free_buffers(&session.streams) {
        warn!(camera = camera.name(), "Freeing buffers failed: {}", e);
    }
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(
    port: u16,
) -> Option<Arc<tokio::sync::RwLock<capture_pipeline::metrics::MetricsState>>> {
    use capture_pipeline::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            return None;
        }
    };

    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Failed to start metrics runtime: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {}", e);
        }
    });
    Some(state)
}
