//! Capture Pipeline Library
//!
//! The core of a camera stack: pipeline handlers that own media devices,
//! create cameras for them and drive their capture requests.
//!
//! # Architecture
//!
//! ```text
//! registry ──creates──▶ pipeline handler ──registers──▶ camera manager
//!                          │       ▲                          │
//!                  acquires│       │disconnect               │publishes
//!                          ▼       │                          ▼
//!                     media device ┘                       cameras
//! ```
//!
//! - [`registry`]: process-wide list of handler factories
//! - [`pipeline`]: the handler trait and the shared base behaviour, which
//!   tracks every queued request and completes them strictly in order
//! - [`device`]: media devices and the enumerator handlers search
//! - [`camera`]: application-facing cameras and the camera manager
//! - [`pipelines`]: built-in handlers over simulated hardware
//!
//! # Design Principles
//!
//! - **Exactly one completion**: every queued request is reported to the
//!   application exactly once, as complete or cancelled
//! - **FIFO per camera**: requests complete in the order they were queued
//! - **Unplug is teardown**: removing a device disconnects every camera of
//!   the handler that used it
//! - **Single-threaded**: handlers, cameras and devices live on one thread
//!
//! # Example
//!
//! ```no_run
//! use capture_pipeline::{
//!     camera::CameraManager,
//!     capture::{Buffer, Request, StreamRole},
//!     device::{DeviceEnumerator, MediaDevice},
//! };
//!
//! let mut enumerator = DeviceEnumerator::new();
//! enumerator.add_device(MediaDevice::new(
//!     "sim",
//!     "Sim Sensor",
//!     "/dev/media0",
//!     vec!["sensor".to_string()],
//! ));
//!
//! let manager = CameraManager::new(enumerator);
//! manager.start(&[]);
//!
//! let camera = manager.cameras()[0].clone();
//! let config = camera
//!     .generate_configuration(&[StreamRole::Viewfinder])
//!     .unwrap();
//! camera.configure(&config).unwrap();
//!
//! let streams: Vec<_> = config.stream_ids().collect();
//! camera.allocate_buffers(&streams).unwrap();
//! camera.request_completed().connect(|request: &Request| {
//!     println!("request {} {:?}", request.id(), request.status());
//! });
//!
//! camera.start().unwrap();
//! let mut request = Request::new(0);
//! request.add_buffer(Buffer::new(streams[0], 0)).unwrap();
//! camera.queue_request(request).unwrap();
//!
//! manager.process_events();
//! camera.stop().unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod camera;
pub mod capture;
pub mod device;
pub mod metrics;
pub mod pipeline;
pub mod pipelines;
pub mod registry;
pub mod signal;

// Re-export commonly used types at crate root
pub use camera::{BufferEvent, Camera, CameraId, CameraManager};
pub use capture::{
    Buffer, BufferStatus, CameraConfiguration, FileConfig, FrameMetadata, Request, RequestId,
    RequestStatus, StreamId, StreamRole,
};
pub use device::{DeviceEnumerator, DeviceMatch, MediaDevice};
pub use pipeline::{
    CameraData, HandlerContext, PipelineBase, PipelineError, PipelineHandler, PipelineStats,
    SharedHandler, WeakHandler,
};
pub use registry::{HandlerFactory, Registry, RegistryError};
pub use signal::{Signal, SubscriptionToken};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
