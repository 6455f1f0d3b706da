//! Pipeline handler infrastructure.
//!
//! A pipeline handler matches the media devices it needs, creates cameras
//! for them and drives their capture lifecycle. Concrete handlers implement
//! [`PipelineHandler`] and embed a [`PipelineBase`], which provides the
//! shared behaviour:
//!
//! - per-camera data association ([`PipelineBase::register_camera`],
//!   [`PipelineBase::camera_data`])
//! - request tracking with strictly in-order completion
//!   ([`PipelineBase::queue_request`], [`PipelineBase::complete_buffer`],
//!   [`PipelineBase::complete_request`], [`PipelineBase::stop`])
//! - hot-unplug handling ([`HandlerContext::hotplug_media_device`],
//!   [`HandlerContext::disconnect`])
//!
//! Overrides of `stop`, `disconnect` and `shutdown` must call the base
//! behaviour explicitly as part of their own implementation.
//!
//! # Threading
//!
//! Nothing here is synchronised. Handlers live in an `Rc<RefCell<_>>` and
//! every operation, including hardware completion, runs on the thread that
//! owns the camera manager. Completions produced elsewhere must be
//! marshalled onto that thread and delivered through
//! [`PipelineHandler::process_completions`].

mod base;
mod data;
mod hotplug;

pub use base::PipelineBase;
pub use data::CameraData;
pub use hotplug::HandlerContext;
pub(crate) use hotplug::media_device_disconnected;

use crate::camera::Camera;
use crate::capture::{
    CameraConfiguration, ConfigError, RequestError, Request, StreamId, StreamRole,
};
use crate::device::DeviceEnumerator;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Shared, owning handle to a pipeline handler.
pub type SharedHandler = Rc<RefCell<dyn PipelineHandler>>;

/// Non-owning handle to a pipeline handler.
pub type WeakHandler = Weak<RefCell<dyn PipelineHandler>>;

const EIO: i32 = 5;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;

/// Errors reported by pipeline handler operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration not supported: {0}")]
    Unsupported(String),
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error("no allocated buffer {index} on {stream}")]
    InvalidBuffer { stream: StreamId, index: usize },
    #[error("camera is not configured")]
    NotConfigured,
    #[error("camera is not running")]
    NotRunning,
    #[error("camera or pipeline is busy")]
    Busy,
    #[error("camera is disconnected")]
    Disconnected,
    #[error("cannot allocate buffers for {0}")]
    NoMemory(StreamId),
    #[error("device error: {0}")]
    Device(String),
}

impl PipelineError {
    /// Negative errno-style code for callers that speak integer results.
    pub fn code(&self) -> i32 {
        match self {
            PipelineError::Config(_)
            | PipelineError::Unsupported(_)
            | PipelineError::Request(_)
            | PipelineError::InvalidBuffer { .. }
            | PipelineError::NotConfigured => -EINVAL,
            PipelineError::NotRunning | PipelineError::Busy => -EBUSY,
            PipelineError::Disconnected => -ENODEV,
            PipelineError::NoMemory(_) => -ENOMEM,
            PipelineError::Device(_) => -EIO,
        }
    }
}

/// Running counters kept by the base implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub requests_queued: u64,
    pub requests_completed: u64,
    pub requests_cancelled: u64,
    pub buffers_completed: u64,
    pub buffers_cancelled: u64,
    pub disconnects: u64,
}

impl PipelineStats {
    /// Adds another handler's counters to these.
    pub fn merge(&mut self, other: &PipelineStats) {
        self.requests_queued += other.requests_queued;
        self.requests_completed += other.requests_completed;
        self.requests_cancelled += other.requests_cancelled;
        self.buffers_completed += other.buffers_completed;
        self.buffers_cancelled += other.buffers_cancelled;
        self.disconnects += other.disconnects;
    }

    /// Requests queued but not yet completed or cancelled.
    pub fn requests_in_flight(&self) -> u64 {
        self.requests_queued
            .saturating_sub(self.requests_completed + self.requests_cancelled)
    }
}

/// Capability interface implemented by every pipeline handler.
///
/// Operations returning `Result` leave the handler unchanged on error.
pub trait PipelineHandler {
    /// Registry name of the handler.
    fn name(&self) -> &'static str;

    /// Device and camera ownership shared by all handlers.
    fn context(&self) -> &HandlerContext;

    fn context_mut(&mut self) -> &mut HandlerContext;

    /// Acquires every device one pipeline instance needs and registers its
    /// cameras. Returns false, with nothing acquired, if any device is
    /// missing.
    fn match_devices(&mut self, enumerator: &DeviceEnumerator) -> bool;

    /// Default configuration for the given roles, or `None` if the camera
    /// cannot serve them all.
    fn generate_configuration(
        &mut self,
        camera: &Camera,
        roles: &[StreamRole],
    ) -> Option<CameraConfiguration>;

    /// Applies `config` exactly, or fails without changing anything.
    fn configure(
        &mut self,
        camera: &Camera,
        config: &CameraConfiguration,
    ) -> Result<(), PipelineError>;

    fn allocate_buffers(&mut self, camera: &Camera, streams: &[StreamId])
        -> Result<(), PipelineError>;

    fn free_buffers(&mut self, camera: &Camera, streams: &[StreamId]) -> Result<(), PipelineError>;

    fn start(&mut self, camera: &Camera) -> Result<(), PipelineError>;

    /// Stops capture. Implementations stop the hardware and then call
    /// [`PipelineBase::stop`] as their last step.
    fn stop(&mut self, camera: &Camera);

    /// Submits a request to hardware. Implementations call
    /// [`PipelineBase::queue_request`] once the hardware accepted it.
    fn queue_request(&mut self, camera: &Camera, request: Request) -> Result<(), PipelineError>;

    /// Delivers hardware completions that are ready. Returns the number of
    /// requests completed.
    fn process_completions(&mut self) -> usize {
        0
    }

    /// Called when a monitored device was unplugged. Overrides must call
    /// [`HandlerContext::disconnect`].
    fn disconnect(&mut self) {
        self.context_mut().disconnect();
    }

    /// Called by the camera manager before it drops the handler. Every
    /// outstanding request must be completed by the time this returns.
    fn shutdown(&mut self) {
        let cameras: Vec<Rc<Camera>> = self.context().cameras().collect();
        for camera in &cameras {
            self.stop(camera);
        }
    }

    fn stats(&self) -> PipelineStats {
        self.context().stats()
    }
}
