//! Simulated capture hardware shared by the built-in handlers.
//!
//! [`VideoDevice`] stands in for a capture node: requests go in with
//! [`queue`](VideoDevice::queue) and come back out of
//! [`dequeue`](VideoDevice::dequeue) in submission order while streaming.
//! [`StreamSet`] holds the stream configuration and buffer allocation
//! state of one camera, and [`CaptureState`] bundles both with the media
//! device the camera was created from.

use crate::camera::Camera;
use crate::capture::{
    CameraConfiguration, FrameMetadata, PixelFormat, Request, RequestId, Size,
    StreamConfiguration, StreamId, StreamRole,
};
use crate::device::MediaDevice;
use crate::pipeline::{PipelineBase, PipelineError};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// A simulated video capture node.
#[derive(Debug)]
pub struct VideoDevice {
    name: String,
    streaming: bool,
    queue: VecDeque<RequestId>,
    sequence: u64,
}

impl VideoDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streaming: false,
            queue: VecDeque::new(),
            sequence: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of requests waiting for the hardware.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stream_on(&mut self) -> Result<(), PipelineError> {
        if self.streaming {
            return Err(PipelineError::Busy);
        }
        self.streaming = true;
        self.sequence = 0;
        tracing::debug!(video = %self.name, "Stream on");
        Ok(())
    }

    /// Stops streaming and returns the requests the hardware dropped,
    /// oldest first.
    pub fn stream_off(&mut self) -> Vec<RequestId> {
        self.streaming = false;
        let dropped: Vec<RequestId> = self.queue.drain(..).collect();
        tracing::debug!(video = %self.name, dropped = dropped.len(), "Stream off");
        dropped
    }

    pub fn queue(&mut self, request: RequestId) -> Result<(), PipelineError> {
        if !self.streaming {
            return Err(PipelineError::NotRunning);
        }
        self.queue.push_back(request);
        Ok(())
    }

    /// Returns the oldest queued request and its frame sequence number.
    pub fn dequeue(&mut self) -> Option<(RequestId, u64)> {
        if !self.streaming {
            return None;
        }
        let request = self.queue.pop_front()?;
        let sequence = self.sequence;
        self.sequence += 1;
        Some((request, sequence))
    }
}

/// Capabilities of one stream exposed by a camera.
#[derive(Debug, Clone)]
pub struct StreamCaps {
    pub id: StreamId,
    /// Roles the stream can serve.
    pub roles: &'static [StreamRole],
    pub formats: &'static [PixelFormat],
    pub max_size: Size,
    pub default_format: PixelFormat,
    pub default_size: Size,
    pub default_buffers: u32,
}

impl StreamCaps {
    fn supports(&self, config: &StreamConfiguration) -> bool {
        self.formats.contains(&config.pixel_format)
            && config.size.width <= self.max_size.width
            && config.size.height <= self.max_size.height
    }

    fn default_configuration(&self) -> StreamConfiguration {
        StreamConfiguration {
            stream: Some(self.id),
            pixel_format: self.default_format,
            size: self.default_size,
            buffer_count: self.default_buffers,
        }
    }
}

/// Configuration and buffer state of a camera's streams.
#[derive(Debug)]
pub struct StreamSet {
    caps: Vec<StreamCaps>,
    active: BTreeMap<StreamId, StreamConfiguration>,
    allocated: BTreeMap<StreamId, u32>,
}

impl StreamSet {
    pub fn new(caps: Vec<StreamCaps>) -> Self {
        Self {
            caps,
            active: BTreeMap::new(),
            allocated: BTreeMap::new(),
        }
    }

    /// Picks one distinct stream per role. Returns `None` if any role
    /// cannot be served.
    pub fn generate(&self, roles: &[StreamRole]) -> Option<CameraConfiguration> {
        let mut config = CameraConfiguration::new();
        let mut used: Vec<StreamId> = Vec::with_capacity(roles.len());

        for role in roles {
            let caps = self
                .caps
                .iter()
                .find(|s| s.roles.contains(role) && !used.contains(&s.id))?;
            used.push(caps.id);
            config.push(caps.default_configuration());
        }

        Some(config)
    }

    /// Replaces the active configuration. Nothing changes on error.
    pub fn configure(&mut self, config: &CameraConfiguration) -> Result<(), PipelineError> {
        config.validate()?;
        if !self.allocated.is_empty() {
            return Err(PipelineError::Busy);
        }

        for stream in config.streams() {
            // Bound by validate() above.
            let Some(id) = stream.stream else {
                continue;
            };
            let caps = self
                .caps
                .iter()
                .find(|s| s.id == id)
                .ok_or_else(|| PipelineError::Unsupported(format!("unknown {}", id)))?;
            if !caps.supports(stream) {
                return Err(PipelineError::Unsupported(format!(
                    "{:?} {} on {}",
                    stream.pixel_format, stream.size, id
                )));
            }
        }

        self.active = config
            .streams()
            .iter()
            .filter_map(|s| s.stream.map(|id| (id, s.clone())))
            .collect();
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn allocate(&mut self, streams: &[StreamId]) -> Result<(), PipelineError> {
        let mut counts = Vec::with_capacity(streams.len());
        for stream in streams {
            let config = self.active.get(stream).ok_or(PipelineError::NotConfigured)?;
            if self.allocated.contains_key(stream) {
                return Err(PipelineError::Busy);
            }
            counts.push((*stream, config.buffer_count));
        }
        self.allocated.extend(counts);
        Ok(())
    }

    pub fn free(&mut self, streams: &[StreamId]) {
        for stream in streams {
            self.allocated.remove(stream);
        }
    }

    pub fn has_buffers(&self) -> bool {
        !self.allocated.is_empty()
    }

    /// Checks that every buffer of `request` refers to an allocated slot.
    pub fn validate_request(&self, request: &Request) -> Result<(), PipelineError> {
        for buffer in request.buffers() {
            let stream = buffer.stream();
            let index = buffer.index();
            match self.allocated.get(&stream) {
                Some(count) if index < *count as usize => {}
                _ => return Err(PipelineError::InvalidBuffer { stream, index }),
            }
        }
        Ok(())
    }

    /// Payload size of one frame on `stream`.
    pub fn frame_bytes(&self, stream: StreamId) -> usize {
        self.active
            .get(&stream)
            .map(|c| c.pixel_format.frame_bytes(c.size))
            .unwrap_or(0)
    }
}

/// Per-camera state of the built-in handlers.
#[derive(Debug)]
pub struct CaptureState {
    pub media: Rc<MediaDevice>,
    pub video: VideoDevice,
    pub streams: StreamSet,
}

impl CaptureState {
    pub fn new(media: Rc<MediaDevice>, streams: Vec<StreamCaps>) -> Self {
        let video = VideoDevice::new(format!("{}:video0", media.dev_node()));
        Self {
            media,
            video,
            streams: StreamSet::new(streams),
        }
    }

    pub fn is_running(&self) -> bool {
        self.video.is_streaming()
    }

    pub(crate) fn configure(&mut self, config: &CameraConfiguration) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::Busy);
        }
        self.streams.configure(config)
    }

    pub(crate) fn allocate(&mut self, streams: &[StreamId]) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::Busy);
        }
        self.streams.allocate(streams)
    }

    pub(crate) fn free(&mut self, streams: &[StreamId]) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::Busy);
        }
        self.streams.free(streams);
        Ok(())
    }

    pub(crate) fn start(&mut self) -> Result<(), PipelineError> {
        if !self.streams.has_buffers() {
            return Err(PipelineError::NotConfigured);
        }
        self.video.stream_on()
    }

    /// Validates `request` and hands it to the hardware.
    pub(crate) fn submit(&mut self, request: &Request) -> Result<(), PipelineError> {
        self.streams.validate_request(request)?;
        self.video.queue(request.id())
    }
}

/// Completes the oldest request the hardware has finished on `camera`.
///
/// Every buffer of the request is filled before the request itself
/// completes. Returns false if nothing was ready.
pub(crate) fn complete_next(base: &mut PipelineBase<CaptureState>, camera: &Camera) -> bool {
    let Some((id, sequence)) = base.camera_data_mut(camera).ext_mut().video.dequeue() else {
        return false;
    };

    let data = base.camera_data(camera);
    let buffers: Vec<(StreamId, usize)> = match data.find(id) {
        Some(request) => request
            .pending_streams()
            .map(|stream| (stream, data.ext().streams.frame_bytes(stream)))
            .collect(),
        None => panic!("hardware returned request {} that was never queued", id),
    };

    let timestamp = Utc::now();
    for (stream, bytes_used) in buffers {
        let metadata = FrameMetadata {
            sequence,
            timestamp,
            bytes_used,
        };
        base.complete_buffer(camera, id, stream, metadata);
    }
    base.complete_request(camera, id);
    true
}

/// Stops the hardware of `camera`, then cancels what is still outstanding.
pub(crate) fn stop_camera(base: &mut PipelineBase<CaptureState>, camera: &Camera) {
    let video = &mut base.camera_data_mut(camera).ext_mut().video;
    if video.is_streaming() {
        video.stream_off();
    }
    base.stop(camera);
}

/// Stops the hardware of every camera the handler owns, cancels what is
/// outstanding and releases the devices. Cameras destroyed elsewhere are
/// included.
pub(crate) fn shutdown(base: &mut PipelineBase<CaptureState>) {
    for data in base.all_camera_data_mut() {
        let video = &mut data.ext_mut().video;
        if video.is_streaming() {
            video.stream_off();
        }
    }

    base.stop_all();

    for data in base.all_camera_data() {
        data.ext().media.release();
    }
}
