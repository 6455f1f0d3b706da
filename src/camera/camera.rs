//! Application-visible camera entity.

use crate::capture::{Buffer, CameraConfiguration, Request, RequestId, StreamId, StreamRole};
use crate::pipeline::{PipelineError, PipelineHandler, SharedHandler, WeakHandler};
use crate::signal::Signal;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CAMERA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique camera identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraId(u64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

/// Payload of the buffer-completed notification.
#[derive(Debug, Clone)]
pub struct BufferEvent {
    pub request: RequestId,
    pub cookie: u64,
    pub buffer: Buffer,
}

/// A capture endpoint produced by a pipeline handler.
///
/// Cameras only hold a weak reference to their handler. Once the handler
/// is gone, or the camera has been disconnected, every operation fails
/// with [`PipelineError::Disconnected`].
pub struct Camera {
    id: CameraId,
    name: String,
    pipe: WeakHandler,
    connected: Cell<bool>,
    buffer_completed: Signal<BufferEvent>,
    request_completed: Signal<Request>,
    disconnected: Signal<()>,
}

impl Camera {
    /// Creates a camera bound to `pipe`.
    pub fn new(name: impl Into<String>, pipe: WeakHandler) -> Rc<Self> {
        Rc::new(Self {
            id: CameraId(NEXT_CAMERA_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            pipe,
            connected: Cell::new(true),
            buffer_completed: Signal::new(),
            request_completed: Signal::new(),
            disconnected: Signal::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning pipeline handler, if it is still alive.
    pub fn pipeline(&self) -> Option<SharedHandler> {
        self.pipe.upgrade()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Fired for every buffer that completes or is cancelled.
    pub fn buffer_completed(&self) -> &Signal<BufferEvent> {
        &self.buffer_completed
    }

    /// Fired exactly once per queued request, with its final outcome.
    pub fn request_completed(&self) -> &Signal<Request> {
        &self.request_completed
    }

    /// Fired when the underlying device goes away.
    pub fn disconnected(&self) -> &Signal<()> {
        &self.disconnected
    }

    pub fn generate_configuration(&self, roles: &[StreamRole]) -> Option<CameraConfiguration> {
        self.with_pipe(|pipe, camera| Ok(pipe.generate_configuration(camera, roles)))
            .ok()
            .flatten()
    }

    pub fn configure(&self, config: &CameraConfiguration) -> Result<(), PipelineError> {
        self.with_pipe(|pipe, camera| pipe.configure(camera, config))
    }

    pub fn allocate_buffers(&self, streams: &[StreamId]) -> Result<(), PipelineError> {
        self.with_pipe(|pipe, camera| pipe.allocate_buffers(camera, streams))
    }

    pub fn free_buffers(&self, streams: &[StreamId]) -> Result<(), PipelineError> {
        self.with_pipe(|pipe, camera| pipe.free_buffers(camera, streams))
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.with_pipe(|pipe, camera| pipe.start(camera))
    }

    /// Stops capture. Every outstanding request completes before this
    /// returns, cancelled if it had not finished.
    pub fn stop(&self) -> Result<(), PipelineError> {
        self.with_pipe(|pipe, camera| {
            pipe.stop(camera);
            Ok(())
        })
    }

    pub fn queue_request(&self, request: Request) -> Result<(), PipelineError> {
        request.validate()?;
        self.with_pipe(|pipe, camera| pipe.queue_request(camera, request))
    }

    fn with_pipe<R>(
        &self,
        f: impl FnOnce(&mut dyn PipelineHandler, &Camera) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        if !self.is_connected() {
            return Err(PipelineError::Disconnected);
        }
        let pipe = self.pipe.upgrade().ok_or(PipelineError::Disconnected)?;
        // Already borrowed when called from inside one of the handler's own
        // completion notifications.
        let result = {
            let mut guard = pipe.try_borrow_mut().map_err(|_| PipelineError::Busy)?;
            f(&mut *guard, self)
        };

        // A slot run by `f` may have unplugged a device of this handler.
        let manager = pipe.try_borrow().ok().and_then(|p| p.context().manager());
        if let Some(manager) = manager {
            manager.dispatch_deferred();
        }
        result
    }

    /// Hands a finished request to observers. The request is dropped
    /// once every slot has run.
    pub(crate) fn request_complete(&self, request: Request) {
        tracing::debug!(
            camera = %self.name,
            request = %request.id(),
            status = ?request.status(),
            "Request complete"
        );
        self.request_completed.emit(&request);
    }

    pub(crate) fn disconnect(&self) {
        if !self.connected.replace(false) {
            return;
        }
        tracing::info!(camera = %self.name, "Camera disconnected");
        self.disconnected.emit(&());
    }
}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.connected.get())
            .finish_non_exhaustive()
    }
}
