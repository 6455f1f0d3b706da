//! Per-camera pipeline data and outstanding request tracking.

use super::{SharedHandler, WeakHandler};
use crate::camera::Camera;
use crate::capture::{Request, RequestId};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Pipeline-specific data associated with a camera.
///
/// `E` is the handler's own per-camera state. The base part tracks the
/// requests queued to the camera in submission order; they leave the queue
/// only through completion or cancellation.
///
/// The data is owned by the handler and lives as long as the handler does,
/// even after the camera itself has been disconnected or dropped.
pub struct CameraData<E> {
    camera: Weak<Camera>,
    pipe: WeakHandler,
    queued_requests: VecDeque<Request>,
    ext: E,
}

impl<E> CameraData<E> {
    pub(crate) fn new(camera: &Rc<Camera>, pipe: WeakHandler, ext: E) -> Self {
        Self {
            camera: Rc::downgrade(camera),
            pipe,
            queued_requests: VecDeque::new(),
            ext,
        }
    }

    /// The camera, if it is still alive.
    pub fn camera(&self) -> Option<Rc<Camera>> {
        self.camera.upgrade()
    }

    /// The owning handler, if it is still alive.
    pub fn pipe(&self) -> Option<SharedHandler> {
        self.pipe.upgrade()
    }

    pub fn ext(&self) -> &E {
        &self.ext
    }

    pub fn ext_mut(&mut self) -> &mut E {
        &mut self.ext
    }

    /// Outstanding requests, oldest first.
    pub fn queued_requests(&self) -> impl Iterator<Item = &Request> {
        self.queued_requests.iter()
    }

    pub fn queued_len(&self) -> usize {
        self.queued_requests.len()
    }

    /// The request that must complete next.
    pub fn front(&self) -> Option<&Request> {
        self.queued_requests.front()
    }

    pub fn find(&self, id: RequestId) -> Option<&Request> {
        self.queued_requests.iter().find(|r| r.id() == id)
    }

    pub(crate) fn find_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.queued_requests.iter_mut().find(|r| r.id() == id)
    }

    pub(crate) fn push(&mut self, request: Request) {
        self.queued_requests.push_back(request);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Request> {
        self.queued_requests.pop_front()
    }
}
