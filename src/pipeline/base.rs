//! Base pipeline handler behaviour: camera data association and the
//! request lifecycle.

use super::data::CameraData;
use super::hotplug::HandlerContext;
use super::WeakHandler;
use crate::camera::{BufferEvent, Camera, CameraId, CameraManager};
use crate::capture::{FrameMetadata, Request, RequestId, RequestStatus, StreamId};
use std::collections::HashMap;
use std::rc::Rc;

/// Shared implementation embedded by every concrete pipeline handler.
///
/// `E` is the handler's per-camera extension state. Completion order is
/// strictly FIFO per camera: completing any request other than the oldest
/// outstanding one is a bug in the calling handler and panics.
pub struct PipelineBase<E> {
    context: HandlerContext,
    data: HashMap<CameraId, CameraData<E>>,
}

impl<E> PipelineBase<E> {
    pub fn new(manager: &Rc<CameraManager>, handler: WeakHandler) -> Self {
        Self {
            context: HandlerContext::new(manager, handler),
            data: HashMap::new(),
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HandlerContext {
        &mut self.context
    }

    /// Associates `ext` with a newly created camera and publishes the
    /// camera to the manager.
    ///
    /// Must be called exactly once per camera, before applications can see
    /// it. Ownership of `ext` moves to the handler.
    pub fn register_camera(&mut self, camera: Rc<Camera>, ext: E) {
        assert!(
            !self.data.contains_key(&camera.id()),
            "camera {} registered twice",
            camera.name()
        );

        let data = CameraData::new(&camera, self.context.handler(), ext);
        self.data.insert(camera.id(), data);
        self.context.add_camera(&camera);

        tracing::info!(camera = camera.name(), id = %camera.id(), "Registered camera");

        match self.context.manager() {
            Some(manager) => manager.add_camera(camera),
            None => tracing::warn!(camera = camera.name(), "Camera manager gone, camera not published"),
        }
    }

    /// Pipeline data of a camera registered by this handler.
    ///
    /// # Panics
    ///
    /// If the camera was never registered with this handler.
    pub fn camera_data(&self, camera: &Camera) -> &CameraData<E> {
        match self.data.get(&camera.id()) {
            Some(data) => data,
            None => panic!("camera {} has no pipeline data", camera.name()),
        }
    }

    /// Mutable variant of [`camera_data`](Self::camera_data).
    pub fn camera_data_mut(&mut self, camera: &Camera) -> &mut CameraData<E> {
        match self.data.get_mut(&camera.id()) {
            Some(data) => data,
            None => panic!("camera {} has no pipeline data", camera.name()),
        }
    }

    /// Returns true if `camera` was registered by this handler.
    pub fn owns(&self, camera: &Camera) -> bool {
        self.data.contains_key(&camera.id())
    }

    /// Records `request` as outstanding on `camera`.
    ///
    /// Handlers call this after submitting the request to hardware; from
    /// here on the request is guaranteed one completion notification.
    pub fn queue_request(&mut self, camera: &Camera, request: Request) {
        tracing::debug!(camera = camera.name(), request = %request.id(), "Queued request");
        self.camera_data_mut(camera).push(request);
        self.context.stats.requests_queued += 1;
    }

    /// Signals that hardware filled the buffer of `stream` in `request`.
    ///
    /// Observers are notified before the request bookkeeping is updated.
    /// Returns true if that was the request's last pending buffer; the
    /// request is *not* completed automatically, the caller decides when
    /// to call [`complete_request`](Self::complete_request).
    pub fn complete_buffer(
        &mut self,
        camera: &Camera,
        request: RequestId,
        stream: StreamId,
        metadata: FrameMetadata,
    ) -> bool {
        let data = self.camera_data_mut(camera);
        let request = find_queued(data, camera, request);
        let buffer = match request.buffer_mut(stream) {
            Some(buffer) => buffer,
            None => panic!("request {} has no buffer for {}", request.id(), stream),
        };
        assert!(
            buffer.complete(metadata),
            "buffer for {} in request {} already completed",
            stream,
            request.id()
        );

        let last = notify_buffer(camera, request, stream);
        self.context.stats.buffers_completed += 1;
        last
    }

    /// Signals that the buffer of `stream` in `request` was returned
    /// without data. Returns true if it was the last pending buffer.
    pub fn cancel_buffer(&mut self, camera: &Camera, request: RequestId, stream: StreamId) -> bool {
        let data = self.camera_data_mut(camera);
        let request = find_queued(data, camera, request);
        let cancelled = request
            .buffer_mut(stream)
            .map(|buffer| buffer.cancel())
            .unwrap_or(false);
        assert!(
            cancelled,
            "no pending buffer for {} in request {}",
            stream,
            request.id()
        );

        let last = notify_buffer(camera, request, stream);
        self.context.stats.buffers_cancelled += 1;
        last
    }

    /// Completes the oldest outstanding request of `camera`.
    ///
    /// # Panics
    ///
    /// If `request` is not the oldest outstanding request, or if it still
    /// has pending buffers.
    pub fn complete_request(&mut self, camera: &Camera, request: RequestId) {
        let data = self.camera_data_mut(camera);
        let front = data.front().map(Request::id);
        assert_eq!(
            front,
            Some(request),
            "request {} completed out of order on camera {}",
            request,
            camera.name()
        );

        let Some(mut request) = data.pop_front() else {
            unreachable!("front request checked above");
        };
        request.complete(RequestStatus::Complete);
        self.context.stats.requests_completed += 1;
        camera.request_complete(request);
    }

    /// Base stop behaviour: cancels every outstanding request of `camera`,
    /// oldest first.
    ///
    /// Pending buffers of each request are cancelled, and notified, before
    /// the request itself completes as cancelled. Returns only once the
    /// queue is empty.
    pub fn stop(&mut self, camera: &Camera) {
        let mut cancelled = 0u64;
        let mut buffers = 0u64;

        loop {
            let Some(mut request) = self.camera_data_mut(camera).pop_front() else {
                break;
            };
            buffers += cancel_request(&mut request, Some(camera));
            cancelled += 1;
            camera.request_complete(request);
        }

        self.context.stats.requests_cancelled += cancelled;
        self.context.stats.buffers_cancelled += buffers;

        if cancelled > 0 {
            tracing::debug!(camera = camera.name(), requests = cancelled, "Cancelled outstanding requests");
        }
    }

    /// Cancels the outstanding requests of every camera the handler owns.
    ///
    /// Live cameras go through [`stop`](Self::stop). Requests of cameras
    /// already destroyed are still cancelled and counted; there is nobody
    /// left to notify.
    pub fn stop_all(&mut self) {
        let mut ids: Vec<CameraId> = self.data.keys().copied().collect();
        ids.sort();

        for id in ids {
            let Some(data) = self.data.get_mut(&id) else {
                continue;
            };
            if let Some(camera) = data.camera() {
                self.stop(&camera);
                continue;
            }

            let mut cancelled = 0u64;
            let mut buffers = 0u64;
            while let Some(mut request) = data.pop_front() {
                buffers += cancel_request(&mut request, None);
                cancelled += 1;
            }
            self.context.stats.requests_cancelled += cancelled;
            self.context.stats.buffers_cancelled += buffers;

            if cancelled > 0 {
                tracing::debug!(camera = %id, requests = cancelled, "Cancelled requests of destroyed camera");
            }
        }
    }

    /// All camera data owned by the handler.
    pub fn all_camera_data(&self) -> impl Iterator<Item = &CameraData<E>> {
        self.data.values()
    }

    pub fn all_camera_data_mut(&mut self) -> impl Iterator<Item = &mut CameraData<E>> {
        self.data.values_mut()
    }
}

/// Cancels the pending buffers of `request`, then the request itself.
/// Buffer notifications go to `camera` when there is one. Returns the
/// number of buffers cancelled.
fn cancel_request(request: &mut Request, camera: Option<&Camera>) -> u64 {
    let pending: Vec<StreamId> = request.pending_streams().collect();
    for &stream in &pending {
        if let Some(buffer) = request.buffer_mut(stream) {
            buffer.cancel();
        }
        match camera {
            Some(camera) => {
                notify_buffer(camera, request, stream);
            }
            None => {
                request.complete_buffer(stream);
            }
        }
    }
    request.complete(RequestStatus::Cancelled);
    pending.len() as u64
}

fn find_queued<'a, E>(
    data: &'a mut CameraData<E>,
    camera: &Camera,
    request: RequestId,
) -> &'a mut Request {
    match data.find_mut(request) {
        Some(request) => request,
        None => panic!("request {} is not queued on camera {}", request, camera.name()),
    }
}

fn notify_buffer(camera: &Camera, request: &mut Request, stream: StreamId) -> bool {
    if let Some(buffer) = request.buffer(stream) {
        camera.buffer_completed().emit(&BufferEvent {
            request: request.id(),
            cookie: request.cookie(),
            buffer: buffer.clone(),
        });
    }
    request.complete_buffer(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Buffer, BufferStatus, CameraConfiguration, StreamRole};
    use crate::device::DeviceEnumerator;
    use crate::pipeline::{PipelineError, PipelineHandler};
    use chrono::Utc;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Weak;

    struct TestPipeline {
        base: PipelineBase<u32>,
    }

    impl PipelineHandler for TestPipeline {
        fn name(&self) -> &'static str {
            "test"
        }

        fn context(&self) -> &HandlerContext {
            self.base.context()
        }

        fn context_mut(&mut self) -> &mut HandlerContext {
            self.base.context_mut()
        }

        fn match_devices(&mut self, _enumerator: &DeviceEnumerator) -> bool {
            false
        }

        fn generate_configuration(
            &mut self,
            _camera: &Camera,
            _roles: &[StreamRole],
        ) -> Option<CameraConfiguration> {
            None
        }

        fn configure(
            &mut self,
            _camera: &Camera,
            _config: &CameraConfiguration,
        ) -> Result<(), PipelineError> {
            Ok(())
        }

        fn allocate_buffers(
            &mut self,
            _camera: &Camera,
            _streams: &[StreamId],
        ) -> Result<(), PipelineError> {
            Ok(())
        }

        fn free_buffers(
            &mut self,
            _camera: &Camera,
            _streams: &[StreamId],
        ) -> Result<(), PipelineError> {
            Ok(())
        }

        fn start(&mut self, _camera: &Camera) -> Result<(), PipelineError> {
            Ok(())
        }

        fn stop(&mut self, camera: &Camera) {
            self.base.stop(camera);
        }

        fn queue_request(&mut self, camera: &Camera, request: Request) -> Result<(), PipelineError> {
            self.base.queue_request(camera, request);
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Buffer(RequestId, StreamId, BufferStatus),
        Request(RequestId, RequestStatus),
    }

    struct Fixture {
        _manager: Rc<CameraManager>,
        pipe: Rc<RefCell<TestPipeline>>,
        camera: Rc<Camera>,
        events: Rc<RefCell<Vec<Event>>>,
    }

    fn fixture() -> Fixture {
        let manager = CameraManager::new(DeviceEnumerator::new());
        let pipe = Rc::new_cyclic(|me: &Weak<RefCell<TestPipeline>>| {
            RefCell::new(TestPipeline {
                base: PipelineBase::new(&manager, me.clone()),
            })
        });
        let camera = Camera::new("test camera", Rc::downgrade(&(pipe.clone() as Rc<RefCell<dyn PipelineHandler>>)));
        pipe.borrow_mut()
            .base
            .register_camera(Rc::clone(&camera), 7);

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        camera.buffer_completed().connect(move |e: &BufferEvent| {
            sink.borrow_mut().push(Event::Buffer(
                e.request,
                e.buffer.stream(),
                e.buffer.status(),
            ));
        });
        let sink = Rc::clone(&events);
        camera.request_completed().connect(move |r: &Request| {
            sink.borrow_mut().push(Event::Request(r.id(), r.status()));
        });

        Fixture {
            _manager: manager,
            pipe,
            camera,
            events,
        }
    }

    fn request(streams: &[u32]) -> Request {
        let mut request = Request::new(0);
        for stream in streams {
            request.add_buffer(Buffer::new(StreamId(*stream), 0)).unwrap();
        }
        request
    }

    fn metadata() -> FrameMetadata {
        FrameMetadata {
            sequence: 0,
            timestamp: Utc::now(),
            bytes_used: 64,
        }
    }

    #[test]
    fn test_registered_camera_data_lookup() {
        let f = fixture();
        let pipe = f.pipe.borrow();
        let data = pipe.base.camera_data(&f.camera);

        assert_eq!(*data.ext(), 7);
        assert_eq!(data.queued_len(), 0);
        assert!(Rc::ptr_eq(&data.camera().unwrap(), &f.camera));
        assert!(data.pipe().is_some());
        assert!(pipe.base.owns(&f.camera));
        assert_eq!(f._manager.cameras().len(), 1);
    }

    #[test]
    #[should_panic(expected = "has no pipeline data")]
    fn test_unassociated_camera_lookup_panics() {
        let f = fixture();
        let stranger = Camera::new("stranger", Rc::downgrade(&(f.pipe.clone() as Rc<RefCell<dyn PipelineHandler>>)));
        let pipe = f.pipe.borrow();
        pipe.base.camera_data(&stranger);
    }

    #[test]
    fn test_in_order_completion_scenario() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let r2 = request(&[0]);
        let (id1, id2) = (r1.id(), r2.id());

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.queue_request(&f.camera, r2);

        assert!(!pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata()));
        assert!(pipe.base.complete_buffer(&f.camera, id1, StreamId(1), metadata()));
        pipe.base.complete_request(&f.camera, id1);

        assert!(pipe.base.complete_buffer(&f.camera, id2, StreamId(0), metadata()));
        pipe.base.complete_request(&f.camera, id2);

        assert_eq!(
            *f.events.borrow(),
            vec![
                Event::Buffer(id1, StreamId(0), BufferStatus::Success),
                Event::Buffer(id1, StreamId(1), BufferStatus::Success),
                Event::Request(id1, RequestStatus::Complete),
                Event::Buffer(id2, StreamId(0), BufferStatus::Success),
                Event::Request(id2, RequestStatus::Complete),
            ]
        );
        let stats = pipe.stats();
        assert_eq!(stats.requests_completed, 2);
        assert_eq!(stats.buffers_completed, 3);
        assert_eq!(stats.requests_in_flight(), 0);
    }

    #[test]
    #[should_panic(expected = "completed out of order")]
    fn test_out_of_order_completion_panics() {
        let f = fixture();
        let r1 = request(&[0]);
        let r2 = request(&[0]);
        let id2 = r2.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.queue_request(&f.camera, r2);
        pipe.base.complete_buffer(&f.camera, id2, StreamId(0), metadata());
        pipe.base.complete_request(&f.camera, id2);
    }

    #[test]
    #[should_panic(expected = "pending buffers")]
    fn test_request_with_pending_buffers_cannot_complete() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata());
        pipe.base.complete_request(&f.camera, id1);
    }

    #[test]
    #[should_panic(expected = "already completed")]
    fn test_buffer_cannot_complete_twice() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata());
        pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata());
    }

    #[test]
    fn test_stop_cancels_everything_in_order() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let r2 = request(&[0]);
        let (id1, id2) = (r1.id(), r2.id());

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.queue_request(&f.camera, r2);
        pipe.stop(&f.camera);

        assert_eq!(
            *f.events.borrow(),
            vec![
                Event::Buffer(id1, StreamId(0), BufferStatus::Cancelled),
                Event::Buffer(id1, StreamId(1), BufferStatus::Cancelled),
                Event::Request(id1, RequestStatus::Cancelled),
                Event::Buffer(id2, StreamId(0), BufferStatus::Cancelled),
                Event::Request(id2, RequestStatus::Cancelled),
            ]
        );
        assert_eq!(pipe.base.camera_data(&f.camera).queued_len(), 0);
        assert_eq!(pipe.stats().requests_cancelled, 2);
    }

    #[test]
    fn test_stop_only_cancels_pending_buffers() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata());
        pipe.stop(&f.camera);

        assert_eq!(
            *f.events.borrow(),
            vec![
                Event::Buffer(id1, StreamId(0), BufferStatus::Success),
                Event::Buffer(id1, StreamId(1), BufferStatus::Cancelled),
                Event::Request(id1, RequestStatus::Cancelled),
            ]
        );
    }

    #[test]
    fn test_stop_without_requests_is_noop() {
        let f = fixture();
        let mut pipe = f.pipe.borrow_mut();
        pipe.stop(&f.camera);
        pipe.stop(&f.camera);

        assert!(f.events.borrow().is_empty());
        assert_eq!(pipe.stats(), Default::default());
    }

    #[test]
    fn test_cancelled_buffer_still_allows_completion() {
        let f = fixture();
        let r1 = request(&[0, 1]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        assert!(!pipe.base.cancel_buffer(&f.camera, id1, StreamId(1)));
        assert!(pipe.base.complete_buffer(&f.camera, id1, StreamId(0), metadata()));
        pipe.base.complete_request(&f.camera, id1);

        assert_eq!(
            f.events.borrow().last(),
            Some(&Event::Request(id1, RequestStatus::Complete))
        );
        assert_eq!(pipe.stats().buffers_cancelled, 1);
    }

    #[test]
    fn test_stop_all_drains_destroyed_camera() {
        let Fixture {
            _manager: manager,
            pipe,
            camera,
            events,
        } = fixture();
        pipe.borrow_mut().base.queue_request(&camera, request(&[0, 1]));
        pipe.borrow_mut().base.queue_request(&camera, request(&[0]));
        manager.remove_camera(&camera);
        drop(camera);

        let mut pipe = pipe.borrow_mut();
        pipe.base.stop_all();
        pipe.base.stop_all();

        assert!(events.borrow().is_empty());
        assert!(pipe
            .base
            .all_camera_data()
            .all(|d| d.camera().is_none() && d.queued_len() == 0));
        let stats = pipe.stats();
        assert_eq!(stats.requests_cancelled, 2);
        assert_eq!(stats.buffers_cancelled, 3);
        assert_eq!(stats.requests_in_flight(), 0);
    }

    #[test]
    fn test_stop_all_stops_live_cameras() {
        let f = fixture();
        let r1 = request(&[0]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.base.stop_all();

        assert_eq!(
            *f.events.borrow(),
            vec![
                Event::Buffer(id1, StreamId(0), BufferStatus::Cancelled),
                Event::Request(id1, RequestStatus::Cancelled),
            ]
        );
    }

    #[test]
    fn test_default_shutdown_cancels_outstanding() {
        let f = fixture();
        let r1 = request(&[0]);
        let id1 = r1.id();

        let mut pipe = f.pipe.borrow_mut();
        pipe.base.queue_request(&f.camera, r1);
        pipe.shutdown();

        assert_eq!(
            f.events.borrow().last(),
            Some(&Event::Request(id1, RequestStatus::Cancelled))
        );
        assert_eq!(pipe.stats().requests_in_flight(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Queue(u8),
        CompleteNext,
        Stop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u8..4).prop_map(Op::Queue),
            Just(Op::CompleteNext),
            Just(Op::Stop),
        ]
    }

    proptest! {
        #[test]
        fn prop_completions_follow_queue_order(ops in proptest::collection::vec(op(), 0..40)) {
            let f = fixture();
            let mut queued = Vec::new();

            {
                let mut pipe = f.pipe.borrow_mut();
                for op in ops {
                    match op {
                        Op::Queue(buffers) => {
                            let streams: Vec<u32> = (0..buffers as u32).collect();
                            let r = request(&streams);
                            queued.push(r.id());
                            pipe.base.queue_request(&f.camera, r);
                        }
                        Op::CompleteNext => {
                            let next = pipe
                                .base
                                .camera_data(&f.camera)
                                .front()
                                .map(|r| (r.id(), r.pending_streams().collect::<Vec<_>>()));
                            if let Some((id, streams)) = next {
                                let mut last = false;
                                for stream in streams {
                                    last = pipe.base.complete_buffer(&f.camera, id, stream, metadata());
                                }
                                prop_assert!(last);
                                pipe.base.complete_request(&f.camera, id);
                            }
                        }
                        Op::Stop => pipe.stop(&f.camera),
                    }
                }
                pipe.stop(&f.camera);
            }

            let completed: Vec<RequestId> = f
                .events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    Event::Request(id, _) => Some(*id),
                    Event::Buffer(..) => None,
                })
                .collect();
            prop_assert_eq!(completed, queued);
        }
    }
}
