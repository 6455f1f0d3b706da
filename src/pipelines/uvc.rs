//! USB video class pipeline.
//!
//! UVC devices expose a single capture stream, so every camera serves
//! exactly one role at a time.

use super::video::{self, CaptureState, StreamCaps};
use crate::camera::{Camera, CameraManager};
use crate::capture::{CameraConfiguration, PixelFormat, Request, Size, StreamId, StreamRole};
use crate::device::{DeviceEnumerator, DeviceMatch};
use crate::pipeline::{HandlerContext, PipelineBase, PipelineError, PipelineHandler, WeakHandler};
use std::rc::Rc;

pub const DRIVER: &str = "uvcvideo";

pub const STREAM: StreamId = StreamId(0);

fn stream_caps() -> Vec<StreamCaps> {
    vec![StreamCaps {
        id: STREAM,
        roles: &[
            StreamRole::Viewfinder,
            StreamRole::VideoRecording,
            StreamRole::StillCapture,
        ],
        formats: &[PixelFormat::Yuyv, PixelFormat::Mjpeg],
        max_size: Size::new(1920, 1080),
        default_format: PixelFormat::Yuyv,
        default_size: Size::new(640, 480),
        default_buffers: 4,
    }]
}

pub struct UvcPipeline {
    base: PipelineBase<CaptureState>,
}

crate::register_pipeline_handler!(UvcPipelineFactory, UvcPipeline, "uvc");

impl UvcPipeline {
    pub fn new(manager: &Rc<CameraManager>, me: WeakHandler) -> Self {
        Self {
            base: PipelineBase::new(manager, me),
        }
    }
}

impl PipelineHandler for UvcPipeline {
    fn name(&self) -> &'static str {
        "uvc"
    }

    fn context(&self) -> &HandlerContext {
        self.base.context()
    }

    fn context_mut(&mut self) -> &mut HandlerContext {
        self.base.context_mut()
    }

    fn match_devices(&mut self, enumerator: &DeviceEnumerator) -> bool {
        let Some(media) = enumerator.search(&DeviceMatch::new(DRIVER)) else {
            return false;
        };
        if !media.acquire() {
            return false;
        }

        let camera = Camera::new(media.model(), self.base.context().handler());
        self.base.context_mut().hotplug_media_device(&media);
        self.base
            .register_camera(camera, CaptureState::new(media, stream_caps()));
        true
    }

    fn generate_configuration(
        &mut self,
        camera: &Camera,
        roles: &[StreamRole],
    ) -> Option<CameraConfiguration> {
        self.base.camera_data(camera).ext().streams.generate(roles)
    }

    fn configure(
        &mut self,
        camera: &Camera,
        config: &CameraConfiguration,
    ) -> Result<(), PipelineError> {
        self.base.camera_data_mut(camera).ext_mut().configure(config)
    }

    fn allocate_buffers(
        &mut self,
        camera: &Camera,
        streams: &[StreamId],
    ) -> Result<(), PipelineError> {
        self.base.camera_data_mut(camera).ext_mut().allocate(streams)
    }

    fn free_buffers(&mut self, camera: &Camera, streams: &[StreamId]) -> Result<(), PipelineError> {
        self.base.camera_data_mut(camera).ext_mut().free(streams)
    }

    fn start(&mut self, camera: &Camera) -> Result<(), PipelineError> {
        self.base.camera_data_mut(camera).ext_mut().start()
    }

    fn stop(&mut self, camera: &Camera) {
        video::stop_camera(&mut self.base, camera);
    }

    fn queue_request(&mut self, camera: &Camera, request: Request) -> Result<(), PipelineError> {
        self.base
            .camera_data_mut(camera)
            .ext_mut()
            .submit(&request)?;
        self.base.queue_request(camera, request);
        Ok(())
    }

    fn process_completions(&mut self) -> usize {
        let cameras: Vec<Rc<Camera>> = self.base.context().cameras().collect();
        cameras
            .iter()
            .filter(|camera| video::complete_next(&mut self.base, camera))
            .count()
    }

    /// Streams off and releases the device before the base teardown.
    fn disconnect(&mut self) {
        video::shutdown(&mut self.base);
        tracing::info!(pipeline = "uvc", "Released UVC devices");
        self.base.context_mut().disconnect();
    }

    fn shutdown(&mut self) {
        video::shutdown(&mut self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Buffer, RequestStatus};
    use crate::device::MediaDevice;
    use crate::registry::HandlerFactory;
    use std::cell::RefCell;

    fn manager_with_webcam() -> (Rc<CameraManager>, Rc<MediaDevice>) {
        let mut enumerator = DeviceEnumerator::new();
        let webcam = enumerator.add_device(MediaDevice::new(DRIVER, "USB Webcam", "/dev/media3", vec![]));
        let manager = CameraManager::new(enumerator);
        manager.start_with([&UvcPipelineFactory as &dyn HandlerFactory]);
        (manager, webcam)
    }

    #[test]
    fn test_single_stream_only() {
        let (manager, webcam) = manager_with_webcam();
        let camera = manager.get("USB Webcam").unwrap();

        assert!(webcam.is_acquired());
        assert!(camera.generate_configuration(&[StreamRole::StillCapture]).is_some());
        assert!(camera
            .generate_configuration(&[StreamRole::Viewfinder, StreamRole::StillCapture])
            .is_none());
    }

    #[test]
    fn test_disconnect_releases_device() {
        let (manager, webcam) = manager_with_webcam();
        let camera = manager.get("USB Webcam").unwrap();

        let config = camera.generate_configuration(&[StreamRole::VideoRecording]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[STREAM]).unwrap();
        camera.start().unwrap();

        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        camera.request_completed().connect(move |r: &Request| sink.borrow_mut().push(r.status()));
        let disconnected = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&disconnected);
        camera.disconnected().connect(move |_| *flag.borrow_mut() = true);

        for index in 0..2 {
            let mut request = Request::new(0);
            request.add_buffer(Buffer::new(STREAM, index)).unwrap();
            camera.queue_request(request).unwrap();
        }
        assert_eq!(manager.process_events(), 1);

        assert!(manager.unplug("/dev/media3"));

        assert_eq!(
            *outcomes.borrow(),
            vec![RequestStatus::Complete, RequestStatus::Cancelled]
        );
        assert!(*disconnected.borrow());
        assert!(!webcam.is_acquired());
        assert!(manager.get("USB Webcam").is_none());
    }

    #[test]
    fn test_manager_stop_cancels_and_releases() {
        let (manager, webcam) = manager_with_webcam();
        let camera = manager.get("USB Webcam").unwrap();

        let config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[STREAM]).unwrap();
        camera.start().unwrap();

        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        camera.request_completed().connect(move |r: &Request| sink.borrow_mut().push(r.status()));
        for index in 0..2 {
            let mut request = Request::new(0);
            request.add_buffer(Buffer::new(STREAM, index)).unwrap();
            camera.queue_request(request).unwrap();
        }

        manager.stop();

        assert_eq!(
            *outcomes.borrow(),
            vec![RequestStatus::Cancelled, RequestStatus::Cancelled]
        );
        assert!(!webcam.is_acquired());
        assert!(matches!(camera.start(), Err(PipelineError::Disconnected)));
    }

    #[test]
    fn test_rejects_unsupported_format() {
        let (manager, _webcam) = manager_with_webcam();
        let camera = manager.get("USB Webcam").unwrap();

        let mut config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        config.streams_mut()[0].pixel_format = PixelFormat::Nv12;
        let err = camera.configure(&config).unwrap_err();
        assert_eq!(err.code(), -22);
    }
}
