//! Virtual multi-stream pipeline.
//!
//! Matches media devices driven by `sim` that expose a `sensor` entity and
//! creates one camera per device with three streams: a viewfinder, a video
//! stream and a still capture stream.

use super::video::{self, CaptureState, StreamCaps};
use crate::camera::{Camera, CameraManager};
use crate::capture::{
    CameraConfiguration, PixelFormat, Request, Size, StreamId, StreamRole,
};
use crate::device::{DeviceEnumerator, DeviceMatch};
use crate::pipeline::{HandlerContext, PipelineBase, PipelineError, PipelineHandler, WeakHandler};
use std::rc::Rc;

pub const DRIVER: &str = "sim";
pub const SENSOR_ENTITY: &str = "sensor";

pub const VIEWFINDER: StreamId = StreamId(0);
pub const VIDEO: StreamId = StreamId(1);
pub const STILL: StreamId = StreamId(2);

fn stream_caps() -> Vec<StreamCaps> {
    vec![
        StreamCaps {
            id: VIEWFINDER,
            roles: &[StreamRole::Viewfinder],
            formats: &[PixelFormat::Yuyv, PixelFormat::Nv12],
            max_size: Size::new(1280, 720),
            default_format: PixelFormat::Yuyv,
            default_size: Size::new(640, 480),
            default_buffers: 4,
        },
        StreamCaps {
            id: VIDEO,
            roles: &[StreamRole::VideoRecording, StreamRole::Viewfinder],
            formats: &[PixelFormat::Nv12, PixelFormat::Yuyv],
            max_size: Size::new(1920, 1080),
            default_format: PixelFormat::Nv12,
            default_size: Size::new(1280, 720),
            default_buffers: 4,
        },
        StreamCaps {
            id: STILL,
            roles: &[StreamRole::StillCapture],
            formats: &[PixelFormat::Rgb888, PixelFormat::Mjpeg],
            max_size: Size::new(1920, 1080),
            default_format: PixelFormat::Rgb888,
            default_size: Size::new(1920, 1080),
            default_buffers: 2,
        },
    ]
}

/// Pipeline handler for simulated sensors.
pub struct SimPipeline {
    base: PipelineBase<CaptureState>,
}

crate::register_pipeline_handler!(SimPipelineFactory, SimPipeline, "sim");

impl SimPipeline {
    pub fn new(manager: &Rc<CameraManager>, me: WeakHandler) -> Self {
        Self {
            base: PipelineBase::new(manager, me),
        }
    }

    pub fn base(&self) -> &PipelineBase<CaptureState> {
        &self.base
    }
}

impl PipelineHandler for SimPipeline {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn context(&self) -> &HandlerContext {
        self.base.context()
    }

    fn context_mut(&mut self) -> &mut HandlerContext {
        self.base.context_mut()
    }

    fn match_devices(&mut self, enumerator: &DeviceEnumerator) -> bool {
        let dm = DeviceMatch::new(DRIVER).add_entity(SENSOR_ENTITY);
        let Some(media) = enumerator.search(&dm) else {
            return false;
        };
        if !media.acquire() {
            return false;
        }

        let name = format!("{} {}", media.model(), media.dev_node());
        let camera = Camera::new(name, self.base.context().handler());

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
        self.base.camera_data_mut(camera).ext_mut().configure(config)?;
        tracing::debug!(camera = camera.name(), streams = config.len(), "Configured");
        Ok(())
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
        self.base.camera_data_mut(camera).ext_mut().start()?;
        tracing::info!(camera = camera.name(), "Capture started");
        Ok(())
    }

    fn stop(&mut self, camera: &Camera) {
        video::stop_camera(&mut self.base, camera);
        tracing::info!(camera = camera.name(), "Capture stopped");
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

    fn disconnect(&mut self) {
        video::shutdown(&mut self.base);
        self.base.context_mut().disconnect();
    }

    fn shutdown(&mut self) {
        video::shutdown(&mut self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Buffer, BufferStatus, RequestStatus};
    use crate::device::MediaDevice;
    use crate::registry::HandlerFactory;
    use std::cell::RefCell;

    fn sensor(dev_node: &str) -> MediaDevice {
        MediaDevice::new(DRIVER, "Sim Sensor", dev_node, vec![SENSOR_ENTITY.to_string()])
    }

    fn started_manager() -> Rc<CameraManager> {
        let mut enumerator = DeviceEnumerator::new();
        enumerator.add_device(sensor("/dev/media0"));
        enumerator.add_device(MediaDevice::new(DRIVER, "No Sensor", "/dev/media1", vec![]));
        enumerator.add_device(sensor("/dev/media2"));

        let manager = CameraManager::new(enumerator);
        manager.start_with([&SimPipelineFactory as &dyn HandlerFactory]);
        manager
    }

    fn request_for(streams: &[StreamId], index: usize) -> Request {
        let mut request = Request::new(index as u64);
        for stream in streams {
            request.add_buffer(Buffer::new(*stream, index)).unwrap();
        }
        request
    }

    #[test]
    fn test_one_camera_per_sensor() {
        let manager = started_manager();
        let names: Vec<String> = manager.cameras().iter().map(|c| c.name().to_string()).collect();

        assert_eq!(names, vec!["Sim Sensor /dev/media0", "Sim Sensor /dev/media2"]);
        assert_eq!(manager.handlers().len(), 2);
    }

    #[test]
    fn test_generate_configuration_for_roles() {
        let manager = started_manager();
        let camera = &manager.cameras()[0];

        let config = camera
            .generate_configuration(&[StreamRole::Viewfinder, StreamRole::StillCapture])
            .unwrap();
        assert_eq!(config.stream_ids().collect::<Vec<_>>(), vec![VIEWFINDER, STILL]);

        assert!(camera
            .generate_configuration(&[StreamRole::StillCapture, StreamRole::StillCapture])
            .is_none());
    }

    #[test]
    fn test_capture_session() {
        let manager = started_manager();
        let camera = Rc::clone(&manager.cameras()[0]);

        let config = camera
            .generate_configuration(&[StreamRole::Viewfinder, StreamRole::VideoRecording])
            .unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[VIEWFINDER, VIDEO]).unwrap();

        let done = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&done);
        camera.request_completed().connect(move |r: &Request| {
            let bytes: Vec<usize> = r
                .buffers()
                .filter_map(|b| b.metadata().map(|m| m.bytes_used))
                .collect();
            sink.borrow_mut().push((r.cookie(), r.status(), bytes));
        });

        assert!(matches!(
            camera.queue_request(request_for(&[VIEWFINDER], 0)),
            Err(PipelineError::NotRunning)
        ));

        camera.start().unwrap();
        for i in 0..3 {
            camera.queue_request(request_for(&[VIEWFINDER, VIDEO], i)).unwrap();
        }

        assert_eq!(manager.process_events(), 1);
        assert_eq!(manager.process_events(), 1);
        camera.stop().unwrap();

        let done = done.borrow();
        assert_eq!(done.len(), 3);
        assert_eq!(done[0], (0, RequestStatus::Complete, vec![640 * 480 * 2, 1280 * 720 * 3 / 2]));
        assert_eq!(done[1].1, RequestStatus::Complete);
        assert_eq!(done[2], (2, RequestStatus::Cancelled, vec![]));
    }

    #[test]
    fn test_queue_rejects_unallocated_buffer() {
        let manager = started_manager();
        let camera = &manager.cameras()[0];

        let config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[VIEWFINDER]).unwrap();
        camera.start().unwrap();

        let result = camera.queue_request(request_for(&[STILL], 0));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidBuffer { stream: STILL, .. })
        ));
        assert_eq!(manager.stats().requests_queued, 0);
        assert!(matches!(camera.configure(&config), Err(PipelineError::Busy)));
        camera.stop().unwrap();
    }

    #[test]
    fn test_start_requires_buffers() {
        let manager = started_manager();
        let camera = &manager.cameras()[0];
        assert!(matches!(camera.start(), Err(PipelineError::NotConfigured)));
    }

    #[test]
    fn test_unplug_drains_destroyed_camera() {
        let mut enumerator = DeviceEnumerator::new();
        let device = enumerator.add_device(sensor("/dev/media0"));
        let manager = CameraManager::new(enumerator);
        manager.start_with([&SimPipelineFactory as &dyn HandlerFactory]);

        let camera = Rc::clone(&manager.cameras()[0]);
        let config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[VIEWFINDER]).unwrap();
        camera.start().unwrap();
        camera.queue_request(request_for(&[VIEWFINDER], 0)).unwrap();
        camera.queue_request(request_for(&[VIEWFINDER], 1)).unwrap();

        manager.remove_camera(&camera);
        drop(camera);

        assert!(manager.unplug("/dev/media0"));
        assert!(!device.is_acquired());
        let stats = manager.stats();
        assert_eq!(stats.requests_cancelled, 2);
        assert_eq!(stats.buffers_cancelled, 2);
        assert_eq!(stats.requests_in_flight(), 0);
    }

    #[test]
    fn test_unplug_cancels_outstanding_requests() {
        let manager = started_manager();
        let camera = Rc::clone(&manager.cameras()[0]);

        let config = camera.generate_configuration(&[StreamRole::Viewfinder]).unwrap();
        camera.configure(&config).unwrap();
        camera.allocate_buffers(&[VIEWFINDER]).unwrap();
        camera.start().unwrap();
        camera.queue_request(request_for(&[VIEWFINDER], 1)).unwrap();

        let buffers = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&buffers);
        camera.buffer_completed().connect(move |e| sink.borrow_mut().push(e.buffer.status()));

        assert!(manager.unplug("/dev/media0"));

        assert_eq!(*buffers.borrow(), vec![BufferStatus::Cancelled]);
        assert!(!camera.is_connected());
        assert_eq!(manager.cameras().len(), 1);
        assert!(matches!(camera.start(), Err(PipelineError::Disconnected)));

        let stats = manager.stats();
        assert_eq!(stats.requests_cancelled, 1);
        assert_eq!(stats.disconnects, 1);
    }
}
