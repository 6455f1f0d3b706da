//! Camera manager: owns the enumerator, the matched pipeline handlers and
//! the set of published cameras.

use super::camera::Camera;
use crate::device::{DeviceEnumerator, MediaDevice};
use crate::pipeline::{self, PipelineStats, SharedHandler, WeakHandler};
use crate::registry::{self, HandlerFactory};
use crate::signal::Signal;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Disconnect notification waiting for its handler to be released.
struct DeferredDisconnect {
    handler: WeakHandler,
    device: Weak<MediaDevice>,
}

/// Entry point for applications.
///
/// The manager runs every registered pipeline handler factory against the
/// enumerated devices, keeps the handlers that matched and exposes the
/// cameras they publish.
pub struct CameraManager {
    enumerator: RefCell<DeviceEnumerator>,
    handlers: RefCell<Vec<SharedHandler>>,
    cameras: RefCell<Vec<Rc<Camera>>>,
    deferred: RefCell<Vec<DeferredDisconnect>>,
    camera_added: Signal<Rc<Camera>>,
    camera_removed: Signal<Rc<Camera>>,
}

impl CameraManager {
    pub fn new(enumerator: DeviceEnumerator) -> Rc<Self> {
        Rc::new(Self {
            enumerator: RefCell::new(enumerator),
            handlers: RefCell::new(Vec::new()),
            cameras: RefCell::new(Vec::new()),
            deferred: RefCell::new(Vec::new()),
            camera_added: Signal::new(),
            camera_removed: Signal::new(),
        })
    }

    /// Matches the registered handlers against the enumerated devices.
    ///
    /// `pipelines` restricts matching to the named handlers; an empty slice
    /// tries every registered one. Returns the number of handler instances
    /// that matched.
    pub fn start(self: &Rc<Self>, pipelines: &[String]) -> usize {
        crate::pipelines::register_builtin();

        for name in pipelines {
            if registry::find(name).is_none() {
                tracing::warn!(pipeline = %name, "Unknown pipeline handler requested");
            }
        }

        let factories: Vec<&'static dyn HandlerFactory> = registry::all()
            .into_iter()
            .filter(|f| pipelines.is_empty() || pipelines.iter().any(|p| p == f.name()))
            .collect();
        self.start_with(factories)
    }

    /// Matches the given factories against the enumerated devices.
    ///
    /// Each factory is instantiated repeatedly until an instance fails to
    /// match, so one handler instance is kept per pipeline found.
    pub fn start_with<'a>(
        self: &Rc<Self>,
        factories: impl IntoIterator<Item = &'a dyn HandlerFactory>,
    ) -> usize {
        let mut matched = 0;

        for factory in factories {
            loop {
                let handler = factory.create(self);
                let found = {
                    let enumerator = self.enumerator.borrow();
                    handler.borrow_mut().match_devices(&enumerator)
                };
                if !found {
                    break;
                }
                tracing::info!(pipeline = factory.name(), "Pipeline handler matched");
                self.handlers.borrow_mut().push(handler);
                matched += 1;
            }
        }

        matched
    }

    /// Publishes a camera. Called by pipeline handlers at registration.
    pub fn add_camera(&self, camera: Rc<Camera>) {
        {
            let mut cameras = self.cameras.borrow_mut();
            if cameras.iter().any(|c| c.name() == camera.name()) {
                tracing::warn!(camera = camera.name(), "Registering camera with duplicate name");
            }
            cameras.push(Rc::clone(&camera));
        }
        tracing::debug!(camera = camera.name(), "Camera added");
        self.camera_added.emit(&camera);
    }

    /// Withdraws a camera. Called on disconnection.
    pub fn remove_camera(&self, camera: &Camera) {
        let removed = {
            let mut cameras = self.cameras.borrow_mut();
            cameras
                .iter()
                .position(|c| c.id() == camera.id())
                .map(|i| cameras.remove(i))
        };
        if let Some(camera) = removed {
            tracing::debug!(camera = camera.name(), "Camera removed");
            self.camera_removed.emit(&camera);
        }
    }

    /// Published cameras, in registration order.
    pub fn cameras(&self) -> Vec<Rc<Camera>> {
        self.cameras.borrow().clone()
    }

    pub fn get(&self, name: &str) -> Option<Rc<Camera>> {
        self.cameras.borrow().iter().find(|c| c.name() == name).cloned()
    }

    pub fn handlers(&self) -> Vec<SharedHandler> {
        self.handlers.borrow().clone()
    }

    pub fn camera_added(&self) -> &Signal<Rc<Camera>> {
        &self.camera_added
    }

    pub fn camera_removed(&self) -> &Signal<Rc<Camera>> {
        &self.camera_removed
    }

    /// Adds a device to the enumerator. Handlers already started do not
    /// pick it up until the next [`start`](Self::start).
    pub fn add_device(&self, device: MediaDevice) -> Rc<MediaDevice> {
        self.enumerator.borrow_mut().add_device(device)
    }

    /// Simulates physical removal of the device at `dev_node`.
    ///
    /// Returns false if no such device is present.
    pub fn unplug(&self, dev_node: &str) -> bool {
        let device = self.enumerator.borrow_mut().remove_device(dev_node);
        match device {
            Some(device) => {
                device.disconnect();
                true
            }
            None => false,
        }
    }

    /// Lets every handler deliver pending hardware completions. Returns
    /// the number of requests completed.
    ///
    /// Devices unplugged from inside a completion slot are torn down
    /// before this returns.
    pub fn process_events(&self) -> usize {
        self.dispatch_deferred();

        let mut completed = 0;
        for handler in self.handlers() {
            match handler.try_borrow_mut() {
                Ok(mut handler) => completed += handler.process_completions(),
                Err(_) => tracing::warn!("Skipping busy pipeline handler"),
            }
        }

        self.dispatch_deferred();
        completed
    }

    /// Queues a disconnect notification that arrived while its handler
    /// was borrowed.
    pub(crate) fn defer_disconnect(&self, handler: WeakHandler, device: &Rc<MediaDevice>) {
        self.deferred.borrow_mut().push(DeferredDisconnect {
            handler,
            device: Rc::downgrade(device),
        });
    }

    /// Delivers deferred disconnect notifications whose handler is free.
    /// Returns the number delivered; the rest stay queued.
    pub fn dispatch_deferred(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        let mut delivered = 0;

        for entry in pending {
            let (Some(pipe), Some(device)) = (entry.handler.upgrade(), entry.device.upgrade()) else {
                continue;
            };
            match pipe.try_borrow_mut() {
                Ok(mut pipe) => {
                    pipeline::media_device_disconnected(&mut *pipe, &device);
                    delivered += 1;
                }
                Err(_) => self.deferred.borrow_mut().push(entry),
            };
        }

        delivered
    }

    /// Number of disconnect notifications still waiting for delivery.
    pub fn deferred_len(&self) -> usize {
        self.deferred.borrow().len()
    }

    /// Counters summed over every handler.
    pub fn stats(&self) -> PipelineStats {
        let mut total = PipelineStats::default();
        for handler in self.handlers.borrow().iter() {
            if let Ok(handler) = handler.try_borrow() {
                total.merge(&handler.stats());
            }
        }
        total
    }

    /// Shuts every handler down, then drops every camera and handler.
    ///
    /// Requests still queued complete as cancelled before their handler
    /// goes away.
    pub fn stop(&self) {
        self.dispatch_deferred();

        let handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        for handler in &handlers {
            match handler.try_borrow_mut() {
                Ok(mut handler) => handler.shutdown(),
                Err(_) => tracing::warn!("Pipeline handler busy, not shut down"),
            }
        }

        let cameras = std::mem::take(&mut *self.cameras.borrow_mut());
        self.deferred.borrow_mut().clear();
        tracing::info!(
            cameras = cameras.len(),
            handlers = handlers.len(),
            "Camera manager stopped"
        );
    }
}
