//! Camera ownership and hot-unplug handling shared by all handlers.

use super::{PipelineHandler, PipelineStats, WeakHandler};
use crate::camera::{Camera, CameraManager};
use crate::device::MediaDevice;
use crate::signal::SubscriptionToken;
use std::rc::{Rc, Weak};

struct Monitored {
    device: Weak<MediaDevice>,
    token: SubscriptionToken,
}

/// State every pipeline handler carries independently of its camera data:
/// the manager it publishes to, a weak self-reference, the cameras it
/// created and the devices it watches for removal.
pub struct HandlerContext {
    manager: Weak<CameraManager>,
    handler: WeakHandler,
    cameras: Vec<Weak<Camera>>,
    monitored: Vec<Monitored>,
    pub(crate) stats: PipelineStats,
}

impl HandlerContext {
    /// `handler` must point at the handler that owns this context.
    pub fn new(manager: &Rc<CameraManager>, handler: WeakHandler) -> Self {
        Self {
            manager: Rc::downgrade(manager),
            handler,
            cameras: Vec::new(),
            monitored: Vec::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn manager(&self) -> Option<Rc<CameraManager>> {
        self.manager.upgrade()
    }

    /// Weak reference to the owning handler, for creating cameras.
    pub fn handler(&self) -> WeakHandler {
        self.handler.clone()
    }

    /// Cameras created by the handler that are still alive.
    pub fn cameras(&self) -> impl Iterator<Item = Rc<Camera>> + '_ {
        self.cameras.iter().filter_map(Weak::upgrade)
    }

    /// Returns true if the handler still tracks any camera.
    pub fn has_cameras(&self) -> bool {
        !self.cameras.is_empty()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub(crate) fn add_camera(&mut self, camera: &Rc<Camera>) {
        self.cameras.push(Rc::downgrade(camera));
    }

    /// Enables hot-unplug handling for `device`.
    ///
    /// When the device is later removed every camera of the handler is
    /// disconnected and withdrawn from the manager. Monitoring the same
    /// device twice has no effect.
    pub fn hotplug_media_device(&mut self, device: &Rc<MediaDevice>) {
        if self.is_monitoring(device) {
            tracing::debug!(dev_node = device.dev_node(), "Media device already monitored");
            return;
        }

        let manager = self.manager.clone();
        let handler = self.handler.clone();
        let media = Rc::downgrade(device);
        let token = device.disconnected().connect(move |_| {
            let (Some(pipe), Some(media)) = (handler.upgrade(), media.upgrade()) else {
                return;
            };
            // Busy while it dispatches to application slots; the manager
            // delivers the notification once the handler is released.
            match pipe.try_borrow_mut() {
                Ok(mut pipe) => media_device_disconnected(&mut *pipe, &media),
                Err(_) => match manager.upgrade() {
                    Some(manager) => {
                        tracing::debug!(dev_node = media.dev_node(), "Pipeline handler busy, deferring disconnect");
                        manager.defer_disconnect(handler.clone(), &media);
                    }
                    None => tracing::warn!(
                        dev_node = media.dev_node(),
                        "Pipeline handler busy and camera manager gone, disconnect not delivered"
                    ),
                },
            };
        });

        self.monitored.push(Monitored {
            device: Rc::downgrade(device),
            token,
        });
    }

    pub fn is_monitoring(&self, device: &MediaDevice) -> bool {
        self.monitored
            .iter()
            .any(|m| std::ptr::eq(m.device.as_ptr(), device))
    }

    fn stop_monitoring(&mut self, device: &MediaDevice) {
        self.monitored.retain(|m| {
            if !std::ptr::eq(m.device.as_ptr(), device) {
                return true;
            }
            device.disconnected().disconnect(m.token);
            false
        });
    }

    /// Base disconnection behaviour.
    ///
    /// Marks every live camera disconnected, withdraws it from the manager
    /// and forgets all cameras. Cameras already destroyed elsewhere are
    /// skipped. Never fails and is safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let manager = self.manager.upgrade();
        let mut removed = 0usize;

        for camera in self.cameras.drain(..).filter_map(|c| c.upgrade()) {
            camera.disconnect();
            if let Some(manager) = &manager {
                manager.remove_camera(&camera);
            }
            removed += 1;
        }

        if removed > 0 {
            self.stats.disconnects += 1;
            tracing::info!(cameras = removed, "Pipeline handler disconnected");
        }
    }
}

impl Drop for HandlerContext {
    fn drop(&mut self) {
        for m in self.monitored.drain(..) {
            if let Some(device) = m.device.upgrade() {
                device.disconnected().disconnect(m.token);
            }
        }
    }
}

/// Slot run when a monitored device reports removal.
pub(crate) fn media_device_disconnected(pipe: &mut dyn PipelineHandler, device: &MediaDevice) {
    pipe.context_mut().stop_monitoring(device);

    if !pipe.context().has_cameras() {
        return;
    }

    tracing::info!(
        pipeline = pipe.name(),
        dev_node = device.dev_node(),
        "Media device unplugged, disconnecting cameras"
    );
    pipe.disconnect();
}
