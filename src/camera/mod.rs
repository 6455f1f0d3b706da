//! Cameras and the manager that publishes them.
//!
//! Cameras are created and registered by pipeline handlers; applications
//! find them through the [`CameraManager`] and drive capture through the
//! [`Camera`] methods, which forward to the owning handler.

#[allow(clippy::module_inception)]
mod camera;
mod manager;

pub use camera::{BufferEvent, Camera, CameraId};
pub use manager::CameraManager;
