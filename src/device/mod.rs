//! Media devices and their enumeration.
//!
//! Discovering devices on a real system is outside this crate; the
//! enumerator here is an in-process list that pipeline handlers search
//! and acquire from, and that can simulate hot-removal.

mod enumerator;
mod media_device;

pub use enumerator::{DeviceEnumerator, DeviceMatch};
pub use media_device::MediaDevice;
