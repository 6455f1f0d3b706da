//! Capture requests, buffers and stream configuration.
//!
//! A [`Request`] groups one [`Buffer`] per stream. Buffers complete one by
//! one; the request itself only receives an outcome once every buffer has
//! reached a terminal state.

mod buffer;
mod config;
mod request;

pub use buffer::{Buffer, BufferStatus, FrameMetadata, StreamId};
pub use config::{
    CameraConfiguration, ConfigError, DeviceConfig, FileConfig, ManagerConfig, OutputConfig,
    PixelFormat, SessionConfig, Size, StreamConfiguration, StreamRole, MAX_BUFFER_COUNT,
};
pub use request::{Request, RequestError, RequestId, RequestStatus};
