//! Stream and session configuration.
//!
//! Stream configurations describe what an application asks a camera to
//! produce. Structural checks live here; whether a camera can produce a
//! configuration exactly is decided by its pipeline handler.

use super::buffer::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Upper bound on buffers allocated per stream.
pub const MAX_BUFFER_COUNT: u32 = 32;

/// Pixel formats understood by the built-in pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuyv,
    Nv12,
    Rgb888,
    Mjpeg,
}

impl PixelFormat {
    /// Approximate payload bytes for a frame of `size`.
    pub fn frame_bytes(self, size: Size) -> usize {
        let pixels = size.width as usize * size.height as usize;
        match self {
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Rgb888 => pixels * 3,
            // Compressed, rough estimate.
            PixelFormat::Mjpeg => pixels / 4,
        }
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Intended use of a stream, used to pick default configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Viewfinder,
    VideoRecording,
    StillCapture,
}

/// Requested parameters for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    /// Stream the parameters apply to.
    #[serde(skip)]
    pub stream: Option<StreamId>,
    pub pixel_format: PixelFormat,
    pub size: Size,
    /// Buffers to allocate for the stream.
    pub buffer_count: u32,
}

impl StreamConfiguration {
    /// Validates the structural parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size.width == 0 || self.size.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.buffer_count == 0 || self.buffer_count > MAX_BUFFER_COUNT {
            return Err(ConfigError::InvalidBufferCount(self.buffer_count));
        }
        Ok(())
    }
}

/// A group of stream configurations applied to a camera as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraConfiguration {
    streams: Vec<StreamConfiguration>,
}

impl CameraConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, config: StreamConfiguration) {
        self.streams.push(config);
    }

    pub fn streams(&self) -> &[StreamConfiguration] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [StreamConfiguration] {
        &mut self.streams
    }

    /// Stream identifiers in configuration order.
    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.iter().filter_map(|s| s.stream)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Validates every stream and the group as a whole.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut seen = Vec::with_capacity(self.streams.len());
        for config in &self.streams {
            let stream = config.stream.ok_or(ConfigError::UnboundStream)?;
            if seen.contains(&stream) {
                return Err(ConfigError::DuplicateStream(stream));
            }
            seen.push(stream);
            config.validate()?;
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration contains no streams")]
    Empty,
    #[error("stream configuration is not bound to a stream")]
    UnboundStream,
    #[error("{0} configured more than once")]
    DuplicateStream(StreamId),
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid buffer count {0} (must be 1-32)")]
    InvalidBufferCount(u32),
    #[error("device {0} has an empty driver name")]
    InvalidDevice(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Camera manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManagerConfig {
    /// Pipeline handlers to try, by registry name. Empty tries all of them.
    #[serde(default)]
    pub pipelines: Vec<String>,
}

/// A media device to expose through the enumerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub driver: String,
    pub model: String,
    pub dev_node: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Capture session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Roles requested from every camera.
    pub roles: Vec<StreamRole>,
    /// Requests queued per camera at start.
    pub requests: u32,
    /// Frames to dispatch before stopping.
    pub frames: u32,
    /// Unplug the first device after this many frames (0 disables).
    pub unplug_after: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            roles: vec![StreamRole::Viewfinder],
            requests: 4,
            frames: 8,
            unplug_after: 0,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run continuously (true) or stop after the session frame count.
    pub continuous: bool,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            metrics_port: 9464,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(device) = self.devices.iter().find(|d| d.driver.is_empty()) {
            return Err(ConfigError::InvalidDevice(device.dev_node.clone()));
        }
        Ok(())
    }
}
