//! Buffer type representing one stream's memory slot within a request.

use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies a stream within a camera.
///
/// Stream identifiers are only unique per camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Lifecycle state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Queued to hardware, not yet filled.
    Pending,
    /// Filled with a frame.
    Success,
    /// Returned without data.
    Cancelled,
}

impl BufferStatus {
    /// Returns true for `Success` and `Cancelled`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, BufferStatus::Pending)
    }
}

/// Metadata written by hardware when a buffer is filled.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    /// Monotonic frame sequence number of the stream.
    pub sequence: u64,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
    /// Number of payload bytes written.
    pub bytes_used: usize,
}

/// A memory region bound to a stream for one request.
///
/// Buffers move from `Pending` to exactly one terminal state and never
/// leave it again.
#[derive(Debug, Clone)]
pub struct Buffer {
    stream: StreamId,
    index: usize,
    status: BufferStatus,
    metadata: Option<FrameMetadata>,
}

impl Buffer {
    /// Creates a pending buffer for `stream` using slot `index` of the
    /// stream's allocated buffers.
    pub fn new(stream: StreamId, index: usize) -> Self {
        Self {
            stream,
            index,
            status: BufferStatus::Pending,
            metadata: None,
        }
    }

    #[inline]
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn status(&self) -> BufferStatus {
        self.status
    }

    /// Frame metadata, present only for successfully filled buffers.
    pub fn metadata(&self) -> Option<&FrameMetadata> {
        self.metadata.as_ref()
    }

    /// Marks the buffer as filled.
    ///
    /// Returns `false` and leaves the buffer untouched if it already
    /// reached a terminal state.
    pub(crate) fn complete(&mut self, metadata: FrameMetadata) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BufferStatus::Success;
        self.metadata = Some(metadata);
        true
    }

    /// Marks the buffer as cancelled.
    ///
    /// Returns `false` if the buffer already reached a terminal state.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BufferStatus::Cancelled;
        true
    }
}
