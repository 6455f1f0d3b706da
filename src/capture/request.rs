//! Capture requests and their per-request buffer tracking.

use super::buffer::{Buffer, StreamId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Overall outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not yet completed.
    Pending,
    /// All buffers were processed and the request completed normally.
    Complete,
    /// The request was cancelled, typically because capture stopped.
    Cancelled,
}

/// Errors raised while building a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request already holds a buffer for {0}")]
    DuplicateStream(StreamId),
    #[error("request {0} already completed")]
    AlreadyCompleted(RequestId),
    #[error("request {0} has no buffers")]
    Empty(RequestId),
}

/// One application-submitted unit of capture work.
pub struct Request {
    id: RequestId,
    cookie: u64,
    buffers: BTreeMap<StreamId, Buffer>,
    pending: BTreeSet<StreamId>,
    status: RequestStatus,
    completed_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Creates an empty request. The `cookie` is opaque application data.
    pub fn new(cookie: u64) -> Self {
        Self {
            id: RequestId::next(),
            cookie,
            buffers: BTreeMap::new(),
            pending: BTreeSet::new(),
            status: RequestStatus::Pending,
            completed_at: None,
        }
    }

    /// Adds a buffer to the request.
    pub fn add_buffer(&mut self, buffer: Buffer) -> Result<(), RequestError> {
        if self.status != RequestStatus::Pending {
            return Err(RequestError::AlreadyCompleted(self.id));
        }
        let stream = buffer.stream();
        if self.buffers.contains_key(&stream) {
            return Err(RequestError::DuplicateStream(stream));
        }
        if !buffer.status().is_terminal() {
            self.pending.insert(stream);
        }
        self.buffers.insert(stream, buffer);
        Ok(())
    }

    /// Checks that the request can be queued.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.status != RequestStatus::Pending {
            return Err(RequestError::AlreadyCompleted(self.id));
        }
        if self.buffers.is_empty() {
            return Err(RequestError::Empty(self.id));
        }
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[inline]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    #[inline]
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Time the outcome was set.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// All buffers, ordered by stream.
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.values()
    }

    pub fn buffer(&self, stream: StreamId) -> Option<&Buffer> {
        self.buffers.get(&stream)
    }

    pub(crate) fn buffer_mut(&mut self, stream: StreamId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&stream)
    }

    /// Streams whose buffers have not completed yet, in stream order.
    pub fn pending_streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.pending.iter().copied()
    }

    /// Returns true while at least one buffer is pending.
    pub fn has_pending_buffers(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Removes `stream` from the pending set.
    ///
    /// Returns true if that was the last pending buffer.
    pub(crate) fn complete_buffer(&mut self, stream: StreamId) -> bool {
        assert!(
            self.pending.remove(&stream),
            "buffer for {} completed twice in request {}",
            stream,
            self.id
        );
        self.pending.is_empty()
    }

    /// Sets the outcome. Every buffer must have reached a terminal state.
    pub(crate) fn complete(&mut self, status: RequestStatus) {
        assert_ne!(status, RequestStatus::Pending);
        assert_eq!(
            self.status,
            RequestStatus::Pending,
            "request {} completed twice",
            self.id
        );
        assert!(
            self.pending.is_empty(),
            "request {} completed with {} pending buffers",
            self.id,
            self.pending.len()
        );
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("cookie", &self.cookie)
            .field("buffers", &self.buffers.len())
            .field("pending", &self.pending.len())
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BufferStatus;

    fn request_with(streams: &[u32]) -> Request {
        let mut request = Request::new(0);
        for (index, stream) in streams.iter().enumerate() {
            request
                .add_buffer(Buffer::new(StreamId(*stream), index))
                .unwrap();
        }
        request
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Request::new(0);
        let b = Request::new(0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let mut request = request_with(&[0]);
        assert_eq!(
            request.add_buffer(Buffer::new(StreamId(0), 1)),
            Err(RequestError::DuplicateStream(StreamId(0)))
        );
    }

    #[test]
    fn test_empty_request_invalid() {
        let request = Request::new(9);
        assert!(matches!(request.validate(), Err(RequestError::Empty(_))));
        assert!(request_with(&[0]).validate().is_ok());
    }

    #[test]
    fn test_last_buffer_reported() {
        let mut request = request_with(&[0, 1]);
        assert!(!request.complete_buffer(StreamId(1)));
        assert!(request.complete_buffer(StreamId(0)));
        assert!(!request.has_pending_buffers());

        request.complete(RequestStatus::Complete);
        assert_eq!(request.status(), RequestStatus::Complete);
        assert!(request.completed_at().is_some());
    }

    #[test]
    fn test_completed_request_rejects_buffers() {
        let mut request = request_with(&[0]);
        request.buffer_mut(StreamId(0)).unwrap().cancel();
        request.complete_buffer(StreamId(0));
        request.complete(RequestStatus::Cancelled);

        assert!(matches!(
            request.add_buffer(Buffer::new(StreamId(2), 0)),
            Err(RequestError::AlreadyCompleted(_))
        ));
        assert_eq!(
            request.buffer(StreamId(0)).map(|b| b.status()),
            Some(BufferStatus::Cancelled)
        );
    }

    #[test]
    #[should_panic(expected = "pending buffers")]
    fn test_outcome_requires_all_buffers() {
        let mut request = request_with(&[0, 1]);
        request.complete_buffer(StreamId(0));
        request.complete(RequestStatus::Complete);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_outcome_set_once() {
        let mut request = request_with(&[0]);
        request.complete_buffer(StreamId(0));
        request.complete(RequestStatus::Complete);
        request.complete(RequestStatus::Cancelled);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_buffer_completion_once() {
        let mut request = request_with(&[0, 1]);
        request.complete_buffer(StreamId(0));
        request.complete_buffer(StreamId(0));
    }
}
