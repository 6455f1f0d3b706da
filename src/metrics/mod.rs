//! Prometheus metrics exporter for pipeline monitoring.
//!
//! Exposes the request and buffer counters kept by every pipeline handler,
//! plus hotplug activity, in Prometheus format. The HTTP endpoint is only
//! built with the `metrics` feature.
//!
//! # Metrics Exposed
//!
//! ## Topology
//! - `capture_pipeline_cameras` - Cameras currently published
//! - `capture_pipeline_handlers` - Matched pipeline handler instances
//!
//! ## Requests
//! - `capture_pipeline_requests_in_flight` - Queued and not yet completed
//! - `capture_pipeline_requests_queued_total`
//! - `capture_pipeline_requests_completed_total`
//! - `capture_pipeline_requests_cancelled_total`
//!
//! ## Buffers
//! - `capture_pipeline_buffers_completed_total`
//! - `capture_pipeline_buffers_cancelled_total`
//!
//! ## Hotplug
//! - `capture_pipeline_hotplug_disconnects_total`
//!
//! # Example
//!
//! ```no_run
//! use capture_pipeline::camera::CameraManager;
//! use capture_pipeline::device::DeviceEnumerator;
//! use capture_pipeline::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let manager = CameraManager::new(DeviceEnumerator::new());
//! manager.start(&[]);
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot::from_manager(&manager));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
