//! Built-in pipeline handlers.

pub mod sim;
pub mod uvc;
mod video;

pub use sim::{SimPipeline, SimPipelineFactory};
pub use uvc::{UvcPipeline, UvcPipelineFactory};
pub use video::{CaptureState, StreamSet, StreamCaps, VideoDevice};

use std::sync::Once;

/// Registers the built-in handlers with the process-wide registry.
///
/// Safe to call any number of times; registration happens once.
pub fn register_builtin() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        crate::registry::register(&SimPipelineFactory);
        crate::registry::register(&UvcPipelineFactory);
    });
}
