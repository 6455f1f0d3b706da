//! Process-wide pipeline handler registry.
//!
//! Handler implementations are discovered through a global list of
//! factories rather than a central compile-time table. The list is created
//! lazily on first use, so registering from any initialisation path is
//! safe regardless of what else has been set up.
//!
//! Registration is explicit: each handler module declares its factory with
//! [`register_pipeline_handler!`](crate::register_pipeline_handler), and
//! [`crate::pipelines::register_builtin`] registers the built-in ones once.

mod factory;

pub use factory::{HandlerFactory, Registry, RegistryError};

use crate::camera::CameraManager;
use crate::pipeline::SharedHandler;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

fn global() -> MutexGuard<'static, Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Mutex::new(Registry::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Adds a factory to the process-wide registry.
pub fn register(factory: &'static dyn HandlerFactory) {
    global().register(factory);
}

/// Snapshot of every registered factory, in registration order.
pub fn all() -> Vec<&'static dyn HandlerFactory> {
    global().all().to_vec()
}

pub fn find(name: &str) -> Option<&'static dyn HandlerFactory> {
    global().find(name)
}

/// Instantiates the handler registered under `name`.
pub fn create(name: &str, manager: &Rc<CameraManager>) -> Result<SharedHandler, RegistryError> {
    // Release the lock before running the constructor.
    let factory = find(name).ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))?;
    Ok(factory.create(manager))
}
