//! Pipeline handler factories and the registry that lists them.

use crate::camera::CameraManager;
use crate::pipeline::SharedHandler;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Errors returned by registry lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no pipeline handler registered as \"{0}\"")]
    UnknownHandler(String),
}

/// Constructs instances of one pipeline handler type.
///
/// Factories are stateless and live for the whole process. Use
/// [`register_pipeline_handler!`](crate::register_pipeline_handler) to
/// declare one.
pub trait HandlerFactory: Send + Sync {
    /// Name of the handler. Expected to be unique, not enforced.
    fn name(&self) -> &'static str;

    /// Creates a handler bound to `manager`.
    fn create(&self, manager: &Rc<CameraManager>) -> SharedHandler;
}

/// Ordered list of handler factories.
///
/// Entries are never removed. Registration order is preserved and is the
/// order in which the camera manager tries handlers.
#[derive(Default)]
pub struct Registry {
    factories: Vec<&'static dyn HandlerFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a factory. Duplicate names are accepted.
    pub fn register(&mut self, factory: &'static dyn HandlerFactory) {
        self.factories.push(factory);
        tracing::debug!(pipeline = factory.name(), "Registered pipeline handler");
    }

    /// All factories in registration order.
    pub fn all(&self) -> &[&'static dyn HandlerFactory] {
        &self.factories
    }

    /// First factory registered under `name`.
    pub fn find(&self, name: &str) -> Option<&'static dyn HandlerFactory> {
        self.factories.iter().copied().find(|f| f.name() == name)
    }

    /// Instantiates the handler registered under `name`.
    pub fn create(
        &self,
        name: &str,
        manager: &Rc<CameraManager>,
    ) -> Result<SharedHandler, RegistryError> {
        self.find(name)
            .map(|factory| factory.create(manager))
            .ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.name()))
            .finish()
    }
}

/// Declares a [`HandlerFactory`] for a pipeline handler type.
///
/// The handler type must provide
/// `fn new(manager: &Rc<CameraManager>, me: WeakHandler) -> Self`, where
/// `me` is a weak reference to the handler being constructed.
///
/// ```ignore
/// register_pipeline_handler!(SimPipelineFactory, SimPipeline, "sim");
/// capture_pipeline::registry::register(&SimPipelineFactory);
/// ```
#[macro_export]
macro_rules! register_pipeline_handler {
    ($factory:ident, $handler:ty, $name:literal) => {
        #[doc = concat!("Factory for the `", $name, "` pipeline handler.")]
        pub struct $factory;

        impl $crate::registry::HandlerFactory for $factory {
            fn name(&self) -> &'static str {
                $name
            }

            fn create(
                &self,
                manager: &::std::rc::Rc<$crate::camera::CameraManager>,
            ) -> $crate::pipeline::SharedHandler {
                let handler = ::std::rc::Rc::new_cyclic(
                    |me: &::std::rc::Weak<::std::cell::RefCell<$handler>>| {
                        ::std::cell::RefCell::new(<$handler>::new(manager, me.clone()))
                    },
                );
                handler
            }
        }
    };
}
