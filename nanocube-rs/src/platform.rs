//! Keeps the central components of a running worker in one place.
//!
//! The [Platform](Platform) maps each component type to a shared instance. During startup the
//! [Builder](crate::builder::Builder) registers the config, the endpoint dictionary and the
//! server, the worker binary then adds the loaded [Nanocube](crate::service::Nanocube).
//! Other parts resolve these components by type.
//!
//! The platform also carries the central **is_running** flag. Once
//! [terminate](Platform::terminate) is called, all components are released and the server stops
//! accepting connections.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use nanocube::platform::Platform;
//! struct Dataset {
//!     name: &'static str,
//! }
//!
//! let platform = Platform::new();
//! platform.register(Arc::new(Dataset { name: "crimes" }));
//! assert_eq!(platform.require::<Dataset>().name, "crimes");
//!
//! platform.terminate();
//! assert_eq!(platform.is_running(), false);
//! assert_eq!(platform.find::<Dataset>().is_none(), true);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Components = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// A registry of components keyed by their type.
pub struct Platform {
    components: Mutex<Components>,
    running: AtomicBool,
}

impl Platform {
    /// Creates a new and running platform.
    pub fn new() -> Arc<Platform> {
        Arc::new(Platform {
            components: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        })
    }

    fn components(&self) -> MutexGuard<'_, Components> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the given component, replacing any previous one of the same type.
    pub fn register<T>(&self, component: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self.components().insert(TypeId::of::<T>(), component);
    }

    /// Resolves the component of the given type.
    ///
    /// Returns **None** if no such component was registered or if the platform has already been
    /// terminated.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.components()
            .get(&TypeId::of::<T>())
            .and_then(|component| component.clone().downcast::<T>().ok())
    }

    /// Resolves a component which is known to be present.
    ///
    /// # Panics
    /// Panics if the component is missing, which is a programming error during startup.
    ///
    /// ```should_panic
    /// # use nanocube::platform::Platform;
    /// struct Missing;
    ///
    /// let _ = Platform::new().require::<Missing>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        match self.find::<T>() {
            Some(component) => component,
            None if self.is_running() => panic!(
                "The component {} has not been registered.",
                std::any::type_name::<T>()
            ),
            None => panic!(
                "The component {} was requested while shutting down.",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Releases all components and marks the platform as stopped.
    pub fn terminate(&self) {
        self.components().clear();
        self.running.store(false, Ordering::Release);
    }
}
