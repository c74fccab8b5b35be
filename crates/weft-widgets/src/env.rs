#![forbid(unsafe_code)]

//! Ambient view environment: registry, backend and compiler config.
//!
//! Every thread has a default environment built on
//! [`Registry::global`] and a fresh [`MemoryBackend`]. [`Env::enter`]
//! makes another environment current until its guard drops.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use weft_backend::{Backend, MemoryBackend};
use weft_core::Registry;

use crate::config::ViewConfig;
use crate::error::Result;

thread_local! {
    static DEFAULT_ENV: Env = Env::fallback(Registry::global(), Rc::new(MemoryBackend::new()), ViewConfig::default());
    static ENV_STACK: RefCell<Vec<Env>> = const { RefCell::new(Vec::new()) };
}

/// Registry, backend and config used while compiling and mounting views.
#[derive(Clone)]
pub struct Env {
    registry: Registry,
    backend: Rc<dyn Backend>,
    config: Rc<ViewConfig>,
}

impl Env {
    /// Build an environment and install the component classes into `registry`.
    pub fn new(registry: Registry, backend: Rc<dyn Backend>, config: ViewConfig) -> Result<Self> {
        crate::install(&registry)?;
        Ok(Self {
            registry,
            backend,
            config: Rc::new(config),
        })
    }

    /// A private registry over `backend` with default config.
    pub fn with_backend(backend: Rc<dyn Backend>) -> Result<Self> {
        Self::new(Registry::new(), backend, ViewConfig::default())
    }

    fn fallback(registry: Registry, backend: Rc<dyn Backend>, config: ViewConfig) -> Self {
        if let Err(err) = crate::install(&registry) {
            tracing::error!(error = %err, "failed to install component classes");
        }
        Self {
            registry,
            backend,
            config: Rc::new(config),
        }
    }

    /// The innermost entered environment, or the thread default.
    #[must_use]
    pub fn current() -> Env {
        ENV_STACK
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(|| DEFAULT_ENV.with(Env::clone))
    }

    /// Make `self` current until the returned guard is dropped.
    #[must_use = "the environment is only current while the guard lives"]
    pub fn enter(&self) -> EnvGuard {
        ENV_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        EnvGuard { _private: () }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &ViewConfig {
        &self.config
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("classes", &self.registry.names().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Restores the previous environment on drop.
pub struct EnvGuard {
    _private: (),
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        ENV_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
