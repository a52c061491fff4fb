//! Container runtime seam.
//!
//! The [`ContainerRuntime`] trait is the only place the lifecycle manager
//! and the port reservations touch the container engine, so tests can
//! substitute an in-memory runtime.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use crate::models::environment::EnvironmentInfo;
use crate::Result;

/// Everything needed to create one execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Container name.
    pub name: String,
    /// Image to instantiate.
    pub image: String,
    /// `KEY=VALUE` entries injected into the environment.
    pub env: Vec<String>,
    /// `(container_port, host_port)` TCP bindings.
    pub port_bindings: Vec<(u16, u16)>,
}

/// Operations the orchestrator needs from a container engine.
pub trait ContainerRuntime: Send + Sync {
    /// Host ports bound by every environment built from the managed image,
    /// running or not.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// engine cannot be queried.
    fn list_bound_ports(&self) -> Pin<Box<dyn Future<Output = Result<BTreeSet<u16>>> + Send + '_>>;

    /// Create (but do not start) an environment. Returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`](crate::AppError::Conflict) when an
    /// environment with the same name already exists and
    /// [`AppError::Container`](crate::AppError::Container) for other
    /// failures.
    fn create(
        &self,
        spec: EnvironmentSpec,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Start a created environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// start request fails.
    fn start(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Force-remove an environment by name or identifier. Removing an
    /// unknown environment succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// engine refuses the removal.
    fn remove(&self, name_or_id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Current state of an environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an
    /// unknown identifier, [`AppError::Container`](crate::AppError::Container)
    /// for other failures.
    fn inspect(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EnvironmentInfo>> + Send + '_>>;
}
