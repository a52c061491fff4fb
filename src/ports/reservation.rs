//! Durable port reservations built on top of the allocator.
//!
//! The bound-port snapshot is the union of ports held by containers of
//! the managed image (as reported by the runtime), ports recorded for
//! environments, and application ports reserved by sessions. Allocations
//! within this process are serialized by a single gate; the unique index
//! on `session.port` arbitrates against anything else.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::allocator::PortAllocator;
use super::PortRange;
use crate::environment::runtime::ContainerRuntime;
use crate::persistence::environment_repo::EnvironmentRepo;
use crate::persistence::session_repo::{PortClaim, SessionRepo};
use crate::{AppError, Result};

/// Claim attempts before a lost race is reported as exhaustion.
const MAX_CLAIM_ATTEMPTS: usize = 5;

/// Free and used ports of one range.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RangeAvailability {
    /// The range, as `start-end`.
    pub range: String,
    /// Ports nobody holds.
    pub available: Vec<u16>,
    /// Ports currently bound or reserved.
    pub used: Vec<u16>,
    /// Range size.
    pub total: usize,
}

impl RangeAvailability {
    fn of(range: PortRange, bound: &BTreeSet<u16>) -> Self {
        let (used, available): (Vec<u16>, Vec<u16>) = range.iter().partition(|port| bound.contains(port));
        Self {
            range: range.to_string(),
            available,
            used,
            total: range.len(),
        }
    }
}

/// Availability report for both ranges.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortAvailability {
    /// Control-plane range.
    pub control: RangeAvailability,
    /// Application range.
    pub app: RangeAvailability,
}

/// Snapshot builder and reservation writer.
pub struct PortReservations {
    allocator: PortAllocator,
    sessions: SessionRepo,
    environments: EnvironmentRepo,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    gate: Mutex<()>,
}

impl PortReservations {
    /// Create the reservation service. `runtime` is `None` when no
    /// container engine is configured.
    #[must_use]
    pub fn new(
        allocator: PortAllocator,
        sessions: SessionRepo,
        environments: EnvironmentRepo,
        runtime: Option<Arc<dyn ContainerRuntime>>,
    ) -> Self {
        Self {
            allocator,
            sessions,
            environments,
            runtime,
            gate: Mutex::new(()),
        }
    }

    /// Every port currently considered bound.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Container` if the runtime cannot be listed and
    /// `AppError::Db` if the reservations cannot be read.
    pub async fn snapshot(&self) -> Result<BTreeSet<u16>> {
        let mut bound = BTreeSet::new();
        if let Some(runtime) = &self.runtime {
            bound.extend(runtime.list_bound_ports().await?);
        }
        bound.extend(self.environments.recorded_ports().await?);
        bound.extend(self.sessions.reserved_ports().await?);
        debug!(count = bound.len(), "port snapshot");
        Ok(bound)
    }

    /// Hold the allocation gate for a multi-step allocation.
    pub async fn begin(&self) -> AllocationScope<'_> {
        AllocationScope {
            reservations: self,
            _guard: self.gate.lock().await,
        }
    }

    /// Reserve an application port for the session, returning the port it
    /// already holds if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when the application range is
    /// exhausted and `AppError::NotFound` for an unknown session.
    pub async fn reserve_app_port(&self, session_id: i64) -> Result<u16> {
        self.begin().await.claim_app_port(session_id).await
    }

    /// Drop the session's reservation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn release_port(&self, session_id: i64) -> Result<()> {
        self.sessions.release_port(session_id).await?;
        info!(session_id, "released session port");
        Ok(())
    }

    /// Free/used ports of both ranges.
    ///
    /// # Errors
    ///
    /// Propagates snapshot failures.
    pub async fn availability(&self) -> Result<PortAvailability> {
        let bound = self.snapshot().await?;
        Ok(PortAvailability {
            control: RangeAvailability::of(self.allocator.control_range(), &bound),
            app: RangeAvailability::of(self.allocator.app_range(), &bound),
        })
    }
}

/// Exclusive allocation window. Ports chosen inside one scope stay
/// consistent with each other until it is dropped.
pub struct AllocationScope<'a> {
    reservations: &'a PortReservations,
    _guard: MutexGuard<'a, ()>,
}

impl AllocationScope<'_> {
    /// See [`PortReservations::reserve_app_port`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when the application range is
    /// exhausted and `AppError::NotFound` for an unknown session.
    pub async fn claim_app_port(&self, session_id: i64) -> Result<u16> {
        let r = self.reservations;
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let session = r.sessions.require(session_id).await?;
            if let Some(port) = session.port {
                return Ok(port);
            }

            let bound = r.snapshot().await?;
            let port = r.allocator.app_port(&bound)?;
            match r.sessions.claim_port(session_id, port).await? {
                PortClaim::Claimed => {
                    info!(session_id, port, "reserved application port");
                    return Ok(port);
                }
                PortClaim::AlreadyHeld | PortClaim::Taken => {
                    debug!(session_id, port, attempt, "port claim lost, retrying");
                }
            }
        }
        Err(AppError::Capacity(format!(
            "could not reserve an application port for session {session_id}"
        )))
    }

    /// Lowest free control port. The caller must record it before the
    /// scope ends.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when the control range is exhausted.
    pub async fn control_port(&self) -> Result<u16> {
        let bound = self.reservations.snapshot().await?;
        self.reservations.allocator.control_port(&bound)
    }
}
