//! Lowest-free-port allocation over a snapshot of bound ports.
//!
//! The allocator is a pure computation: it never records what it hands
//! out. Callers build a fresh snapshot for every allocation so a port
//! released by teardown is immediately reusable.

use std::collections::BTreeSet;

use super::PortRange;
use crate::{AppError, Result};

/// Picks free ports from the control and application ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    control: PortRange,
    app: PortRange,
}

impl PortAllocator {
    /// Create an allocator over two disjoint ranges.
    #[must_use]
    pub const fn new(control: PortRange, app: PortRange) -> Self {
        Self { control, app }
    }

    /// Control-plane range.
    #[must_use]
    pub const fn control_range(&self) -> PortRange {
        self.control
    }

    /// Application range.
    #[must_use]
    pub const fn app_range(&self) -> PortRange {
        self.app
    }

    /// Smallest free control port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when every port in the range is bound.
    pub fn control_port(&self, bound: &BTreeSet<u16>) -> Result<u16> {
        lowest_free(self.control, bound).ok_or_else(|| exhausted("control", self.control))
    }

    /// Smallest free application port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when every port in the range is bound.
    pub fn app_port(&self, bound: &BTreeSet<u16>) -> Result<u16> {
        lowest_free(self.app, bound).ok_or_else(|| exhausted("application", self.app))
    }
}

/// Smallest port of `range` that is absent from `bound`.
#[must_use]
pub fn lowest_free(range: PortRange, bound: &BTreeSet<u16>) -> Option<u16> {
    range.iter().find(|port| !bound.contains(port))
}

fn exhausted(label: &str, range: PortRange) -> AppError {
    AppError::Capacity(format!("no free {label} port in {range}"))
}
