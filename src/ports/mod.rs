//! Host port bookkeeping.
//!
//! Two disjoint inclusive ranges are managed: one for the control API of
//! each execution environment, one for dev-server traffic. Nothing is
//! stored apart from the session's own reservation; every allocation is
//! recomputed from what is actually bound.

pub mod allocator;
pub mod reservation;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Inclusive range of host ports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "(u16, u16)")]
pub struct PortRange {
    /// First port in the range.
    pub start: u16,
    /// Last port in the range (inclusive).
    pub end: u16,
}

impl PortRange {
    /// Construct a range from its inclusive bounds.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether the range contains no ports at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Whether `port` falls inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Whether two ranges share at least one port.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty() && !other.is_empty() && self.start <= other.end && other.start <= self.end
    }

    /// Number of ports in the range; this is the session concurrency cap.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    /// Iterate over every port in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl From<(u16, u16)> for PortRange {
    fn from((start, end): (u16, u16)) -> Self {
        Self::new(start, end)
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
