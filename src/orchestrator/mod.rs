//! Session orchestration: the agent client, the driver that reports
//! lifecycle events, the run guard, and the state machine consuming those
//! events.

pub mod agent;
pub mod driver;
pub mod lifecycle;
pub mod locks;
pub mod runs;
pub mod scaffold;
pub mod state_machine;
