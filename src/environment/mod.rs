//! Sandboxed execution environments.
//!
//! [`runtime`] is the container-engine seam, [`docker`] its `bollard`
//! implementation, and [`manager`] the per-session lifecycle built on top.

pub mod docker;
pub mod env_file;
pub mod manager;
pub mod runtime;
