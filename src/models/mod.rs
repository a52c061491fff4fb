//! Domain model module declarations.

pub mod batch;
pub mod environment;
pub mod event;
pub mod session;
pub mod turn;
