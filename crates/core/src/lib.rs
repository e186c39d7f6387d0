//! Core business logic for surplus.
//!
//! Services here own the reservation lifecycle: creating and cancelling
//! reservations, redeeming pickup codes, failing overdue reservations,
//! escalating penalties, forgiveness and paid cooldown lifts.

pub mod services;

pub use services::*;
