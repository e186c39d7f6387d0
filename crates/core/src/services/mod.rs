//! Business logic services.

#![allow(missing_docs)]

pub mod cooldown;
pub mod forgiveness;
pub mod missed_pickup;
pub mod notification;
pub mod notifier;
pub mod penalty;
pub mod pickup;
pub mod reservation;

pub use cooldown::{CooldownService, LiftOutcome};
pub use forgiveness::{ForgivenessDecision, ForgivenessService, effective_forgiveness_status};
pub use missed_pickup::{MissedPickupService, SweepFailure, SweepReport};
pub use notification::NotificationService;
pub use notifier::{NoOpNotifier, Notice, Notifier, NotifierService, RecordingNotifier, dispatch};
pub use penalty::{PenaltyService, PenaltyStatus, RecordedOffense};
pub use pickup::{PickupService, RedeemedPickup};
pub use reservation::{CreateReservationInput, ReservationService, ReservationView};
