//! Database entities.

#![allow(missing_docs)]

pub mod notification;
pub mod offer;
pub mod penalty_offense_history;
pub mod point_transaction;
pub mod reservation;
pub mod user_penalty;
pub mod user_points;

pub use notification::Entity as Notification;
pub use offer::Entity as Offer;
pub use penalty_offense_history::Entity as PenaltyOffenseHistory;
pub use point_transaction::Entity as PointTransaction;
pub use reservation::Entity as Reservation;
pub use user_penalty::Entity as UserPenalty;
pub use user_points::Entity as UserPoints;
