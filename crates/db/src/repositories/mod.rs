//! Database repositories.

#![allow(missing_docs)]

pub mod notification;
pub mod offer;
pub mod penalty;
pub mod points;
pub mod reservation;

pub use notification::NotificationRepository;
pub use offer::OfferRepository;
pub use penalty::PenaltyRepository;
pub use points::PointsRepository;
pub use reservation::ReservationRepository;
