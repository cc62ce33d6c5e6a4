//! Session lifecycle and time-credit escrow engine.
//!
//! A teacher grants time to a student in exchange for time-credits. Credits
//! are held in escrow when a session is booked and either transferred to the
//! teacher on dual-confirmed completion or refunded to the student on
//! rejection, cancellation, or an administrative dispute resolution. No
//! credit is created, destroyed, or double-spent along the way.

pub mod account;
pub mod credits;
pub mod error;
pub mod ledger;
mod locks;
pub mod notify;
pub mod offer;
pub mod service;
pub mod session;
pub mod time;
pub mod utils;

pub use account::CreditBalance;
pub use credits::Credits;
pub use error::EngineError;
pub use ledger::{EntryKind, LedgerEntry};
pub use notify::{BadgeTrigger, ChannelSink, Notification, NotificationKind, NotificationSink, NullSink};
pub use offer::{Offer, OfferBook, OfferTerms, RateResolver};
pub use service::{Actor, Resolution, SessionService};
pub use session::{BookingRequest, Party, Session, SessionMode, SessionStatus};
pub use time::TimeStamp;
