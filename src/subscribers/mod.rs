//! # Event subscribers.
//!
//! ```text
//! Bus ──► subscriber listener ──► SubscriberSet ──┬──► LogWriter
//!                                                 ├──► metrics, alerts, ...
//!                                                 └──► custom Subscribe impls
//! ```
//!
//! - [`Subscribe`]: the trait to implement.
//! - [`SubscriberSet`]: per-subscriber queues with overflow and panic isolation.
//! - [`LogWriter`]: renders events through `tracing` (feature `logging`).

#[cfg(feature = "logging")]
mod log;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
