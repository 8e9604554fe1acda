//! Event delivery to display/automation collaborators.
//!
//! [`Subscribe`] is the extension point (progress bars, status panes,
//! metrics); [`SubscriberSet`] fans events out to all of them without
//! blocking the engine. [`LogSubscriber`] is the built-in tracing sink.

mod log;
mod set;
mod subscribe;

pub use log::LogSubscriber;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
