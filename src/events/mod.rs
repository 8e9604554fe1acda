//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to everything the engine reports while a batch runs:
//! per-attempt upload progress, circuit transitions, job lifecycle, and
//! batch control.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] — classification and payload metadata
//! - [`Bus`] — thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: [`HostUploadTask`](crate::hosts::HostUploadTask),
//!   [`RetryPolicy`](crate::policies::RetryPolicy),
//!   [`CircuitRegistry`](crate::circuit::CircuitRegistry),
//!   [`UploadBatchCoordinator`](crate::batch::UploadBatchCoordinator).
//! - **Consumers**: the coordinator's subscriber listener, which fans events
//!   out to the display collaborator through
//!   [`SubscriberSet`](crate::subscribers::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
