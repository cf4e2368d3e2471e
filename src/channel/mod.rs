//! # Control channel between the supervisor and its workers.
//!
//! ## Contents
//! - [`Message`], [`SendHandle`], [`Delivery`]: opaque payloads and their envelope
//! - `ControlChannel`: supervisor → worker FIFO (messages + disconnect)
//! - `WorkerLink`: worker → supervisor signals into the dispatcher inbox
//! - `protocol`: JSON line frames used with child-process workers
//!
//! ```text
//! Supervisor::send ──► ControlChannel ──► [FIFO] ──► WorkerContext::recv
//!                                                 └─► stdin pump (process units)
//! WorkerContext::send ──► WorkerLink ──► inbox ──► dispatcher ──► Message event
//! child stdout reader ───────────────┘
//! ```

mod control;
mod link;
mod message;
pub(crate) mod protocol;

pub(crate) use control::{ControlChannel, ControlEnds, ControlFrame};
pub(crate) use link::{Inbound, InboxReceiver, InboxSender, WorkerLink, WorkerSignal};
pub use message::{Delivery, Message, SendHandle};
