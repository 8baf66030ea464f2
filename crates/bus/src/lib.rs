//! Thin wrapper over the pub-sub bus: request/reply over ephemeral subjects,
//! and a durable append-only stream for the raw-memory feed.

pub mod client;
pub mod error;

pub use client::{BusClient, Handler, NatsBus, Subscription};
pub use error::{Error, Result};
