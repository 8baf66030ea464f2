//! Shared error definitions used across all relaygate crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
