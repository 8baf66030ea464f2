//! The Streaming Dispatcher: takes a verified identity and a chat request,
//! publishes it to the bus, and relays the worker's response back through a
//! caller-supplied sink (`SPEC_FULL.md` §4.D).

pub mod dispatch;
pub mod error;
pub mod sink;
pub mod ticket;

pub use dispatch::{ChatRequest, Dispatcher, DispatcherConfig, Outcome};
pub use error::{Error, Result};
pub use sink::{Chunk, ChunkPayload, Sink, SinkReceiver, channel};
pub use ticket::{StreamTicket, TicketRegistry};
