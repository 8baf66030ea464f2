use relaygate_protocol::ChunkFrame;
use tokio::sync::mpsc;

/// A unit of streamed output forwarded to the caller-supplied sink
/// (`SPEC_FULL.md` §3, Chunk). `sequence_number` is monotonic from 0 within
/// a ticket.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub ticket_id: String,
    pub sequence_number: u64,
    pub payload: ChunkPayload,
    pub terminal: bool,
}

#[derive(Debug, Clone)]
pub enum ChunkPayload {
    Frame(ChunkFrame),
    Error(String),
}

/// The capability the Dispatcher's caller passes in to receive each
/// `Chunk`, grounded on the `StreamSender`/`StreamEvent` edit-in-place
/// streaming abstraction found elsewhere in the example pack. Dropping the
/// paired receiver is how a caller signals "closed" (client disconnected);
/// the Dispatcher observes this via `Sink::closed()`.
pub type Sink = mpsc::Sender<Chunk>;
pub type SinkReceiver = mpsc::Receiver<Chunk>;

/// Create a sink/receiver pair. The receiver is typically owned by the
/// WebSocket Edge's write loop.
#[must_use]
pub fn channel(capacity: usize) -> (Sink, SinkReceiver) {
    mpsc::channel(capacity)
}
