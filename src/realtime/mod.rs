//! Realtime fan-out: one-shot stream tickets and the per-subscriber SSE
//! event loop.

mod stream;
mod ticket;

pub use stream::{event_stream, LOG_BATCH_LIMIT, STREAM_TICK};
pub use ticket::{StreamClaims, TicketError, TicketIssuer};
