//! Envelopes, correlation and routing between addresses.

mod correlation;
mod envelope;
mod location_sender;
mod router;
mod transport;

pub use correlation::PendingCalls;
pub use envelope::{kinds, Direction, Envelope, MAX_FRAME_SIZE};
pub use location_sender::LocationSender;
pub use router::MessageRouter;
pub use transport::{LocalNetwork, Transport};
