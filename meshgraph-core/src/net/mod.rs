/*
    net - Peer transport

    Connection lifecycle (dial, listen, retry) and framed message delivery.
    Ordering is guaranteed per connection, never across connections, and
    each connection has its own outbound queue so a slow peer cannot stall
    a fast one.
*/

pub mod backoff;
pub mod transport;

pub use backoff::Backoff;
pub use transport::{Transport, TransportError, TransportEvent, MAX_FRAME_LEN};
