//! MissionLink: a reliable request/response protocol between rovers and the
//! mother-ship, carried over connectionless datagrams.
//!
//! UDP gives us framing and nothing else, and the fleet's control traffic -
//! registration, mission delivery, mission requests, progress reports - must
//! arrive complete, in order and exactly once. MissionLink rebuilds those
//! guarantees at the application layer:
//!
//! * a **three-way open** (`S` / `Z` / `A`) that establishes the peer address
//!   and announces the rover identity,
//! * a **per-transfer sequence space** starting at 100, advanced by one per
//!   acknowledged frame, with the receiver accepting only `expected + 1`,
//! * **stop-and-wait chunking**: one data frame in flight, retransmitted on
//!   timeout, never pipelined (which is what makes the duplicate suppression
//!   below possible),
//! * **delayed-write duplicate suppression** on the receiver: an accepted
//!   chunk is parked in a one-slot buffer and committed only when its
//!   successor (or the close) is accepted, so a retransmitted chunk can be
//!   re-acknowledged without ever reaching the sink twice,
//! * a **four-way close** (`F` exchanged and acknowledged in both
//!   directions).
//!
//! ## Wire format
//!
//! Each datagram is seven ASCII fields separated by `|`:
//!
//! ```ascii
//! flag | token | seq | ack | size | op | body
//! ```
//!
//! * `flag`: `S` open request, `Z` open ack, `A` ack, `F` close, `D` data
//! * `token`: 1-3 bytes; the rover identity during the open handshake, the
//!   mission identifier (or `000`) on every frame after it
//! * `seq`, `ack`: decimal counters, at most four digits
//! * `size`: decimal body length, or `_` on handshake frames
//! * `op`: `R` register, `T` task-deliver, `Q` task-request, `P` progress,
//!   `M` reserved metrics, `N` none, `0` handshake placeholder
//! * `body`: raw bytes; `-.-` on handshake frames, a single NUL on acks and
//!   closes
//!
//! The header budget is 23 bytes, leaving `buffer_size - 23` bytes of chunk
//! payload per frame (1001 with the default 1024 buffer).
//!
//! A transfer whose first data frame body ends in `.json` announces a file
//! artifact: the body is the artifact name and the file bytes follow as
//! ordinary chunks. Anything else is inline content.
//!
//! ## What this protocol does not do
//!
//! No congestion control, no adaptive timeouts, no encryption, no
//! authentication beyond peer-address and identity equality, and no
//! multiplexing: one transfer owns its endpoint from open to close.

pub mod config;
pub mod connection;
pub mod end_point;
pub mod error;
pub mod frame;
pub mod receive_transfer;
pub mod send_transfer;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::LinkConfig;
pub use connection::INITIAL_SEQ;
pub use end_point::{DatagramSocket, EndPoint};
pub use error::LinkError;
pub use frame::{Flag, Frame, OpTag, HEADER_OVERHEAD};
pub use receive_transfer::{recv as recv_transfer, Inbound, InboundPayload};
pub use send_transfer::{send as send_transfer, Payload};
