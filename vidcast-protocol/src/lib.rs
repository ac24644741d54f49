//! vidcast protocol core
//!
//! Wire format, sequence arithmetic, the receiver-side reorder buffer and the
//! receiver session state machine. Nothing in this crate performs I/O.

pub mod packet;
pub mod reorder;
pub mod sequence;
pub mod session;

pub use packet::{
    ControlMessage, Datagram, Frame, Packet, PacketError, Sentinel, HEADER_SIZE,
    MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE,
};
pub use reorder::{Anchor, Arrival, ReorderConfig, ReorderStats, ReorderTracker};
pub use sequence::{SeqNumber, INITIAL_SEQ};
pub use session::{
    ReceiverSession, SessionConfig, SessionError, SessionEvent, SessionMode, SessionState,
};
