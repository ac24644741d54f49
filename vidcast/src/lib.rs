//! vidcast: paced UDP delivery of video elementary streams
//!
//! The server side reads a media source in fixed-size chunks, frames every
//! chunk with a 32-bit sequence number and sends it at the media bitrate to
//! registered clients or a fixed broadcast group. The receiving side puts
//! packets back in order, accounts for loss and reordering, and hands the
//! payload bytes to an output sink.
//!
//! # Example
//!
//! ```no_run
//! use vidcast::{Server, ServerConfig};
//! use vidcast::io::shutdown_channel;
//!
//! let (_handle, shutdown) = shutdown_channel();
//! let mut server = Server::bind(ServerConfig::default(), shutdown)?;
//! let file = std::fs::File::open("clip.h264")?;
//! server.stream(file, 2_000_000)?;
//! let summary = server.finish();
//! println!("sent {} packets", summary.pacer.packets_sent);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod listener;
pub mod pacer;
pub mod receiver;
pub mod registry;
pub mod server;

pub use vidcast_io as io;
pub use vidcast_protocol as protocol;

pub use listener::{ListenerStats, RegistrationListener};
pub use pacer::{Destinations, Pacer, PacerConfig, PacerError, PacerStats};
pub use receiver::{Receiver, ReceiverConfig, ReceiverError, ReceiverEvent, ReceiverReport};
pub use registry::{ClientRegistry, Registration, RegistryError};
pub use server::{
    Server, ServerConfig, ServerError, ServerMode, ServerSummary, DEFAULT_MULTICAST_GROUP,
    DEFAULT_PORT,
};
