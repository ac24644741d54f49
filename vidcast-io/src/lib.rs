//! vidcast I/O and timing
//!
//! UDP socket wrapper, absolute pacing schedule, periodic timers and the
//! cooperative shutdown signal shared by the server and receiver loops.

pub mod shutdown;
pub mod socket;
pub mod time;

pub use shutdown::{shutdown_channel, Shutdown, ShutdownHandle};
pub use socket::{MediaSocket, SocketError};
pub use time::{transmission_time, PacingSchedule, Timer};
