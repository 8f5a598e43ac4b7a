//! Heartbeat-supervised TCP client: line framing, request correlation,
//! liveness watchdog, and the connection lifecycle with automatic reset.

pub mod connection;
pub mod error;
pub mod framing;
pub mod heartbeat;
pub mod messages;
pub mod pending;
pub mod reconnection;

pub use connection::{
    ClientConfig, ConnectionInfo, ConnectionManager, ConnectionState, ConnectionStateWatch,
};
pub use error::{LoginError, RequestError};
pub use framing::{DecodeError, FrameConfig, FrameDecoder, Frames};
pub use heartbeat::HeartbeatMonitor;
pub use messages::{Inbound, REPLY_TAG, Reply, RequestKind, Response};
pub use pending::{KeyGenerator, PendingEntry, PendingError, PendingTable};
pub use reconnection::{ReconnectConfig, ReconnectState};
