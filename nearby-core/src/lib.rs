//! Nearby connections client.
//! Host-driven: [`NearbyCore`] does no I/O; the host runs the commands it returns
//! on a proximity backend and feeds backend callbacks back in.
//! [`NearbyClient`] is the async wrapper for Rust hosts.

pub mod client;
pub mod config;
pub mod core;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod ffi;
pub mod loopback;
pub mod negotiator;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod transport;

pub use crate::core::{Command, NearbyCore};
pub use client::NearbyClient;
pub use config::{Config, ConfigError};
pub use endpoint::{Endpoint, EndpointId, Strategy};
pub use error::{ErrorKind, NearbyError, Result};
pub use events::{EventEmitter, Subscription};
pub use loopback::{LoopbackTransport, Medium};
pub use payload::{decode_payload, encode_payload, Payload, PayloadId};
pub use protocol::{Event, EventKind, StatusCodes, TransferState, PROTOCOL_VERSION};
pub use session::Role;
pub use transport::{Transport, TransportError, TransportEvent};
