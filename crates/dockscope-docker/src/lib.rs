//! Docker/Podman daemon client for dockscope
//!
//! This crate talks HTTP to a Docker-compatible daemon and smooths over the
//! differences in Podman's event vocabulary.
//!
//! ```text
//! DockerClient
//!   └─ EventCompat        rewrites GET .../events bodies line by line
//!        └─ DaemonTransport   one HTTP/1.1 connection per request
//! ```

mod client;
mod compat;
mod error;
mod event;
mod host;
mod transport;

pub use client::{DockerClient, EventsQuery};
pub use compat::{
    CompatBody, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_LINE_LENGTH, EventCompat, EventCompatLayer,
    StreamSettings, is_event_stream,
};
pub use error::{BoxError, EventStreamError, HostParseError, TransportError};
pub use event::{HEALTH_STATUS_ACTION, HealthStatus, rewrite_health_action};
pub use host::{DEFAULT_DOCKER_HOST, DOCKER_HOST_ENV, DaemonHost};
pub use transport::DaemonTransport;
