use std::io;
use std::time::Duration;

/// Type-erased error used for response bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while parsing a daemon host string
#[derive(Debug, thiserror::Error)]
pub enum HostParseError {
    #[error("daemon host is empty")]
    Empty,

    #[error("unsupported scheme in daemon host '{0}'")]
    UnsupportedScheme(String),

    #[error("missing address in daemon host '{0}'")]
    MissingAddress(String),
}

/// Errors raised while sending a request to the daemon
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("invalid request uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("invalid host header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("daemon responded with {0}")]
    Status(http::StatusCode),

    #[error("unix sockets are not supported on this platform")]
    UnsupportedPlatform,
}

/// Errors surfaced to the reader of a rewritten event stream
#[derive(Debug, thiserror::Error)]
pub enum EventStreamError {
    #[error("reading event stream failed: {0}")]
    Upstream(#[source] io::Error),

    #[error("event line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("no events received for {0:?}")]
    Idle(Duration),
}
