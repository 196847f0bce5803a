use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::HostParseError;

/// Docker's default daemon address
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Environment variable both Docker and Podman clients honour
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

const DEFAULT_TCP_PORT: u16 = 2375;

/// Address of a container runtime daemon
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DaemonHost {
    /// Unix domain socket path
    Unix(PathBuf),
    /// `host:port` reachable over plain TCP
    Tcp(String),
}

impl DaemonHost {
    /// Read `DOCKER_HOST`, falling back to the default socket
    pub fn from_env() -> Result<Self, HostParseError> {
        match std::env::var(DOCKER_HOST_ENV) {
            Ok(host) if !host.trim().is_empty() => host.parse(),
            _ => DEFAULT_DOCKER_HOST.parse(),
        }
    }

    /// Value for the `Host` header of requests sent to this daemon
    pub fn authority(&self) -> &str {
        match self {
            Self::Unix(_) => "docker",
            Self::Tcp(addr) => addr,
        }
    }
}

impl Default for DaemonHost {
    fn default() -> Self {
        Self::Unix(PathBuf::from("/var/run/docker.sock"))
    }
}

impl FromStr for DaemonHost {
    type Err = HostParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HostParseError::Empty);
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(HostParseError::MissingAddress(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let Some(addr) = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
        else {
            return Err(HostParseError::UnsupportedScheme(s.to_string()));
        };

        // drop any path component, the API paths are added per request
        let addr = addr.split('/').next().unwrap_or_default();
        if addr.is_empty() {
            return Err(HostParseError::MissingAddress(s.to_string()));
        }

        let has_port = match addr.rsplit_once(':') {
            Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        };
        if has_port && !addr.ends_with(']') {
            Ok(Self::Tcp(addr.to_string()))
        } else {
            Ok(Self::Tcp(format!("{addr}:{DEFAULT_TCP_PORT}")))
        }
    }
}

impl fmt::Display for DaemonHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
