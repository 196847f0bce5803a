use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Empty;
use hyper::body::Incoming;
use tower::{Layer, ServiceExt};

use crate::compat::{CompatBody, EventCompat, EventCompatLayer, StreamSettings};
use crate::error::{HostParseError, TransportError};
use crate::host::DaemonHost;
use crate::transport::DaemonTransport;

/// Time window for `/events`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventsQuery {
    /// Unix timestamp (seconds) to replay events from
    pub since: Option<i64>,
    /// Unix timestamp (seconds) to stop at
    pub until: Option<i64>,
}

impl EventsQuery {
    fn to_path(&self) -> String {
        let params: Vec<String> = [("since", self.since), ("until", self.until)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| format!("{key}={v}")))
            .collect();
        if params.is_empty() {
            "/events".to_string()
        } else {
            format!("/events?{}", params.join("&"))
        }
    }
}

/// Client for a Docker-compatible daemon
///
/// Every request goes through [`EventCompat`], so event streams from Podman
/// arrive in Docker's vocabulary.
#[derive(Clone, Debug)]
pub struct DockerClient {
    service: EventCompat<DaemonTransport>,
}

impl DockerClient {
    pub fn new(host: DaemonHost, settings: StreamSettings) -> Self {
        let service = EventCompatLayer::new(settings).layer(DaemonTransport::new(host));
        Self { service }
    }

    /// Build a client for the daemon named by `DOCKER_HOST`
    pub fn from_env(settings: StreamSettings) -> Result<Self, HostParseError> {
        Ok(Self::new(DaemonHost::from_env()?, settings))
    }

    pub fn host(&self) -> &DaemonHost {
        self.service.get_ref().host()
    }

    /// Issue a `GET` for the given path and query
    pub async fn get(
        &self,
        path_and_query: &str,
    ) -> Result<Response<CompatBody<Incoming>>, TransportError> {
        let request = Request::get(path_and_query).body(Empty::<Bytes>::new())?;
        self.service.clone().oneshot(request).await
    }

    /// Follow the daemon's event stream
    ///
    /// Fails with [`TransportError::Status`] when the daemon rejects the
    /// request; the returned body is the rewritten, newline-delimited stream.
    pub async fn events(
        &self,
        query: &EventsQuery,
    ) -> Result<Response<CompatBody<Incoming>>, TransportError> {
        let response = self.get(&query.to_path()).await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }
        Ok(response)
    }
}
