//! Plain HTTP/1.1 transport to a daemon socket
//!
//! Each request opens its own connection. The connection task lives as long
//! as the response body, so long-running streams such as `/events` keep it
//! open until the body is dropped.

use futures::future::BoxFuture;
use http::header::{HOST, HeaderValue};
use http::{Request, Response, Uri};
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::path::Path;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;
use tracing::debug;

use crate::error::{BoxError, TransportError};
use crate::host::DaemonHost;

/// Lowest layer of the client stack: one connection per request
#[derive(Clone, Debug)]
pub struct DaemonTransport {
    host: DaemonHost,
}

impl DaemonTransport {
    pub fn new(host: DaemonHost) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &DaemonHost {
        &self.host
    }
}

impl<B> Service<Request<B>> for DaemonTransport
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Incoming>;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let host = self.host.clone();
        Box::pin(async move { send(&host, req).await })
    }
}

async fn send<B>(host: &DaemonHost, mut req: Request<B>) -> Result<Response<Incoming>, TransportError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    prepare_request(host, &mut req)?;
    debug!(%host, method = %req.method(), uri = %req.uri(), "sending daemon request");

    match host {
        DaemonHost::Unix(path) => send_unix(host, path, req).await,
        DaemonHost::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())
                .await
                .map_err(|source| TransportError::Connect {
                    host: host.to_string(),
                    source,
                })?;
            if let Err(err) = stream.set_nodelay(true) {
                debug!(error = %err, "failed to set TCP_NODELAY on daemon connection");
            }
            send_over(TokioIo::new(stream), req).await
        }
    }
}

#[cfg(unix)]
async fn send_unix<B>(
    host: &DaemonHost,
    path: &Path,
    req: Request<B>,
) -> Result<Response<Incoming>, TransportError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|source| TransportError::Connect {
            host: host.to_string(),
            source,
        })?;
    send_over(TokioIo::new(stream), req).await
}

#[cfg(not(unix))]
async fn send_unix<B>(
    _host: &DaemonHost,
    _path: &Path,
    _req: Request<B>,
) -> Result<Response<Incoming>, TransportError> {
    Err(TransportError::UnsupportedPlatform)
}

async fn send_over<T, B>(io: T, req: Request<B>) -> Result<Response<Incoming>, TransportError>
where
    T: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(error = %err, "daemon connection closed with error");
        }
    });

    Ok(sender.send_request(req).await?)
}

/// Rewrite the URI to origin form and make sure a `Host` header is present
fn prepare_request<B>(host: &DaemonHost, req: &mut Request<B>) -> Result<(), TransportError> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let origin: Uri = path.parse()?;
    *req.uri_mut() = origin;

    if !req.headers().contains_key(HOST) {
        let value = HeaderValue::from_str(host.authority())?;
        req.headers_mut().insert(HOST, value);
    }
    Ok(())
}
