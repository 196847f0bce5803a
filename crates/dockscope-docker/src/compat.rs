//! Event stream compatibility middleware
//!
//! [`EventCompat`] wraps any transport `Service` and rewrites the body of
//! `GET .../events` responses line by line with [`rewrite_health_action`].
//! Every other response passes through untouched.
//!
//! ```text
//!  caller ── Request ──▶ EventCompat ──▶ transport ──▶ daemon
//!    ▲                       │
//!    │      CompatBody       │ spawn
//!    └──── (mpsc::Receiver) ◀┴── producer: upstream lines ─▶ rewrite ─▶ send
//! ```
//!
//! The producer and the reader are connected by a bounded channel. A slow
//! reader stalls the producer; dropping the body stops the producer and
//! releases the upstream connection.

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt, TryStreamExt};
use http::{Method, Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::io::StreamReader;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::{BoxError, EventStreamError};
use crate::event::rewrite_health_action;

/// Default number of lines buffered between producer and reader
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Default upper bound for a single event line
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Tuning for rewritten event streams
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    /// Lines buffered before the producer waits for the reader
    pub channel_capacity: usize,

    /// End the stream when upstream sends no complete line for this long
    pub idle_timeout: Option<Duration>,

    /// Longest accepted line in bytes
    pub max_line_length: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            idle_timeout: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Whether a request targets the daemon's event stream
pub fn is_event_stream(method: &Method, path: &str) -> bool {
    method == Method::GET && path.ends_with("/events")
}

/// Layer producing [`EventCompat`] services
#[derive(Clone, Debug, Default)]
pub struct EventCompatLayer {
    settings: Arc<StreamSettings>,
}

impl EventCompatLayer {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl<S> Layer<S> for EventCompatLayer {
    type Service = EventCompat<S>;

    fn layer(&self, inner: S) -> Self::Service {
        EventCompat {
            inner,
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Transport wrapper translating Podman health events on the fly
#[derive(Clone, Debug)]
pub struct EventCompat<S> {
    inner: S,
    settings: Arc<StreamSettings>,
}

impl<S> EventCompat<S> {
    pub fn new(inner: S, settings: StreamSettings) -> Self {
        EventCompatLayer::new(settings).layer(inner)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for EventCompat<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: 'static,
    ResBody: Body<Data = Bytes> + Send + Unpin + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<CompatBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let rewrite = is_event_stream(req.method(), req.uri().path());
        let settings = Arc::clone(&self.settings);
        let response = self.inner.call(req);

        Box::pin(async move {
            let response = response.await?;
            if !rewrite {
                return Ok(response.map(CompatBody::passthrough));
            }
            debug!(status = %response.status(), "rewriting event stream");
            Ok(response.map(|body| CompatBody::rewrite_events(body, &settings)))
        })
    }
}

enum Kind<B> {
    Passthrough(B),
    Rewritten(mpsc::Receiver<Result<Bytes, EventStreamError>>),
}

/// Response body returned by [`EventCompat`]
pub struct CompatBody<B> {
    kind: Kind<B>,
}

impl<B> CompatBody<B> {
    fn passthrough(body: B) -> Self {
        Self {
            kind: Kind::Passthrough(body),
        }
    }

    /// Whether this body is produced by the rewrite task
    pub fn is_rewritten(&self) -> bool {
        matches!(self.kind, Kind::Rewritten(_))
    }
}

impl<B> CompatBody<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    fn rewrite_events(body: B, settings: &StreamSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
        tokio::spawn(pump_events(body, tx, settings.clone()));
        Self {
            kind: Kind::Rewritten(rx),
        }
    }
}

impl<B> Body for CompatBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Passthrough(body) => Pin::new(body).poll_frame(cx).map_err(Into::into),
            Kind::Rewritten(rx) => rx
                .poll_recv(cx)
                .map(|line| line.map(|res| res.map(Frame::data).map_err(Into::into))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Passthrough(body) => body.is_end_stream(),
            Kind::Rewritten(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Passthrough(body) => body.size_hint(),
            Kind::Rewritten(_) => SizeHint::default(),
        }
    }
}

impl<B> std::fmt::Debug for CompatBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompatBody")
            .field("rewritten", &self.is_rewritten())
            .finish()
    }
}

/// Read upstream line by line, rewrite, and hand lines to the reader
async fn pump_events<B>(
    body: B,
    tx: mpsc::Sender<Result<Bytes, EventStreamError>>,
    settings: StreamSettings,
) where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    let reader = StreamReader::new(body.into_data_stream().map_err(upstream_io_error));
    let codec = AnyDelimiterCodec::new_with_max_length(
        b"\n".to_vec(),
        Vec::new(),
        settings.max_line_length,
    );
    let mut lines = FramedRead::new(reader, codec);

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("event stream reader went away");
                break;
            }
            next = next_line(&mut lines, &settings) => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "event stream ended with error");
                let _ = tx.send(Err(err)).await;
                break;
            }
        };

        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
        let rewritten = rewrite_health_action(line);
        let mut frame = BytesMut::with_capacity(rewritten.len() + 1);
        frame.extend_from_slice(&rewritten);
        frame.extend_from_slice(b"\n");

        if tx.send(Ok(frame.freeze())).await.is_err() {
            debug!("event stream reader went away");
            break;
        }
    }
}

async fn next_line<S>(
    lines: &mut S,
    settings: &StreamSettings,
) -> Result<Option<Bytes>, EventStreamError>
where
    S: Stream<Item = Result<Bytes, AnyDelimiterCodecError>> + Unpin,
{
    let next = match settings.idle_timeout {
        Some(limit) => tokio::time::timeout(limit, lines.next())
            .await
            .map_err(|_| EventStreamError::Idle(limit))?,
        None => lines.next().await,
    };

    next.transpose().map_err(|err| match err {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            EventStreamError::LineTooLong(settings.max_line_length)
        }
        AnyDelimiterCodecError::Io(err) => EventStreamError::Upstream(err),
    })
}

fn upstream_io_error<E: Into<BoxError>>(err: E) -> io::Error {
    let err: BoxError = err.into();
    io::Error::other(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use http_body_util::{Empty, Full, StreamBody};
    use std::convert::Infallible;
    use tower::ServiceExt;

    fn get(path: &str) -> Request<Empty<Bytes>> {
        Request::get(path).body(Empty::new()).unwrap()
    }

    #[derive(Clone)]
    struct FixedUpstream(&'static str);

    impl Service<Request<Empty<Bytes>>> for FixedUpstream {
        type Response = Response<Full<Bytes>>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Empty<Bytes>>) -> Self::Future {
            let resp = Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from_static(self.0.as_bytes())))
                .unwrap();
            std::future::ready(Ok(resp))
        }
    }

    async fn read_all<B>(body: B) -> String
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Debug,
    {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_events_are_rewritten() {
        let svc = EventCompat::new(
            FixedUpstream("{\"Action\": \"health_status\", \"HealthStatus\": \"starting\"}\n"),
            StreamSettings::default(),
        );

        let resp = svc.oneshot(get("/events")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.body().is_rewritten());
        assert_eq!(
            read_all(resp.into_body()).await,
            "{\"Action\": \"health_status: running\", \"HealthStatus\": \"starting\"}\n"
        );
    }

    #[tokio::test]
    async fn test_versioned_events_path() {
        let svc = EventCompat::new(
            FixedUpstream("{\"Action\":\"health_status\",\"HealthStatus\":\"healthy\"}"),
            StreamSettings::default(),
        );

        let resp = svc.oneshot(get("/v1.41/events?since=0")).await.unwrap();
        assert_eq!(
            read_all(resp.into_body()).await,
            "{\"Action\":\"health_status: healthy\",\"HealthStatus\":\"healthy\"}\n"
        );
    }

    #[tokio::test]
    async fn test_other_endpoints_pass_through() {
        let svc = EventCompat::new(FixedUpstream("{\"key\": \"value\"}"), StreamSettings::default());

        let resp = svc.clone().oneshot(get("/something")).await.unwrap();
        assert!(!resp.body().is_rewritten());
        assert_eq!(resp.headers()["content-type"], "application/json");
        assert_eq!(resp.body().size_hint().exact(), Some(16));
        assert_eq!(read_all(resp.into_body()).await, "{\"key\": \"value\"}");

        let post = Request::post("/events").body(Empty::new()).unwrap();
        let resp = svc.oneshot(post).await.unwrap();
        assert!(!resp.body().is_rewritten());
        assert_eq!(read_all(resp.into_body()).await, "{\"key\": \"value\"}");
    }

    #[tokio::test]
    async fn test_transport_error_is_returned_unchanged() {
        let upstream = tower::service_fn(|_req: Request<Empty<Bytes>>| async {
            Err::<Response<Full<Bytes>>, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        });
        let svc = EventCompat::new(upstream, StreamSettings::default());

        let err = svc.oneshot(get("/events")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_stream() {
        let svc = EventCompat::new(
            FixedUpstream(concat!(
                "{bad json\n",
                "{\"Action\":\"health_status\",\"HealthStatus\":\"starting\"}\n",
            )),
            StreamSettings::default(),
        );

        let resp = svc.oneshot(get("/events")).await.unwrap();
        assert_eq!(
            read_all(resp.into_body()).await,
            concat!(
                "{bad json\n",
                "{\"Action\":\"health_status: running\",\"HealthStatus\":\"starting\"}\n",
            )
        );
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let chunks = vec![
            Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"{\"Action\":\"health_st"))),
            Ok(Frame::data(Bytes::from_static(
                b"atus\",\"HealthStatus\":\"unhealthy\"}\n{\"Action\":\"create\"}\r\n\n",
            ))),
            Ok(Frame::data(Bytes::from_static(b"{\"Action\": \""))),
        ];
        let mut body = Some(StreamBody::new(futures::stream::iter(chunks)));
        let upstream = tower::service_fn(move |_req: Request<Empty<Bytes>>| {
            let body = body.take().unwrap();
            async move { Ok::<_, Infallible>(Response::new(body)) }
        });

        let resp = EventCompat::new(upstream, StreamSettings::default())
            .oneshot(get("/events"))
            .await
            .unwrap();
        assert_eq!(
            read_all(resp.into_body()).await,
            concat!(
                "{\"Action\":\"health_status: unhealthy\",\"HealthStatus\":\"unhealthy\"}\n",
                "{\"Action\":\"create\"}\n",
                "\n",
                "{\"Action\": \"\n",
            )
        );
    }

    #[tokio::test]
    async fn test_dropping_body_releases_upstream() {
        let (mut upstream_tx, upstream_rx) =
            futures::channel::mpsc::channel::<Result<Frame<Bytes>, Infallible>>(4);
        let mut body = Some(StreamBody::new(upstream_rx));
        let upstream = tower::service_fn(move |_req: Request<Empty<Bytes>>| {
            let body = body.take().unwrap();
            async move { Ok::<_, Infallible>(Response::new(body)) }
        });

        upstream_tx
            .send(Ok(Frame::data(Bytes::from_static(b"{\"Action\":\"create\"}\n"))))
            .await
            .unwrap();

        let resp = EventCompat::new(upstream, StreamSettings::default())
            .oneshot(get("/events"))
            .await
            .unwrap();
        let mut body = resp.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "{\"Action\":\"create\"}\n");

        // upstream stays silent; closing our end must still stop the producer
        drop(body);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !upstream_tx.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("producer kept the upstream body alive");
    }

    #[tokio::test]
    async fn test_upstream_error_reaches_reader() {
        let chunks = vec![
            Ok(Frame::data(Bytes::from_static(b"{\"Action\":\"start\"}\n"))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut body = Some(StreamBody::new(futures::stream::iter(chunks)));
        let upstream = tower::service_fn(move |_req: Request<Empty<Bytes>>| {
            let body = body.take().unwrap();
            async move { Ok::<_, Infallible>(Response::new(body)) }
        });

        let resp = EventCompat::new(upstream, StreamSettings::default())
            .oneshot(get("/events"))
            .await
            .unwrap();
        let mut body = resp.into_body();

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "{\"Action\":\"start\"}\n");

        let err = body.frame().await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EventStreamError>(),
            Some(EventStreamError::Upstream(_))
        ));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (_upstream_tx, upstream_rx) =
            futures::channel::mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
        let mut body = Some(StreamBody::new(upstream_rx));
        let upstream = tower::service_fn(move |_req: Request<Empty<Bytes>>| {
            let body = body.take().unwrap();
            async move { Ok::<_, Infallible>(Response::new(body)) }
        });
        let settings = StreamSettings {
            idle_timeout: Some(Duration::from_millis(50)),
            ..StreamSettings::default()
        };

        let resp = EventCompat::new(upstream, settings)
            .oneshot(get("/events"))
            .await
            .unwrap();
        let mut body = resp.into_body();

        let err = body.frame().await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EventStreamError>(),
            Some(EventStreamError::Idle(_))
        ));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let settings = StreamSettings {
            max_line_length: 8,
            ..StreamSettings::default()
        };
        let resp = EventCompat::new(FixedUpstream("short\nthis line is too long\n"), settings)
            .oneshot(get("/events"))
            .await
            .unwrap();
        let mut body = resp.into_body();

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "short\n");
        let err = body.frame().await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EventStreamError>(),
            Some(EventStreamError::LineTooLong(8))
        ));
    }

    #[test]
    fn test_is_event_stream() {
        assert!(is_event_stream(&Method::GET, "/events"));
        assert!(is_event_stream(&Method::GET, "/v1.41/events"));
        assert!(!is_event_stream(&Method::POST, "/events"));
        assert!(!is_event_stream(&Method::GET, "/events/stream"));
        assert!(!is_event_stream(&Method::GET, "/containers/json"));
    }
}
