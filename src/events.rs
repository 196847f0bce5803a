//! `dockscope events`: follow the daemon's event stream

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use std::io::Write;

use dockscope_docker::BoxError;

/// Copy every data frame of an event stream to `out` as it arrives
///
/// Returns the number of complete lines written.
pub async fn copy_events<B, W>(mut body: B, out: &mut W) -> Result<u64>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
    W: Write,
{
    let mut lines = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|err| {
            let err: BoxError = err.into();
            anyhow!(err).context("Event stream failed")
        })?;
        if let Ok(data) = frame.into_data() {
            lines += data.iter().filter(|&&b| b == b'\n').count() as u64;
            out.write_all(&data)?;
            out.flush()?;
        }
    }
    Ok(lines)
}
