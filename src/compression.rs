//! Gzip support for request and response bodies.
//!
//! Buffered bodies are compressed synchronously before send; streamed bodies
//! are piped through [`GzipBody`] so they are never buffered in full.

use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::errors::{TransportError, TransportResult};

/// Gzip-compress a buffered body
pub fn gzip(data: &[u8]) -> TransportResult<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| TransportError::Serialization(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map(Bytes::from)
        .map_err(|e| TransportError::Serialization(format!("gzip compression failed: {e}")))
}

/// Decompress a gzip-encoded response body
pub fn gunzip(data: &[u8]) -> TransportResult<Bytes> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map(|_| Bytes::from(out))
        .map_err(|e| TransportError::Deserialization(format!("gzip decompression failed: {e}")))
}

pin_project! {
    /// Streaming gzip transform.
    ///
    /// Wraps a chunked body stream and yields compressed chunks as they
    /// become available, emitting the gzip trailer when the inner stream
    /// ends. After an error or the trailer the stream is fused.
    pub struct GzipBody<S> {
        #[pin]
        inner: S,
        encoder: Option<GzEncoder<Vec<u8>>>,
    }
}

impl<S> GzipBody<S> {
    /// Wrap a body stream in a gzip transform
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }
}

impl<S> Stream for GzipBody<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if this.encoder.is_none() {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Err(e))) => {
                    *this.encoder = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(chunk))) => {
                    let encoder = this.encoder.as_mut().expect("encoder checked above");
                    if let Err(e) = encoder.write_all(&chunk) {
                        *this.encoder = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                    let ready = std::mem::take(encoder.get_mut());
                    if !ready.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(ready))));
                    }
                    // Encoder is still buffering; pull the next chunk
                }
                Poll::Ready(None) => {
                    let encoder = this.encoder.take().expect("encoder checked above");
                    return match encoder.finish() {
                        Ok(tail) => Poll::Ready(Some(Ok(Bytes::from(tail)))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}
