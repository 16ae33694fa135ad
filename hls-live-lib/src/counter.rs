//! Byte-counting response bodies
//!
//! Every response served by a muxer session is wrapped so that the total
//! number of bytes handed to the HTTP stack can be reported in metrics.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http_body::{Frame, SizeHint};

/// Response body wrapper that adds the length of every data frame it yields
/// to a shared counter.
#[derive(Debug)]
pub struct ByteCounter<B> {
    inner: B,
    bytes_sent: Arc<AtomicU64>,
}

impl<B> ByteCounter<B> {
    pub fn new(inner: B, bytes_sent: Arc<AtomicU64>) -> Self {
        Self { inner, bytes_sent }
    }
}

impl<B> http_body::Body for ByteCounter<B>
where
    B: http_body::Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        if let Some(Ok(frame)) = &frame {
            if let Some(data) = frame.data_ref() {
                this.bytes_sent
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wrap the body of `response` in a [`ByteCounter`].
pub fn count_response(response: Response, bytes_sent: Arc<AtomicU64>) -> Response {
    response.map(|body| Body::new(ByteCounter::new(body, bytes_sent)))
}
