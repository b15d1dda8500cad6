//! Upstream outcome to caller-facing response.
use std::time::Duration;

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header};
use http_body_util::BodyExt;

use crate::ports::upstream::{TransportError, TransportResult};

/// What the upstream answered, body already materialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundOutcome {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Option<Bytes>,
}

/// The response handed back to the inbound caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub media_type: Option<HeaderValue>,
    pub body: Option<Bytes>,
}

pub struct ResponseTranslator;

impl ResponseTranslator {
    /// Status is kept verbatim; the media type reported is the one the caller accepts.
    pub fn translate(outcome: OutboundOutcome, accepted: Option<HeaderValue>) -> ProxyResponse {
        ProxyResponse {
            status: outcome.status,
            media_type: accepted,
            body: outcome.body,
        }
    }
}

/// Read an upstream body to the end within `limit`.
///
/// The body is taken by value and dropped before this returns, on success,
/// read error and timeout alike. A body that is already at end of stream
/// yields `None`.
pub async fn read_body<B>(body: B, limit: Duration) -> TransportResult<Option<Bytes>>
where
    B: hyper::body::Body + Send,
    B::Error: std::fmt::Display,
{
    if body.is_end_stream() {
        return Ok(None);
    }

    let collected = tokio::time::timeout(limit, body.collect())
        .await
        .map_err(|_| TransportError::Timeout {
            phase: "response body",
            after: limit,
        })?
        .map_err(|e| TransportError::Io(e.to_string()))?;

    Ok(Some(collected.to_bytes()))
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.body.map(Body::from).unwrap_or_else(Body::empty));
        *response.status_mut() = self.status;
        if let Some(media_type) = self.media_type {
            response.headers_mut().insert(header::CONTENT_TYPE, media_type);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        task::{Context, Poll},
    };

    use http_body_util::{Empty, Full};
    use hyper::body::Frame;

    use super::*;

    /// Test body that yields one chunk, then either ends, fails or stalls.
    struct CountingBody {
        drops: Arc<AtomicUsize>,
        chunk: Option<Bytes>,
        then: Tail,
    }

    #[derive(Clone, Copy)]
    enum Tail {
        End,
        Fail,
        Stall,
    }

    impl CountingBody {
        fn new(drops: &Arc<AtomicUsize>, then: Tail) -> Self {
            Self {
                drops: Arc::clone(drops),
                chunk: Some(Bytes::from_static(b"partial")),
                then,
            }
        }
    }

    impl hyper::body::Body for CountingBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            if let Some(chunk) = self.chunk.take() {
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }
            match self.then {
                Tail::End => Poll::Ready(None),
                Tail::Fail => Poll::Ready(Some(Err(std::io::Error::other("reset by peer")))),
                Tail::Stall => Poll::Pending,
            }
        }
    }

    impl Drop for CountingBody {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_translate_uses_accepted_media_type() {
        let outcome = OutboundOutcome {
            status: StatusCode::CREATED,
            content_type: Some(HeaderValue::from_static("text/plain")),
            body: Some(Bytes::from_static(b"ok")),
        };
        let response = ResponseTranslator::translate(
            outcome,
            Some(HeaderValue::from_static("application/json")),
        );
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(
            response.media_type,
            Some(HeaderValue::from_static("application/json"))
        );
        assert_eq!(response.body, Some(Bytes::from_static(b"ok")));
    }

    #[test]
    fn test_absent_upstream_body_stays_absent() {
        let outcome = OutboundOutcome {
            status: StatusCode::NO_CONTENT,
            content_type: None,
            body: None,
        };
        let response = ResponseTranslator::translate(outcome, None);
        assert_eq!(response.body, None);
        assert_eq!(response.media_type, None);

        let http = response.into_response();
        assert_eq!(http.status(), StatusCode::NO_CONTENT);
        assert!(http.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_read_body_materialises_payload() {
        let body = Full::new(Bytes::from_static(b"hello"));
        let bytes = read_body(body, Duration::from_secs(1)).await.unwrap();
        assert_eq!(bytes, Some(Bytes::from_static(b"hello")));

        let empty = read_body(Empty::<Bytes>::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(empty, None);
    }

    #[tokio::test]
    async fn test_body_released_once_on_success() {
        let drops = Arc::new(AtomicUsize::new(0));
        let result = read_body(CountingBody::new(&drops, Tail::End), Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Some(Bytes::from_static(b"partial")));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_released_once_on_read_error() {
        let drops = Arc::new(AtomicUsize::new(0));
        let result =
            read_body(CountingBody::new(&drops, Tail::Fail), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_released_once_on_timeout() {
        let drops = Arc::new(AtomicUsize::new(0));
        let result =
            read_body(CountingBody::new(&drops, Tail::Stall), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
