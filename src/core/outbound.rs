//! Outbound request composition.
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Uri, Version, header};
use http_body_util::Full;
use url::Url;

use crate::core::{
    error::ResolutionError,
    method::{BodyPolicy, MethodKind},
};

/// Content type attached when the inbound call did not declare one.
pub const WILDCARD_MEDIA_TYPE: &str = "*/*";

/// An upstream call, fully composed and ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: MethodKind,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn method(&self) -> MethodKind {
        self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `None` means no entity, which is not the same as an empty one.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Host (and port, if any) the transport dials.
    pub fn authority(&self) -> Option<&str> {
        self.uri.authority().map(|a| a.as_str())
    }

    /// Convert into a hyper request.
    ///
    /// Framing headers copied from the inbound call are dropped so the
    /// transport derives them from the body actually sent.
    pub fn into_http(self) -> http::Request<Full<Bytes>> {
        let mut headers = self.headers;
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);

        let mut request = http::Request::new(Full::new(self.body.unwrap_or_default()));
        *request.method_mut() = self.method.as_method();
        *request.uri_mut() = self.uri;
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = headers;
        request
    }
}

/// Stateless composer for [`OutboundRequest`].
pub struct OutboundRequestBuilder;

impl OutboundRequestBuilder {
    /// Copy every inbound header verbatim and apply the method's body policy.
    pub fn build(
        method: MethodKind,
        inbound_headers: &HeaderMap,
        target: Url,
        body: Option<Bytes>,
    ) -> Result<OutboundRequest, ResolutionError> {
        let uri: Uri = target
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| ResolutionError::InvalidUrl {
                url: target.to_string(),
                reason: e.to_string(),
            })?;

        let mut headers = inbound_headers.clone();
        let body = match method.body_policy() {
            BodyPolicy::Attach => {
                let declared = headers
                    .get(header::CONTENT_TYPE)
                    .is_some_and(|value| !value.is_empty());
                if !declared {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(WILDCARD_MEDIA_TYPE),
                    );
                }
                Some(body.unwrap_or_default())
            }
            BodyPolicy::Omit | BodyPolicy::Ignore => None,
        };

        Ok(OutboundRequest {
            method,
            uri,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Url {
        Url::parse("http://backend.local:9090/items?a=1").unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_post_attaches_body_with_inbound_content_type() {
        let inbound = headers(&[("content-type", "application/json"), ("x-trace", "abc")]);
        let request = OutboundRequestBuilder::build(
            MethodKind::Post,
            &inbound,
            target(),
            Some(Bytes::from_static(b"{\"k\":1}")),
        )
        .unwrap();

        assert_eq!(request.body().map(|b| b.as_ref()), Some(&b"{\"k\":1}"[..]));
        assert_eq!(request.headers()["content-type"], "application/json");
        assert_eq!(request.headers()["x-trace"], "abc");
        assert_eq!(request.uri().to_string(), "http://backend.local:9090/items?a=1");
        assert_eq!(request.authority(), Some("backend.local:9090"));
    }

    #[test]
    fn test_put_without_content_type_uses_wildcard_and_empty_entity() {
        let request =
            OutboundRequestBuilder::build(MethodKind::Put, &HeaderMap::new(), target(), None)
                .unwrap();
        assert_eq!(request.headers()["content-type"], WILDCARD_MEDIA_TYPE);
        assert_eq!(request.body(), Some(&Bytes::new()));
    }

    #[test]
    fn test_bodyless_methods_never_carry_an_entity() {
        for method in [
            MethodKind::Get,
            MethodKind::Head,
            MethodKind::Delete,
            MethodKind::Options,
        ] {
            let request = OutboundRequestBuilder::build(
                method,
                &HeaderMap::new(),
                target(),
                Some(Bytes::from_static(b"dropped")),
            )
            .unwrap();
            assert!(request.body().is_none(), "{method}");
            assert!(!request.headers().contains_key(header::CONTENT_TYPE));
        }
    }

    #[test]
    fn test_repeated_headers_survive_and_framing_is_recomputed() {
        let inbound = headers(&[
            ("x-multi", "one"),
            ("x-multi", "two"),
            ("host", "proxy.local"),
            ("content-length", "999"),
        ]);
        let request = OutboundRequestBuilder::build(
            MethodKind::Patch,
            &inbound,
            target(),
            Some(Bytes::from_static(b"abc")),
        )
        .unwrap();
        let values: Vec<_> = request.headers().get_all("x-multi").iter().collect();
        assert_eq!(values, ["one", "two"]);

        let http_request = request.into_http();
        assert_eq!(http_request.method(), http::Method::PATCH);
        assert_eq!(http_request.headers()["host"], "proxy.local");
        assert!(!http_request.headers().contains_key(header::CONTENT_LENGTH));
    }
}
