//! Per-call view of a received request.
//!
//! An [`InboundRequest`] is assembled by the inbound adapter through
//! [`InboundRequestBuilder`] and is read-only afterwards.
use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, header};

use crate::core::method::MethodKind;

/// Logical name used when the inbound call carries no base URI.
pub const DEFAULT_LOGICAL_NAME: &str = "default";

/// Query parameters: keys in first-seen order, each with its values in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> Self {
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Append one value under `key`, keeping earlier values for the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.append(k, v);
        }
        params
    }
}

/// A received call, owned by the caller for the duration of one forward.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: MethodKind,
    path: String,
    path_params: HashMap<String, String>,
    query: QueryParams,
    headers: HeaderMap,
    body: Option<Bytes>,
    base_uri: Option<String>,
}

impl InboundRequest {
    pub fn builder(method: MethodKind) -> InboundRequestBuilder {
        InboundRequestBuilder::new(method)
    }

    pub fn method(&self) -> MethodKind {
        self.method
    }

    /// Raw, unresolved path as received (may be empty).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    /// Key of the isolation unit this call runs under.
    pub fn logical_name(&self) -> &str {
        self.base_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(DEFAULT_LOGICAL_NAME)
    }

    /// First concrete media type listed in `Accept`, parameters stripped.
    ///
    /// This is what the caller asked to receive. The request's own
    /// `Content-Type` is never used as the reply media type.
    /// Wildcards (`*/*`, `text/*`) are not concrete and yield `None`.
    pub fn accepted_media_type(&self) -> Option<HeaderValue> {
        let accept = self.headers.get(header::ACCEPT)?.to_str().ok()?;
        let first = accept.split(',').next()?;
        let media_type = first.split(';').next()?.trim();
        if media_type.is_empty() || media_type.contains('*') {
            return None;
        }
        HeaderValue::from_str(media_type).ok()
    }
}

/// Builder for [`InboundRequest`].
#[derive(Debug)]
pub struct InboundRequestBuilder {
    request: InboundRequest,
}

impl InboundRequestBuilder {
    fn new(method: MethodKind) -> Self {
        Self {
            request: InboundRequest {
                method,
                path: String::new(),
                path_params: HashMap::new(),
                query: QueryParams::new(),
                headers: HeaderMap::new(),
                body: None,
                base_uri: None,
            },
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.path_params.insert(key.into(), value.into());
        self
    }

    pub fn path_params(mut self, params: HashMap<String, String>) -> Self {
        self.request.path_params = params;
        self
    }

    pub fn query(mut self, query: QueryParams) -> Self {
        self.request.query = query;
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers = headers;
        self
    }

    pub fn body(mut self, body: Option<Bytes>) -> Self {
        self.request.body = body;
        self
    }

    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.request.base_uri = Some(base_uri.into());
        self
    }

    pub fn build(self) -> InboundRequest {
        self.request
    }
}
