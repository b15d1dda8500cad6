use std::{fmt, str::FromStr};

use http::Method;
use thiserror::Error;

/// Raised when an inbound method has no forwarding counterpart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported method: {0}")]
pub struct UnsupportedMethod(pub String);

/// How a method treats the inbound body when it is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// No entity is sent upstream.
    Omit,
    /// The body is sent with the resolved content type.
    Attach,
    /// A body may arrive inbound but is dropped; the method goes out without an entity.
    Ignore,
}

impl BodyPolicy {
    /// True when the inbound adapter should read the request body at all.
    pub fn accepts_body(self) -> bool {
        !matches!(self, BodyPolicy::Omit)
    }
}

/// The closed set of methods the proxy forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Head,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl MethodKind {
    pub const ALL: [MethodKind; 7] = [
        MethodKind::Head,
        MethodKind::Get,
        MethodKind::Post,
        MethodKind::Put,
        MethodKind::Patch,
        MethodKind::Delete,
        MethodKind::Options,
    ];

    pub fn body_policy(self) -> BodyPolicy {
        match self {
            MethodKind::Head | MethodKind::Get | MethodKind::Delete => BodyPolicy::Omit,
            MethodKind::Post | MethodKind::Put | MethodKind::Patch => BodyPolicy::Attach,
            MethodKind::Options => BodyPolicy::Ignore,
        }
    }

    pub fn as_method(self) -> Method {
        match self {
            MethodKind::Head => Method::HEAD,
            MethodKind::Get => Method::GET,
            MethodKind::Post => Method::POST,
            MethodKind::Put => Method::PUT,
            MethodKind::Patch => Method::PATCH,
            MethodKind::Delete => Method::DELETE,
            MethodKind::Options => Method::OPTIONS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Head => "HEAD",
            MethodKind::Get => "GET",
            MethodKind::Post => "POST",
            MethodKind::Put => "PUT",
            MethodKind::Patch => "PATCH",
            MethodKind::Delete => "DELETE",
            MethodKind::Options => "OPTIONS",
        }
    }
}

impl TryFrom<&Method> for MethodKind {
    type Error = UnsupportedMethod;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

impl FromStr for MethodKind {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_policy_table() {
        for kind in [MethodKind::Head, MethodKind::Get, MethodKind::Delete] {
            assert_eq!(kind.body_policy(), BodyPolicy::Omit, "{kind}");
        }
        for kind in [MethodKind::Post, MethodKind::Put, MethodKind::Patch] {
            assert_eq!(kind.body_policy(), BodyPolicy::Attach, "{kind}");
        }
        assert_eq!(MethodKind::Options.body_policy(), BodyPolicy::Ignore);
        assert!(MethodKind::Options.body_policy().accepts_body());
        assert!(!MethodKind::Get.body_policy().accepts_body());
    }

    #[test]
    fn test_conversion_from_http_method() {
        for kind in MethodKind::ALL {
            assert_eq!(MethodKind::try_from(&kind.as_method()), Ok(kind));
        }
        assert_eq!(
            MethodKind::try_from(&Method::TRACE),
            Err(UnsupportedMethod("TRACE".to_string()))
        );
        assert!("get".parse::<MethodKind>().is_err());
    }
}
