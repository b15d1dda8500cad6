//! Upstream URL composition.
use url::Url;

use crate::{
    config::{EffectiveProxyConfig, UpstreamScheme},
    core::{error::ResolutionError, inbound::QueryParams, method::MethodKind},
};

const HTTPS_PORT: u16 = 443;

/// Absolute upstream URL paired with the method it will be called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub method: MethodKind,
    pub url: Url,
}

/// Builds absolute upstream URLs from the effective configuration.
#[derive(Debug, Clone)]
pub struct TargetUrlBuilder {
    scheme: UpstreamScheme,
    host: String,
    port: u16,
}

impl TargetUrlBuilder {
    pub fn new(config: &EffectiveProxyConfig) -> Self {
        Self {
            scheme: config.scheme,
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Port actually dialled: https is always 443, http uses the configured port.
    pub fn effective_port(&self) -> u16 {
        match self.scheme {
            UpstreamScheme::Https => HTTPS_PORT,
            UpstreamScheme::Http => self.port,
        }
    }

    /// Compose `scheme://host:port{path}?{query}`. `path` is attached pre-encoded.
    pub fn build(&self, path: &str, query: &QueryParams) -> Result<Url, ResolutionError> {
        if self.host.is_empty() {
            return Err(ResolutionError::EmptyHost);
        }
        if !path.starts_with('/') || path.chars().any(char::is_control) {
            return Err(ResolutionError::MalformedPath(path.to_string()));
        }

        let base = format!("{}://{}", self.scheme, self.host);
        let mut url = Url::parse(&base).map_err(|e| ResolutionError::InvalidUrl {
            url: base.clone(),
            reason: e.to_string(),
        })?;

        url.set_port(Some(self.effective_port()))
            .map_err(|()| ResolutionError::InvalidUrl {
                url: base,
                reason: "URL cannot carry a port".to_string(),
            })?;
        url.set_path(path);

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, values) in query.iter() {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }

        Ok(url)
    }

    pub fn resolve(
        &self,
        method: MethodKind,
        path: &str,
        query: &QueryParams,
    ) -> Result<ResolvedTarget, ResolutionError> {
        Ok(ResolvedTarget {
            method,
            url: self.build(path, query)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn builder(scheme: &str, port: u16) -> TargetUrlBuilder {
        let mut config = ProxyConfig::new("backend.local");
        config.scheme = scheme.to_string();
        config.port = port;
        TargetUrlBuilder::new(&config.resolve().unwrap())
    }

    #[test]
    fn test_https_forces_port_443() {
        for scheme in ["https", "HTTPS", "HtTpS"] {
            let url = builder(scheme, 8080).build("/v1", &QueryParams::new()).unwrap();
            assert_eq!(url.scheme(), "https");
            assert_eq!(url.port_or_known_default(), Some(443));
            assert_eq!(url.as_str(), "https://backend.local/v1");
        }
    }

    #[test]
    fn test_http_uses_configured_port() {
        let url = builder("http", 9090).build("/v1", &QueryParams::new()).unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(9090));
        assert_eq!(url.as_str(), "http://backend.local:9090/v1");
    }

    #[test]
    fn test_repeated_query_values_are_kept_in_order() {
        let query: QueryParams = [("a", "1"), ("a", "2"), ("b", "x y")].into_iter().collect();
        let url = builder("http", 80).build("/search", &query).unwrap();
        assert_eq!(url.query(), Some("a=1&a=2&b=x+y"));

        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0], ("a".into(), "1".into()));
        assert_eq!(pairs[1], ("a".into(), "2".into()));
    }

    #[test]
    fn test_pre_encoded_path_is_not_reencoded() {
        let url = builder("http", 80)
            .build("/files/a%20b/%2Fslash", &QueryParams::new())
            .unwrap();
        assert_eq!(url.path(), "/files/a%20b/%2Fslash");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_malformed_path_is_rejected() {
        let b = builder("http", 80);
        assert!(matches!(
            b.build("relative", &QueryParams::new()),
            Err(ResolutionError::MalformedPath(_))
        ));
        assert!(matches!(
            b.build("/bad\npath", &QueryParams::new()),
            Err(ResolutionError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_resolve_pairs_method_and_url() {
        let target = builder("http", 8081)
            .resolve(MethodKind::Patch, "/x", &QueryParams::new())
            .unwrap();
        assert_eq!(target.method, MethodKind::Patch);
        assert_eq!(target.url.as_str(), "http://backend.local:8081/x");
    }
}
