//! Effective upstream path computation.
use std::collections::HashMap;

/// Computes the upstream path from the raw inbound path and its path parameters.
///
/// Never fails: degenerate input resolves to `/`.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    template: Option<String>,
}

impl PathResolver {
    pub fn new(template: Option<String>) -> Self {
        Self { template }
    }

    pub fn resolve(&self, path: &str, path_params: &HashMap<String, String>) -> String {
        let candidate = if path.is_empty() && !path_params.is_empty() {
            substitute(self.template.as_deref().unwrap_or(path), path_params)
        } else {
            path.to_string()
        };

        let resolved = if candidate.is_empty() {
            path.to_string()
        } else {
            candidate
        };

        if resolved.starts_with('/') {
            resolved
        } else {
            format!("/{resolved}")
        }
    }
}

/// Replace `{name}` and `${name}` placeholders with values from `params`.
/// Unknown names and unterminated braces are kept verbatim.
pub fn substitute(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let close = open + close;
        let name = &rest[open + 1..close];

        match params.get(name) {
            Some(value) => {
                let prefix = &rest[..open];
                out.push_str(prefix.strip_suffix('$').unwrap_or(prefix));
                out.push_str(value);
            }
            None => out.push_str(&rest[..=close]),
        }
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}
