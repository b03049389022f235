//! Relay chain: ordered CORS relays with a rotating cursor.
//!
//! Each relay embeds the upstream URL differently, so the encoding is part of
//! the relay's identity rather than a single global format.

use std::str::FromStr;

use parcel_common::error::AppError;

/// Default chain: the Cloudflare worker relay first, then allorigins.
pub const DEFAULT_RELAYS: &[&str] = &[
    "encoded:https://soft-dream-598e.taikhoanemail109.workers.dev?url=",
    "encoded:https://api.allorigins.win/raw?url=",
];

/// How a relay expects the upstream URL to be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlEncoding {
    /// `template + upstream`, upstream left as-is.
    Prefix,
    /// `template + percent_encode(upstream)`, for templates ending in `?url=`.
    Encoded,
    /// Upstream appended as a properly encoded query parameter.
    QueryParam { name: String },
}

/// One relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub template: String,
    pub encoding: UrlEncoding,
}

impl Relay {
    pub fn new(template: impl Into<String>, encoding: UrlEncoding) -> Self {
        Self {
            template: template.into(),
            encoding,
        }
    }

    /// Host of the template, for logs.
    pub fn name(&self) -> String {
        url::Url::parse(&self.template)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.template.clone())
    }

    /// Wrap `upstream_url` so that a GET on the result reaches it through this relay.
    pub fn build_url(&self, upstream_url: &str) -> Result<String, AppError> {
        match &self.encoding {
            UrlEncoding::Prefix => Ok(format!("{}{}", self.template, upstream_url)),
            UrlEncoding::Encoded => Ok(format!(
                "{}{}",
                self.template,
                url::form_urlencoded::byte_serialize(upstream_url.as_bytes()).collect::<String>()
            )),
            UrlEncoding::QueryParam { name } => {
                let mut relay_url = url::Url::parse(&self.template).map_err(|e| {
                    AppError::Config(format!("invalid relay template '{}': {}", self.template, e))
                })?;
                relay_url.query_pairs_mut().append_pair(name, upstream_url);
                Ok(relay_url.to_string())
            }
        }
    }
}

impl FromStr for Relay {
    type Err = AppError;

    /// Parse a `<kind>:<template>` entry. Kinds: `prefix`, `encoded`,
    /// `query` (parameter `url`) or `query=<param>`.
    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let (kind, template) = entry
            .split_once(':')
            .ok_or_else(|| AppError::Config(format!("relay entry '{}' has no kind", entry)))?;
        let template = template.trim();
        if template.is_empty() {
            return Err(AppError::Config(format!("relay entry '{}' has no template", entry)));
        }

        let encoding = match kind.trim() {
            "prefix" => UrlEncoding::Prefix,
            "encoded" => UrlEncoding::Encoded,
            "query" => UrlEncoding::QueryParam {
                name: "url".to_string(),
            },
            other => match other.strip_prefix("query=") {
                Some(name) if !name.is_empty() => UrlEncoding::QueryParam {
                    name: name.to_string(),
                },
                _ => {
                    return Err(AppError::Config(format!(
                        "unknown relay kind '{}' (expected prefix, encoded or query)",
                        other
                    )));
                }
            },
        };

        let relay = Relay::new(template, encoding);
        if matches!(relay.encoding, UrlEncoding::QueryParam { .. }) {
            // Validate the template once, up front.
            relay.build_url("")?;
        }
        Ok(relay)
    }
}

/// Ordered relays plus the process-wide cursor.
#[derive(Debug, Clone)]
pub struct RelayChain {
    relays: Vec<Relay>,
    index: usize,
}

impl RelayChain {
    /// Build a chain starting at index 0. An empty chain is a configuration error.
    pub fn new(relays: Vec<Relay>) -> Result<Self, AppError> {
        if relays.is_empty() {
            return Err(AppError::Config("relay chain must not be empty".to_string()));
        }
        Ok(Self { relays, index: 0 })
    }

    /// Parse configured entries, falling back to [`DEFAULT_RELAYS`] when none are given.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, AppError> {
        let relays = if entries.is_empty() {
            DEFAULT_RELAYS
                .iter()
                .map(|entry| entry.parse())
                .collect::<Result<Vec<Relay>, _>>()?
        } else {
            entries
                .iter()
                .map(|entry| entry.as_ref().parse())
                .collect::<Result<Vec<Relay>, _>>()?
        };
        Self::new(relays)
    }

    pub fn current_endpoint(&self) -> &Relay {
        &self.relays[self.index]
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Relay following `index` in chain order, wrapping around.
    pub fn next_after(&self, index: usize) -> &Relay {
        &self.relays[(index + 1) % self.relays.len()]
    }

    /// Advance the cursor, returning the new index.
    pub fn rotate(&mut self) -> usize {
        self.index = (self.index + 1) % self.relays.len();
        tracing::info!(
            index = self.index,
            relay = %self.relays[self.index].name(),
            "Rotated relay chain"
        );
        self.index
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSTREAM: &str = "https://spx.vn/api?spx_tn=A1&language_code=vi";

    #[test]
    fn test_prefix_encoding() {
        let relay = Relay::new("https://corsproxy.io/?", UrlEncoding::Prefix);
        assert_eq!(
            relay.build_url(UPSTREAM).unwrap(),
            format!("https://corsproxy.io/?{}", UPSTREAM)
        );
    }

    #[test]
    fn test_encoded_encoding() {
        let relay = Relay::new("https://api.allorigins.win/raw?url=", UrlEncoding::Encoded);
        let built = relay.build_url(UPSTREAM).unwrap();
        assert!(built.starts_with("https://api.allorigins.win/raw?url=https%3A%2F%2Fspx.vn"));
        assert!(built.contains("%26language_code%3Dvi"));
    }

    #[test]
    fn test_query_param_encoding() {
        let relay = Relay::new(
            "https://proxy.example.com/proxy?key=abc",
            UrlEncoding::QueryParam {
                name: "target".into(),
            },
        );
        let built = relay.build_url(UPSTREAM).unwrap();
        let parsed = url::Url::parse(&built).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("key".to_string(), "abc".to_string()));
        assert_eq!(pairs[1], ("target".to_string(), UPSTREAM.to_string()));
    }

    #[test]
    fn test_parse_entries() {
        let relay: Relay = "encoded:https://a.example/raw?url=".parse().unwrap();
        assert_eq!(relay.encoding, UrlEncoding::Encoded);
        assert_eq!(relay.template, "https://a.example/raw?url=");

        let relay: Relay = "query=u:https://b.example/proxy".parse().unwrap();
        assert_eq!(relay.encoding, UrlEncoding::QueryParam { name: "u".into() });

        assert!("bogus:https://c.example".parse::<Relay>().is_err());
        assert!("https://no-kind.example".parse::<Relay>().is_err());
        assert!("prefix:".parse::<Relay>().is_err());
        assert!("query:not a url".parse::<Relay>().is_err());
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(matches!(RelayChain::new(vec![]), Err(AppError::Config(_))));
    }

    #[test]
    fn test_default_chain() {
        let chain = RelayChain::from_entries::<&str>(&[]).unwrap();
        assert_eq!(chain.len(), DEFAULT_RELAYS.len());
        assert_eq!(chain.current_index(), 0);
    }

    #[test]
    fn test_rotate_wraps() {
        let mut chain = RelayChain::new(vec![
            Relay::new("https://a.example/?", UrlEncoding::Prefix),
            Relay::new("https://b.example/?", UrlEncoding::Prefix),
            Relay::new("https://c.example/?", UrlEncoding::Prefix),
        ])
        .unwrap();

        assert_eq!(chain.rotate(), 1);
        assert_eq!(chain.current_endpoint().name(), "b.example");
        assert_eq!(chain.rotate(), 2);
        assert_eq!(chain.rotate(), 0);
        assert_eq!(chain.current_endpoint().name(), "a.example");
    }

    #[test]
    fn test_next_after_wraps() {
        let chain = RelayChain::new(vec![
            Relay::new("https://a.example/?", UrlEncoding::Prefix),
            Relay::new("https://b.example/?", UrlEncoding::Prefix),
        ])
        .unwrap();
        assert_eq!(chain.next_after(0).name(), "b.example");
        assert_eq!(chain.next_after(1).name(), "a.example");
    }
}
