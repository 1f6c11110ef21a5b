//! Resource locators: absolute `http(s)://` URLs and root-relative paths.
//!
//! Asset lists name resources either way; requests arriving at the proxy use
//! origin-form (`/path`) or, from explicit proxy clients, absolute-form targets.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a locator or origin.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("empty locator")]
    Empty,

    #[error("unsupported scheme in {0:?}; expected http:// or https://")]
    UnsupportedScheme(String),

    #[error("locator {0:?} is neither absolute nor root-relative")]
    NotRootRelative(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

/// URL scheme of an absolute locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// The scheme, host and port triple that identifies a web origin.
///
/// # Examples
///
/// ```
/// use offcache::http::Origin;
///
/// let origin: Origin = "http://cdn.example.com".parse().unwrap();
/// assert_eq!(origin.port(), 80);
/// assert_eq!(origin.to_string(), "http://cdn.example.com");
///
/// let local: Origin = "http://127.0.0.1:5000/".parse().unwrap();
/// assert_eq!(local.authority(), "127.0.0.1:5000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host` or `host:port`, omitting the scheme's default port. Used as the
    /// `Host` header value.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    // Parses `host[:port]` for a known scheme.
    fn from_authority(scheme: Scheme, authority: &str, input: &str) -> Result<Self, LocatorError> {
        // Userinfo is never meaningful for asset locators; drop it.
        let authority = authority.rsplit('@').next().unwrap_or(authority);

        // Bracketed IPv6 literals keep their brackets in `host`.
        let port_sep = match authority.rfind(']') {
            Some(close) => authority[close..].find(':').map(|i| close + i),
            None => authority.rfind(':'),
        };
        let (host, port) = match port_sep {
            Some(i) => {
                let port = authority[i + 1..]
                    .parse::<u16>()
                    .map_err(|_| LocatorError::InvalidPort(input.to_owned()))?;
                (&authority[..i], port)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(LocatorError::MissingHost(input.to_owned()));
        }
        Ok(Self::new(scheme, host, port))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

impl FromStr for Origin {
    type Err = LocatorError;

    /// Parses an origin, ignoring any path that follows the authority.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let locator: Locator = s.parse()?;
        locator
            .origin
            .ok_or_else(|| LocatorError::MissingHost(s.to_owned()))
    }
}

/// A parsed resource locator.
///
/// `origin` is `None` for root-relative locators, which are resolved against
/// the worker's home origin.
///
/// # Examples
///
/// ```
/// use offcache::http::Locator;
///
/// let rel: Locator = "/static/custom.css?v=3".parse().unwrap();
/// assert!(rel.origin().is_none());
/// assert_eq!(rel.path(), "/static/custom.css");
/// assert_eq!(rel.path_and_query(), "/static/custom.css?v=3");
///
/// let abs: Locator = "http://cdn.example.com/lib.js".parse().unwrap();
/// assert_eq!(abs.origin().unwrap().host(), "cdn.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    origin: Option<Origin>,
    path: String,
    query: Option<String>,
}

impl Locator {
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The request-target in origin-form (`/path?query`).
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub(crate) fn into_parts(self) -> (Option<Origin>, String, Option<String>) {
        (self.origin, self.path, self.query)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(origin) = &self.origin {
            write!(f, "{origin}")?;
        }
        f.write_str(&self.path_and_query())
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(LocatorError::Empty);
        }

        // Fragments never reach the network.
        let input_no_fragment = input.split('#').next().unwrap_or(input);

        let (origin, target) = if input_no_fragment.starts_with('/') {
            (None, input_no_fragment)
        } else if let Some((scheme, rest)) = input_no_fragment.split_once("://") {
            let scheme = if scheme.eq_ignore_ascii_case("http") {
                Scheme::Http
            } else if scheme.eq_ignore_ascii_case("https") {
                Scheme::Https
            } else {
                return Err(LocatorError::UnsupportedScheme(input.to_owned()));
            };
            let split = rest.find(['/', '?']).unwrap_or(rest.len());
            let (authority, target) = rest.split_at(split);
            let origin = Origin::from_authority(scheme, authority, input)?;
            (Some(origin), target)
        } else {
            return Err(LocatorError::NotRootRelative(input.to_owned()));
        };

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        Ok(Self {
            origin,
            path: path.to_owned(),
            query,
        })
    }
}
