//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the primitives the cache worker speaks in:
//! [`Method`], [`StatusCode`], [`Headers`], [`Locator`], [`Request`], and [`Response`].

use std::fmt;

pub mod headers;
pub mod locator;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use locator::{Locator, LocatorError, Origin, Scheme};
pub use request::Request;
pub use response::Response;

// Generates the `StatusCode` enum together with its numeric and reason-phrase
// lookups from one table, so the three can never drift apart.
macro_rules! status_codes {
    ($( ($code:literal, $variant:ident, $reason:literal); )+) => {
        /// An HTTP response status code.
        ///
        /// Every code in `100..=999` is representable. Registered codes get a
        /// named variant; anything else an upstream origin sends is carried
        /// verbatim in [`StatusCode::Other`].
        ///
        /// # Examples
        ///
        /// ```
        /// use offcache::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert!(status.is_success());
        /// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
        /// assert_eq!(StatusCode::from_u16(299), Some(StatusCode::Other(299)));
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $( $variant, )+
            /// A valid code without a named variant.
            Other(u16),
        }

        impl StatusCode {
            /// Returns the numeric status code as a `u16`.
            pub fn as_u16(self) -> u16 {
                match self {
                    $( Self::$variant => $code, )+
                    Self::Other(code) => code,
                }
            }

            /// Returns the reason phrase for this status code.
            ///
            /// Unregistered codes get the generic phrase of their class.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$variant => $reason, )+
                    Self::Other(code) => match code / 100 {
                        1 => "Informational",
                        2 => "Success",
                        3 => "Redirection",
                        4 => "Client Error",
                        5 => "Server Error",
                        _ => "Unknown",
                    },
                }
            }

            /// Maps a numeric code to a `StatusCode`.
            ///
            /// Returns `None` only outside the three-digit range `100..=999`.
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    100..=999 => Some(Self::Other(code)),
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    (100, Continue, "Continue");
    (101, SwitchingProtocols, "Switching Protocols");
    (102, Processing, "Processing");
    (103, EarlyHints, "Early Hints");

    (200, Ok, "OK");
    (201, Created, "Created");
    (202, Accepted, "Accepted");
    (203, NonAuthoritativeInformation, "Non-Authoritative Information");
    (204, NoContent, "No Content");
    (205, ResetContent, "Reset Content");
    (206, PartialContent, "Partial Content");
    (207, MultiStatus, "Multi-Status");
    (208, AlreadyReported, "Already Reported");
    (226, ImUsed, "IM Used");

    (300, MultipleChoices, "Multiple Choices");
    (301, MovedPermanently, "Moved Permanently");
    (302, Found, "Found");
    (303, SeeOther, "See Other");
    (304, NotModified, "Not Modified");
    (305, UseProxy, "Use Proxy");
    (307, TemporaryRedirect, "Temporary Redirect");
    (308, PermanentRedirect, "Permanent Redirect");

    (400, BadRequest, "Bad Request");
    (401, Unauthorized, "Unauthorized");
    (402, PaymentRequired, "Payment Required");
    (403, Forbidden, "Forbidden");
    (404, NotFound, "Not Found");
    (405, MethodNotAllowed, "Method Not Allowed");
    (406, NotAcceptable, "Not Acceptable");
    (407, ProxyAuthenticationRequired, "Proxy Authentication Required");
    (408, RequestTimeout, "Request Timeout");
    (409, Conflict, "Conflict");
    (410, Gone, "Gone");
    (411, LengthRequired, "Length Required");
    (412, PreconditionFailed, "Precondition Failed");
    (413, PayloadTooLarge, "Payload Too Large");
    (414, UriTooLong, "URI Too Long");
    (415, UnsupportedMediaType, "Unsupported Media Type");
    (416, RangeNotSatisfiable, "Range Not Satisfiable");
    (417, ExpectationFailed, "Expectation Failed");
    (418, ImATeapot, "I'm a teapot");
    (421, MisdirectedRequest, "Misdirected Request");
    (422, UnprocessableEntity, "Unprocessable Entity");
    (423, Locked, "Locked");
    (424, FailedDependency, "Failed Dependency");
    (425, TooEarly, "Too Early");
    (426, UpgradeRequired, "Upgrade Required");
    (428, PreconditionRequired, "Precondition Required");
    (429, TooManyRequests, "Too Many Requests");
    (431, RequestHeaderFieldsTooLarge, "Request Header Fields Too Large");
    (451, UnavailableForLegalReasons, "Unavailable For Legal Reasons");

    (500, InternalServerError, "Internal Server Error");
    (501, NotImplemented, "Not Implemented");
    (502, BadGateway, "Bad Gateway");
    (503, ServiceUnavailable, "Service Unavailable");
    (504, GatewayTimeout, "Gateway Timeout");
    (505, HttpVersionNotSupported, "HTTP Version Not Supported");
    (506, VariantAlsoNegotiates, "Variant Also Negotiates");
    (507, InsufficientStorage, "Insufficient Storage");
    (508, LoopDetected, "Loop Detected");
    (510, NotExtended, "Not Extended");
    (511, NetworkAuthenticationRequired, "Network Authentication Required");
}

impl StatusCode {
    /// Returns `true` for any `2xx` code, named or not.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Standard methods are unit variants; anything else is kept verbatim in
/// `Custom`. Only `GET` requests are ever matched against a cache bucket.
///
/// # Examples
///
/// ```
/// use offcache::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert!(method.is_safe());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` if this method is "safe" (RFC 9110 §9.2.1).
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options | Self::Trace)
    }

    /// Returns `true` if this method is idempotent (RFC 9110 §9.2.2).
    pub fn is_idempotent(&self) -> bool {
        self.is_safe() || matches!(self, Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u16() {
        for code in [200u16, 304, 404, 418, 502] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(status.as_u16(), code);
        }
    }

    #[test]
    fn less_common_registered_codes_are_named() {
        assert_eq!(StatusCode::from_u16(207), Some(StatusCode::MultiStatus));
        assert_eq!(
            StatusCode::from_u16(451),
            Some(StatusCode::UnavailableForLegalReasons)
        );
        assert_eq!(StatusCode::MultiStatus.as_u16(), 207);
    }

    #[test]
    fn unregistered_codes_are_kept() {
        let status = StatusCode::from_u16(299).unwrap();
        assert_eq!(status, StatusCode::Other(299));
        assert_eq!(status.as_u16(), 299);
        assert_eq!(status.canonical_reason(), "Success");
        assert_eq!(StatusCode::from_u16(599).unwrap().to_string(), "599 Server Error");
        assert_eq!(StatusCode::from_u16(99), None);
        assert_eq!(StatusCode::from_u16(1000), None);
    }

    #[test]
    fn success_class() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::NoContent.is_success());
        assert!(StatusCode::MultiStatus.is_success());
        assert!(StatusCode::Other(250).is_success());
        assert!(!StatusCode::NotModified.is_success());
        assert!(!StatusCode::NotFound.is_success());
        assert!(!StatusCode::UnavailableForLegalReasons.is_success());
    }

    #[test]
    fn status_display() {
        assert_eq!(StatusCode::BadGateway.to_string(), "502 Bad Gateway");
    }

    #[test]
    fn custom_method_preserved() {
        let m: Method = "PURGE".parse().unwrap();
        assert_eq!(m, Method::Custom("PURGE".into()));
        assert_eq!(m.as_str(), "PURGE");
        assert!(!m.is_safe());
        assert!(Method::Put.is_idempotent());
    }
}
