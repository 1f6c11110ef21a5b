//! Which requests the worker may answer from its bucket.

use serde::{Deserialize, Serialize};

use crate::http::Request;

/// Default path prefix for [`InterceptPolicy::Scoped`].
pub const DEFAULT_SCOPE_PREFIX: &str = "/static/";

/// The per-request decision policy.
///
/// The two variants differ in observable behavior and are never combined:
///
/// - `Scoped`: only requests whose path starts with `prefix` consult the
///   bucket; every other request goes straight to the network, even when a
///   same-path entry exists.
/// - `Global`: every request consults the bucket first, including
///   cross-origin requests that were pre-cached by absolute locator.
///
/// Serialized as `{"mode": "scoped", "prefix": "/static/"}` or
/// `{"mode": "global"}`.
///
/// # Examples
///
/// ```
/// use offcache::http::Request;
/// use offcache::worker::InterceptPolicy;
///
/// let policy = InterceptPolicy::default();
/// assert!(policy.covers(&Request::get("/static/custom.css").unwrap()));
/// assert!(!policy.covers(&Request::get("/api/data").unwrap()));
/// assert!(InterceptPolicy::Global.covers(&Request::get("/api/data").unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum InterceptPolicy {
    Scoped { prefix: String },
    Global,
}

impl InterceptPolicy {
    pub fn scoped(prefix: impl Into<String>) -> Self {
        Self::Scoped {
            prefix: prefix.into(),
        }
    }

    /// Returns `true` if `request` is a candidate for cache service.
    pub fn covers(&self, request: &Request) -> bool {
        match self {
            Self::Scoped { prefix } => request.path().starts_with(prefix.as_str()),
            Self::Global => true,
        }
    }
}

impl Default for InterceptPolicy {
    fn default() -> Self {
        Self::scoped(DEFAULT_SCOPE_PREFIX)
    }
}
