//! Worker lifecycle states and the transitions between them.
//!
//! ```text
//!            install()                activate()
//!  Parsed ─────────────► Installing ─► Installed ─────────────► Activating ─► Activated
//!    ▲          failure      │            ▲  ▲        failure       │
//!    └───────────────────────┘            │  └──────────────────────┘
//!                                 install() (refresh)
//! ```

use std::fmt;

/// Where a [`CacheWorker`](super::CacheWorker) is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Constructed; no assets cached yet.
    Parsed,
    /// An install batch is in flight.
    Installing,
    /// The current bucket is fully populated.
    Installed,
    /// Stale-bucket cleanup is in flight.
    Activating,
    /// Handling requests.
    Activated,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
        }
    }

    /// Only an activated worker answers requests from its bucket.
    pub fn controls_requests(self) -> bool {
        self == Self::Activated
    }

    pub(crate) fn can_install(self) -> bool {
        matches!(self, Self::Parsed | Self::Installed)
    }

    pub(crate) fn can_activate(self) -> bool {
        matches!(self, Self::Installed | Self::Activated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
