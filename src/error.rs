//! Error types for lookup-discovery.

use crate::locator::LookupLocator;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The manager or engine was used after `terminate()`.
    #[error("discovery has been terminated")]
    Terminated,

    /// A caller passed a malformed argument; no state was changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not meaningful in the current configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Unicast discovery of a locator failed.
    #[error("unicast discovery of {locator} failed: {reason}")]
    Probe {
        /// Target of the failed attempt.
        locator: LookupLocator,
        /// Failure description from the probe.
        reason: String,
    },

    /// Unicast discovery of a locator did not finish within the probe timeout.
    #[error("unicast discovery of {0} timed out")]
    ProbeTimeout(LookupLocator),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid-argument error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a probe failure for `locator`.
    pub fn probe<S: Into<String>>(locator: &LookupLocator, reason: S) -> Self {
        Self::Probe {
            locator: locator.clone(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports use after termination.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}
