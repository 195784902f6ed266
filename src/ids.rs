//! Dispatch identifiers.
//!
//! Every call to [`crate::dispatcher::Dispatcher::dispatch`] gets a
//! [`DispatchId`] so the log lines of one simulated round trip can be
//! correlated, including the ones emitted from the task coroutine. A caller
//! can pin it by sending a ULID in `x-request-id`.

use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// ULID of one dispatch, also handed to handlers on
/// [`crate::request::OperationRequest::dispatch_id`].
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct DispatchId(Ulid);

impl DispatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Reuse the caller's id when `header_value` holds a ULID, otherwise
    /// generate one.
    #[must_use]
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DispatchId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}
