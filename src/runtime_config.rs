//! # Runtime Configuration Module
//!
//! Environment variable-based configuration of the dispatch runtime.
//!
//! ## Environment Variables
//!
//! ### `FAKE_TRANSPORT_STACK_SIZE`
//!
//! Stack size of each dispatch coroutine. Accepts decimal (`262144`) or
//! hexadecimal (`0x40000`). Handlers run on this stack, so handlers that
//! build large JSON documents may need more.
//!
//! Default: `0x40000` (256 KB)
//!
//! ### `FAKE_TRANSPORT_DISPATCH_TIMEOUT_MS`
//!
//! Deadline applied to requests that carry no [`crate::task::CancelToken`].
//! Unset, empty or `0` means no deadline.
//!
//! ## Usage
//!
//! ```rust
//! use fake_transport::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```
//!
//! ```bash
//! export FAKE_TRANSPORT_STACK_SIZE=0x80000
//! export FAKE_TRANSPORT_DISPATCH_TIMEOUT_MS=5000
//! cargo test
//! ```

use std::env;
use std::time::Duration;

/// Default dispatch coroutine stack size.
pub const DEFAULT_STACK_SIZE: usize = 0x40000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for dispatch coroutines in bytes (default: 256 KB / 0x40000)
    pub stack_size: usize,
    /// Deadline for requests without their own cancellation token
    pub dispatch_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            dispatch_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var("FAKE_TRANSPORT_STACK_SIZE").ok().as_deref(),
            env::var("FAKE_TRANSPORT_DISPATCH_TIMEOUT_MS").ok().as_deref(),
        )
    }

    fn from_vars(stack_size: Option<&str>, timeout_ms: Option<&str>) -> Self {
        let stack_size = match stack_size {
            Some(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
                } else {
                    val.parse().unwrap_or(DEFAULT_STACK_SIZE)
                }
            }
            None => DEFAULT_STACK_SIZE,
        };
        let dispatch_timeout = timeout_ms
            .and_then(|val| val.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        RuntimeConfig {
            stack_size,
            dispatch_timeout,
        }
    }

    /// Override the stack size.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Override the default deadline.
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatch_timeout = timeout;
        self
    }
}
