//! # Matcher Module
//!
//! The matcher module compiles URL templates into anchored path matchers and
//! extracts path parameters from incoming request paths.
//!
//! ## Overview
//!
//! Every operation registered with the simulator declares the URL template its
//! client builds requests against, e.g.
//! `/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}`. The
//! matcher is responsible for:
//! - Compiling the template once, at registration time, into a regex
//! - Keeping a stable placeholder-name → capture-index mapping
//! - Extracting and percent-decoding placeholder values per request
//! - Mapping the links the simulator synthesizes for pollers and pagers back
//!   to the path they were derived from
//!
//! ## Architecture
//!
//! Template handling has two phases:
//!
//! 1. **Compilation**: literal text is regex-escaped, each `{name}` becomes a
//!    capture group restricted to the Azure Resource Manager legal character
//!    class, and the whole pattern is anchored with `^...$`.
//!
//! 2. **Matching**: the raw (still escaped) request path is tested against the
//!    compiled pattern and each captured value is percent-decoded.
//!
//! ## Example
//!
//! ```rust
//! use fake_transport::matcher::PathTemplate;
//!
//! let template = PathTemplate::compile("/widgets/{widgetName}/parts/{partId}").unwrap();
//! let params = template.match_path("/widgets/w%201/parts/7").unwrap();
//! assert_eq!(params[0].1, "w%201");
//! let decoded = template.extract("/widgets/w%201/parts/7").unwrap();
//! assert_eq!(decoded[0].1, "w 1");
//! ```
//!
//! ## Tracked paths
//!
//! Pollers and pagers hand the client a continuation link that points back at
//! the same logical request: `<path>/get/fake/status` for polls and
//! `<path>/page_<n>` for pages. [`sanitize_tracked_path`] strips those
//! suffixes so every call of one poll or page loop resolves to the same
//! tracking identity and template.

mod core;

pub use core::{
    page_link_path, poll_link_path, sanitize_tracked_path, ParamVec, PathTemplate,
    ARM_VALUE_CLASS, MAX_INLINE_PARAMS, PAGE_SUFFIX, POLLER_SUFFIX,
};
