//! Matcher core module - template compilation and path extraction.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use crate::error::TemplateError;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum number of path/query parameters before heap allocation.
/// Resource Manager paths rarely carry more than 6 placeholders.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the dispatch path.
///
/// Param names use `Arc<str>` because they come from the compiled template and
/// are shared by every request; values are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Legal characters of a placeholder value in a Resource Manager path.
///
/// The `$-;` range covers `/`, so scope-style values such as
/// `subscriptions/x/resourceGroups/y` can fill a single placeholder.
pub const ARM_VALUE_CLASS: &str = r"[!#&$-;=?-\[\]_a-zA-Z0-9~%@]+";

/// Suffix appended to an LRO path to form its polling link.
pub const POLLER_SUFFIX: &str = "/get/fake/status";

/// Prefix of the suffix appended to a list path to form a next-page link.
pub const PAGE_SUFFIX: &str = "/page_";

/// A compiled URL template.
///
/// Immutable after compilation; cheap to clone (the regex is reference
/// counted internally).
#[derive(Clone)]
pub struct PathTemplate {
    template: Arc<str>,
    regex: Regex,
    /// Placeholder names in template order
    param_names: Vec<Arc<str>>,
    /// Placeholder name -> capture group index (1-based)
    param_index: HashMap<Arc<str>, usize>,
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTemplate")
            .field("template", &self.template)
            .field("pattern", &self.regex.as_str())
            .field("param_names", &self.param_names)
            .finish()
    }
}

impl PathTemplate {
    /// Compile a URL template into an anchored matcher.
    ///
    /// Transforms templates like `/widgets/{name}` into patterns like
    /// `^/widgets/([...]+)$` and records the ordered placeholder names.
    /// Placeholders may be embedded anywhere in a segment
    /// (`/files('{fileId}')`).
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] for unbalanced braces, empty or duplicate
    /// placeholder names, or a pattern the regex engine rejects.
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        let mut pattern = String::with_capacity(template.len() + 16);
        pattern.push('^');
        let mut param_names: Vec<Arc<str>> = Vec::with_capacity(template.matches('{').count());

        let mut cursor = 0;
        while let Some(offset) = template[cursor..].find(['{', '}']) {
            let open = cursor + offset;
            if template[open..].starts_with('}') {
                return Err(TemplateError::UnbalancedBrace {
                    template: template.to_string(),
                    position: open,
                });
            }
            pattern.push_str(&regex::escape(&template[cursor..open]));

            let close = template[open + 1..]
                .find('}')
                .map(|i| open + 1 + i)
                .ok_or_else(|| TemplateError::UnbalancedBrace {
                    template: template.to_string(),
                    position: open,
                })?;
            let name = &template[open + 1..close];
            if name.contains('{') {
                return Err(TemplateError::UnbalancedBrace {
                    template: template.to_string(),
                    position: open,
                });
            }
            if name.is_empty() {
                return Err(TemplateError::EmptyPlaceholder {
                    template: template.to_string(),
                });
            }
            if param_names.iter().any(|existing| existing.as_ref() == name) {
                return Err(TemplateError::DuplicatePlaceholder {
                    template: template.to_string(),
                    name: name.to_string(),
                });
            }

            pattern.push('(');
            pattern.push_str(ARM_VALUE_CLASS);
            pattern.push(')');
            param_names.push(Arc::from(name));
            cursor = close + 1;
        }
        pattern.push_str(&regex::escape(&template[cursor..]));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| TemplateError::Regex {
            template: template.to_string(),
            reason: e.to_string(),
        })?;

        let param_index = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (Arc::clone(name), i + 1))
            .collect();

        debug!(
            template = %template,
            pattern = %regex.as_str(),
            param_count = param_names.len(),
            "Path template compiled"
        );

        Ok(Self {
            template: Arc::from(template),
            regex,
            param_names,
            param_index,
        })
    }

    /// The template text this matcher was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Ordered placeholder names.
    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        &self.param_names
    }

    /// Capture group index of a placeholder (1-based), if the template has it.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.param_index.get(name).copied()
    }

    /// Whether the full path matches the template.
    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match a raw request path and return the still-escaped placeholder
    /// values in template order.
    ///
    /// # Returns
    ///
    /// * `Some(ParamVec)` - If the whole path matches
    /// * `None` - If it does not
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<ParamVec> {
        let captures = self.regex.captures(path)?;
        let mut params = ParamVec::new();
        for (name, index) in self.param_names.iter().zip(1..) {
            let value = captures.get(index).map(|m| m.as_str()).unwrap_or_default();
            params.push((Arc::clone(name), value.to_owned()));
        }
        Some(params)
    }

    /// Match a raw request path and percent-decode every placeholder value.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason if the path does not match or a value
    /// is not valid percent-encoded UTF-8.
    pub fn extract(&self, path: &str) -> Result<ParamVec, String> {
        let Some(mut params) = self.match_path(path) else {
            warn!(
                template = %self.template,
                path = %path,
                "Path does not match template"
            );
            return Err(format!("path does not match template {}", self.template));
        };
        for (name, value) in params.iter_mut() {
            let decoded = urlencoding::decode(value.as_str())
                .map(|cow| cow.into_owned())
                .map_err(|e| format!("invalid escape in parameter {name}: {e}"))?;
            *value = decoded;
        }
        Ok(params)
    }
}

/// Strip the simulator-appended poll or page suffix from a path.
///
/// `/widgets/w1/get/fake/status` and `/widgets/page_3` map to `/widgets/w1`
/// and `/widgets`. Paths without a suffix are returned unchanged.
#[must_use]
pub fn sanitize_tracked_path(path: &str) -> &str {
    if let Some(stripped) = path.strip_suffix(POLLER_SUFFIX) {
        return stripped;
    }
    if let Some(index) = path.rfind(PAGE_SUFFIX) {
        let page = &path[index + PAGE_SUFFIX.len()..];
        if !page.is_empty() && page.bytes().all(|b| b.is_ascii_digit()) {
            return &path[..index];
        }
    }
    path
}

/// Path of the polling link for an LRO started at `base`.
#[must_use]
pub fn poll_link_path(base: &str) -> String {
    let mut path = String::with_capacity(base.len() + POLLER_SUFFIX.len());
    path.push_str(base);
    path.push_str(POLLER_SUFFIX);
    path
}

/// Path of the link to page `page` (1-based) of a list started at `base`.
#[must_use]
pub fn page_link_path(base: &str, page: usize) -> String {
    format!("{base}{PAGE_SUFFIX}{page}")
}
