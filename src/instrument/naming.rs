//! Transaction naming.

use std::collections::HashSet;
use std::sync::Arc;

use http::Method;

use crate::router::CATCH_ALL_ROUTE;

/// Computes a transaction name from a method and a route or path.
pub type NameFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Extensions grouped into one transaction each when static grouping is on.
pub const DEFAULT_STATIC_EXTENSIONS: [&str; 7] = ["svg", "png", "jpg", "gif", "css", "js", "html"];

/// `Koajs/<path without its leading slash>#<method>`.
///
/// Only a single leading `/` is dropped; a path without one is appended as-is.
pub fn default_transaction_name(method: &str, path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("Koajs/{path}#{method}")
}

/// The extension of the last path segment, if it looks like `name.ext`.
///
/// The stem must be non-empty and the extension made of word characters
/// only, so `/a/b.min.js` yields `js` while `/a/.js`, `/a/b.` and `/a/123js`
/// yield nothing.
pub fn static_extension(path: &str) -> Option<&str> {
    let (_, segment) = path.rsplit_once('/')?;
    let (stem, ext) = segment.rsplit_once('.')?;
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    (!stem.is_empty() && !ext.is_empty() && ext.chars().all(is_word)).then_some(ext)
}

/// Decides the transaction name of a finished request.
pub struct TransactionNamer {
    name: NameFn,
    group_static: bool,
    extensions: HashSet<String>,
}

impl TransactionNamer {
    pub fn new(name: NameFn, group_static: bool, extensions: impl IntoIterator<Item = String>) -> Self {
        Self { name, group_static, extensions: extensions.into_iter().collect() }
    }

    pub fn compute(&self, method: &str, path: &str) -> String {
        (self.name)(method, path)
    }

    /// The name to report, or `None` to leave the transaction untouched.
    ///
    /// A matched route wins over everything. The catch-all sentinel means no
    /// real route matched and nothing is reported. Otherwise a `GET` for a
    /// file whose extension is in the configured set is grouped as `/*.ext`.
    pub fn resolve(&self, method: &Method, path: &str, matched_route: Option<&str>) -> Option<String> {
        if let Some(route) = matched_route {
            if route == CATCH_ALL_ROUTE {
                return None;
            }
            return Some(self.compute(method.as_str(), route));
        }

        if !self.group_static || *method != Method::GET {
            return None;
        }
        let ext = static_extension(path)?;
        self.extensions.contains(ext)
            .then(|| self.compute(method.as_str(), &format!("/*.{ext}")))
    }
}

impl Default for TransactionNamer {
    fn default() -> Self {
        Self::new(
            Arc::new(default_transaction_name),
            false,
            DEFAULT_STATIC_EXTENSIONS.map(String::from),
        )
    }
}
