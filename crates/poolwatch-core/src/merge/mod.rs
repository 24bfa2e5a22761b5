// ── Incremental merges ──
//
// Stream deltas are folded into cached snapshots by pure merge functions.
// The engine owns the (key, event) bindings; `functions` holds one merge
// per resource shape.

mod engine;
pub mod functions;

use std::fmt;

use serde_json::Value;

pub use engine::{BindingGuard, MergeEngine};

/// A pure `(old, delta) -> new` combinator.
///
/// Returns `None` when the delta does not apply (wrong shape, missing
/// fields, filtered out), leaving the cached value untouched.
pub struct Merge(Box<dyn Fn(&Value, &Value) -> Option<Value> + Send + Sync>);

impl Merge {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self(Box::new(f))
    }

    pub fn apply(&self, old: &Value, delta: &Value) -> Option<Value> {
        (self.0)(old, delta)
    }
}

impl fmt::Debug for Merge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Merge(..)")
    }
}
