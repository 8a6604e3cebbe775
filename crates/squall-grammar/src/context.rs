//! Per-expansion context: RNG handle, scratch state, schema snapshot, depth.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use squall_rng::StreamRng;
use squall_schema::SchemaView;

/// Expansion limits carried by every context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExpandConfig {
    /// Recursion cap. Once `depth` reaches this, only branches proven
    /// non-recursive at freeze time may be taken.
    pub max_depth: usize,
    /// Upper bound applied to every `Repeat`'s max count.
    pub repeat_cap: u32,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            repeat_cap: 64,
        }
    }
}

/// A value in the context's scratch state.
///
/// Lambdas use the state bag to coordinate within one top-level expansion,
/// e.g. pick a table once and reference it from several rules.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<StateValue>),
}

impl StateValue {
    /// Returns the string value, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// Tallies of the soft failures an expansion may hit.
///
/// These are warnings, not errors: the expansion still produced a string.
/// Workers fold them into run-level counters after each query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandWarnings {
    /// A depth-capped choice or rule reference had no non-recursive branch
    /// and emitted an empty string.
    pub depth_prunes: u64,
    /// A `Field`/`Table` element found no matching schema entry and emitted
    /// the documented fallback.
    pub schema_fallbacks: u64,
}

impl ExpandWarnings {
    /// Adds another tally into this one.
    pub fn merge(&mut self, other: Self) {
        self.depth_prunes += other.depth_prunes;
        self.schema_fallbacks += other.schema_fallbacks;
    }
}

/// Per-worker, per-expansion scratchpad.
///
/// One context serves many top-level expansions; [`Context::reset`] clears
/// the scratch state, depth, and warning tallies between queries while the
/// RNG handle is re-pointed at the next query's stream.
pub struct Context<'a> {
    /// The owning worker's stream for the current global index.
    pub rng: &'a mut StreamRng,
    /// Scratch state shared across one top-level expansion.
    pub state: HashMap<String, StateValue>,
    schema: Arc<SchemaView>,
    config: ExpandConfig,
    depth: usize,
    warnings: ExpandWarnings,
}

impl<'a> Context<'a> {
    /// Creates a context over a query stream and a schema snapshot.
    pub fn new(rng: &'a mut StreamRng, schema: Arc<SchemaView>, config: ExpandConfig) -> Self {
        Self {
            rng,
            state: HashMap::new(),
            schema,
            config,
            depth: 0,
            warnings: ExpandWarnings::default(),
        }
    }

    /// Clears scratch state, depth, and warnings for the next expansion.
    pub fn reset(&mut self) {
        self.state.clear();
        self.depth = 0;
        self.warnings = ExpandWarnings::default();
    }

    /// The read-only schema snapshot for this expansion.
    pub fn schema(&self) -> &SchemaView {
        &self.schema
    }

    /// The active expansion limits.
    pub fn config(&self) -> ExpandConfig {
        self.config
    }

    /// Current recursion depth. Saturates at `max_depth`.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True once the recursion cap has been reached; recursive branches are
    /// no longer allowed.
    pub fn at_depth_cap(&self) -> bool {
        self.depth >= self.config.max_depth
    }

    /// Enters a nesting element. The counter saturates at `max_depth` so the
    /// invariant `depth <= max_depth` holds even while a non-recursive tail
    /// finishes expanding.
    pub(crate) fn enter(&mut self) {
        if self.depth < self.config.max_depth {
            self.depth += 1;
        }
    }

    /// Leaves a nesting element.
    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Warning tallies for the current expansion.
    pub fn warnings(&self) -> ExpandWarnings {
        self.warnings
    }

    pub(crate) fn note_depth_prune(&mut self) {
        self.warnings.depth_prunes += 1;
    }

    pub(crate) fn note_schema_fallback(&mut self) {
        self.warnings.schema_fallbacks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_fixture(rng: &mut StreamRng) -> Context<'_> {
        Context::new(rng, Arc::new(SchemaView::empty()), ExpandConfig::default())
    }

    #[test]
    fn reset_clears_state_and_depth() {
        let mut rng = StreamRng::new(1);
        let mut ctx = ctx_fixture(&mut rng);

        ctx.state.insert("t".into(), StateValue::from("users"));
        ctx.enter();
        ctx.note_depth_prune();

        ctx.reset();

        assert!(ctx.state.is_empty());
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.warnings(), ExpandWarnings::default());
    }

    #[test]
    fn depth_saturates_at_cap() {
        let mut rng = StreamRng::new(1);
        let mut ctx = Context::new(
            &mut rng,
            Arc::new(SchemaView::empty()),
            ExpandConfig {
                max_depth: 2,
                repeat_cap: 8,
            },
        );

        for _ in 0..10 {
            ctx.enter();
        }
        assert_eq!(ctx.depth(), 2);
        assert!(ctx.at_depth_cap());

        ctx.exit();
        assert_eq!(ctx.depth(), 1);
        assert!(!ctx.at_depth_cap());
    }

    #[test]
    fn state_value_accessors() {
        assert_eq!(StateValue::from("a").as_str(), Some("a"));
        assert_eq!(StateValue::from(3i64).as_int(), Some(3));
        assert_eq!(StateValue::Bool(true).as_str(), None);
    }
}
