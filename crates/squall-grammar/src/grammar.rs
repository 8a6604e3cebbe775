//! Named rule tables, freeze-time analysis, and the expansion walk.
//!
//! A grammar is built mutably through [`GrammarBuilder`] and frozen into an
//! immutable [`Grammar`] before any expansion begins. Freezing is where
//! every fatal grammar error is caught: unknown references, invalid
//! weights and bounds, and the recursion analysis that powers the depth
//! cap. After freeze the rule table is read-only and safe to share across
//! worker threads without locking.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::context::Context;
use crate::element::{ColumnPredicate, Element, TablePredicate, TemplatePart};
use crate::error::{ExpandError, GrammarError};

/// Default entry rule name.
pub const DEFAULT_ENTRY: &str = "query";

// ============================================================================
// Builder
// ============================================================================

/// Mutable grammar under construction.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    name: String,
    entry: Option<String>,
    rules: BTreeMap<String, Element>,
}

impl GrammarBuilder {
    /// Starts a grammar with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            rules: BTreeMap::new(),
        }
    }

    /// Overrides the entry rule (default `query`).
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Registers or replaces a rule.
    #[must_use]
    pub fn rule(mut self, name: impl Into<String>, element: Element) -> Self {
        self.rules.insert(name.into(), element);
        self
    }

    /// Validates the grammar and freezes it for expansion.
    pub fn freeze(self) -> Result<Grammar, GrammarError> {
        let entry = self.entry.unwrap_or_else(|| DEFAULT_ENTRY.to_owned());
        if !self.rules.contains_key(&entry) {
            return Err(GrammarError::UnknownEntry(entry));
        }

        for (name, element) in &self.rules {
            validate_element(name, element)?;
            check_references(name, element, &self.rules)?;
        }

        let recursive = recursive_rules(&self.rules);
        debug!(
            grammar = %self.name,
            rules = self.rules.len(),
            recursive = recursive.len(),
            "grammar frozen"
        );

        Ok(Grammar {
            name: self.name,
            entry,
            rules: self.rules,
            recursive,
        })
    }
}

fn validate_element(rule: &str, element: &Element) -> Result<(), GrammarError> {
    match element {
        Element::Choice { options, weights } => {
            if options.is_empty() {
                return Err(GrammarError::EmptyChoice {
                    rule: rule.to_owned(),
                });
            }
            if let Some(weights) = weights {
                if weights.len() != options.len() {
                    return Err(GrammarError::WeightMismatch {
                        rule: rule.to_owned(),
                        options: options.len(),
                        weights: weights.len(),
                    });
                }
                if weights.iter().any(|&w| w == 0) {
                    return Err(GrammarError::ZeroWeight {
                        rule: rule.to_owned(),
                    });
                }
            }
            for option in options {
                validate_element(rule, option)?;
            }
            Ok(())
        }
        Element::Template { parts } => {
            for part in parts {
                if let TemplatePart::Slot {
                    inline: Some(child),
                    ..
                } = part
                {
                    validate_element(rule, child)?;
                }
            }
            Ok(())
        }
        Element::Repeat {
            child, min, max, ..
        } => {
            if min > max {
                return Err(GrammarError::InvalidRepeat {
                    rule: rule.to_owned(),
                    min: *min,
                    max: *max,
                });
            }
            validate_element(rule, child)
        }
        Element::Maybe { child, p } => {
            if !(0.0..=1.0).contains(p) {
                return Err(GrammarError::InvalidProbability {
                    rule: rule.to_owned(),
                    p: *p,
                });
            }
            validate_element(rule, child)
        }
        Element::Literal(_)
        | Element::RuleRef(_)
        | Element::Lambda(_)
        | Element::Number { .. }
        | Element::Digit
        | Element::Field { .. }
        | Element::Table { .. } => Ok(()),
    }
}

fn check_references(
    rule: &str,
    element: &Element,
    rules: &BTreeMap<String, Element>,
) -> Result<(), GrammarError> {
    match element {
        Element::RuleRef(name) => {
            if rules.contains_key(name) {
                Ok(())
            } else {
                Err(GrammarError::UnknownRule {
                    referenced: name.clone(),
                    from: rule.to_owned(),
                })
            }
        }
        Element::Template { parts } => {
            for part in parts {
                if let TemplatePart::Slot { name, inline } = part {
                    match inline {
                        Some(child) => check_references(rule, child, rules)?,
                        None => {
                            if !rules.contains_key(name) {
                                return Err(GrammarError::UnknownPlaceholder {
                                    placeholder: name.clone(),
                                    rule: rule.to_owned(),
                                });
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        Element::Choice { options, .. } => {
            for option in options {
                check_references(rule, option, rules)?;
            }
            Ok(())
        }
        Element::Repeat { child, .. } | Element::Maybe { child, .. } => {
            check_references(rule, child, rules)
        }
        Element::Literal(_)
        | Element::Lambda(_)
        | Element::Number { .. }
        | Element::Digit
        | Element::Field { .. }
        | Element::Table { .. } => Ok(()),
    }
}

/// Rules that can reach a reference cycle.
///
/// A rule in this set may expand without bound; once the depth cap is hit,
/// expansion refuses to enter any of them. Computed by transitive closure
/// over the reference graph (grammars are small; quadratic is fine).
fn recursive_rules(rules: &BTreeMap<String, Element>) -> BTreeSet<String> {
    let mut edges: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, element) in rules {
        let mut refs = Vec::new();
        element.collect_refs(&mut refs);
        edges.insert(name, refs);
    }

    // closure[r] = every rule reachable from r
    let mut closures: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for name in rules.keys() {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = edges[name.as_str()].clone();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                if let Some(outgoing) = edges.get(next.as_str()) {
                    stack.extend(outgoing.iter().cloned());
                }
            }
        }
        closures.insert(name, seen);
    }

    let on_cycle: BTreeSet<&str> = rules
        .keys()
        .filter(|name| closures[name.as_str()].contains(name.as_str()))
        .map(String::as_str)
        .collect();

    rules
        .keys()
        .filter(|name| {
            on_cycle.contains(name.as_str())
                || closures[name.as_str()]
                    .iter()
                    .any(|reached| on_cycle.contains(reached.as_str()))
        })
        .cloned()
        .collect()
}

// ============================================================================
// Frozen grammar
// ============================================================================

/// An immutable, frozen grammar. Safe for concurrent readers.
#[derive(Debug)]
pub struct Grammar {
    name: String,
    entry: String,
    rules: BTreeMap<String, Element>,
    recursive: BTreeSet<String>,
}

impl Grammar {
    /// The grammar's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry rule name.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Number of rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Whether the named rule can reach a reference cycle.
    pub fn is_recursive(&self, rule: &str) -> bool {
        self.recursive.contains(rule)
    }

    /// Checks every `Repeat` bound against the configured cap.
    ///
    /// Run once at startup; invalid bounds are a fatal configuration error.
    pub fn check_repeat_cap(&self, repeat_cap: u32) -> Result<(), GrammarError> {
        fn walk(rule: &str, element: &Element, cap: u32) -> Result<(), GrammarError> {
            match element {
                Element::Repeat {
                    child, max, ..
                } => {
                    if *max > cap {
                        return Err(GrammarError::RepeatAboveCap {
                            rule: rule.to_owned(),
                            max: *max,
                            cap,
                        });
                    }
                    walk(rule, child, cap)
                }
                Element::Choice { options, .. } => {
                    for option in options {
                        walk(rule, option, cap)?;
                    }
                    Ok(())
                }
                Element::Template { parts } => {
                    for part in parts {
                        if let TemplatePart::Slot {
                            inline: Some(child),
                            ..
                        } = part
                        {
                            walk(rule, child, cap)?;
                        }
                    }
                    Ok(())
                }
                Element::Maybe { child, .. } => walk(rule, child, cap),
                _ => Ok(()),
            }
        }
        for (name, element) in &self.rules {
            walk(name, element, repeat_cap)?;
        }
        Ok(())
    }

    /// Expands the default entry rule into one query string.
    pub fn generate_default(&self, ctx: &mut Context<'_>) -> Result<String, ExpandError> {
        let entry = self.entry.clone();
        self.generate(&entry, ctx)
    }

    /// Expands the named rule into one query string.
    ///
    /// Resets the context's scratch state, depth, and warning tallies first,
    /// so every call is an independent top-level expansion.
    pub fn generate(&self, entry: &str, ctx: &mut Context<'_>) -> Result<String, ExpandError> {
        ctx.reset();
        if !self.rules.contains_key(entry) {
            return Err(ExpandError::UnknownEntry(entry.to_owned()));
        }
        self.expand_rule(entry, ctx)
    }

    // ------------------------------------------------------------------------
    // Expansion walk
    // ------------------------------------------------------------------------

    fn expand_rule(&self, name: &str, ctx: &mut Context<'_>) -> Result<String, ExpandError> {
        let element = self
            .rules
            .get(name)
            .ok_or_else(|| ExpandError::UnknownEntry(name.to_owned()))?;
        if ctx.at_depth_cap() && self.recursive.contains(name) {
            ctx.note_depth_prune();
            return Ok(String::new());
        }
        ctx.enter();
        let out = self.expand(element, ctx);
        ctx.exit();
        out
    }

    /// Expands one element. The dispatch table of the algebra.
    pub fn expand(&self, element: &Element, ctx: &mut Context<'_>) -> Result<String, ExpandError> {
        match element {
            Element::Literal(s) => Ok(s.clone()),

            Element::Choice { options, weights } => {
                ctx.enter();
                let out = self.expand_choice(options, weights.as_deref(), ctx);
                ctx.exit();
                out
            }

            Element::Template { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Lit(s) => out.push_str(s),
                        TemplatePart::Slot { name, inline } => match inline {
                            Some(child) => out.push_str(&self.expand(child, ctx)?),
                            None => out.push_str(&self.expand_rule(name, ctx)?),
                        },
                    }
                }
                Ok(out)
            }

            Element::Repeat {
                child,
                min,
                max,
                sep,
            } => {
                ctx.enter();
                let out = self.expand_repeat(child, *min, *max, sep, ctx);
                ctx.exit();
                out
            }

            Element::Maybe { child, p } => {
                let fire = ctx.rng.next_bool_with_probability(*p);
                if !fire {
                    return Ok(String::new());
                }
                if ctx.at_depth_cap() && !self.element_terminates(child) {
                    ctx.note_depth_prune();
                    return Ok(String::new());
                }
                self.expand(child, ctx)
            }

            Element::RuleRef(name) => self.expand_rule(name, ctx),

            Element::Lambda(f) => f(ctx),

            Element::Number { lo, hi } => Ok(ctx.rng.next_i64_inclusive(*lo, *hi).to_string()),

            Element::Digit => Ok(ctx.rng.next_u64_range(0, 10).to_string()),

            Element::Field { filter } => Ok(self.pick_field(filter.as_ref(), ctx)),

            Element::Table { filter } => Ok(self.pick_table(filter.as_ref(), ctx)),
        }
    }

    fn expand_choice(
        &self,
        options: &[Element],
        weights: Option<&[u64]>,
        ctx: &mut Context<'_>,
    ) -> Result<String, ExpandError> {
        // At the depth cap only branches proven terminating may be taken.
        let allowed: Vec<usize> = if ctx.at_depth_cap() {
            (0..options.len())
                .filter(|&i| self.element_terminates(&options[i]))
                .collect()
        } else {
            (0..options.len()).collect()
        };

        if allowed.is_empty() {
            ctx.note_depth_prune();
            return Ok(String::new());
        }

        let picked = match weights {
            None => allowed[ctx.rng.next_usize(allowed.len())],
            Some(weights) => {
                let total: u64 = allowed.iter().map(|&i| weights[i]).sum();
                let r = ctx.rng.next_u64() % total;
                let mut cumulative = 0u64;
                let mut picked = allowed[allowed.len() - 1];
                for &i in &allowed {
                    cumulative += weights[i];
                    if r < cumulative {
                        picked = i;
                        break;
                    }
                }
                picked
            }
        };

        self.expand(&options[picked], ctx)
    }

    fn expand_repeat(
        &self,
        child: &Element,
        min: u32,
        max: u32,
        sep: &str,
        ctx: &mut Context<'_>,
    ) -> Result<String, ExpandError> {
        if ctx.at_depth_cap() && !self.element_terminates(child) {
            if min > 0 {
                ctx.note_depth_prune();
            }
            return Ok(String::new());
        }

        let cap = ctx.config().repeat_cap;
        let hi = max.min(cap).max(min);
        let n = if min == hi {
            u64::from(min)
        } else {
            ctx.rng.next_u64_range(u64::from(min), u64::from(hi) + 1)
        };

        if n == 0 {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(n as usize);
        for _ in 0..n {
            parts.push(self.expand(child, ctx)?);
        }
        Ok(parts.join(sep))
    }

    /// True if the element is proven to expand finitely once the depth cap
    /// forces termination. Consults the freeze-time recursion analysis for
    /// rule references; lambdas are opaque and trusted to terminate.
    fn element_terminates(&self, element: &Element) -> bool {
        match element {
            Element::Literal(_)
            | Element::Lambda(_)
            | Element::Number { .. }
            | Element::Digit
            | Element::Field { .. }
            | Element::Table { .. } => true,
            Element::RuleRef(name) => !self.recursive.contains(name),
            Element::Choice { options, .. } => {
                options.iter().any(|option| self.element_terminates(option))
            }
            Element::Template { parts } => parts.iter().all(|part| match part {
                TemplatePart::Lit(_) => true,
                TemplatePart::Slot { name, inline } => match inline {
                    Some(child) => self.element_terminates(child),
                    None => !self.recursive.contains(name),
                },
            }),
            Element::Repeat { child, min, .. } => *min == 0 || self.element_terminates(child),
            // Maybe can always emit the empty string.
            Element::Maybe { .. } => true,
        }
    }

    fn pick_field(&self, filter: Option<&ColumnPredicate>, ctx: &mut Context<'_>) -> String {
        let mut candidates: Vec<String> = Vec::new();
        for table in ctx.schema().tables() {
            for column in &table.columns {
                if filter.map_or(true, |f| f(table, column)) {
                    candidates.push(column.name.clone());
                }
            }
        }
        if candidates.is_empty() {
            // Documented safe fallback: keeps the query well-formed when the
            // schema view is empty or the predicate matched nothing.
            ctx.note_schema_fallback();
            return "id".to_owned();
        }
        let picked = ctx.rng.next_usize(candidates.len());
        candidates.swap_remove(picked)
    }

    fn pick_table(&self, filter: Option<&TablePredicate>, ctx: &mut Context<'_>) -> String {
        let mut candidates: Vec<String> = ctx
            .schema()
            .tables()
            .filter(|table| filter.map_or(true, |f| f(table)))
            .map(|table| table.name.clone())
            .collect();
        if candidates.is_empty() {
            ctx.note_schema_fallback();
            // First table of the whole view, then a fixed name.
            return ctx
                .schema()
                .tables()
                .next()
                .map_or_else(|| "t0".to_owned(), |t| t.name.clone());
        }
        let picked = ctx.rng.next_usize(candidates.len());
        candidates.swap_remove(picked)
    }
}
