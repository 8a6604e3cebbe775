//! The element algebra: the closed set of generator node kinds.
//!
//! An [`Element`] tree describes how to produce text. Expansion is a plain
//! recursive walk over the tree, bounded by the context's depth cap and
//! driven entirely by the context's RNG stream, so a fixed
//! `(grammar, seed)` pair always renders the same string.

use std::fmt;
use std::sync::Arc;

use squall_schema::{ColumnDef, TableDef};

use crate::context::Context;
use crate::error::ExpandError;

/// A user-supplied generator function.
///
/// Runs on the owning worker thread; may read and mutate `ctx.state` to
/// coordinate across one top-level expansion. Must not capture mutable
/// global state.
pub type LambdaFn = Arc<dyn Fn(&mut Context<'_>) -> Result<String, ExpandError> + Send + Sync>;

/// Predicate over `(table, column)` pairs for `Field` elements.
pub type ColumnPredicate = Arc<dyn Fn(&TableDef, &ColumnDef) -> bool + Send + Sync>;

/// Predicate over tables for `Table` elements.
pub type TablePredicate = Arc<dyn Fn(&TableDef) -> bool + Send + Sync>;

/// One fragment of a template: literal text or a named placeholder.
///
/// A placeholder resolves to its inline binding if one was provided at
/// construction, otherwise to the rule of the same name in the owning
/// grammar. Unresolvable placeholders are rejected when the grammar freezes.
#[derive(Clone)]
pub enum TemplatePart {
    /// Literal text emitted as-is.
    Lit(String),
    /// Named placeholder with an optional inline binding.
    Slot {
        name: String,
        inline: Option<Box<Element>>,
    },
}

impl fmt::Debug for TemplatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lit(s) => write!(f, "Lit({s:?})"),
            Self::Slot { name, inline } => f
                .debug_struct("Slot")
                .field("name", name)
                .field("inline", &inline.is_some())
                .finish(),
        }
    }
}

/// One node in the generator tree.
#[derive(Clone)]
pub enum Element {
    /// A fixed string.
    Literal(String),
    /// Pick one option, uniformly or by positive integer weights.
    Choice {
        options: Vec<Element>,
        weights: Option<Vec<u64>>,
    },
    /// Literal fragments interleaved with named placeholders.
    Template { parts: Vec<TemplatePart> },
    /// Expand the child `n` times, `n` uniform in `[min, max]`, joined by
    /// a literal separator.
    Repeat {
        child: Box<Element>,
        min: u32,
        max: u32,
        sep: String,
    },
    /// Expand the child with probability `p`, else emit nothing.
    Maybe { child: Box<Element>, p: f64 },
    /// Reference to a named rule in the owning grammar.
    RuleRef(String),
    /// Opaque user generator function.
    Lambda(LambdaFn),
    /// Decimal integer uniform in `[lo, hi]`.
    Number { lo: i64, hi: i64 },
    /// Decimal digit uniform in `[0, 9]`.
    Digit,
    /// A column name picked from the schema view.
    Field { filter: Option<ColumnPredicate> },
    /// A table name picked from the schema view.
    Table { filter: Option<TablePredicate> },
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "Literal({s:?})"),
            Self::Choice { options, weights } => f
                .debug_struct("Choice")
                .field("options", options)
                .field("weights", weights)
                .finish(),
            Self::Template { parts } => f.debug_struct("Template").field("parts", parts).finish(),
            Self::Repeat {
                child,
                min,
                max,
                sep,
            } => f
                .debug_struct("Repeat")
                .field("child", child)
                .field("min", min)
                .field("max", max)
                .field("sep", sep)
                .finish(),
            Self::Maybe { child, p } => f
                .debug_struct("Maybe")
                .field("child", child)
                .field("p", p)
                .finish(),
            Self::RuleRef(name) => write!(f, "RuleRef({name:?})"),
            Self::Lambda(_) => write!(f, "Lambda(..)"),
            Self::Number { lo, hi } => write!(f, "Number({lo}..={hi})"),
            Self::Digit => write!(f, "Digit"),
            Self::Field { filter } => write!(f, "Field(filter: {})", filter.is_some()),
            Self::Table { filter } => write!(f, "Table(filter: {})", filter.is_some()),
        }
    }
}

impl Element {
    /// Rule names this element references, directly or through template
    /// placeholders without inline bindings. Used by freeze-time analysis.
    pub(crate) fn collect_refs(&self, refs: &mut Vec<String>) {
        match self {
            Self::RuleRef(name) => refs.push(name.clone()),
            Self::Choice { options, .. } => {
                for option in options {
                    option.collect_refs(refs);
                }
            }
            Self::Template { parts } => {
                for part in parts {
                    if let TemplatePart::Slot { name, inline } = part {
                        match inline {
                            Some(child) => child.collect_refs(refs),
                            None => refs.push(name.clone()),
                        }
                    }
                }
            }
            Self::Repeat { child, .. } | Self::Maybe { child, .. } => child.collect_refs(refs),
            Self::Literal(_)
            | Self::Lambda(_)
            | Self::Number { .. }
            | Self::Digit
            | Self::Field { .. }
            | Self::Table { .. } => {}
        }
    }
}

// ============================================================================
// Construction DSL
// ============================================================================

/// A fixed string.
pub fn lit(s: impl Into<String>) -> Element {
    Element::Literal(s.into())
}

/// A uniform choice over options.
pub fn choice(options: impl IntoIterator<Item = Element>) -> Element {
    Element::Choice {
        options: options.into_iter().collect(),
        weights: None,
    }
}

/// A weighted choice; weights are positive integers.
pub fn weighted(options: impl IntoIterator<Item = (Element, u64)>) -> Element {
    let (options, weights): (Vec<_>, Vec<_>) = options.into_iter().unzip();
    Element::Choice {
        options,
        weights: Some(weights),
    }
}

/// A template over a format string.
///
/// `{name}` marks a placeholder; `{{` and `}}` escape literal braces.
/// Placeholders resolve to rules of the same name unless an inline binding
/// is attached with [`with_slot`].
pub fn template(fmt: &str) -> Element {
    Element::Template {
        parts: parse_template(fmt),
    }
}

/// Attaches an inline binding for a placeholder of an existing template.
///
/// Bindings for names the template does not mention are ignored.
#[must_use]
pub fn with_slot(element: Element, name: &str, inline: Element) -> Element {
    let Element::Template { mut parts } = element else {
        return element;
    };
    for part in &mut parts {
        if let TemplatePart::Slot {
            name: slot_name,
            inline: slot,
        } = part
        {
            if slot_name == name {
                *slot = Some(Box::new(inline.clone()));
            }
        }
    }
    Element::Template { parts }
}

/// Expand `child` between `min` and `max` times, joined by `sep`.
pub fn repeat(child: Element, min: u32, max: u32, sep: &str) -> Element {
    Element::Repeat {
        child: Box::new(child),
        min,
        max,
        sep: sep.to_owned(),
    }
}

/// Expand `child` with probability `p`, else emit nothing.
pub fn maybe(child: Element, p: f64) -> Element {
    Element::Maybe {
        child: Box::new(child),
        p,
    }
}

/// Reference a named rule.
pub fn rule_ref(name: impl Into<String>) -> Element {
    Element::RuleRef(name.into())
}

/// A user generator function.
pub fn lambda<F>(f: F) -> Element
where
    F: Fn(&mut Context<'_>) -> Result<String, ExpandError> + Send + Sync + 'static,
{
    Element::Lambda(Arc::new(f))
}

/// Decimal integer uniform in `[lo, hi]`.
pub fn number(lo: i64, hi: i64) -> Element {
    Element::Number { lo, hi }
}

/// Decimal digit uniform in `[0, 9]`.
pub fn digit() -> Element {
    Element::Digit
}

/// Any column name from the schema view.
pub fn field() -> Element {
    Element::Field { filter: None }
}

/// A column name satisfying the predicate.
pub fn field_where<F>(f: F) -> Element
where
    F: Fn(&TableDef, &ColumnDef) -> bool + Send + Sync + 'static,
{
    Element::Field {
        filter: Some(Arc::new(f)),
    }
}

/// Any table name from the schema view.
pub fn table() -> Element {
    Element::Table { filter: None }
}

/// A table name satisfying the predicate.
pub fn table_where<F>(f: F) -> Element
where
    F: Fn(&TableDef) -> bool + Send + Sync + 'static,
{
    Element::Table {
        filter: Some(Arc::new(f)),
    }
}

fn parse_template(fmt: &str) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut lit_buf = String::new();
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                lit_buf.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                lit_buf.push('}');
            }
            '{' => {
                if !lit_buf.is_empty() {
                    parts.push(TemplatePart::Lit(std::mem::take(&mut lit_buf)));
                }
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                parts.push(TemplatePart::Slot { name, inline: None });
            }
            _ => lit_buf.push(c),
        }
    }
    if !lit_buf.is_empty() {
        parts.push(TemplatePart::Lit(lit_buf));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parsing_splits_slots() {
        let Element::Template { parts } = template("SELECT {col} FROM {tab};") else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[0], TemplatePart::Lit(s) if s == "SELECT "));
        assert!(matches!(&parts[1], TemplatePart::Slot { name, .. } if name == "col"));
        assert!(matches!(&parts[2], TemplatePart::Lit(s) if s == " FROM "));
        assert!(matches!(&parts[3], TemplatePart::Slot { name, .. } if name == "tab"));
        assert!(matches!(&parts[4], TemplatePart::Lit(s) if s == ";"));
    }

    #[test]
    fn template_brace_escapes() {
        let Element::Template { parts } = template("a {{literal}} {slot}") else {
            panic!("expected template");
        };
        assert!(matches!(&parts[0], TemplatePart::Lit(s) if s == "a {literal} "));
        assert!(matches!(&parts[1], TemplatePart::Slot { name, .. } if name == "slot"));
    }

    #[test]
    fn with_slot_binds_inline_child() {
        let t = with_slot(template("x {y}"), "y", lit("z"));
        let Element::Template { parts } = t else {
            panic!("expected template");
        };
        assert!(
            matches!(&parts[1], TemplatePart::Slot { inline: Some(_), .. }),
            "inline binding missing"
        );
    }

    #[test]
    fn collect_refs_sees_through_nesting() {
        let el = choice([
            rule_ref("a"),
            repeat(maybe(rule_ref("b"), 0.5), 0, 3, ","),
            with_slot(template("{c} {d}"), "d", lit("x")),
        ]);
        let mut refs = Vec::new();
        el.collect_refs(&mut refs);
        // `d` has an inline binding, so only a, b, c are rule references.
        assert_eq!(refs, vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
    }
}
