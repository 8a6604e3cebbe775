//! Statement and error classification.
//!
//! Two questions are answered here: is this statement DDL (and must
//! therefore pass through the barrier), and which kind is this SQL error
//! (for the per-kind counters). Both are pure string-level decisions; no
//! parsing beyond comment stripping.

use serde::{Deserialize, Serialize};

/// Leading keywords that make a statement DDL for barrier purposes.
const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "COMMENT", "GRANT", "REVOKE", "REINDEX", "CLUSTER",
];

/// True if the statement must be serialized through the DDL barrier.
///
/// The leading keyword is inspected after skipping whitespace, `--` line
/// comments, and `/* ... */` block comments. `VACUUM` only counts when
/// followed by `FULL`.
#[must_use]
pub fn is_ddl(sql: &str) -> bool {
    let body = strip_leading_trivia(sql);
    let mut words = body.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    let first = first.to_ascii_uppercase();

    if DDL_KEYWORDS.contains(&first.as_str()) {
        return true;
    }
    if first == "VACUUM" {
        return words
            .next()
            .is_some_and(|w| w.eq_ignore_ascii_case("FULL"));
    }
    false
}

/// Skips leading whitespace and SQL comments.
fn strip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return trimmed;
        }
    }
}

/// SQL error kinds, keyed by SQLSTATE class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorKind {
    /// Class 42: syntax errors and access rule violations.
    Syntax,
    /// Class 23: integrity constraint violations.
    Constraint,
    /// Class 22: data exceptions (casts, ranges, division by zero).
    Data,
    /// Class 40: transaction rollbacks (serialization, deadlock).
    Transaction,
    /// Class 53: insufficient resources.
    Resource,
    /// Class 08: connection exceptions reported as SQL errors.
    Connection,
    /// Class 57: operator intervention (shutdown, cancel).
    Intervention,
    /// Everything else.
    Other,
}

impl SqlErrorKind {
    /// All kinds, in counter order.
    pub const ALL: [Self; 8] = [
        Self::Syntax,
        Self::Constraint,
        Self::Data,
        Self::Transaction,
        Self::Resource,
        Self::Connection,
        Self::Intervention,
        Self::Other,
    ];

    /// Classifies a five-character SQLSTATE code by its class prefix.
    #[must_use]
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2) {
            Some("42") => Self::Syntax,
            Some("23") => Self::Constraint,
            Some("22") => Self::Data,
            Some("40") => Self::Transaction,
            Some("53") => Self::Resource,
            Some("08") => Self::Connection,
            Some("57") => Self::Intervention,
            _ => Self::Other,
        }
    }

    /// Stable label used in reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Constraint => "constraint",
            Self::Data => "data",
            Self::Transaction => "transaction",
            Self::Resource => "resource",
            Self::Connection => "connection",
            Self::Intervention => "intervention",
            Self::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("CREATE TABLE t (i int)", true)]
    #[test_case("  create index i on t (c)", true)]
    #[test_case("ALTER TABLE t ADD COLUMN c int", true)]
    #[test_case("DROP TABLE t", true)]
    #[test_case("TRUNCATE t", true)]
    #[test_case("COMMENT ON TABLE t IS 'x'", true)]
    #[test_case("GRANT SELECT ON t TO u", true)]
    #[test_case("REVOKE SELECT ON t FROM u", true)]
    #[test_case("REINDEX TABLE t", true)]
    #[test_case("CLUSTER t USING i", true)]
    #[test_case("VACUUM FULL t", true)]
    #[test_case("vacuum full", true)]
    #[test_case("VACUUM t", false)]
    #[test_case("VACUUM ANALYZE t", false)]
    #[test_case("SELECT * FROM t", false)]
    #[test_case("INSERT INTO t VALUES (1)", false)]
    #[test_case("UPDATE t SET c = 1", false)]
    #[test_case("DELETE FROM t", false)]
    #[test_case("", false)]
    fn ddl_detection(sql: &str, expected: bool) {
        assert_eq!(is_ddl(sql), expected);
    }

    #[test_case("-- a comment\nCREATE TABLE t (i int)", true)]
    #[test_case("/* block */ DROP TABLE t", true)]
    #[test_case("/* multi\n line */\n -- and line\n TRUNCATE t", true)]
    #[test_case("-- only a comment", false)]
    #[test_case("/* unterminated CREATE", false)]
    fn ddl_detection_skips_comments(sql: &str, expected: bool) {
        assert_eq!(is_ddl(sql), expected);
    }

    #[test_case("42601", SqlErrorKind::Syntax)]
    #[test_case("42P01", SqlErrorKind::Syntax)]
    #[test_case("23505", SqlErrorKind::Constraint)]
    #[test_case("22012", SqlErrorKind::Data)]
    #[test_case("40001", SqlErrorKind::Transaction)]
    #[test_case("53200", SqlErrorKind::Resource)]
    #[test_case("08006", SqlErrorKind::Connection)]
    #[test_case("57014", SqlErrorKind::Intervention)]
    #[test_case("P0001", SqlErrorKind::Other)]
    #[test_case("", SqlErrorKind::Other)]
    fn sqlstate_classification(code: &str, expected: SqlErrorKind) {
        assert_eq!(SqlErrorKind::from_sqlstate(code), expected);
    }
}
