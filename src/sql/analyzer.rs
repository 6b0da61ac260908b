//! Query safety analysis.
//!
//! Classifies a statement as read-only or rejected and, for inline
//! execution, bounds its result size with a top-level `LIMIT`.
//!
//! This is deliberately not a SQL parser. It recognizes a restricted shape
//! (a leading `SELECT`/`WITH` keyword and an optional trailing
//! `LIMIT <integer>` at parenthesis depth zero) and rejects anything outside
//! that shape rather than guessing.

use serde::Serialize;

use super::lexer::{tokenize, Token, TokenKind};

/// Keywords that make a statement unsafe wherever they appear as bare words.
pub const FORBIDDEN_KEYWORDS: [&str; 8] = [
    "DELETE", "DROP", "TRUNCATE", "INSERT", "UPDATE", "ALTER", "CREATE", "MERGE",
];

const READ_ONLY_LEADERS: [&str; 2] = ["SELECT", "WITH"];

/// Outcome of classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    ReadOnly,
    Rejected { reason: String },
}

/// What the executor should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    /// SQL to send to the warehouse.
    pub sql: String,
    pub classification: Classification,
    /// Top-level LIMIT present in the input.
    pub original_limit: Option<u64>,
    /// LIMIT in `sql` after rewriting (None when no limit was applied).
    pub applied_limit: Option<u64>,
    pub limit_was_modified: bool,
}

impl QueryPlan {
    fn rejected(sql: &str, reason: impl Into<String>) -> Self {
        Self {
            sql: sql.trim().to_string(),
            classification: Classification::Rejected {
                reason: reason.into(),
            },
            original_limit: None,
            applied_limit: None,
            limit_was_modified: false,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.classification == Classification::ReadOnly
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match &self.classification {
            Classification::ReadOnly => None,
            Classification::Rejected { reason } => Some(reason),
        }
    }
}

/// Classify `sql` without touching its LIMIT.
///
/// Used for dry runs and exports.
pub fn analyze(sql: &str) -> QueryPlan {
    match Statement::scan(sql) {
        Ok(statement) => QueryPlan {
            sql: statement.normalized().to_string(),
            classification: Classification::ReadOnly,
            original_limit: None,
            applied_limit: None,
            limit_was_modified: false,
        },
        Err(reason) => QueryPlan::rejected(sql, reason),
    }
}

/// Classify `sql` and bound it to at most `default_limit` rows.
///
/// - no top-level LIMIT: ` LIMIT <default>` is appended
/// - LIMIT above the default: the number is rewritten to the default
/// - LIMIT at or below the default: left as is
pub fn plan_with_limit(sql: &str, default_limit: u64) -> QueryPlan {
    let statement = match Statement::scan(sql) {
        Ok(statement) => statement,
        Err(reason) => return QueryPlan::rejected(sql, reason),
    };

    let limit = match statement.top_level_limit() {
        Ok(limit) => limit,
        Err(reason) => return QueryPlan::rejected(sql, reason),
    };

    let normalized = statement.normalized();
    let (sql, original, applied, modified) = match limit {
        None => (
            format!("{normalized} LIMIT {default_limit}"),
            None,
            default_limit,
            true,
        ),
        Some((value, _)) if value <= default_limit => {
            (normalized.to_string(), Some(value), value, false)
        }
        Some((value, span)) => {
            let offset = statement.start;
            let rewritten = format!(
                "{}{}{}",
                &normalized[..span.start - offset],
                default_limit,
                &normalized[span.end - offset..]
            );
            (rewritten, Some(value), default_limit, true)
        }
    };

    QueryPlan {
        sql,
        classification: Classification::ReadOnly,
        original_limit: original,
        applied_limit: Some(applied),
        limit_was_modified: modified,
    }
}

/// A statement that passed classification.
struct Statement<'a> {
    source: &'a str,
    /// Significant tokens (no trivia), trailing semicolons excluded.
    tokens: Vec<Token>,
    /// Byte offset of the first significant token.
    start: usize,
    /// Byte offset just past the last significant token.
    end: usize,
}

impl<'a> Statement<'a> {
    /// Tokenize and classify. `Err` carries the rejection reason.
    fn scan(source: &'a str) -> Result<Self, String> {
        let tokens = tokenize(source).map_err(|_| "unparseable".to_string())?;
        let mut significant: Vec<Token> = tokens.into_iter().filter(|t| !t.is_trivia()).collect();

        if let Some(keyword) = significant.iter().find_map(|t| forbidden_keyword(t, source)) {
            return Err(format!("Dangerous SQL operation detected: {keyword}"));
        }

        // One statement, optionally followed by semicolons.
        if let Some(first_semi) = significant
            .iter()
            .position(|t| t.kind == TokenKind::Semicolon)
        {
            if significant[first_semi..]
                .iter()
                .any(|t| t.kind != TokenKind::Semicolon)
            {
                return Err("multiple statements".to_string());
            }
            significant.truncate(first_semi);
        }

        let leader = significant
            .iter()
            .find(|t| t.kind != TokenKind::LParen)
            .ok_or_else(|| "unparseable".to_string())?;
        if leader.kind != TokenKind::Word {
            return Err("unparseable".to_string());
        }
        if !READ_ONLY_LEADERS
            .iter()
            .any(|kw| leader.is_keyword(source, kw))
        {
            return Err(format!(
                "unsupported statement: only SELECT or WITH queries are allowed (found {})",
                leader.text(source).to_ascii_uppercase()
            ));
        }

        if !parens_balanced(&significant) {
            return Err("unparseable".to_string());
        }

        let start = significant.first().map_or(0, |t| t.span.start);
        let end = significant.last().map_or(0, |t| t.span.end);
        Ok(Self {
            source,
            tokens: significant,
            start,
            end,
        })
    }

    fn normalized(&self) -> &'a str {
        &self.source[self.start..self.end]
    }

    /// The depth-zero `LIMIT <n>` clause, if any: value and number span.
    fn top_level_limit(&self) -> Result<Option<(u64, std::ops::Range<usize>)>, String> {
        let mut depth = 0usize;
        let mut found = None;

        for (i, token) in self.tokens.iter().enumerate() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::Word if depth == 0 && token.is_keyword(self.source, "LIMIT") => {
                    if found.is_some() {
                        return Err("unsupported LIMIT clause: more than one top-level LIMIT".to_string());
                    }
                    let number = self
                        .tokens
                        .get(i + 1)
                        .filter(|t| t.kind == TokenKind::Number)
                        .ok_or_else(|| {
                            "unsupported LIMIT clause: expected an integer literal".to_string()
                        })?;
                    let text = number.text(self.source);
                    if !text.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(format!("unsupported LIMIT clause: {text}"));
                    }
                    // Digits only, so a parse failure is overflow.
                    let value = text.parse::<u64>().unwrap_or(u64::MAX);
                    found = Some((value, number.span.clone()));
                }
                _ => {}
            }
        }

        Ok(found)
    }
}

fn forbidden_keyword(token: &Token, source: &str) -> Option<&'static str> {
    FORBIDDEN_KEYWORDS
        .iter()
        .copied()
        .find(|kw| token.is_keyword(source, kw))
}

fn parens_balanced(tokens: &[Token]) -> bool {
    let mut depth = 0i64;
    for token in tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
