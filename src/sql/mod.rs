//! SQL handling: a restricted lexer and the query safety analyzer.

pub mod analyzer;
pub mod lexer;


pub use analyzer::{analyze, plan_with_limit, Classification, QueryPlan, FORBIDDEN_KEYWORDS};
pub use lexer::{tokenize, LexError, Token, TokenKind};
