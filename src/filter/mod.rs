//! Filter expression engine.
//!
//! # Data Flow
//! ```text
//! "GET /api AND NOT status:>=500"
//!     → lexer.rs (normalize operators, merge phrases)
//!     → Template: "0 && !1", leaves ["GET /api", "status:>=500"]
//!     → parser.rs (recursive descent → Expr)
//!     → leaf.rs (needle / key:value matchers)
//!     → FilterExpression::matches(&Message) → bool
//! ```
//!
//! # Design Decisions
//! - One engine for display filters, exclude lists and breakpoints
//! - Malformed filters are a `FilterError`, never a silent non-match
//! - No dynamic evaluation: the template is parsed into an AST
//! - Leaf results are memoized per evaluation

pub mod expression;
pub mod leaf;
pub mod lexer;
pub mod parser;

use thiserror::Error;

pub use expression::FilterExpression;
pub use leaf::MatchOptions;

/// Filter compilation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter syntax at {position}: {reason}")]
    InvalidSyntax { position: usize, reason: String },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

impl FilterError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, FilterError::InvalidSyntax { .. })
    }
}
