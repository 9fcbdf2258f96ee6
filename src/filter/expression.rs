//! Compiled filter expressions.

use crate::filter::leaf::{Leaf, MatchOptions, Subject};
use crate::filter::lexer::{tokenize, Template};
use crate::filter::parser::{parse, Expr};
use crate::filter::FilterError;
use crate::message::Message;

/// A filter string compiled once and evaluated against many Messages.
///
/// Display filters, exclude lists and breakpoints all go through this type.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    source: String,
    options: MatchOptions,
    template: Template,
    expr: Option<Expr>,
    leaves: Vec<Leaf>,
}

impl FilterExpression {
    pub fn compile(source: &str, options: MatchOptions) -> Result<Self, FilterError> {
        let template = tokenize(source)?;
        let expr = parse(&template.tokens)?;
        let leaves = template
            .leaves
            .iter()
            .map(|text| Leaf::new(text, options))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: source.to_string(),
            options,
            template,
            expr,
            leaves,
        })
    }

    /// Filter that matches everything.
    pub fn empty() -> Self {
        Self {
            source: String::new(),
            options: MatchOptions::default(),
            template: Template::default(),
            expr: None,
            leaves: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    /// Evaluate against one Message. Each leaf is tested at most once.
    pub fn matches(&self, message: &Message) -> bool {
        let Some(expr) = &self.expr else {
            return true;
        };
        let subject = Subject::new(message);
        let mut results: Vec<Option<bool>> = vec![None; self.leaves.len()];
        expr.eval(&mut |i| *results[i].get_or_insert_with(|| self.leaves[i].matches(&subject)))
    }
}

impl Default for FilterExpression {
    fn default() -> Self {
        Self::empty()
    }
}
