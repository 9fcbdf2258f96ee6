//! Recursive-descent parser over template tokens.
//!
//! Grammar (lowest precedence first):
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := LEAF | "(" or ")"
//! ```

use crate::filter::lexer::Token;
use crate::filter::FilterError;

/// Boolean expression over leaf indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Leaf(usize),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate with short-circuiting; `leaf` is asked only for leaves that
    /// decide the result.
    pub fn eval(&self, leaf: &mut dyn FnMut(usize) -> bool) -> bool {
        match self {
            Expr::Leaf(i) => leaf(*i),
            Expr::Not(inner) => !inner.eval(leaf),
            Expr::And(lhs, rhs) => lhs.eval(leaf) && rhs.eval(leaf),
            Expr::Or(lhs, rhs) => lhs.eval(leaf) || rhs.eval(leaf),
        }
    }
}

/// Parse a token stream. An empty stream yields `None` (match everything).
pub fn parse(tokens: &[Token]) -> Result<Option<Expr>, FilterError> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    if let Some(token) = parser.peek() {
        let reason = match token {
            Token::RParen => "unbalanced ')'".to_string(),
            other => format!("unexpected {:?}", other),
        };
        return Err(parser.error(reason));
    }
    Ok(Some(expr))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, reason: impl Into<String>) -> FilterError {
        FilterError::InvalidSyntax {
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn or(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.and()?;
        while self.eat(Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.unary()?;
        while self.eat(Token::And) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FilterError> {
        if self.eat(Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        match self.peek() {
            Some(Token::Leaf(i)) => {
                self.pos += 1;
                Ok(Expr::Leaf(i))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or()?;
                if !self.eat(Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                Ok(inner)
            }
            Some(Token::RParen) => Err(self.error("unbalanced ')'")),
            Some(op) => Err(self.error(format!("{:?} without left operand", op))),
            None => Err(self.error("unexpected end of filter")),
        }
    }
}
