//! Filter string tokenization.
//!
//! Turns a human filter such as `GET /api AND NOT (status:>=500 || -health)`
//! into a template of numbered leaf placeholders and connectives:
//! `0 && !(1 || !2)` with leaves `["GET /api", "status:>=500", "health"]`.
//!
//! Rules:
//! - `AND`, `OR`, `NOT` (uppercase words) normalize to `&&`, `||`, `!`
//! - `-` at the start of an operand is `!`; inside a phrase it is text
//! - adjacent words form one phrase leaf
//! - double quotes protect operators and parentheses inside a leaf

use crate::filter::FilterError;

/// One template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Leaf(usize),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

/// Compiled token stream plus the leaf texts its placeholders refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub tokens: Vec<Token>,
    pub leaves: Vec<String>,
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut prev: Option<Token> = None;
        for token in &self.tokens {
            let tight = matches!(prev, None | Some(Token::Not) | Some(Token::LParen))
                || *token == Token::RParen;
            if !tight {
                f.write_str(" ")?;
            }
            match token {
                Token::Leaf(i) => write!(f, "{}", i)?,
                Token::And => f.write_str("&&")?,
                Token::Or => f.write_str("||")?,
                Token::Not => f.write_str("!")?,
                Token::LParen => f.write_str("(")?,
                Token::RParen => f.write_str(")")?,
            }
            prev = Some(*token);
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Lexeme {
    Word(String),
    Op(Token),
}

/// Tokenize a filter string into a template.
pub fn tokenize(filter: &str) -> Result<Template, FilterError> {
    let lexemes = scan(filter)?;

    let mut template = Template::default();
    let mut phrase: Vec<String> = Vec::new();
    for lexeme in lexemes {
        match lexeme {
            Lexeme::Word(word) => phrase.push(word),
            Lexeme::Op(op) => {
                flush_phrase(&mut phrase, &mut template);
                template.tokens.push(op);
            }
        }
    }
    flush_phrase(&mut phrase, &mut template);
    Ok(template)
}

fn flush_phrase(phrase: &mut Vec<String>, template: &mut Template) {
    if phrase.is_empty() {
        return;
    }
    template.tokens.push(Token::Leaf(template.leaves.len()));
    template.leaves.push(phrase.join(" "));
    phrase.clear();
}

fn scan(filter: &str) -> Result<Vec<Lexeme>, FilterError> {
    let chars: Vec<char> = filter.chars().collect();
    let mut out: Vec<Lexeme> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let operand_start = !matches!(out.last(), Some(Lexeme::Word(_)));

        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            out.push(Lexeme::Op(Token::LParen));
            i += 1;
        } else if c == ')' {
            out.push(Lexeme::Op(Token::RParen));
            i += 1;
        } else if c == '&' && next == Some('&') {
            out.push(Lexeme::Op(Token::And));
            i += 2;
        } else if c == '|' && next == Some('|') {
            out.push(Lexeme::Op(Token::Or));
            i += 2;
        } else if c == '!' || (c == '-' && operand_start) {
            out.push(Lexeme::Op(Token::Not));
            i += 1;
        } else if c == '"' {
            let close = chars[i + 1..]
                .iter()
                .position(|ch| *ch == '"')
                .ok_or_else(|| FilterError::InvalidSyntax {
                    position: i,
                    reason: "unterminated quote".to_string(),
                })?;
            let text: String = chars[i + 1..i + 1 + close].iter().collect();
            out.push(Lexeme::Word(text));
            i += close + 2;
        } else {
            let start = i;
            while i < chars.len() {
                let ch = chars[i];
                let after = chars.get(i + 1).copied();
                if ch.is_whitespace()
                    || ch == '('
                    || ch == ')'
                    || ch == '"'
                    || (ch == '&' && after == Some('&'))
                    || (ch == '|' && after == Some('|'))
                {
                    break;
                }
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            out.push(match word.as_str() {
                "AND" => Lexeme::Op(Token::And),
                "OR" => Lexeme::Op(Token::Or),
                "NOT" => Lexeme::Op(Token::Not),
                _ => Lexeme::Word(word),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_operators() {
        let t = tokenize("A && !B").unwrap();
        assert_eq!(t.to_string(), "0 && !1");
        assert_eq!(t.leaves, vec!["A", "B"]);
    }

    #[test]
    fn test_textual_operators_normalized() {
        let t = tokenize("GET /api AND NOT (status:>=500 OR -health)").unwrap();
        assert_eq!(t.to_string(), "0 && !(1 || !2)");
        assert_eq!(t.leaves, vec!["GET /api", "status:>=500", "health"]);
    }

    #[test]
    fn test_lowercase_words_are_text() {
        let t = tokenize("cats and dogs").unwrap();
        assert_eq!(t.leaves, vec!["cats and dogs"]);
        assert_eq!(t.tokens, vec![Token::Leaf(0)]);
    }

    #[test]
    fn test_dash_inside_phrase_is_text() {
        let t = tokenize("x-request-id a -b").unwrap();
        assert_eq!(t.leaves, vec!["x-request-id a -b"]);
    }

    #[test]
    fn test_quotes_protect_operators() {
        let t = tokenize("\"a && (b)\" || c").unwrap();
        assert_eq!(t.leaves, vec!["a && (b)", "c"]);
        assert_eq!(t.to_string(), "0 || 1");
    }

    #[test]
    fn test_unterminated_quote() {
        let err = tokenize("\"open").unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_empty_filter() {
        let t = tokenize("   ").unwrap();
        assert!(t.tokens.is_empty());
    }
}
