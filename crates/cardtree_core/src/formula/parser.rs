//! Recursive-descent parser producing the formula expression tree.
//!
//! Grammar:
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | NAME | '(' expr ')'
//! ```
//!
//! The resulting tree is at most [`MAX_NESTING_DEPTH`] levels high.

use super::lexer::{tokenize, Token, TokenKind};
use super::{FormulaError, FormulaResult};
use crate::numeric::Number;

/// Deepest expression tree the parser accepts, counting parentheses,
/// negations and operators. Evaluation recurses once per level.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Subtract => '-',
            Self::Multiply => '*',
            Self::Divide => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Number),
    /// Property reference, resolved by name at evaluation time.
    Property(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Property names in first-reference order, without duplicates.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Literal(_) => {}
                Expr::Property(name) => {
                    if !names.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                        names.push(name.clone());
                    }
                }
                Expr::Negate(inner) => stack.push(inner),
                Expr::Binary { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        names
    }
}

pub fn parse_expression(source: &str) -> FormulaResult<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(FormulaError::EmptyExpression);
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        source_len: source.len(),
        depth: 0,
    };
    let (expr, _) = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(FormulaError::UnexpectedToken {
            position: token.position,
            found: describe(&token.kind),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    source_len: usize,
    /// Open parentheses and negations on the current descent.
    depth: usize,
}

/// Parsed subtree with its height.
type Node = (Expr, usize);

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    /// Enters one level of nesting, failing past [`MAX_NESTING_DEPTH`].
    fn descend(&mut self, position: usize) -> FormulaResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(FormulaError::NestingTooDeep {
                position,
                limit: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn checked_height(height: usize, position: usize) -> FormulaResult<usize> {
        if height > MAX_NESTING_DEPTH {
            return Err(FormulaError::NestingTooDeep {
                position,
                limit: MAX_NESTING_DEPTH,
            });
        }
        Ok(height)
    }

    fn expression(&mut self) -> FormulaResult<Node> {
        let (mut left, mut height) = self.term()?;
        loop {
            let (op, position) = match self.peek() {
                Some(Token {
                    kind: TokenKind::Plus,
                    position,
                }) => (BinaryOp::Add, *position),
                Some(Token {
                    kind: TokenKind::Minus,
                    position,
                }) => (BinaryOp::Subtract, *position),
                _ => return Ok((left, height)),
            };
            self.cursor += 1;
            let (right, right_height) = self.term()?;
            height = Self::checked_height(height.max(right_height) + 1, position)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> FormulaResult<Node> {
        let (mut left, mut height) = self.unary()?;
        loop {
            let (op, position) = match self.peek() {
                Some(Token {
                    kind: TokenKind::Star,
                    position,
                }) => (BinaryOp::Multiply, *position),
                Some(Token {
                    kind: TokenKind::Slash,
                    position,
                }) => (BinaryOp::Divide, *position),
                _ => return Ok((left, height)),
            };
            self.cursor += 1;
            let (right, right_height) = self.unary()?;
            height = Self::checked_height(height.max(right_height) + 1, position)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> FormulaResult<Node> {
        if let Some(Token {
            kind: TokenKind::Minus,
            position,
        }) = self.peek()
        {
            let position = *position;
            self.cursor += 1;
            self.descend(position)?;
            let (inner, height) = self.unary()?;
            self.depth -= 1;
            let height = Self::checked_height(height + 1, position)?;
            return Ok((Expr::Negate(Box::new(inner)), height));
        }
        self.primary()
    }

    fn primary(&mut self) -> FormulaResult<Node> {
        let token = self.advance().ok_or(FormulaError::UnexpectedEnd {
            position: self.source_len,
        })?;
        match token.kind {
            TokenKind::Number(text) => Number::parse(&text)
                .map(|number| (Expr::Literal(number), 1))
                .ok_or(FormulaError::InvalidNumber {
                    position: token.position,
                    text,
                }),
            TokenKind::Name(name) => {
                if name.is_empty() {
                    return Err(FormulaError::UnexpectedToken {
                        position: token.position,
                        found: "empty property name".to_string(),
                    });
                }
                Ok((Expr::Property(name), 1))
            }
            TokenKind::LParen => {
                self.descend(token.position)?;
                let inner = self.expression()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(FormulaError::UnexpectedToken {
                        position: other.position,
                        found: describe(&other.kind),
                    }),
                    None => Err(FormulaError::UnexpectedEnd {
                        position: self.source_len,
                    }),
                }
            }
            other => Err(FormulaError::UnexpectedToken {
                position: token.position,
                found: describe(&other),
            }),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(text) => format!("number `{text}`"),
        TokenKind::Name(name) => format!("property `{name}`"),
        TokenKind::Plus => "`+`".to_string(),
        TokenKind::Minus => "`-`".to_string(),
        TokenKind::Star => "`*`".to_string(),
        TokenKind::Slash => "`/`".to_string(),
        TokenKind::LParen => "`(`".to_string(),
        TokenKind::RParen => "`)`".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_expression, BinaryOp, Expr, MAX_NESTING_DEPTH};
    use crate::formula::FormulaError;
    use crate::numeric::Number;

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_expression("1 + 2 * size").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                left,
                right,
            } => {
                assert_eq!(*left, Expr::Literal(Number::from_integer(1)));
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        op: BinaryOp::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse_expression("10 - 4 - 3").unwrap();
        let Expr::Binary { left, .. } = expr else {
            panic!("expected binary expression");
        };
        assert!(matches!(
            *left,
            Expr::Binary {
                op: BinaryOp::Subtract,
                ..
            }
        ));
    }

    #[test]
    fn collects_referenced_names_once() {
        let expr = parse_expression("'dev size' * 3 + -('Dev Size' / estimate)").unwrap();
        assert_eq!(expr.referenced_names(), vec!["dev size", "estimate"]);
    }

    #[test]
    fn deep_parentheses_are_rejected_without_recursing_further() {
        let source = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(
            parse_expression(&source).unwrap_err(),
            FormulaError::NestingTooDeep { limit: MAX_NESTING_DEPTH, .. }
        ));
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let source = vec!["1"; 20_000].join(" + ");
        assert!(matches!(
            parse_expression(&source).unwrap_err(),
            FormulaError::NestingTooDeep { .. }
        ));
        let negations = format!("{}1", "-".repeat(20_000));
        assert!(matches!(
            parse_expression(&negations).unwrap_err(),
            FormulaError::NestingTooDeep { .. }
        ));
    }

    #[test]
    fn nesting_within_the_limit_parses() {
        let source = format!("{}size{} * 2", "(".repeat(100), ")".repeat(100));
        assert!(parse_expression(&source).is_ok());
    }

    #[test]
    fn reports_structural_errors() {
        assert_eq!(
            parse_expression("").unwrap_err(),
            FormulaError::EmptyExpression
        );
        assert!(matches!(
            parse_expression("(1 + 2").unwrap_err(),
            FormulaError::UnexpectedEnd { .. }
        ));
        assert!(matches!(
            parse_expression("1 2").unwrap_err(),
            FormulaError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse_expression("1..2").unwrap_err(),
            FormulaError::InvalidNumber { .. }
        ));
    }
}
