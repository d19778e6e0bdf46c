//! Card filter conditions used by aggregates.
//!
//! Grammar (keywords are case-insensitive):
//! ```text
//! or      := and ('OR' and)*
//! and     := unary ('AND' unary)*
//! unary   := 'NOT' unary | primary
//! primary := '(' or ')'
//!          | 'FROM' 'TREE' name
//!          | 'TAGGED' 'WITH' name
//!          | name 'IS' ['NOT'] 'NULL'
//!          | name ['NOT'] 'IN' '(' operand (',' operand)* ')'
//!          | name op operand
//! op      := '=' | '!=' | '<>' | '<' | '<=' | '>' | '>='
//! operand := 'TODAY' | 'CURRENT' 'USER' | 'THIS' 'CARD' | 'NULL' | name
//! ```

use super::{ConditionError, ConditionResult};
use crate::model::card::CardId;
use crate::model::project::ProjectState;
use crate::model::property::{PropertyDefinition, PropertyKind};
use crate::model::value::{parse_date, CardValue};
use crate::numeric::Number;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Pseudo-property comparing the card type name.
pub const TYPE_PSEUDO_PROPERTY: &str = "type";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(String),
    Today,
    CurrentUser,
    ThisCard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpr {
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Compare {
        property: String,
        op: CompareOp,
        operand: Operand,
    },
    In {
        property: String,
        operands: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        property: String,
        negated: bool,
    },
    FromTree(String),
    TaggedWith(String),
}

/// Whether a condition is evaluated against current data or a past snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationContext {
    Live,
    Historical,
}

/// Constructs whose meaning depends on "now" or on live card state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveOnlyConstruct {
    Today,
    CurrentUser,
    ThisCard,
    FromTree,
    TaggedWith,
}

impl LiveOnlyConstruct {
    pub fn name(self) -> &'static str {
        match self {
            Self::Today => "TODAY",
            Self::CurrentUser => "CURRENT USER",
            Self::ThisCard => "THIS CARD",
            Self::FromTree => "FROM TREE",
            Self::TaggedWith => "TAGGED WITH",
        }
    }
}

/// Diagnostic for a construct that is invalid in the evaluation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionViolation {
    pub construct: LiveOnlyConstruct,
    pub message: String,
}

impl Display for ConditionViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parsed condition keeping its source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: ConditionExpr,
}

impl TryFrom<String> for Condition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.source
    }
}

/// Inputs a condition needs beyond the card itself.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEnv<'a> {
    pub project: &'a ProjectState,
    /// Card the condition is evaluated on behalf of (aggregate scoping card).
    pub this_card: Option<CardId>,
    pub today: NaiveDate,
    pub current_user: Option<&'a str>,
}

impl Condition {
    pub fn parse(source: impl Into<String>) -> ConditionResult<Self> {
        let source = source.into();
        let tokens = tokenize(&source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Parse {
                position: 0,
                message: "condition must not be blank".to_string(),
            });
        }
        let mut parser = Parser {
            tokens,
            cursor: 0,
            source_len: source.len(),
            depth: 0,
        };
        let (expr, _) = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::Parse {
                position: token.position,
                message: format!("unexpected {}", token.describe()),
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &ConditionExpr {
        &self.expr
    }

    /// Property names used as comparison operands (excluding `type`).
    pub fn referenced_properties(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut stack = vec![&self.expr];
        while let Some(expr) = stack.pop() {
            let name = match expr {
                ConditionExpr::And(left, right) | ConditionExpr::Or(left, right) => {
                    stack.push(right);
                    stack.push(left);
                    continue;
                }
                ConditionExpr::Not(inner) => {
                    stack.push(inner);
                    continue;
                }
                ConditionExpr::Compare { property, .. }
                | ConditionExpr::In { property, .. }
                | ConditionExpr::IsNull { property, .. } => property,
                ConditionExpr::FromTree(_) | ConditionExpr::TaggedWith(_) => continue,
            };
            if name.eq_ignore_ascii_case(TYPE_PSEUDO_PROPERTY) {
                continue;
            }
            if !names.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn references(&self, property: &str) -> bool {
        let wanted = property.trim();
        self.referenced_properties()
            .iter()
            .any(|name| name.eq_ignore_ascii_case(wanted))
    }

    /// Live-only constructs in source order.
    pub fn live_only_constructs(&self) -> Vec<LiveOnlyConstruct> {
        let mut found = Vec::new();
        collect_live_only(&self.expr, &mut found);
        found
    }

    /// Static check of the parsed condition against an evaluation context.
    pub fn violations(&self, context: EvaluationContext) -> Vec<ConditionViolation> {
        if context == EvaluationContext::Live {
            return Vec::new();
        }
        self.live_only_constructs()
            .into_iter()
            .map(|construct| ConditionViolation {
                construct,
                message: format!(
                    "{} is not supported in a historical condition",
                    construct.name()
                ),
            })
            .collect()
    }

    pub fn validate_for(&self, context: EvaluationContext) -> ConditionResult<()> {
        let violations = self.violations(context);
        if violations.is_empty() {
            return Ok(());
        }
        Err(ConditionError::DisallowedConstructs(violations))
    }

    /// Evaluates the condition for `card`.
    pub fn matches(&self, env: &ConditionEnv<'_>, card: CardId) -> bool {
        eval(&self.expr, env, card)
    }
}

fn collect_live_only(expr: &ConditionExpr, found: &mut Vec<LiveOnlyConstruct>) {
    let operand_construct = |operand: &Operand| match operand {
        Operand::Today => Some(LiveOnlyConstruct::Today),
        Operand::CurrentUser => Some(LiveOnlyConstruct::CurrentUser),
        Operand::ThisCard => Some(LiveOnlyConstruct::ThisCard),
        Operand::Literal(_) => None,
    };
    match expr {
        ConditionExpr::And(left, right) | ConditionExpr::Or(left, right) => {
            collect_live_only(left, found);
            collect_live_only(right, found);
        }
        ConditionExpr::Not(inner) => collect_live_only(inner, found),
        ConditionExpr::Compare { operand, .. } => found.extend(operand_construct(operand)),
        ConditionExpr::In { operands, .. } => {
            found.extend(operands.iter().filter_map(operand_construct))
        }
        ConditionExpr::IsNull { .. } => {}
        ConditionExpr::FromTree(_) => found.push(LiveOnlyConstruct::FromTree),
        ConditionExpr::TaggedWith(_) => found.push(LiveOnlyConstruct::TaggedWith),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Comparable {
    Number(Number),
    Date(NaiveDate),
    Text(String),
    Card(CardId),
    /// Managed text value ordered by position.
    Position(u32),
}

fn eval(expr: &ConditionExpr, env: &ConditionEnv<'_>, card: CardId) -> bool {
    match expr {
        ConditionExpr::And(left, right) => eval(left, env, card) && eval(right, env, card),
        ConditionExpr::Or(left, right) => eval(left, env, card) || eval(right, env, card),
        ConditionExpr::Not(inner) => !eval(inner, env, card),
        ConditionExpr::Compare {
            property,
            op,
            operand,
        } => compare(env, card, property, *op, operand),
        ConditionExpr::In {
            property,
            operands,
            negated,
        } => {
            let any = operands
                .iter()
                .any(|operand| compare(env, card, property, CompareOp::Eq, operand));
            any != *negated
        }
        ConditionExpr::IsNull { property, negated } => {
            let is_null = if property.eq_ignore_ascii_case(TYPE_PSEUDO_PROPERTY) {
                false
            } else {
                match env.project.property_by_name(property) {
                    Some(definition) => card_side(env, definition, card).is_none(),
                    None => true,
                }
            };
            is_null != *negated
        }
        ConditionExpr::FromTree(name) => env
            .project
            .tree_by_name(name)
            .is_some_and(|tree| env.project.belonging(tree.id, card).is_some()),
        ConditionExpr::TaggedWith(tag) => env
            .project
            .card(card)
            .is_some_and(|stored| stored.has_tag(tag)),
    }
}

fn compare(
    env: &ConditionEnv<'_>,
    card: CardId,
    property: &str,
    op: CompareOp,
    operand: &Operand,
) -> bool {
    if property.eq_ignore_ascii_case(TYPE_PSEUDO_PROPERTY) {
        let Some(stored) = env.project.card(card) else {
            return false;
        };
        let type_name = env.project.card_type_name(stored.card_type);
        let equal = matches!(operand, Operand::Literal(text) if text.eq_ignore_ascii_case(&type_name));
        return match op {
            CompareOp::Eq => equal,
            CompareOp::NotEq => !equal,
            _ => false,
        };
    }

    let Some(definition) = env.project.property_by_name(property) else {
        return false;
    };
    let left = card_side(env, definition, card);
    let right = operand_side(env, definition, operand);
    match (left, right) {
        (Some(left), Some(right)) => match ordering(&left, &right) {
            Some(order) => match op {
                CompareOp::Eq => order == Ordering::Equal,
                CompareOp::NotEq => order != Ordering::Equal,
                CompareOp::Lt => order == Ordering::Less,
                CompareOp::Lte => order != Ordering::Greater,
                CompareOp::Gt => order == Ordering::Greater,
                CompareOp::Gte => order != Ordering::Less,
            },
            None => op == CompareOp::NotEq,
        },
        _ => op == CompareOp::NotEq,
    }
}

fn ordering(left: &Comparable, right: &Comparable) -> Option<Ordering> {
    match (left, right) {
        (Comparable::Number(l), Comparable::Number(r)) => Some(l.cmp(r)),
        (Comparable::Date(l), Comparable::Date(r)) => Some(l.cmp(r)),
        (Comparable::Position(l), Comparable::Position(r)) => Some(l.cmp(r)),
        (Comparable::Text(l), Comparable::Text(r)) => {
            Some(l.to_lowercase().cmp(&r.to_lowercase()))
        }
        (Comparable::Card(l), Comparable::Card(r)) => {
            if l == r {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn card_side(
    env: &ConditionEnv<'_>,
    definition: &PropertyDefinition,
    card: CardId,
) -> Option<Comparable> {
    Some(match definition.value_for(env.project, card)? {
        CardValue::Number(number) => Comparable::Number(number),
        CardValue::Date(date) => Comparable::Date(date),
        CardValue::Text(text) => Comparable::Text(text),
        CardValue::Card(card) => Comparable::Card(card),
        CardValue::Position(position) => Comparable::Position(position),
    })
}

fn operand_side(
    env: &ConditionEnv<'_>,
    definition: &PropertyDefinition,
    operand: &Operand,
) -> Option<Comparable> {
    match operand {
        Operand::Today => Some(Comparable::Date(env.today)),
        Operand::CurrentUser => env
            .current_user
            .map(|user| Comparable::Text(user.to_string())),
        Operand::ThisCard => env.this_card.map(Comparable::Card),
        Operand::Literal(text) => match &definition.kind {
            PropertyKind::Enumerated { numeric: false, .. } => definition
                .find_enum_value(text, env.project.precision)
                .map(|value| Comparable::Position(value.position)),
            PropertyKind::FreeText => Some(Comparable::Text(text.clone())),
            PropertyKind::Date => parse_date(text).map(Comparable::Date),
            PropertyKind::CardRelationship | PropertyKind::TreeRelationship { .. } => {
                resolve_card_literal(env.project, text).map(Comparable::Card)
            }
            PropertyKind::Formula { .. } => Number::parse(text)
                .map(Comparable::Number)
                .or_else(|| parse_date(text).map(Comparable::Date)),
            _ => Number::parse(text).map(Comparable::Number),
        },
    }
}

/// Resolves `#12`, `12` or a card name to a card id.
pub fn resolve_card_literal(project: &ProjectState, text: &str) -> Option<CardId> {
    let trimmed = text.trim();
    let numeric = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if let Ok(number) = numeric.parse::<u32>() {
        if let Some(card) = project.card_by_number(number) {
            return Some(card.id);
        }
    }
    project.card_by_name(trimmed).map(|card| card.id)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl Token {
    fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Word(word) => format!("`{word}`"),
            TokenKind::Quoted(text) => format!("'{text}'"),
            TokenKind::Op(_) => "comparison operator".to_string(),
            TokenKind::LParen => "`(`".to_string(),
            TokenKind::RParen => "`)`".to_string(),
            TokenKind::Comma => "`,`".to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

const RESERVED_WORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "null", "today", "current", "this", "from", "tagged",
];

fn tokenize(source: &str) -> ConditionResult<Vec<Token>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let (position, ch) = chars[index];
        let next = chars.get(index + 1).map(|(_, c)| *c);
        let (kind, width) = match (ch, next) {
            (c, _) if c.is_whitespace() => {
                index += 1;
                continue;
            }
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('=', _) => (TokenKind::Op(CompareOp::Eq), 1),
            ('!', Some('=')) => (TokenKind::Op(CompareOp::NotEq), 2),
            ('<', Some('>')) => (TokenKind::Op(CompareOp::NotEq), 2),
            ('<', Some('=')) => (TokenKind::Op(CompareOp::Lte), 2),
            ('<', _) => (TokenKind::Op(CompareOp::Lt), 1),
            ('>', Some('=')) => (TokenKind::Op(CompareOp::Gte), 2),
            ('>', _) => (TokenKind::Op(CompareOp::Gt), 1),
            ('\'', _) | ('"', _) => {
                let start = index + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != ch {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ConditionError::Parse {
                        position,
                        message: "unterminated quoted value".to_string(),
                    });
                }
                let text: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                tokens.push(Token {
                    kind: TokenKind::Quoted(text),
                    position,
                });
                index = end + 1;
                continue;
            }
            ('!', _) => {
                return Err(ConditionError::Parse {
                    position,
                    message: "unexpected `!`".to_string(),
                })
            }
            _ => {
                let start = index;
                let mut end = index;
                while end < chars.len() && !is_word_boundary(chars[end].1) {
                    end += 1;
                }
                let word: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                tokens.push(Token {
                    kind: TokenKind::Word(word),
                    position,
                });
                index = end;
                continue;
            }
        };
        tokens.push(Token { kind, position });
        index += width;
    }
    Ok(tokens)
}

fn is_word_boundary(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | '=' | '!' | '<' | '>' | '\'' | '"')
}

/// Deepest condition tree accepted, counting parentheses, `NOT` and
/// `AND`/`OR` operators.
pub const MAX_CONDITION_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    source_len: usize,
    depth: usize,
}

/// Parsed subtree with its height.
type Node = (ConditionExpr, usize);

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> ConditionResult<Token> {
        let token = self.tokens.get(self.cursor).cloned().ok_or(ConditionError::Parse {
            position: self.source_len,
            message: "condition ended unexpectedly".to_string(),
        })?;
        self.cursor += 1;
        Ok(token)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_keyword(keyword)) {
            self.cursor += 1;
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> ConditionResult<()> {
        let token = self.next()?;
        if token.is_keyword(keyword) {
            return Ok(());
        }
        Err(ConditionError::Parse {
            position: token.position,
            message: format!(
                "expected `{}` but found {}",
                keyword.to_uppercase(),
                token.describe()
            ),
        })
    }

    fn expect(&mut self, kind: TokenKind) -> ConditionResult<()> {
        let token = self.next()?;
        if token.kind == kind {
            return Ok(());
        }
        Err(ConditionError::Parse {
            position: token.position,
            message: format!("unexpected {}", token.describe()),
        })
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.source_len, |token| token.position)
    }

    fn too_deep(position: usize) -> ConditionError {
        ConditionError::NestingTooDeep {
            position,
            limit: MAX_CONDITION_DEPTH,
        }
    }

    fn descend(&mut self, position: usize) -> ConditionResult<()> {
        self.depth += 1;
        if self.depth > MAX_CONDITION_DEPTH {
            return Err(Self::too_deep(position));
        }
        Ok(())
    }

    fn joined(left: usize, right: usize, position: usize) -> ConditionResult<usize> {
        let height = left.max(right) + 1;
        if height > MAX_CONDITION_DEPTH {
            return Err(Self::too_deep(position));
        }
        Ok(height)
    }

    fn or(&mut self) -> ConditionResult<Node> {
        let (mut left, mut height) = self.and()?;
        loop {
            let position = self.position();
            if !self.eat_keyword("or") {
                return Ok((left, height));
            }
            let (right, right_height) = self.and()?;
            height = Self::joined(height, right_height, position)?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
    }

    fn and(&mut self) -> ConditionResult<Node> {
        let (mut left, mut height) = self.unary()?;
        loop {
            let position = self.position();
            if !self.eat_keyword("and") {
                return Ok((left, height));
            }
            let (right, right_height) = self.unary()?;
            height = Self::joined(height, right_height, position)?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> ConditionResult<Node> {
        let position = self.position();
        if self.eat_keyword("not") {
            self.descend(position)?;
            let (inner, height) = self.unary()?;
            self.depth -= 1;
            let height = Self::joined(height, 0, position)?;
            return Ok((ConditionExpr::Not(Box::new(inner)), height));
        }
        self.primary()
    }

    fn primary(&mut self) -> ConditionResult<Node> {
        if matches!(self.peek().map(|token| &token.kind), Some(TokenKind::LParen)) {
            let position = self.position();
            self.cursor += 1;
            self.descend(position)?;
            let inner = self.or()?;
            self.depth -= 1;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        Ok((self.comparison()?, 1))
    }

    fn comparison(&mut self) -> ConditionResult<ConditionExpr> {
        if self.eat_keyword("from") {
            self.expect_keyword("tree")?;
            return Ok(ConditionExpr::FromTree(self.name()?));
        }
        if self.eat_keyword("tagged") {
            self.expect_keyword("with")?;
            return Ok(ConditionExpr::TaggedWith(self.name()?));
        }

        let property = self.name()?;
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            self.expect_keyword("null")?;
            return Ok(ConditionExpr::IsNull { property, negated });
        }
        let negated_in = self.eat_keyword("not");
        if self.eat_keyword("in") {
            self.expect(TokenKind::LParen)?;
            let mut operands = vec![self.operand()?];
            loop {
                let token = self.next()?;
                match token.kind {
                    TokenKind::Comma => operands.push(self.operand()?),
                    TokenKind::RParen => break,
                    _ => {
                        return Err(ConditionError::Parse {
                            position: token.position,
                            message: format!("unexpected {}", token.describe()),
                        })
                    }
                }
            }
            return Ok(ConditionExpr::In {
                property,
                operands,
                negated: negated_in,
            });
        }
        if negated_in {
            let position = self.peek().map_or(self.source_len, |token| token.position);
            return Err(ConditionError::Parse {
                position,
                message: "expected `IN` after `NOT`".to_string(),
            });
        }

        let token = self.next()?;
        let TokenKind::Op(op) = token.kind else {
            return Err(ConditionError::Parse {
                position: token.position,
                message: format!("expected comparison operator but found {}", token.describe()),
            });
        };
        if self.eat_keyword("null") {
            return match op {
                CompareOp::Eq => Ok(ConditionExpr::IsNull {
                    property,
                    negated: false,
                }),
                CompareOp::NotEq => Ok(ConditionExpr::IsNull {
                    property,
                    negated: true,
                }),
                _ => Err(ConditionError::Parse {
                    position: token.position,
                    message: "NULL only supports `=` and `!=`".to_string(),
                }),
            };
        }
        let operand = self.operand()?;
        Ok(ConditionExpr::Compare {
            property,
            op,
            operand,
        })
    }

    fn name(&mut self) -> ConditionResult<String> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Quoted(text) => Ok(text.trim().to_string()),
            TokenKind::Word(word)
                if !RESERVED_WORDS
                    .iter()
                    .any(|reserved| word.eq_ignore_ascii_case(reserved)) =>
            {
                Ok(word)
            }
            _ => Err(ConditionError::Parse {
                position: token.position,
                message: format!("expected a name but found {}", token.describe()),
            }),
        }
    }

    fn operand(&mut self) -> ConditionResult<Operand> {
        if self.eat_keyword("today") {
            return Ok(Operand::Today);
        }
        if self.eat_keyword("current") {
            self.expect_keyword("user")?;
            return Ok(Operand::CurrentUser);
        }
        if self.eat_keyword("this") {
            self.expect_keyword("card")?;
            return Ok(Operand::ThisCard);
        }
        Ok(Operand::Literal(self.name()?))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CompareOp, Condition, ConditionExpr, EvaluationContext, LiveOnlyConstruct, Operand,
        MAX_CONDITION_DEPTH,
    };
    use crate::aggregate::ConditionError;

    #[test]
    fn deep_nesting_is_a_condition_error() {
        let parens = format!("{}status = Done{}", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(
            Condition::parse(parens),
            Err(ConditionError::NestingTooDeep {
                limit: MAX_CONDITION_DEPTH,
                ..
            })
        ));

        let negations = format!("{}status = Done", "NOT ".repeat(20_000));
        assert!(matches!(
            Condition::parse(negations),
            Err(ConditionError::NestingTooDeep { .. })
        ));

        let chain = vec!["size = 1"; 20_000].join(" OR ");
        assert!(matches!(
            Condition::parse(chain),
            Err(ConditionError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn moderate_nesting_parses() {
        let source = format!("{}status = Done{} AND NOT size = 3", "(".repeat(50), ")".repeat(50));
        assert!(Condition::parse(source).is_ok());
    }

    #[test]
    fn parses_boolean_structure_with_precedence() {
        let condition = Condition::parse("Type = Story AND (Status = Done OR Size >= 3)").unwrap();
        let ConditionExpr::And(left, right) = condition.expr() else {
            panic!("expected AND at the root");
        };
        assert!(matches!(
            left.as_ref(),
            ConditionExpr::Compare { op: CompareOp::Eq, operand: Operand::Literal(value), .. }
                if value == "Story"
        ));
        assert!(matches!(right.as_ref(), ConditionExpr::Or(_, _)));
        assert_eq!(condition.referenced_properties(), vec!["Status", "Size"]);
    }

    #[test]
    fn parses_null_and_membership_forms() {
        let condition =
            Condition::parse("'dev size' IS NOT NULL AND Status NOT IN (New, 'In Progress')")
                .unwrap();
        let ConditionExpr::And(left, right) = condition.expr() else {
            panic!("expected AND at the root");
        };
        assert!(matches!(
            left.as_ref(),
            ConditionExpr::IsNull { negated: true, .. }
        ));
        assert!(matches!(
            right.as_ref(),
            ConditionExpr::In { negated: true, operands, .. } if operands.len() == 2
        ));
        assert!(matches!(
            Condition::parse("Owner != NULL").unwrap().expr(),
            ConditionExpr::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn historical_context_names_each_live_only_construct() {
        let condition = Condition::parse(
            "'due date' < TODAY AND Owner = CURRENT USER AND Related = THIS CARD \
             AND FROM TREE Planning AND TAGGED WITH urgent",
        )
        .unwrap();

        assert!(condition.violations(EvaluationContext::Live).is_empty());
        let violations = condition.violations(EvaluationContext::Historical);
        let constructs: Vec<LiveOnlyConstruct> =
            violations.iter().map(|violation| violation.construct).collect();
        assert_eq!(
            constructs,
            vec![
                LiveOnlyConstruct::Today,
                LiveOnlyConstruct::CurrentUser,
                LiveOnlyConstruct::ThisCard,
                LiveOnlyConstruct::FromTree,
                LiveOnlyConstruct::TaggedWith,
            ]
        );
        assert!(violations[0].message.contains("TODAY"));
        assert!(matches!(
            condition.validate_for(EvaluationContext::Historical),
            Err(ConditionError::DisallowedConstructs(found)) if found.len() == 5
        ));
    }

    #[test]
    fn reports_malformed_conditions() {
        for source in ["", "Status =", "Status Done", "(Status = Done", "Status NOT Done"] {
            assert!(
                matches!(Condition::parse(source), Err(ConditionError::Parse { .. })),
                "expected parse error for `{source}`"
            );
        }
    }
}
