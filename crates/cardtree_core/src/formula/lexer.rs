//! Tokenizer for formula expressions.

use super::{FormulaError, FormulaResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Number(String),
    /// Bare (`estimate`) or quoted (`'start date'`) property name.
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source.
    pub position: usize,
}

pub fn tokenize(source: &str) -> FormulaResult<Vec<Token>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (position, ch) = chars[index];
        let simple = match ch {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = simple {
            tokens.push(Token { kind, position });
            index += 1;
            continue;
        }

        if ch.is_whitespace() {
            index += 1;
        } else if ch.is_ascii_digit() || ch == '.' {
            let start = index;
            while index < chars.len() && (chars[index].1.is_ascii_digit() || chars[index].1 == '.') {
                index += 1;
            }
            let text: String = chars[start..index].iter().map(|(_, c)| *c).collect();
            tokens.push(Token {
                kind: TokenKind::Number(text),
                position,
            });
        } else if ch == '\'' || ch == '"' {
            let quote = ch;
            let start = index + 1;
            index = start;
            while index < chars.len() && chars[index].1 != quote {
                index += 1;
            }
            if index >= chars.len() {
                return Err(FormulaError::UnterminatedQuote { position });
            }
            let name: String = chars[start..index].iter().map(|(_, c)| *c).collect();
            index += 1;
            tokens.push(Token {
                kind: TokenKind::Name(name.trim().to_string()),
                position,
            });
        } else if ch.is_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].1.is_alphanumeric() || chars[index].1 == '_')
            {
                index += 1;
            }
            let name: String = chars[start..index].iter().map(|(_, c)| *c).collect();
            tokens.push(Token {
                kind: TokenKind::Name(name),
                position,
            });
        } else {
            return Err(FormulaError::UnexpectedCharacter { position, found: ch });
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::{tokenize, TokenKind};
    use crate::formula::FormulaError;

    #[test]
    fn tokenizes_quoted_names_and_operators() {
        let tokens = tokenize("'start date' + (estimate * 2.5)").unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|token| token.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name("start date".to_string()),
                TokenKind::Plus,
                TokenKind::LParen,
                TokenKind::Name("estimate".to_string()),
                TokenKind::Star,
                TokenKind::Number("2.5".to_string()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn rejects_unterminated_quote_and_stray_symbols() {
        assert_eq!(
            tokenize("'size + 1").unwrap_err(),
            FormulaError::UnterminatedQuote { position: 0 }
        );
        assert_eq!(
            tokenize("size % 2").unwrap_err(),
            FormulaError::UnexpectedCharacter {
                position: 5,
                found: '%'
            }
        );
    }
}
