//! Tokenizer for formula expressions.

use logos::Logos;

use crate::error::FormulaError;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    Number,
    #[regex(r#""([^"\\]|\\.)*""#)]
    #[regex(r"'([^'\\]|\\.)*'")]
    Text,
    #[token("true")]
    #[token("TRUE")]
    #[token("True")]
    True,
    #[token("false")]
    #[token("FALSE")]
    #[token("False")]
    False,
    #[token("null")]
    #[token("NULL")]
    #[token("Null")]
    Null,
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*")]
    Ident,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    #[token("=")]
    EqEq,
    #[token("!=")]
    #[token("<>")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("->")]
    #[token("→")]
    Arrow,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
}

/// A token with its byte offset and source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub lexeme: String,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                offset: span.start,
                lexeme: lexer.slice().to_string(),
            }),
            Err(()) => {
                return Err(FormulaError::Syntax {
                    message: format!("unexpected character '{}'", lexer.slice()),
                    position: span.start,
                });
            }
        }
    }
    Ok(tokens)
}

/// Strips quotes and resolves backslash escapes of a string literal.
pub fn unquote(lexeme: &str) -> String {
    let inner = &lexeme[1..lexeme.len().saturating_sub(1).max(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn tokenizes_operators_and_literals() {
        assert_eq!(
            kinds("field1 + 2.5 >= 'a'"),
            vec![
                TokenKind::Ident,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::GtEq,
                TokenKind::Text
            ]
        );
        assert_eq!(
            kinds("(x) → x"),
            vec![
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Ident
            ]
        );
        assert_eq!(kinds("TRUE"), vec![TokenKind::True]);
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(matches!(
            tokenize("a # b"),
            Err(FormulaError::Syntax { position: 2, .. })
        ));
    }

    #[test]
    fn unquotes_escapes() {
        assert_eq!(unquote(r#""a\"b""#), "a\"b");
        assert_eq!(unquote(r"'it\'s'"), "it's");
    }
}
