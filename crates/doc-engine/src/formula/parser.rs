//! Recursive-descent parser producing [`Expr`] trees.

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp};
use crate::formula::engine::MAX_DEPTH;
use crate::formula::lexer::{Token, TokenKind, tokenize, unquote};

pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        nesting: 0,
    };
    if parser.tokens.is_empty() {
        return Err(parser.error("empty formula"));
    }
    let expr = parser.expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected token after expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    /// Open sub-expressions and prefix operators on the call stack.
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> Option<TokenKind> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|token| token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end, |token| token.offset)
    }

    fn error(&self, message: &str) -> FormulaError {
        let found = self
            .tokens
            .get(self.pos)
            .map_or_else(|| "end of input".to_string(), |token| format!("'{}'", token.lexeme));
        FormulaError::Syntax {
            message: format!("{} (found {})", message, found),
            position: self.position(),
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<(), FormulaError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        if self.nesting >= MAX_DEPTH {
            return Err(self.error("formula is nested too deeply"));
        }
        self.nesting += 1;
        Ok(())
    }

    /// Rejects trees the evaluator could not walk within its depth limit.
    fn bounded(&self, expr: Expr) -> Result<Expr, FormulaError> {
        if expr.height() > MAX_DEPTH {
            Err(self.error("formula is nested too deeply"))
        } else {
            Ok(expr)
        }
    }

    fn expression(&mut self) -> Result<Expr, FormulaError> {
        self.enter()?;
        let expr = self.binary_level(0)?;
        self.nesting -= 1;
        self.bounded(expr)
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr, FormulaError> {
        const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
            &[(TokenKind::OrOr, BinaryOp::Or)],
            &[(TokenKind::AndAnd, BinaryOp::And)],
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::Ne)],
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::LtEq, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::GtEq, BinaryOp::Ge),
            ],
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        ];
        let Some(operators) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut left = self.binary_level(level + 1)?;
        while let Some(kind) = self.peek() {
            let Some((_, op)) = operators.iter().find(|(token, _)| *token == kind) else {
                break;
            };
            self.pos += 1;
            let right = self.binary_level(level + 1)?;
            left = self.bounded(Expr::Binary {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            })?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let op = match self.peek() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Bang) => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let expr = self.unary()?;
        self.nesting -= 1;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(TokenKind::RBracket, "expected ']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek() == Some(TokenKind::Dot) {
                self.pos += 1;
                let segments = self.member_segments()?;
                expr = match expr {
                    Expr::Reference(mut path) => {
                        path.extend(segments);
                        Expr::Reference(path)
                    }
                    other => segments.into_iter().fold(other, |target, name| Expr::Member {
                        target: Box::new(target),
                        name,
                    }),
                };
            } else {
                return Ok(expr);
            }
            expr = self.bounded(expr)?;
        }
    }

    /// Segments after a `.`: an identifier, or a number token which may
    /// itself span two segments (`rows.0.1` lexes `0.1` as one number).
    fn member_segments(&mut self) -> Result<Vec<String>, FormulaError> {
        match self.peek() {
            Some(TokenKind::Ident | TokenKind::True | TokenKind::False | TokenKind::Null) => {
                let token = self.advance().ok_or_else(|| self.error("expected property"))?;
                Ok(vec![token.lexeme])
            }
            Some(TokenKind::Number) => {
                let token = self.advance().ok_or_else(|| self.error("expected property"))?;
                Ok(token.lexeme.split('.').map(str::to_string).collect())
            }
            _ => Err(self.error("expected property name after '.'")),
        }
    }

    fn lambda_ahead(&self) -> bool {
        let mut offset = 1;
        if self.peek_at(offset) == Some(TokenKind::RParen) {
            return self.peek_at(offset + 1) == Some(TokenKind::Arrow);
        }
        loop {
            if self.peek_at(offset) != Some(TokenKind::Ident) {
                return false;
            }
            offset += 1;
            match self.peek_at(offset) {
                Some(TokenKind::Comma) => offset += 1,
                Some(TokenKind::RParen) => return self.peek_at(offset + 1) == Some(TokenKind::Arrow),
                _ => return false,
            }
        }
    }

    fn lambda(&mut self) -> Result<Expr, FormulaError> {
        self.expect(TokenKind::LParen, "expected '('")?;
        let mut params = Vec::new();
        while let Some(TokenKind::Ident) = self.peek() {
            if let Some(token) = self.advance() {
                params.push(token.lexeme);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after lambda parameters")?;
        self.expect(TokenKind::Arrow, "expected '->'")?;
        let body = self.expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn arguments(&mut self, close: TokenKind) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(TokenKind::Comma) {
                if self.eat(close) {
                    return Ok(args);
                }
                continue;
            }
            if self.eat(close) {
                return Ok(args);
            }
            return Err(self.error("expected ',' or closing bracket"));
        }
    }

    fn reference_path(&mut self, head: String) -> Result<Vec<String>, FormulaError> {
        let mut path = vec![head];
        while self.peek() == Some(TokenKind::Dot)
            && matches!(
                self.peek_at(1),
                Some(TokenKind::Ident | TokenKind::Number | TokenKind::True | TokenKind::False | TokenKind::Null)
            )
        {
            self.pos += 1;
            path.extend(self.member_segments()?);
        }
        Ok(path)
    }

    fn object_or_brace_reference(&mut self) -> Result<Expr, FormulaError> {
        let is_object = self.peek() == Some(TokenKind::RBrace)
            || (matches!(self.peek(), Some(TokenKind::Ident | TokenKind::Text))
                && self.peek_at(1) == Some(TokenKind::Colon));
        if !is_object {
            let head = match self.advance() {
                Some(token) if token.kind == TokenKind::Ident => token.lexeme,
                _ => return Err(self.error("expected field reference inside '{}'")),
            };
            let path = self.reference_path(head)?;
            self.expect(TokenKind::RBrace, "expected '}'")?;
            return Ok(Expr::Reference(path));
        }
        let mut entries = Vec::new();
        loop {
            if self.eat(TokenKind::RBrace) {
                return Ok(Expr::Object(entries));
            }
            let key = match self.advance() {
                Some(token) if token.kind == TokenKind::Ident => token.lexeme,
                Some(token) if token.kind == TokenKind::Text => unquote(&token.lexeme),
                _ => return Err(self.error("expected object key")),
            };
            self.expect(TokenKind::Colon, "expected ':' after object key")?;
            entries.push((key, self.expression()?));
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RBrace, "expected ',' or '}'")?;
                return Ok(Expr::Object(entries));
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let Some(kind) = self.peek() else {
            return Err(self.error("unexpected end of formula"));
        };
        match kind {
            TokenKind::LParen if self.lambda_ahead() => self.lambda(),
            TokenKind::LParen => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect(TokenKind::RParen, "expected ')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.pos += 1;
                Ok(Expr::Array(self.arguments(TokenKind::RBracket)?))
            }
            TokenKind::LBrace => {
                self.pos += 1;
                self.object_or_brace_reference()
            }
            TokenKind::Number => {
                let position = self.position();
                let token = self.advance().ok_or_else(|| self.error("expected number"))?;
                token
                    .lexeme
                    .parse::<f64>()
                    .map(Expr::Number)
                    .map_err(|_| FormulaError::Syntax {
                        message: format!("invalid number '{}'", token.lexeme),
                        position,
                    })
            }
            TokenKind::Text => {
                let token = self.advance().ok_or_else(|| self.error("expected string"))?;
                Ok(Expr::Text(unquote(&token.lexeme)))
            }
            TokenKind::True => {
                self.pos += 1;
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.pos += 1;
                Ok(Expr::Bool(false))
            }
            TokenKind::Null => {
                self.pos += 1;
                Ok(Expr::Null)
            }
            TokenKind::Ident => {
                let token = self.advance().ok_or_else(|| self.error("expected identifier"))?;
                if self.peek() == Some(TokenKind::Arrow) {
                    self.pos += 1;
                    let body = self.expression()?;
                    return Ok(Expr::Lambda {
                        params: vec![token.lexeme],
                        body: Box::new(body),
                    });
                }
                if self.eat(TokenKind::LParen) {
                    let args = self.arguments(TokenKind::RParen)?;
                    return Ok(Expr::Call {
                        name: token.lexeme,
                        args,
                    });
                }
                Ok(Expr::Reference(self.reference_path(token.lexeme)?))
            }
            _ => Err(self.error("unexpected token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &[&str]) -> Expr {
        Expr::Reference(path.iter().map(|segment| segment.to_string()).collect())
    }

    #[test]
    fn respects_precedence() {
        let expr = parse("a + b * 2").expect("parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(reference(&["a"])),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(reference(&["b"])),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn parses_paths_and_indexes() {
        assert_eq!(
            parse("products.0.price").expect("parse"),
            reference(&["products", "0", "price"])
        );
        assert_eq!(parse("rows.0.1").expect("parse"), reference(&["rows", "0", "1"]));
        assert_eq!(parse("{field1}").expect("parse"), reference(&["field1"]));
        assert!(matches!(
            parse("items[1].name").expect("parse"),
            Expr::Member { name, .. } if name == "name"
        ));
    }

    #[test]
    fn parses_lambdas_and_objects() {
        let expr = parse("sum(map([{ value: fieldB }, { value: fieldC }], (arg) -> arg.value))")
            .expect("parse");
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "sum");
        let Expr::Call { args: map_args, .. } = &args[0] else {
            panic!("expected map call");
        };
        assert!(matches!(&map_args[0], Expr::Array(items) if items.len() == 2));
        assert!(matches!(&map_args[1], Expr::Lambda { params, .. } if params == &["arg".to_string()]));

        assert!(matches!(
            parse("reduce(xs, (acc, x) → acc + x, 0)").expect("parse"),
            Expr::Call { args, .. } if matches!(&args[1], Expr::Lambda { params, .. } if params.len() == 2)
        ));
    }

    #[test]
    fn grouping_is_not_a_lambda() {
        assert_eq!(
            parse("(a)").expect("parse"),
            reference(&["a"])
        );
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(matches!(parse("1 +"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("(1"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse(""), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("a b"), Err(FormulaError::Syntax { .. })));
    }

    #[test]
    fn references_skip_lambda_parameters() {
        let expr = parse("map(items, (item) -> item.price * rate)").expect("parse");
        let names: Vec<String> = expr.references().into_iter().collect();
        assert_eq!(names, vec!["items".to_string(), "rate".to_string()]);

        let nested = parse("if(not(empty(sum([fieldB, 5]))), 1, 0)").expect("parse");
        assert!(nested.references().contains("fieldB"));
    }

    #[test]
    fn deeply_nested_formulas_are_rejected() {
        let parens = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(parse(&parens), Err(FormulaError::Syntax { .. })));

        let negations = format!("{}1", "-".repeat(5000));
        assert!(matches!(parse(&negations), Err(FormulaError::Syntax { .. })));

        let chain = vec!["1"; 5000].join(" + ");
        assert!(matches!(parse(&chain), Err(FormulaError::Syntax { .. })));

        let members = format!("a{}", ".b".repeat(5000));
        assert!(parse(&members).is_ok());
        let indexes = format!("a{}", "[0]".repeat(5000));
        assert!(matches!(parse(&indexes), Err(FormulaError::Syntax { .. })));

        let moderate = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(parse(&moderate), Ok(Expr::Number(1.0)));
    }
}
