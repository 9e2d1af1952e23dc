//! Recursive descent parser with Pratt expression parsing.
//!
//! Parses condition strings (`"title like ? or authorId = ?"`), select
//! lists (`"id, MONTH(created_at) AS month"`) and order lists
//! (`"created_at desc, id"`) into [`Expr`] trees. `?` placeholders are
//! numbered left to right and bound by the caller afterwards.

use crate::ast::{BinaryOp, Direction, Expr, UnaryOp};
use crate::lexer::{Keyword, Lexer, Span, Token, TokenKind};
use crate::value::Value;

use super::ParseError;

/// Parses a single expression, requiring all input to be consumed.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    let expr = parser.expression(0)?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses a comma-separated select list with optional `AS` aliases.
pub fn parse_select_list(input: &str) -> Result<Vec<Expr>, ParseError> {
    let mut parser = Parser::new(input);
    let mut items = Vec::new();
    loop {
        let expr = parser.expression(0)?;
        let expr = if parser.eat_keyword(Keyword::As) {
            let alias = parser.expect_identifier()?;
            expr.alias(alias)
        } else if matches!(parser.peek().kind, TokenKind::Identifier(_)) {
            // Bare alias: `MONTH(created_at) month`
            let alias = parser.expect_identifier()?;
            expr.alias(alias)
        } else {
            expr
        };
        items.push(expr);
        if !parser.eat(&TokenKind::Comma) {
            break;
        }
    }
    parser.expect_eof()?;
    Ok(items)
}

/// Parses a comma-separated order list with optional ASC/DESC suffixes.
pub fn parse_order_list(input: &str) -> Result<Vec<(Expr, Direction)>, ParseError> {
    let mut parser = Parser::new(input);
    let mut items = Vec::new();
    loop {
        let expr = parser.expression(0)?;
        let direction = if parser.eat_keyword(Keyword::Desc) {
            Direction::Desc
        } else {
            parser.eat_keyword(Keyword::Asc);
            Direction::Asc
        };
        items.push((expr, direction));
        if !parser.eat(&TokenKind::Comma) {
            break;
        }
    }
    parser.expect_eof()?;
    Ok(items)
}

/// The condition parser.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    placeholders: usize,
}

impl Parser {
    /// Creates a parser over the given input.
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self {
            tokens: Lexer::new(input).tokenize(),
            pos: 0,
            placeholders: 0,
        }
    }

    /// Returns how many `?` placeholders were consumed so far.
    #[must_use]
    pub const fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ParseError::expected(what, &token.kind, token.span))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            kind => Err(ParseError::expected("identifier", &kind, self.peek().span)),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Eof => Ok(()),
            kind => Err(ParseError::unexpected(kind, self.peek().span)),
        }
    }

    /// Parses an expression with the given minimum binding power.
    pub fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.prefix()?;

        loop {
            let (op_bp, negated) = match self.peek_kind() {
                TokenKind::Keyword(Keyword::Or) | TokenKind::OrOr => (1, false),
                TokenKind::Keyword(Keyword::And) | TokenKind::AndAnd => (2, false),
                TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::LtEq
                | TokenKind::Gt
                | TokenKind::GtEq
                | TokenKind::Keyword(
                    Keyword::Is | Keyword::In | Keyword::Between | Keyword::Like,
                ) => (4, false),
                TokenKind::Keyword(Keyword::Not)
                    if matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.kind),
                        Some(TokenKind::Keyword(
                            Keyword::In | Keyword::Between | Keyword::Like
                        ))
                    ) =>
                {
                    (4, true)
                }
                TokenKind::Plus | TokenKind::Minus => (6, false),
                TokenKind::Star | TokenKind::Slash | TokenKind::Percent => (7, false),
                _ => break,
            };

            if op_bp < min_bp {
                break;
            }

            if negated {
                self.advance(); // NOT
            }
            left = self.infix(left, negated)?;
        }

        Ok(left)
    }

    /// Parses a prefix expression (literal, column, unary, call, group).
    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Integer(i) => Ok(Expr::Literal(Value::Int(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            TokenKind::String(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Keyword(Keyword::Null) => Ok(Expr::Literal(Value::Null)),
            TokenKind::Placeholder => {
                let position = self.placeholders;
                self.placeholders += 1;
                Ok(Expr::Placeholder(position))
            }
            TokenKind::Star => Ok(Expr::Wildcard { qualifier: None }),
            TokenKind::Minus => {
                let operand = self.expression(8)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Tilde => {
                let operand = self.expression(8)?;
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Bang | TokenKind::Keyword(Keyword::Not) => {
                let operand = self.expression(3)?;
                Ok(operand.not())
            }
            TokenKind::LParen => {
                let expr = self.expression(0)?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::Identifier(name) => self.identifier_expr(name),
            kind => Err(ParseError::unexpected(&kind, token.span)),
        }
    }

    /// Parses what follows an identifier: a call, a qualified column or a
    /// bare column.
    fn identifier_expr(&mut self, name: String) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::LParen) {
            let distinct = self.eat_keyword(Keyword::Distinct);
            let mut args = Vec::new();
            if !self.eat(&TokenKind::RParen) {
                loop {
                    args.push(self.expression(0)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "`)`")?;
            }
            return Ok(Expr::Function {
                name,
                args,
                distinct,
            });
        }

        if self.eat(&TokenKind::Dot) {
            if self.eat(&TokenKind::Star) {
                return Ok(Expr::Wildcard {
                    qualifier: Some(name),
                });
            }
            let column = self.expect_identifier()?;
            return Ok(Expr::qualified_column(name, column));
        }

        Ok(Expr::column(name))
    }

    /// Parses an infix expression given the already-parsed left side.
    fn infix(&mut self, left: Expr, negated: bool) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Keyword(Keyword::Or) | TokenKind::OrOr => {
                let right = self.expression(2)?;
                Ok(left.or(right))
            }
            TokenKind::Keyword(Keyword::And) | TokenKind::AndAnd => {
                let right = self.expression(3)?;
                Ok(left.and(right))
            }
            TokenKind::Eq => Ok(left.eq(self.expression(5)?)),
            TokenKind::NotEq => Ok(left.not_eq(self.expression(5)?)),
            TokenKind::Lt => Ok(left.lt(self.expression(5)?)),
            TokenKind::LtEq => Ok(left.lt_eq(self.expression(5)?)),
            TokenKind::Gt => Ok(left.gt(self.expression(5)?)),
            TokenKind::GtEq => Ok(left.gt_eq(self.expression(5)?)),
            TokenKind::Keyword(Keyword::Like) => {
                let pattern = self.expression(5)?;
                Ok(left.binary(
                    if negated {
                        BinaryOp::NotLike
                    } else {
                        BinaryOp::Like
                    },
                    pattern,
                ))
            }
            TokenKind::Keyword(Keyword::Is) => {
                let negated = self.eat_keyword(Keyword::Not);
                self.expect(&TokenKind::Keyword(Keyword::Null), "NULL")?;
                Ok(Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                })
            }
            TokenKind::Keyword(Keyword::In) => {
                // `IN ?` binds a whole list (or subquery) later.
                if self.eat(&TokenKind::Placeholder) {
                    let position = self.placeholders;
                    self.placeholders += 1;
                    return Ok(Expr::In {
                        expr: Box::new(left),
                        list: vec![Expr::Placeholder(position)],
                        negated,
                    });
                }
                self.expect(&TokenKind::LParen, "`(`")?;
                let mut list = Vec::new();
                loop {
                    list.push(self.expression(0)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(Expr::In {
                    expr: Box::new(left),
                    list,
                    negated,
                })
            }
            TokenKind::Keyword(Keyword::Between) => {
                let low = self.expression(5)?;
                self.expect(&TokenKind::Keyword(Keyword::And), "AND")?;
                let high = self.expression(5)?;
                Ok(Expr::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            TokenKind::Plus => Ok(left.binary(BinaryOp::Add, self.expression(7)?)),
            TokenKind::Minus => Ok(left.binary(BinaryOp::Sub, self.expression(7)?)),
            TokenKind::Star => Ok(left.binary(BinaryOp::Mul, self.expression(8)?)),
            TokenKind::Slash => Ok(left.binary(BinaryOp::Div, self.expression(8)?)),
            TokenKind::Percent => Ok(left.binary(BinaryOp::Mod, self.expression(8)?)),
            kind => Err(ParseError::unexpected(&kind, token.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse_expr("title = ?").unwrap();
        assert_eq!(
            expr,
            Expr::column("title").eq(Expr::Placeholder(0))
        );
    }

    #[test]
    fn test_parse_logical_precedence() {
        // AND binds tighter than OR.
        let expr = parse_expr("a = 1 or b = 2 and c = 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or, ..
            } => {}
            other => panic!("expected OR at the top, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_like() {
        let expr = parse_expr("title like '%Post%'").unwrap();
        assert_eq!(
            expr,
            Expr::column("title").like(Expr::Literal(Value::Text(String::from("%Post%"))))
        );
    }

    #[test]
    fn test_parse_not_like() {
        let expr = parse_expr("title not like ?").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::NotLike,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_in_list() {
        let expr = parse_expr("id in (1, 2, 3)").unwrap();
        match expr {
            Expr::In { list, negated, .. } => {
                assert_eq!(list.len(), 3);
                assert!(!negated);
            }
            other => panic!("expected IN, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_not_in_placeholder() {
        let expr = parse_expr("id not in ?").unwrap();
        match expr {
            Expr::In { list, negated, .. } => {
                assert_eq!(list, vec![Expr::Placeholder(0)]);
                assert!(negated);
            }
            other => panic!("expected NOT IN, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_between() {
        let expr = parse_expr("price between 10 and 20").unwrap();
        assert!(matches!(expr, Expr::Between { negated: false, .. }));
    }

    #[test]
    fn test_parse_is_not_null() {
        let expr = parse_expr("deleted_at is not null").unwrap();
        assert_eq!(expr, Expr::column("deleted_at").is_not_null());
    }

    #[test]
    fn test_parse_function_call() {
        let expr = parse_expr("MONTH(created_at)").unwrap();
        assert_eq!(
            expr,
            Expr::function("MONTH", vec![Expr::column("created_at")])
        );
    }

    #[test]
    fn test_parse_count_star() {
        let expr = parse_expr("count(*)").unwrap();
        assert_eq!(
            expr,
            Expr::function("count", vec![Expr::Wildcard { qualifier: None }])
        );
    }

    #[test]
    fn test_parse_qualified_column() {
        let expr = parse_expr("posts.title = ?").unwrap();
        assert_eq!(
            expr,
            Expr::qualified_column("posts", "title").eq(Expr::Placeholder(0))
        );
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let expr = parse_expr("a + b * 2").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("expected +, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_placeholder_numbering() {
        let expr = parse_expr("a = ? and b = ? or c = ?").unwrap();
        let mut positions = Vec::new();
        expr.walk(&mut |node| {
            if let Expr::Placeholder(i) = node {
                positions.push(*i);
            }
        });
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_select_list_with_alias() {
        let items = parse_select_list("MONTH(created_at) as month, id").unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Expr::Alias { alias, .. } if alias == "month"));
    }

    #[test]
    fn test_parse_order_list() {
        let items = parse_order_list("created_at desc, id").unwrap();
        assert_eq!(items[0].1, Direction::Desc);
        assert_eq!(items[1].1, Direction::Asc);
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_expr("a = 1 ^").unwrap_err();
        assert!(err.message.contains("unexpected token"));
    }

    #[test]
    fn test_unterminated_paren() {
        assert!(parse_expr("(a = 1").is_err());
    }
}
