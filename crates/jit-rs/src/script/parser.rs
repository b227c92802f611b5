//! Recursive-descent parser with precedence climbing for expressions.

use super::lexer::{tokenize, Token, TokenKind};
use super::tree::{
    AssignKind, Attribute, BinOp, Def, Expr, Ident, LiteralType, Param, Stmt, UnaryOp,
};
use crate::ir::SourceRange;
use crate::tensor::ScalarType;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}\n{range}")]
pub struct ParseError {
    pub message: String,
    pub range: SourceRange,
}

impl ParseError {
    pub fn new(range: SourceRange, message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            range,
        }
    }
}

/// Binding strength of binary operators; higher binds tighter.
///
/// Level 3 is taken by unary `not` and level 8 by unary minus.
fn binary_precedence(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::If => 1,
        TokenKind::And | TokenKind::Or => 2,
        TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::EqEq
        | TokenKind::Ne
        | TokenKind::Le
        | TokenKind::Ge => 4,
        TokenKind::Plus | TokenKind::Minus => 5,
        TokenKind::Star | TokenKind::Slash | TokenKind::At => 6,
        TokenKind::Pow => 7,
        _ => return None,
    })
}

fn unary_precedence(kind: TokenKind) -> Option<u8> {
    match kind {
        TokenKind::Not => Some(3),
        TokenKind::Minus => Some(8),
        _ => None,
    }
}

fn binop(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::At => BinOp::MatMul,
        TokenKind::Pow => BinOp::Pow,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::EqEq => BinOp::Eq,
        TokenKind::Ne => BinOp::Ne,
        TokenKind::Le => BinOp::Le,
        TokenKind::Ge => BinOp::Ge,
        TokenKind::And => BinOp::And,
        TokenKind::Or => BinOp::Or,
        _ => return None,
    })
}

fn cast_type(kind: TokenKind) -> Option<ScalarType> {
    match kind {
        TokenKind::Float => Some(ScalarType::Float),
        TokenKind::Double => Some(ScalarType::Double),
        TokenKind::Int => Some(ScalarType::Int),
        TokenKind::Long => Some(ScalarType::Long),
        _ => None,
    }
}

/// Parses every `def` in `source`.
pub fn parse_program(source: &str) -> Result<Vec<Def>, ParseError> {
    let mut parser = Parser::new(source)?;
    let mut defs = Vec::new();
    loop {
        while parser.next_if(TokenKind::Newline) {}
        if parser.cur().kind == TokenKind::Eof {
            break;
        }
        defs.push(parser.parse_function()?);
    }
    Ok(defs)
}

/// Parses a single expression spanning all of `source`.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_exp()?;
    parser.expect(TokenKind::Eof)?;
    Ok(expr)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Parser {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn lookahead(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.cur().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn next_if(&mut self, kind: TokenKind) -> bool {
        if self.cur().kind == kind {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.cur().kind != kind {
            return Err(self.unexpected(&format!("expected {kind}")));
        }
        Ok(self.next())
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let token = self.cur();
        ParseError::new(
            token.range.clone(),
            format!("{what} but found {}", token.kind),
        )
    }

    fn parse_ident(&mut self) -> Result<Ident, ParseError> {
        let token = self.expect(TokenKind::Ident)?;
        Ok(Ident {
            name: token.text().to_string(),
            range: token.range,
        })
    }

    /// Attribute name after `.`; cast keywords are allowed so `x.float()` parses.
    fn parse_field(&mut self) -> Result<Ident, ParseError> {
        if cast_type(self.cur().kind).is_some() {
            let token = self.next();
            return Ok(Ident {
                name: token.text().to_string(),
                range: token.range,
            });
        }
        self.parse_ident()
    }

    pub fn parse_exp(&mut self) -> Result<Expr, ParseError> {
        self.parse_exp_prec(0)
    }

    /// Parses the longest expression whose binary operators bind tighter
    /// than `precedence`.
    fn parse_exp_prec(&mut self, precedence: u8) -> Result<Expr, ParseError> {
        let mut prefix = match unary_precedence(self.cur().kind) {
            Some(unary_prec) => {
                let token = self.next();
                let operand = self.parse_exp_prec(unary_prec)?;
                let op = if token.kind == TokenKind::Not {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                Expr::Unary {
                    op,
                    range: token.range.merge(operand.range()),
                    operand: Box::new(operand),
                }
            }
            None => self.parse_base_exp()?,
        };

        while let Some(mut binary_prec) = binary_precedence(self.cur().kind) {
            if binary_prec <= precedence {
                break;
            }
            let token = self.next();
            if token.kind == TokenKind::Pow {
                // right associative
                binary_prec -= 1;
            }
            if token.kind == TokenKind::If {
                let cond = self.parse_exp()?;
                self.expect(TokenKind::Else)?;
                let false_expr = self.parse_exp_prec(binary_prec)?;
                prefix = Expr::IfExpr {
                    range: prefix.range().merge(false_expr.range()),
                    cond: Box::new(cond),
                    true_expr: Box::new(prefix),
                    false_expr: Box::new(false_expr),
                };
                continue;
            }
            let rhs = self.parse_exp_prec(binary_prec)?;
            let op = binop(token.kind).expect("binary precedence implies a binary operator");
            prefix = Expr::Binary {
                op,
                range: prefix.range().merge(rhs.range()),
                lhs: Box::new(prefix),
                rhs: Box::new(rhs),
            };
        }
        Ok(prefix)
    }

    /// Literals, parenthesized expressions, casts and names, followed by any
    /// chain of `.field`, calls and subscripts.
    fn parse_base_exp(&mut self) -> Result<Expr, ParseError> {
        let kind = self.cur().kind;
        let mut prefix = match kind {
            TokenKind::Number | TokenKind::True | TokenKind::False => self.parse_const()?,
            TokenKind::LParen => {
                self.next();
                let inner = self.parse_exp()?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            _ => match cast_type(kind) {
                Some(ty) => {
                    let start = self.next().range;
                    self.expect(TokenKind::LParen)?;
                    let operand = self.parse_exp()?;
                    let end = self.expect(TokenKind::RParen)?.range;
                    Expr::Cast {
                        ty,
                        operand: Box::new(operand),
                        range: start.merge(&end),
                    }
                }
                None => Expr::Var(self.parse_ident()?),
            },
        };

        loop {
            match self.cur().kind {
                TokenKind::Dot => {
                    self.next();
                    let field = self.parse_field()?;
                    prefix = Expr::Select {
                        value: Box::new(prefix),
                        field,
                    };
                }
                TokenKind::LParen => prefix = self.parse_apply(prefix)?,
                TokenKind::LBracket => prefix = self.parse_slice_or_gather(prefix)?,
                _ => break,
            }
        }
        Ok(prefix)
    }

    fn parse_apply(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LParen)?;
        let mut inputs = Vec::new();
        let mut attributes = Vec::new();
        if self.cur().kind != TokenKind::RParen {
            loop {
                if self.cur().kind == TokenKind::Ident && self.lookahead().kind == TokenKind::Assign
                {
                    let name = self.parse_ident()?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.parse_attribute_value()?;
                    attributes.push(Attribute { name, value });
                } else {
                    inputs.push(self.parse_exp()?);
                }
                if !self.next_if(TokenKind::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RParen)?;
        Ok(Expr::Apply {
            range: callee.range().merge(&open.range).merge(&close.range),
            callee: Box::new(callee),
            inputs,
            attributes,
        })
    }

    fn parse_attribute_value(&mut self) -> Result<Expr, ParseError> {
        if self.cur().kind != TokenKind::LBracket {
            return self.parse_const();
        }
        let open = self.next();
        let mut elements = Vec::new();
        if self.cur().kind != TokenKind::RBracket {
            loop {
                elements.push(self.parse_const()?);
                if !self.next_if(TokenKind::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RBracket)?;
        Ok(Expr::List {
            elements,
            range: open.range.merge(&close.range),
        })
    }

    /// Numeric or boolean literal. Leading minus signs are folded in, which
    /// only matters for attribute values.
    fn parse_const(&mut self) -> Result<Expr, ParseError> {
        let start = self.cur().range.clone();
        if self.next_if(TokenKind::True) {
            return Ok(Expr::Const {
                value: 1.0,
                ty: LiteralType::Bool,
                range: start,
            });
        }
        if self.next_if(TokenKind::False) {
            return Ok(Expr::Const {
                value: 0.0,
                ty: LiteralType::Bool,
                range: start,
            });
        }
        let mut sign = 1.0;
        while self.next_if(TokenKind::Minus) {
            sign = -sign;
        }
        let number = self.expect(TokenKind::Number)?;
        let value: f64 = number.text().parse().map_err(|_| {
            ParseError::new(
                number.range.clone(),
                format!("malformed number literal '{}'", number.text()),
            )
        })?;
        let mut ty = if number.text().contains('.') {
            LiteralType::Float
        } else {
            LiteralType::Int
        };
        let mut range = start.merge(&number.range);
        if self.cur().kind == TokenKind::Ident {
            let suffix = self.next();
            ty = match suffix.text() {
                "f" => LiteralType::Float,
                "LL" => LiteralType::Long,
                other => {
                    return Err(ParseError::new(
                        suffix.range.clone(),
                        format!(
                            "expected 'f' or 'LL' as numeric type identifier but found '{other}'"
                        ),
                    ))
                }
            };
            range = range.merge(&suffix.range);
        }
        Ok(Expr::Const {
            value: sign * value,
            ty,
            range,
        })
    }

    /// `v[i]` is a gather; `v[a:b]`, `v[a:]`, `v[:b]` and `v[:]` are slices.
    fn parse_slice_or_gather(&mut self, value: Expr) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LBracket)?;
        let mut start = None;
        if self.cur().kind != TokenKind::Colon {
            let first = self.parse_exp()?;
            if self.cur().kind == TokenKind::RBracket {
                let close = self.next();
                return Ok(Expr::Gather {
                    range: value.range().merge(&open.range).merge(&close.range),
                    value: Box::new(value),
                    index: Box::new(first),
                });
            }
            start = Some(Box::new(first));
        }
        self.expect(TokenKind::Colon)?;
        let end = if self.cur().kind != TokenKind::RBracket {
            Some(Box::new(self.parse_exp()?))
        } else {
            None
        };
        let close = self.expect(TokenKind::RBracket)?;
        Ok(Expr::Slice {
            range: value.range().merge(&open.range).merge(&close.range),
            value: Box::new(value),
            start,
            end,
        })
    }

    // A dedent implies the line already ended.
    fn expect_end_of_line(&mut self) -> Result<(), ParseError> {
        if self.cur().kind != TokenKind::Dedent {
            self.expect(TokenKind::Newline)?;
        }
        Ok(())
    }

    fn is_end_of_line(&self) -> bool {
        matches!(self.cur().kind, TokenKind::Newline | TokenKind::Dedent)
    }

    pub fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.cur().kind {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Global => {
                let range = self.next().range;
                let mut names = vec![self.parse_ident()?];
                while self.next_if(TokenKind::Comma) {
                    names.push(self.parse_ident()?);
                }
                self.expect_end_of_line()?;
                Ok(Stmt::Global { names, range })
            }
            TokenKind::Return => {
                let range = self.next().range;
                let mut values = vec![self.parse_exp()?];
                while self.next_if(TokenKind::Comma) {
                    values.push(self.parse_exp()?);
                }
                self.expect_end_of_line()?;
                Ok(Stmt::Return { values, range })
            }
            _ => {
                let expr = self.parse_exp()?;
                match expr {
                    Expr::Var(first) if !self.is_end_of_line() => self.parse_assign(first),
                    expr => {
                        self.expect_end_of_line()?;
                        Ok(Stmt::Expr(expr))
                    }
                }
            }
        }
    }

    /// `first[, more] (=|+=|-=|*=|/=) value`, with `first` already parsed.
    fn parse_assign(&mut self, first: Ident) -> Result<Stmt, ParseError> {
        let mut targets = vec![first];
        while self.next_if(TokenKind::Comma) {
            targets.push(self.parse_ident()?);
        }
        let kind = match self.cur().kind {
            TokenKind::PlusEq => AssignKind::Add,
            TokenKind::MinusEq => AssignKind::Sub,
            TokenKind::TimesEq => AssignKind::Mul,
            TokenKind::DivEq => AssignKind::Div,
            TokenKind::Assign => AssignKind::Plain,
            _ => return Err(self.unexpected("expected an assignment")),
        };
        self.next();
        let value = self.parse_exp()?;
        self.expect_end_of_line()?;
        let range = targets[0].range.merge(value.range());
        Ok(Stmt::Assign {
            targets,
            kind,
            value,
            range,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let range = self.next().range;
        let cond = self.parse_exp()?;
        self.expect(TokenKind::Colon)?;
        let then_branch = self.parse_statements()?;
        let else_branch = match self.cur().kind {
            TokenKind::Else => {
                self.next();
                self.expect(TokenKind::Colon)?;
                self.parse_statements()?
            }
            // `elif` nests another conditional in the else branch
            TokenKind::Elif => vec![self.parse_if()?],
            _ => Vec::new(),
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            range,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let range = self.next().range;
        let cond = self.parse_exp()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_statements()?;
        Ok(Stmt::While { cond, body, range })
    }

    /// An indented block; consumes the closing dedent.
    fn parse_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Indent)?;
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_stmt()?);
            if self.next_if(TokenKind::Dedent) {
                break;
            }
        }
        Ok(stmts)
    }

    pub fn parse_function(&mut self) -> Result<Def, ParseError> {
        self.expect(TokenKind::Def)?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.cur().kind != TokenKind::RParen {
            loop {
                params.push(Param {
                    name: self.parse_ident()?,
                });
                if !self.next_if(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_statements()?;
        Ok(Def { name, params, body })
    }
}
