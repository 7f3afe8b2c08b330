//! Recursive-descent parser for the kernel dialect.
//!
//! `parse` is a pure function of the source text: one `kernel` block
//! containing annotated properties, constants, and functions. Precedence
//! climbing for expressions; the restricted `for` shape is enforced here so
//! the analyzer only ever sees structurally well-formed loops.

use thiserror::Error;

use crate::ast::*;
use crate::context::BindingDirection;
use crate::lex::{lex, Pos, SpannedTok, Tok};
use crate::limits;

/// Malformed source text. Positions are 1-indexed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at {line}:{column}: expected {expected}, found {found}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub expected: String,
    pub found: String,
}

pub fn parse(source: &str) -> Result<Ast, ParseError> {
    let tokens = lex(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .parse_kernel()
}

struct Parser {
    tokens: Vec<SpannedTok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_pos(&self) -> Pos {
        self.tokens[self.pos].pos
    }

    fn span(&self) -> Span {
        let pos = self.peek_pos();
        Span {
            line: pos.line,
            column: pos.column,
        }
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let pos = self.peek_pos();
        ParseError {
            line: pos.line,
            column: pos.column,
            expected: expected.into(),
            found: self.peek().describe(),
        }
    }

    fn expect(&mut self, tok: Tok, expected: &str) -> Result<(), ParseError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if *self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Tok::Ident(_) => {
                let Tok::Ident(name) = self.advance() else {
                    unreachable!()
                };
                Ok(name)
            }
            _ => Err(self.error(expected)),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= limits::MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "nesting of at most {} levels",
                limits::MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_kernel(&mut self) -> Result<Ast, ParseError> {
        self.expect(Tok::Kernel, "`kernel`")?;
        let kernel_name = self.expect_ident("a kernel name")?;
        self.expect(Tok::LBrace, "`{`")?;

        let mut ast = Ast {
            kernel_name,
            properties: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
        };
        while !self.eat(Tok::RBrace) {
            if *self.peek() == Tok::Eof {
                return Err(self.error("`}` closing the kernel block"));
            }
            self.parse_item(&mut ast)?;
        }
        self.expect(Tok::Eof, "end of input after the kernel block")?;
        Ok(ast)
    }

    fn parse_item(&mut self, ast: &mut Ast) -> Result<(), ParseError> {
        let span = self.span();
        let mut direction = BindingDirection::empty();
        let mut compute: Option<(u32, u32, u32)> = None;

        while self.eat(Tok::At) {
            let name = self.expect_ident("`in`, `out`, or `compute`")?;
            match name.as_str() {
                "in" => direction |= BindingDirection::IN,
                "out" => direction |= BindingDirection::OUT,
                "compute" => {
                    if compute.is_some() {
                        return Err(self.error("at most one `@compute` directive per function"));
                    }
                    compute = Some(self.parse_compute_directive()?);
                }
                _ => {
                    return Err(ParseError {
                        line: span.line,
                        column: span.column,
                        expected: "`in`, `out`, or `compute`".to_owned(),
                        found: format!("`@{name}`"),
                    })
                }
            }
        }

        match self.peek() {
            Tok::Fn => {
                if !direction.is_empty() {
                    return Err(self.error("`@in`/`@out` on a property, not a function"));
                }
                let func = self.parse_function(compute, span)?;
                ast.functions.push(func);
            }
            Tok::Const => {
                if !direction.is_empty() || compute.is_some() {
                    return Err(self.error("an unannotated `const` declaration"));
                }
                let decl = self.parse_const(span)?;
                ast.constants.push(decl);
            }
            Tok::Ident(_) => {
                if compute.is_some() {
                    return Err(self.error("`@compute` on a function, not a property"));
                }
                let name = self.expect_ident("a property name")?;
                self.expect(Tok::Colon, "`:`")?;
                let ty = self.parse_type()?;
                self.expect(Tok::Semi, "`;`")?;
                ast.properties.push(PropertyDecl {
                    name,
                    direction,
                    ty,
                    span,
                });
            }
            _ => return Err(self.error("a property, `const`, or `fn` declaration")),
        }
        Ok(())
    }

    fn parse_compute_directive(&mut self) -> Result<(u32, u32, u32), ParseError> {
        if !self.eat(Tok::LParen) {
            return Ok((1, 1, 1));
        }
        let mut axes = [1u32; 3];
        for (i, axis) in axes.iter_mut().enumerate() {
            match self.peek() {
                Tok::IntLit(v) if *v > 0 && *v <= u32::MAX as i64 => {
                    *axis = *v as u32;
                    self.advance();
                }
                _ => return Err(self.error("a positive workgroup-size literal")),
            }
            if i < 2 && !self.eat(Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "`)` closing `@compute(...)`")?;
        Ok((axes[0], axes[1], axes[2]))
    }

    fn parse_const(&mut self, span: Span) -> Result<ConstDecl, ParseError> {
        self.expect(Tok::Const, "`const`")?;
        let name = self.expect_ident("a constant name")?;
        self.expect(Tok::Colon, "`:`")?;
        let ty = self.parse_type()?;
        let value = if self.eat(Tok::Assign) {
            Some(self.parse_literal()?)
        } else {
            None
        };
        self.expect(Tok::Semi, "`;`")?;
        Ok(ConstDecl {
            name,
            ty,
            value,
            span,
        })
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let negate = self.eat(Tok::Minus);
        match self.peek().clone() {
            Tok::IntLit(v) => {
                self.advance();
                Ok(Literal::Int(if negate { -v } else { v }))
            }
            Tok::FloatLit(v) => {
                self.advance();
                Ok(Literal::Float(if negate { -v } else { v }))
            }
            Tok::True if !negate => {
                self.advance();
                Ok(Literal::Bool(true))
            }
            Tok::False if !negate => {
                self.advance();
                Ok(Literal::Bool(false))
            }
            _ => Err(self.error("a literal")),
        }
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        let name = self.expect_ident("a type name")?;
        Ok(match name.as_str() {
            "float" => TypeExpr::Float,
            "int" => TypeExpr::Int,
            "bool" => TypeExpr::Bool,
            "vec2" => TypeExpr::Vec2,
            "vec3" => TypeExpr::Vec3,
            "vec4" => TypeExpr::Vec4,
            "array" => {
                self.expect(Tok::Lt, "`<` after `array`")?;
                let elem = self.parse_type()?;
                if matches!(elem, TypeExpr::Array { .. } | TypeExpr::Bool) {
                    return Err(self.error("a scalar or vector element type"));
                }
                let len = if self.eat(Tok::Comma) {
                    Some(match self.peek().clone() {
                        Tok::IntLit(v) if v > 0 && v <= u32::MAX as i64 => {
                            self.advance();
                            ArrayLen::Literal(v as u32)
                        }
                        Tok::Ident(_) => ArrayLen::Named(self.expect_ident("a length")?),
                        _ => return Err(self.error("an array length literal or constant name")),
                    })
                } else {
                    None
                };
                self.expect(Tok::Gt, "`>` closing `array<...>`")?;
                TypeExpr::Array {
                    elem: Box::new(elem),
                    len,
                }
            }
            _ => {
                let span = self.span();
                return Err(ParseError {
                    line: span.line,
                    column: span.column,
                    expected: "a type name (`float`, `int`, `bool`, `vec2`, `vec3`, `vec4`, `array`)"
                        .to_owned(),
                    found: format!("`{name}`"),
                });
            }
        })
    }

    fn parse_function(
        &mut self,
        compute: Option<(u32, u32, u32)>,
        span: Span,
    ) -> Result<FunctionDecl, ParseError> {
        self.expect(Tok::Fn, "`fn`")?;
        let name = self.expect_ident("a function name")?;
        self.expect(Tok::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.eat(Tok::RParen) {
            loop {
                let param_span = self.span();
                let pname = self.expect_ident("a parameter name")?;
                self.expect(Tok::Colon, "`:`")?;
                let ty = self.parse_type()?;
                params.push(Param {
                    name: pname,
                    ty,
                    span: param_span,
                });
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RParen, "`)` closing the parameter list")?;
        }
        let ret = if self.eat(Tok::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            ret,
            body,
            compute,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.enter()?;
        let result = self.parse_block_inner();
        self.depth -= 1;
        result
    }

    fn parse_block_inner(&mut self) -> Result<Block, ParseError> {
        self.expect(Tok::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !self.eat(Tok::RBrace) {
            if *self.peek() == Tok::Eof {
                return Err(self.error("`}` closing this block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        match self.peek() {
            Tok::Let | Tok::Var => {
                let mutable = *self.peek() == Tok::Var;
                self.advance();
                let name = self.expect_ident("a local name")?;
                self.expect(Tok::Assign, "`=`")?;
                let value = self.parse_expr()?;
                self.expect(Tok::Semi, "`;`")?;
                Ok(Stmt::Local {
                    name,
                    mutable,
                    value,
                    span,
                })
            }
            Tok::If => {
                self.advance();
                self.parse_if_tail(span)
            }
            Tok::For => {
                self.advance();
                self.parse_for(span)
            }
            Tok::Break => {
                self.advance();
                self.expect(Tok::Semi, "`;`")?;
                Ok(Stmt::Break(span))
            }
            Tok::Continue => {
                self.advance();
                self.expect(Tok::Semi, "`;`")?;
                Ok(Stmt::Continue(span))
            }
            Tok::Return => {
                self.advance();
                let value = if *self.peek() == Tok::Semi {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Tok::Semi, "`;`")?;
                Ok(Stmt::Return { value, span })
            }
            _ => self.parse_assign_or_expr(span),
        }
    }

    fn parse_if_tail(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.expect(Tok::LParen, "`(`")?;
        let cond = self.parse_expr()?;
        self.expect(Tok::RParen, "`)` closing the condition")?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(Tok::Else) {
            if *self.peek() == Tok::If {
                let else_span = self.span();
                self.advance();
                let nested = self.parse_if_tail(else_span)?;
                Some(Block { stmts: vec![nested] })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span,
        })
    }

    /// `for (var i = init; i cmp bound; i = i (+|-) step) block`
    fn parse_for(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.expect(Tok::LParen, "`(`")?;
        self.expect(Tok::Var, "`var` introducing the induction variable")?;
        let var = self.expect_ident("the induction variable name")?;
        self.expect(Tok::Assign, "`=`")?;
        let init = self.parse_expr()?;
        self.expect(Tok::Semi, "`;`")?;

        let cond_var = self.expect_ident("the induction variable in the loop condition")?;
        if cond_var != var {
            return Err(self.error(format!("the induction variable `{var}`")));
        }
        let cmp = match self.peek() {
            Tok::Lt => CmpOp::Lt,
            Tok::Le => CmpOp::Le,
            Tok::Gt => CmpOp::Gt,
            Tok::Ge => CmpOp::Ge,
            _ => return Err(self.error("`<`, `<=`, `>`, or `>=`")),
        };
        self.advance();
        let bound = self.parse_expr()?;
        self.expect(Tok::Semi, "`;`")?;

        let step_var = self.expect_ident("the induction variable in the loop step")?;
        if step_var != var {
            return Err(self.error(format!("the induction variable `{var}`")));
        }
        self.expect(Tok::Assign, "`=`")?;
        let step_lhs = self.expect_ident("the induction variable in the loop step")?;
        if step_lhs != var {
            return Err(self.error(format!("the induction variable `{var}`")));
        }
        let step_negative = match self.peek() {
            Tok::Plus => false,
            Tok::Minus => true,
            _ => return Err(self.error("`+` or `-`")),
        };
        self.advance();
        let step = self.parse_expr()?;
        self.expect(Tok::RParen, "`)` closing the loop header")?;
        let body = self.parse_block()?;
        Ok(Stmt::For(ForStmt {
            var,
            init,
            cmp,
            bound,
            step_negative,
            step,
            body,
            span,
        }))
    }

    fn parse_assign_or_expr(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let expr = self.parse_expr()?;
        if self.eat(Tok::Assign) {
            let target = match assign_target(&expr) {
                Some(target) => target,
                None => {
                    return Err(ParseError {
                        line: span.line,
                        column: span.column,
                        expected: "an assignable place (local, component, or array element)"
                            .to_owned(),
                        found: "an expression".to_owned(),
                    })
                }
            };
            let value = self.parse_expr()?;
            self.expect(Tok::Semi, "`;`")?;
            Ok(Stmt::Assign {
                target,
                value,
                span,
            })
        } else {
            self.expect(Tok::Semi, "`;`")?;
            Ok(Stmt::Expr { expr, span })
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_expr_inner();
        self.depth -= 1;
        result
    }

    fn parse_expr_inner(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if self.eat(Tok::Question) {
            let span = cond.span();
            let then_expr = self.parse_expr()?;
            self.expect(Tok::Colon, "`:` in the ternary")?;
            let else_expr = self.parse_expr()?;
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            })
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(Tok::OrOr) {
            let span = lhs.span();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(Tok::AndAnd) {
            let span = lhs.span();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => CmpOp::Eq,
                Tok::Ne => CmpOp::Ne,
                _ => return Ok(lhs),
            };
            self.advance();
            let span = lhs.span();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinOp::Cmp(op),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let span = lhs.span();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op: BinOp::Cmp(op),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let span = lhs.span();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let span = lhs.span();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        let op = match self.peek() {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Not => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let expr = self.parse_unary();
            self.depth -= 1;
            Ok(Expr::Unary {
                op,
                expr: Box::new(expr?),
                span,
            })
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = expr.span();
            if self.eat(Tok::LBracket) {
                let index = self.parse_expr()?;
                self.expect(Tok::RBracket, "`]`")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.eat(Tok::Dot) {
                let member = self.expect_ident("a component name")?;
                expr = Expr::Member {
                    base: Box::new(expr),
                    member,
                    span,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek().clone() {
            Tok::IntLit(v) => {
                self.advance();
                Ok(Expr::IntLit(v, span))
            }
            Tok::FloatLit(v) => {
                self.advance();
                Ok(Expr::FloatLit(v, span))
            }
            Tok::True => {
                self.advance();
                Ok(Expr::BoolLit(true, span))
            }
            Tok::False => {
                self.advance();
                Ok(Expr::BoolLit(false, span))
            }
            Tok::Ident(name) => {
                self.advance();
                if self.eat(Tok::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(Tok::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(Tok::Comma) {
                                break;
                            }
                        }
                        self.expect(Tok::RParen, "`)` closing the argument list")?;
                    }
                    Ok(Expr::Call { name, args, span })
                } else {
                    Ok(Expr::Ident(name, span))
                }
            }
            Tok::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Tok::RParen, "`)`")?;
                Ok(expr)
            }
            _ => Err(self.error("an expression")),
        }
    }
}

/// Reinterpret a parsed expression as an assignment target, if it has the
/// shape of one.
fn assign_target(expr: &Expr) -> Option<AssignTarget> {
    match expr {
        Expr::Ident(name, _) => Some(AssignTarget::Name {
            name: name.clone(),
            member: None,
        }),
        Expr::Member { base, member, .. } => match base.as_ref() {
            Expr::Ident(name, _) => Some(AssignTarget::Name {
                name: name.clone(),
                member: Some(member.clone()),
            }),
            Expr::Index { base, index, .. } => match base.as_ref() {
                Expr::Ident(name, _) => Some(AssignTarget::Index {
                    name: name.clone(),
                    index: (**index).clone(),
                    member: Some(member.clone()),
                }),
                _ => None,
            },
            _ => None,
        },
        Expr::Index { base, index, .. } => match base.as_ref() {
            Expr::Ident(name, _) => Some(AssignTarget::Index {
                name: name.clone(),
                index: (**index).clone(),
                member: None,
            }),
            _ => None,
        },
        _ => None,
    }
}
