//! Untyped syntax tree produced by the parser.
//!
//! Annotations (`@in`, `@out`, `@compute`) are structured metadata attached to
//! declarations at parse time; the analyzer reads them directly off the nodes.

use crate::context::BindingDirection;

/// Source position of a node, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone)]
pub struct Ast {
    pub kernel_name: String,
    pub properties: Vec<PropertyDecl>,
    pub constants: Vec<ConstDecl>,
    pub functions: Vec<FunctionDecl>,
}

/// A `@in` / `@out` annotated property declaration.
///
/// A property with an empty direction parses fine and is rejected by the
/// analyzer (`UnannotatedBinding`), so the error can name the property.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub name: String,
    pub direction: BindingDirection,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Array {
        elem: Box<TypeExpr>,
        len: Option<ArrayLen>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayLen {
    Literal(u32),
    /// A declared constant naming the length.
    Named(String),
}

/// `const NAME: ty;` (compile-time parameter) or `const NAME: ty = lit;`
/// (inlined constant).
#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub value: Option<Literal>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f32),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Block,
    /// Workgroup size from a `@compute(x, y, z)` directive; present only on
    /// the entry point.
    pub compute: Option<(u32, u32, u32)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `let name = expr;` or `var name = expr;`
    Local {
        name: String,
        mutable: bool,
        value: Expr,
        span: Span,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    For(ForStmt),
    Break(Span),
    Continue(Span),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Expr {
        expr: Expr,
        span: Span,
    },
}

/// The restricted loop shape:
/// `for (var i = init; i cmp bound; i = i (+|-) step) { ... }`.
#[derive(Debug, Clone)]
pub struct ForStmt {
    pub var: String,
    pub init: Expr,
    pub cmp: CmpOp,
    pub bound: Expr,
    pub step_negative: bool,
    pub step: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    /// `name = ...`, `name.x = ...`
    Name {
        name: String,
        member: Option<String>,
    },
    /// `name[index] = ...`, `name[index].x = ...`
    Index {
        name: String,
        index: Expr,
        member: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64, Span),
    FloatLit(f32, Span),
    BoolLit(bool, Span),
    Ident(String, Span),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// Member or swizzle access (`v.x`, `v.xyz`, `global_id.x`).
    Member {
        base: Box<Expr>,
        member: String,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit(_, span)
            | Expr::FloatLit(_, span)
            | Expr::BoolLit(_, span)
            | Expr::Ident(_, span)
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Ternary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Member { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Cmp(CmpOp),
    And,
    Or,
}
