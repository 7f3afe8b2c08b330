//! Typed kernel IR.
//!
//! Built by the analyzer and consumed by both code generators, so neither
//! generator ever re-derives types or re-resolves names from the syntax tree.

use crate::context::ElemType;

/// The fixed builtin type lattice for expressions and locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl Type {
    pub fn from_elem(elem: ElemType) -> Type {
        match elem {
            ElemType::Float => Type::Float,
            ElemType::Int => Type::Int,
            ElemType::Vec2 => Type::Vec2,
            ElemType::Vec3 => Type::Vec3,
            ElemType::Vec4 => Type::Vec4,
        }
    }

    pub fn elem(self) -> Option<ElemType> {
        match self {
            Type::Bool => None,
            Type::Float => Some(ElemType::Float),
            Type::Int => Some(ElemType::Int),
            Type::Vec2 => Some(ElemType::Vec2),
            Type::Vec3 => Some(ElemType::Vec3),
            Type::Vec4 => Some(ElemType::Vec4),
        }
    }

    pub fn lanes(self) -> u32 {
        match self {
            Type::Bool | Type::Float | Type::Int => 1,
            Type::Vec2 => 2,
            Type::Vec3 => 3,
            Type::Vec4 => 4,
        }
    }

    pub fn is_vector(self) -> bool {
        self.lanes() > 1
    }

    pub fn vector(width: u32) -> Option<Type> {
        match width {
            2 => Some(Type::Vec2),
            3 => Some(Type::Vec3),
            4 => Some(Type::Vec4),
            _ => None,
        }
    }

    /// Source-dialect spelling, used in diagnostics and helper signatures.
    pub fn dsl_name(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Float => "float",
            Type::Int => "int",
            Type::Vec2 => "vec2",
            Type::Vec3 => "vec3",
            Type::Vec4 => "vec4",
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dsl_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Builtin functions, float/vector element types only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Abs,
    Min,
    Max,
    Clamp,
    Floor,
    Ceil,
    Fract,
    Sqrt,
    Pow,
    Exp,
    Log,
    Sin,
    Cos,
    Mix,
    Dot,
    Length,
    Normalize,
}

impl BuiltinFn {
    pub fn from_name(name: &str) -> Option<BuiltinFn> {
        Some(match name {
            "abs" => BuiltinFn::Abs,
            "min" => BuiltinFn::Min,
            "max" => BuiltinFn::Max,
            "clamp" => BuiltinFn::Clamp,
            "floor" => BuiltinFn::Floor,
            "ceil" => BuiltinFn::Ceil,
            "fract" => BuiltinFn::Fract,
            "sqrt" => BuiltinFn::Sqrt,
            "pow" => BuiltinFn::Pow,
            "exp" => BuiltinFn::Exp,
            "log" => BuiltinFn::Log,
            "sin" => BuiltinFn::Sin,
            "cos" => BuiltinFn::Cos,
            "mix" => BuiltinFn::Mix,
            "dot" => BuiltinFn::Dot,
            "length" => BuiltinFn::Length,
            "normalize" => BuiltinFn::Normalize,
            _ => return None,
        })
    }

    /// Shared spelling across the DSL, GLSL, and WGSL.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::Abs => "abs",
            BuiltinFn::Min => "min",
            BuiltinFn::Max => "max",
            BuiltinFn::Clamp => "clamp",
            BuiltinFn::Floor => "floor",
            BuiltinFn::Ceil => "ceil",
            BuiltinFn::Fract => "fract",
            BuiltinFn::Sqrt => "sqrt",
            BuiltinFn::Pow => "pow",
            BuiltinFn::Exp => "exp",
            BuiltinFn::Log => "log",
            BuiltinFn::Sin => "sin",
            BuiltinFn::Cos => "cos",
            BuiltinFn::Mix => "mix",
            BuiltinFn::Dot => "dot",
            BuiltinFn::Length => "length",
            BuiltinFn::Normalize => "normalize",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            BuiltinFn::Clamp | BuiltinFn::Mix => 3,
            BuiltinFn::Min | BuiltinFn::Max | BuiltinFn::Pow | BuiltinFn::Dot => 2,
            _ => 1,
        }
    }

    /// Whether the builtin only accepts vector operands.
    pub fn requires_vector(self) -> bool {
        matches!(self, BuiltinFn::Dot | BuiltinFn::Length | BuiltinFn::Normalize)
    }
}

#[derive(Debug, Clone)]
pub struct TypedExpr {
    pub ty: Type,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    FloatLit(f32),
    IntLit(i32),
    BoolLit(bool),
    /// A local (`let`/`var`), loop induction variable, or helper parameter.
    Local(String),
    /// An unresolved compile-time constant, inlined as a literal at codegen.
    ConstParam(String),
    GlobalId(Axis),
    GlobalExtent(Axis),
    /// A scalar/vector uniform binding read.
    UniformRef(String),
    /// `binding[index]` on a readable array binding.
    ArrayLoad {
        binding: String,
        index: Box<TypedExpr>,
    },
    /// `len(binding)`.
    ArrayLen(String),
    Unary {
        op: UnaryOp,
        expr: Box<TypedExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Logic {
        op: LogicOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    /// Ternary `cond ? then : else`.
    Select {
        cond: Box<TypedExpr>,
        then_expr: Box<TypedExpr>,
        else_expr: Box<TypedExpr>,
    },
    /// Component/swizzle access; lane indices 0..=3 within the base width.
    Swizzle {
        base: Box<TypedExpr>,
        lanes: Vec<u8>,
    },
    /// `vec2/3/4(...)`: one scalar splat or component-wise arguments.
    VecCtor {
        width: u8,
        args: Vec<TypedExpr>,
    },
    Builtin {
        func: BuiltinFn,
        args: Vec<TypedExpr>,
    },
    HelperCall {
        name: String,
        args: Vec<TypedExpr>,
    },
    /// `float(x)` / `int(x)`; the target type is `TypedExpr::ty`.
    Cast(Box<TypedExpr>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Local {
        name: String,
        mutable: bool,
        value: TypedExpr,
    },
    /// `name = value` or `name.lane = value` on a mutable local.
    AssignLocal {
        name: String,
        lane: Option<u8>,
        value: TypedExpr,
    },
    /// `binding[index] = value` (whole element) or
    /// `binding[index].lane = value` (component) on a writable array binding.
    ArrayStore {
        binding: String,
        index: TypedExpr,
        lane: Option<u8>,
        value: TypedExpr,
    },
    If {
        cond: TypedExpr,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    For {
        var: String,
        init: TypedExpr,
        cmp: CmpOp,
        bound: TypedExpr,
        step_negative: bool,
        step: TypedExpr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<TypedExpr>),
    /// An expression statement evaluated for nothing; kept for grammar parity.
    Eval(TypedExpr),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Option<Type>,
    pub body: Vec<Stmt>,
}

/// The analyzed kernel: the entry function plus the helpers reachable from
/// it, in declaration order.
#[derive(Debug, Clone)]
pub struct TypedKernel {
    pub entry: Function,
    pub helpers: Vec<Function>,
}
