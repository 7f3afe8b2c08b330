//! Shader code generation from the typed IR.
//!
//! All dialects share the slot assignment and params-block layout recorded in
//! the `ShaderContext`, so a kernel compiled for any target binds identically
//! from the host side.

mod glsl;
mod wgsl;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::trace;

use crate::context::{ConstValue, ConstantValues, Dialect, ShaderContext};
use crate::ir::{BinOp, CmpOp, ExprKind, Function, Stmt, TypedExpr, TypedKernel, UnaryOp};

pub use glsl::GlslVersion;
pub use wgsl::WGSL_ENTRY_POINT;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    /// The kernel uses something no dialect can express (recursion, an
    /// unresolved constant).
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    /// The kernel is valid but cannot be expressed in the requested dialect.
    #[error("kernel cannot target {dialect}: {reason}")]
    DialectUnsupported { dialect: Dialect, reason: String },
}

/// Generate shader source for the context's dialect.
pub fn generate(
    context: &ShaderContext,
    kernel: &TypedKernel,
    constants: &ConstantValues,
) -> Result<String, CodegenError> {
    check_recursion(kernel)?;
    let source = match context.dialect {
        Dialect::Wgsl => wgsl::generate(context, kernel, constants)?,
        Dialect::Glsl450 => glsl::generate(context, kernel, constants, GlslVersion::Core450)?,
        Dialect::Glsl100 => glsl::generate(context, kernel, constants, GlslVersion::Es100)?,
    };
    trace!(dialect = %context.dialect, bytes = source.len(), "generated shader");
    Ok(source)
}

/// Format an `f32` so the output always parses as a float literal and
/// round-trips the value: fixed precision with trailing zeros trimmed down to
/// one digit after the point.
pub(crate) fn format_f32(v: f32) -> String {
    let mut s = format!("{v:.8}");
    while s.ends_with('0') && !s.ends_with(".0") {
        s.pop();
    }
    s
}

/// Inline a compile-time constant as a dialect-neutral literal spelling.
pub(crate) fn const_literal(
    constants: &ConstantValues,
    name: &str,
) -> Result<String, CodegenError> {
    match constants.get(name) {
        Some(ConstValue::Int(v)) => Ok(v.to_string()),
        Some(ConstValue::Float(v)) => Ok(format_f32(v)),
        None => Err(CodegenError::UnsupportedConstruct(format!(
            "unresolved compile-time constant `{name}`"
        ))),
    }
}

/// Fold an integer expression that only references literals and resolved
/// constants. Returns `None` when the value is not fixed at compile time.
pub(crate) fn fold_int(expr: &TypedExpr, constants: &ConstantValues) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntLit(v) => Some(i64::from(*v)),
        ExprKind::ConstParam(name) => match constants.get(name) {
            Some(ConstValue::Int(v)) => Some(i64::from(v)),
            _ => None,
        },
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => Some(-fold_int(expr, constants)?),
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = fold_int(lhs, constants)?;
            let rhs = fold_int(rhs, constants)?;
            match op {
                BinOp::Add => Some(lhs + rhs),
                BinOp::Sub => Some(lhs - rhs),
                BinOp::Mul => Some(lhs * rhs),
                BinOp::Div => lhs.checked_div(rhs),
                BinOp::Rem => lhs.checked_rem(rhs),
            }
        }
        ExprKind::Cast(inner) if expr.ty == crate::ir::Type::Int => fold_int(inner, constants),
        _ => None,
    }
}

/// Swizzle lane spellings shared by every dialect.
pub(crate) fn lane_char(lane: u8) -> char {
    match lane {
        0 => 'x',
        1 => 'y',
        2 => 'z',
        _ => 'w',
    }
}

pub(crate) fn cmp_str(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
    }
}

pub(crate) fn bin_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
    }
}

/// Helper calls may not recurse, directly or mutually; no target has a call
/// stack to spend on them.
fn check_recursion(kernel: &TypedKernel) -> Result<(), CodegenError> {
    let graph: HashMap<&str, Vec<String>> = kernel
        .helpers
        .iter()
        .map(|f| (f.name.as_str(), direct_calls(&f.body)))
        .collect();
    let mut done: HashSet<&str> = HashSet::new();
    for helper in &kernel.helpers {
        let mut stack = Vec::new();
        visit(helper.name.as_str(), &graph, &mut stack, &mut done)?;
    }
    return Ok(());

    fn visit<'a>(
        name: &'a str,
        graph: &'a HashMap<&str, Vec<String>>,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), CodegenError> {
        if done.contains(name) {
            return Ok(());
        }
        if stack.contains(&name) {
            return Err(CodegenError::UnsupportedConstruct(format!(
                "recursive helper function `{name}`"
            )));
        }
        stack.push(name);
        if let Some((key, callees)) = graph.get_key_value(name) {
            for callee in callees {
                visit(callee, graph, stack, done)?;
            }
            done.insert(*key);
        }
        stack.pop();
        Ok(())
    }
}

fn direct_calls(body: &[Stmt]) -> Vec<String> {
    fn from_expr(expr: &TypedExpr, out: &mut Vec<String>) {
        match &expr.kind {
            ExprKind::HelperCall { name, args } => {
                out.push(name.clone());
                for arg in args {
                    from_expr(arg, out);
                }
            }
            ExprKind::Unary { expr, .. } | ExprKind::Cast(expr) => from_expr(expr, out),
            ExprKind::Binary { lhs, rhs, .. }
            | ExprKind::Compare { lhs, rhs, .. }
            | ExprKind::Logic { lhs, rhs, .. } => {
                from_expr(lhs, out);
                from_expr(rhs, out);
            }
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                from_expr(cond, out);
                from_expr(then_expr, out);
                from_expr(else_expr, out);
            }
            ExprKind::Swizzle { base, .. } => from_expr(base, out),
            ExprKind::ArrayLoad { index, .. } => from_expr(index, out),
            ExprKind::VecCtor { args, .. } | ExprKind::Builtin { args, .. } => {
                for arg in args {
                    from_expr(arg, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    visit_stmts(body, &mut |expr| from_expr(expr, &mut out));
    out
}

/// Apply `f` to every expression in a statement tree.
pub(crate) fn visit_stmts(body: &[Stmt], f: &mut impl FnMut(&TypedExpr)) {
    for stmt in body {
        match stmt {
            Stmt::Local { value, .. } | Stmt::AssignLocal { value, .. } | Stmt::Eval(value) => {
                f(value)
            }
            Stmt::ArrayStore { index, value, .. } => {
                f(index);
                f(value);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                f(cond);
                visit_stmts(then_block, f);
                visit_stmts(else_block, f);
            }
            Stmt::For {
                init,
                bound,
                step,
                body,
                ..
            } => {
                f(init);
                f(bound);
                f(step);
                visit_stmts(body, f);
            }
            Stmt::Return(Some(value)) => f(value),
            Stmt::Return(None) | Stmt::Break | Stmt::Continue => {}
        }
    }
}

/// Apply `f` to every expression reachable from the kernel, descending into
/// subexpressions.
pub(crate) fn visit_kernel_exprs(kernel: &TypedKernel, f: &mut impl FnMut(&TypedExpr)) {
    fn deep(expr: &TypedExpr, f: &mut impl FnMut(&TypedExpr)) {
        f(expr);
        match &expr.kind {
            ExprKind::Unary { expr, .. } | ExprKind::Cast(expr) => deep(expr, f),
            ExprKind::Binary { lhs, rhs, .. }
            | ExprKind::Compare { lhs, rhs, .. }
            | ExprKind::Logic { lhs, rhs, .. } => {
                deep(lhs, f);
                deep(rhs, f);
            }
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                deep(cond, f);
                deep(then_expr, f);
                deep(else_expr, f);
            }
            ExprKind::Swizzle { base, .. } => deep(base, f),
            ExprKind::ArrayLoad { index, .. } => deep(index, f),
            ExprKind::VecCtor { args, .. }
            | ExprKind::Builtin { args, .. }
            | ExprKind::HelperCall { args, .. } => {
                for arg in args {
                    deep(arg, f);
                }
            }
            _ => {}
        }
    }
    let mut functions: Vec<&Function> = vec![&kernel.entry];
    functions.extend(kernel.helpers.iter());
    for func in functions {
        visit_stmts(&func.body, &mut |expr| deep(expr, f));
    }
}

#[cfg(test)]
mod tests {
    use super::format_f32;

    #[test]
    fn float_formatting() {
        assert_eq!(format_f32(1.0), "1.0");
        assert_eq!(format_f32(0.5), "0.5");
        assert_eq!(format_f32(-2.25), "-2.25");
        assert_eq!(format_f32(0.125), "0.125");
    }
}
