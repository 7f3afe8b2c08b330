//! Semantic analysis: one pass that validates the syntax tree while building
//! the typed IR and the `ShaderContext` the generators and scheduler share.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::ast::{self, Ast};
use crate::context::{
    Binding, BindingDirection, BindingKind, Dialect, ElemType, HelperSig, PipelineLayout,
    ShaderContext, WorkgroupSize,
};
use crate::ir::{
    Axis, BinOp, BuiltinFn, CmpOp, ExprKind, Function, LogicOp, Stmt, Type, TypedExpr,
    TypedKernel, UnaryOp,
};
use crate::limits;

/// Structurally invalid or ill-typed kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("kernel has no `@compute` entry function")]
    NoEntryPoint,
    #[error("multiple `@compute` entry functions: `{first}` and `{second}`")]
    MultipleEntryPoints { first: String, second: String },
    #[error("property `{name}` has no `@in`/`@out` direction annotation")]
    UnannotatedBinding { name: String },
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },
    #[error("unknown identifier `{name}`")]
    UnknownIdentifier { name: String },
    #[error("entry function `{name}` must take no parameters and return nothing")]
    InvalidEntrySignature { name: String },
    #[error("binding `{name}` accessed against its declared direction")]
    DirectionViolation { name: String },
    #[error("loop at line {line} has no bound that is fixed for the duration of a dispatch")]
    UnboundedLoop { line: u32 },
    #[error("`{name}` is already declared or reserved")]
    DuplicateName { name: String },
    #[error("kernel exceeds the {what} limit ({max})")]
    LimitExceeded { what: &'static str, max: usize },
    #[error("cannot assign to immutable `let` binding `{name}`")]
    AssignToImmutable { name: String },
}

/// Result of a successful analysis: the compiled-unit metadata plus the typed
/// IR the generators consume.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub context: ShaderContext,
    pub kernel: TypedKernel,
}

pub fn analyze(ast: &Ast, dialect: Dialect) -> Result<Analysis, SemanticError> {
    let analyzer = Analyzer::build(ast)?;
    let (entry_decl, workgroup_size) = analyzer.find_entry()?;

    let entry = analyzer.type_function(entry_decl, true)?;
    let mut helpers = Vec::new();
    for decl in &ast.functions {
        if decl.name != entry_decl.name {
            helpers.push(analyzer.type_function(decl, false)?);
        }
    }
    let helpers = reachable_helpers(&entry, helpers);

    let helper_sigs = helpers
        .iter()
        .map(|f| HelperSig {
            name: f.name.clone(),
            params: f
                .params
                .iter()
                .map(|(name, ty)| (name.clone(), ty.dsl_name().to_owned()))
                .collect(),
            ret: f.ret.map(|ty| ty.dsl_name().to_owned()),
        })
        .collect();

    let layout = PipelineLayout::for_bindings(&analyzer.bindings);
    debug!(
        kernel = %ast.kernel_name,
        entry = %entry_decl.name,
        bindings = analyzer.bindings.len(),
        helpers = helpers.len(),
        "analyzed kernel"
    );

    Ok(Analysis {
        context: ShaderContext {
            entry_point: entry_decl.name.clone(),
            workgroup_size,
            bindings: analyzer.bindings,
            helpers: helper_sigs,
            dialect,
            layout,
        },
        kernel: TypedKernel { entry, helpers },
    })
}

/// Identifiers with fixed meanings that declarations may not shadow.
const RESERVED: &[&str] = &["global_id", "global_extent", "len", "float", "int"];

struct HelperDecl {
    params: Vec<(String, Type)>,
    ret: Option<Type>,
}

struct Analyzer<'a> {
    ast: &'a Ast,
    bindings: Vec<Binding>,
    /// Initialized constants, folded to literals at every use.
    inline_consts: HashMap<String, TypedExpr>,
    /// Uninitialized compile-time parameters.
    const_params: HashMap<String, Type>,
    helper_decls: HashMap<String, HelperDecl>,
}

impl<'a> Analyzer<'a> {
    fn build(ast: &'a Ast) -> Result<Self, SemanticError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut check_name = |name: &'a str| -> Result<(), SemanticError> {
            if RESERVED.contains(&name) || !seen.insert(name) {
                return Err(SemanticError::DuplicateName {
                    name: name.to_owned(),
                });
            }
            Ok(())
        };

        let mut bindings = Vec::new();
        for prop in &ast.properties {
            check_name(&prop.name)?;
            bindings.push(property_binding(prop)?);
        }

        let mut inline_consts = HashMap::new();
        let mut const_params = HashMap::new();
        for decl in &ast.constants {
            check_name(&decl.name)?;
            let ty = scalar_const_type(decl)?;
            match decl.value {
                Some(lit) => {
                    inline_consts.insert(decl.name.clone(), literal_expr(ty, lit, &decl.name)?);
                }
                None => {
                    if ty == Type::Bool {
                        return Err(SemanticError::TypeMismatch {
                            context: format!("compile-time constant `{}`", decl.name),
                            expected: "`int` or `float`".to_owned(),
                            found: "bool".to_owned(),
                        });
                    }
                    const_params.insert(decl.name.clone(), ty);
                    bindings.push(Binding {
                        name: decl.name.clone(),
                        direction: BindingDirection::IN,
                        element_type: match ty {
                            Type::Int => ElemType::Int,
                            _ => ElemType::Float,
                        },
                        kind: BindingKind::Uniform,
                        is_compile_time_constant: true,
                        declared_len: None,
                    });
                }
            }
        }

        if bindings.len() > limits::MAX_BINDINGS {
            return Err(SemanticError::LimitExceeded {
                what: "binding",
                max: limits::MAX_BINDINGS,
            });
        }
        if ast.functions.len() > limits::MAX_FUNCTIONS {
            return Err(SemanticError::LimitExceeded {
                what: "function",
                max: limits::MAX_FUNCTIONS,
            });
        }

        let mut analyzer = Analyzer {
            ast,
            bindings,
            inline_consts,
            const_params,
            helper_decls: HashMap::new(),
        };

        // Resolve declared array lengths now that constants are known.
        for prop in &ast.properties {
            if let ast::TypeExpr::Array {
                len: Some(ast::ArrayLen::Named(len_name)),
                ..
            } = &prop.ty
            {
                let declared = analyzer.resolve_named_len(len_name)?;
                let binding = analyzer
                    .bindings
                    .iter_mut()
                    .find(|b| b.name == prop.name)
                    .unwrap();
                binding.declared_len = declared;
            }
        }

        // Helper signatures first, so call order does not matter and the
        // generators can emit prototypes.
        for func in &ast.functions {
            check_name(&func.name)?;
            if func.compute.is_some() {
                continue;
            }
            let mut params = Vec::new();
            for param in &func.params {
                let ty = value_type(&param.ty).ok_or_else(|| SemanticError::TypeMismatch {
                    context: format!("parameter `{}` of `{}`", param.name, func.name),
                    expected: "a scalar or vector type".to_owned(),
                    found: "an array type".to_owned(),
                })?;
                params.push((param.name.clone(), ty));
            }
            let ret = match &func.ret {
                None => None,
                Some(ty) => Some(value_type(ty).ok_or_else(|| SemanticError::TypeMismatch {
                    context: format!("return type of `{}`", func.name),
                    expected: "a scalar or vector type".to_owned(),
                    found: "an array type".to_owned(),
                })?),
            };
            analyzer
                .helper_decls
                .insert(func.name.clone(), HelperDecl { params, ret });
        }

        Ok(analyzer)
    }

    fn find_entry(&self) -> Result<(&'a ast::FunctionDecl, WorkgroupSize), SemanticError> {
        let mut entry: Option<&ast::FunctionDecl> = None;
        for func in &self.ast.functions {
            if func.compute.is_none() {
                continue;
            }
            if let Some(first) = entry {
                return Err(SemanticError::MultipleEntryPoints {
                    first: first.name.clone(),
                    second: func.name.clone(),
                });
            }
            entry = Some(func);
        }
        let entry = entry.ok_or(SemanticError::NoEntryPoint)?;
        if !entry.params.is_empty() || entry.ret.is_some() {
            return Err(SemanticError::InvalidEntrySignature {
                name: entry.name.clone(),
            });
        }
        let (x, y, z) = entry.compute.unwrap();
        Ok((entry, WorkgroupSize { x, y, z }))
    }

    fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    fn resolve_named_len(&self, name: &str) -> Result<Option<u32>, SemanticError> {
        if let Some(expr) = self.inline_consts.get(name) {
            return match expr.kind {
                ExprKind::IntLit(v) if v > 0 => Ok(Some(v as u32)),
                _ => Err(SemanticError::TypeMismatch {
                    context: format!("array length `{name}`"),
                    expected: "a positive `int` constant".to_owned(),
                    found: expr.ty.to_string(),
                }),
            };
        }
        match self.const_params.get(name) {
            // Length supplied with the constant's value before codegen.
            Some(Type::Int) => Ok(None),
            Some(other) => Err(SemanticError::TypeMismatch {
                context: format!("array length `{name}`"),
                expected: "an `int` constant".to_owned(),
                found: other.to_string(),
            }),
            None => Err(SemanticError::UnknownIdentifier {
                name: name.to_owned(),
            }),
        }
    }

    fn type_function(
        &self,
        decl: &ast::FunctionDecl,
        is_entry: bool,
    ) -> Result<Function, SemanticError> {
        let (params, ret) = if is_entry {
            (Vec::new(), None)
        } else {
            let sig = &self.helper_decls[&decl.name];
            (sig.params.clone(), sig.ret)
        };

        let mut ctx = FnCtx {
            analyzer: self,
            scopes: vec![HashMap::new()],
            ret,
            induction: Vec::new(),
        };
        for (name, ty) in &params {
            ctx.declare(name, *ty, false)?;
        }
        let body = ctx.type_block(&decl.body)?;
        Ok(Function {
            name: decl.name.clone(),
            params,
            ret,
            body,
        })
    }
}

/// Drop typed helpers that are unreachable from the entry point, keeping
/// declaration order for the rest.
fn reachable_helpers(entry: &Function, helpers: Vec<Function>) -> Vec<Function> {
    let mut reached: HashSet<String> = HashSet::new();
    let mut work: Vec<String> = Vec::new();
    collect_calls(&entry.body, &mut work);
    while let Some(name) = work.pop() {
        if reached.insert(name.clone()) {
            if let Some(helper) = helpers.iter().find(|f| f.name == name) {
                collect_calls(&helper.body, &mut work);
            }
        }
    }
    helpers
        .into_iter()
        .filter(|f| reached.contains(&f.name))
        .collect()
}

fn collect_calls(body: &[Stmt], out: &mut Vec<String>) {
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
    for stmt in body {
        match stmt {
            Stmt::Local { value, .. } | Stmt::Eval(value) => from_expr(value, out),
            Stmt::AssignLocal { value, .. } => from_expr(value, out),
            Stmt::ArrayStore { index, value, .. } => {
                from_expr(index, out);
                from_expr(value, out);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                from_expr(cond, out);
                collect_calls(then_block, out);
                collect_calls(else_block, out);
            }
            Stmt::For {
                init,
                bound,
                step,
                body,
                ..
            } => {
                from_expr(init, out);
                from_expr(bound, out);
                from_expr(step, out);
                collect_calls(body, out);
            }
            Stmt::Return(Some(value)) => from_expr(value, out),
            _ => {}
        }
    }
}

fn property_binding(prop: &ast::PropertyDecl) -> Result<Binding, SemanticError> {
    let (kind, elem, declared_len) = match &prop.ty {
        ast::TypeExpr::Bool => {
            return Err(SemanticError::TypeMismatch {
                context: format!("property `{}`", prop.name),
                expected: "a numeric scalar, vector, or array type".to_owned(),
                found: "bool".to_owned(),
            })
        }
        ast::TypeExpr::Array { elem, len } => {
            let elem = elem_type(elem).ok_or_else(|| SemanticError::TypeMismatch {
                context: format!("property `{}`", prop.name),
                expected: "a scalar or vector element type".to_owned(),
                found: "bool".to_owned(),
            })?;
            let declared_len = match len {
                Some(ast::ArrayLen::Literal(v)) => Some(*v),
                // Named lengths are resolved after constants are collected.
                Some(ast::ArrayLen::Named(_)) | None => None,
            };
            (BindingKind::ArrayBuffer, elem, declared_len)
        }
        other => {
            let elem = elem_type(other).ok_or_else(|| SemanticError::TypeMismatch {
                context: format!("property `{}`", prop.name),
                expected: "a numeric scalar or vector type".to_owned(),
                found: "bool".to_owned(),
            })?;
            (BindingKind::Uniform, elem, None)
        }
    };
    if prop.direction.is_empty() {
        return Err(SemanticError::UnannotatedBinding {
            name: prop.name.clone(),
        });
    }
    if kind == BindingKind::Uniform && prop.direction.contains(BindingDirection::OUT) {
        // Scalar/vector parameters are read-only; only arrays can be written.
        return Err(SemanticError::DirectionViolation {
            name: prop.name.clone(),
        });
    }
    Ok(Binding {
        name: prop.name.clone(),
        direction: prop.direction,
        element_type: elem,
        kind,
        is_compile_time_constant: false,
        declared_len,
    })
}

fn scalar_const_type(decl: &ast::ConstDecl) -> Result<Type, SemanticError> {
    match decl.ty {
        ast::TypeExpr::Int => Ok(Type::Int),
        ast::TypeExpr::Float => Ok(Type::Float),
        ast::TypeExpr::Bool => Ok(Type::Bool),
        _ => Err(SemanticError::TypeMismatch {
            context: format!("constant `{}`", decl.name),
            expected: "`int`, `float`, or `bool`".to_owned(),
            found: "a vector or array type".to_owned(),
        }),
    }
}

fn literal_expr(ty: Type, lit: ast::Literal, name: &str) -> Result<TypedExpr, SemanticError> {
    let kind = match (ty, lit) {
        (Type::Int, ast::Literal::Int(v)) => {
            let v = i32::try_from(v).map_err(|_| SemanticError::TypeMismatch {
                context: format!("constant `{name}`"),
                expected: "a 32-bit value".to_owned(),
                found: v.to_string(),
            })?;
            ExprKind::IntLit(v)
        }
        (Type::Float, ast::Literal::Float(v)) => ExprKind::FloatLit(v),
        (Type::Float, ast::Literal::Int(v)) => ExprKind::FloatLit(v as f32),
        (Type::Bool, ast::Literal::Bool(v)) => ExprKind::BoolLit(v),
        (expected, _) => {
            return Err(SemanticError::TypeMismatch {
                context: format!("constant `{name}`"),
                expected: expected.to_string(),
                found: "a literal of another type".to_owned(),
            })
        }
    };
    Ok(TypedExpr { ty, kind })
}

fn elem_type(ty: &ast::TypeExpr) -> Option<ElemType> {
    match ty {
        ast::TypeExpr::Float => Some(ElemType::Float),
        ast::TypeExpr::Int => Some(ElemType::Int),
        ast::TypeExpr::Vec2 => Some(ElemType::Vec2),
        ast::TypeExpr::Vec3 => Some(ElemType::Vec3),
        ast::TypeExpr::Vec4 => Some(ElemType::Vec4),
        ast::TypeExpr::Bool | ast::TypeExpr::Array { .. } => None,
    }
}

fn value_type(ty: &ast::TypeExpr) -> Option<Type> {
    match ty {
        ast::TypeExpr::Float => Some(Type::Float),
        ast::TypeExpr::Int => Some(Type::Int),
        ast::TypeExpr::Bool => Some(Type::Bool),
        ast::TypeExpr::Vec2 => Some(Type::Vec2),
        ast::TypeExpr::Vec3 => Some(Type::Vec3),
        ast::TypeExpr::Vec4 => Some(Type::Vec4),
        ast::TypeExpr::Array { .. } => None,
    }
}

#[derive(Debug, Clone, Copy)]
struct Local {
    ty: Type,
    mutable: bool,
}

struct FnCtx<'a> {
    analyzer: &'a Analyzer<'a>,
    scopes: Vec<HashMap<String, Local>>,
    ret: Option<Type>,
    /// Induction variables of enclosing loops; reassignment is rejected.
    induction: Vec<String>,
}

impl FnCtx<'_> {
    fn declare(&mut self, name: &str, ty: Type, mutable: bool) -> Result<(), SemanticError> {
        if RESERVED.contains(&name)
            || self.lookup(name).is_some()
            || self.analyzer.binding(name).is_some()
            || self.analyzer.inline_consts.contains_key(name)
        {
            return Err(SemanticError::DuplicateName {
                name: name.to_owned(),
            });
        }
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_owned(), Local { ty, mutable });
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Local> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied()
    }

    fn type_block(&mut self, block: &ast::Block) -> Result<Vec<Stmt>, SemanticError> {
        self.scopes.push(HashMap::new());
        let result = block
            .stmts
            .iter()
            .map(|stmt| self.type_stmt(stmt))
            .collect();
        self.scopes.pop();
        result
    }

    fn type_stmt(&mut self, stmt: &ast::Stmt) -> Result<Stmt, SemanticError> {
        match stmt {
            ast::Stmt::Local {
                name,
                mutable,
                value,
                ..
            } => {
                let value = self.type_expr(value)?;
                self.declare(name, value.ty, *mutable)?;
                Ok(Stmt::Local {
                    name: name.clone(),
                    mutable: *mutable,
                    value,
                })
            }
            ast::Stmt::Assign {
                target,
                value,
                span,
            } => self.type_assign(target, value, span.line),
            ast::Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let cond = self.expect_type(cond, Type::Bool, "the `if` condition")?;
                let then_block = self.type_block(then_block)?;
                let else_block = match else_block {
                    Some(block) => self.type_block(block)?,
                    None => Vec::new(),
                };
                Ok(Stmt::If {
                    cond,
                    then_block,
                    else_block,
                })
            }
            ast::Stmt::For(stmt) => self.type_for(stmt),
            ast::Stmt::Break(_) => Ok(Stmt::Break),
            ast::Stmt::Continue(_) => Ok(Stmt::Continue),
            ast::Stmt::Return { value, .. } => {
                let value = match (value, self.ret) {
                    (None, None) => None,
                    (Some(expr), Some(ret)) => {
                        Some(self.expect_type(expr, ret, "the return value")?)
                    }
                    (None, Some(ret)) => {
                        return Err(SemanticError::TypeMismatch {
                            context: "the return statement".to_owned(),
                            expected: ret.to_string(),
                            found: "no value".to_owned(),
                        })
                    }
                    (Some(_), None) => {
                        return Err(SemanticError::TypeMismatch {
                            context: "the return statement".to_owned(),
                            expected: "no value".to_owned(),
                            found: "a value".to_owned(),
                        })
                    }
                };
                Ok(Stmt::Return(value))
            }
            ast::Stmt::Expr { expr, .. } => Ok(Stmt::Eval(self.type_expr(expr)?)),
        }
    }

    fn type_for(&mut self, stmt: &ast::ForStmt) -> Result<Stmt, SemanticError> {
        let line = stmt.span.line;
        let init = self.expect_type(&stmt.init, Type::Int, "the loop initializer")?;
        let bound = self.expect_type(&stmt.bound, Type::Int, "the loop bound")?;
        check_dispatch_fixed(&bound, line)?;
        let step = self.expect_type(&stmt.step, Type::Int, "the loop step")?;
        match step.kind {
            ExprKind::IntLit(v) if v != 0 => {}
            ExprKind::ConstParam(_) => {}
            // Anything else can change mid-loop or be zero.
            _ => return Err(SemanticError::UnboundedLoop { line }),
        }

        self.scopes.push(HashMap::new());
        self.declare(&stmt.var, Type::Int, true)?;
        self.induction.push(stmt.var.clone());
        let body = stmt
            .body
            .stmts
            .iter()
            .map(|s| self.type_stmt(s))
            .collect::<Result<Vec<_>, _>>();
        self.induction.pop();
        self.scopes.pop();

        Ok(Stmt::For {
            var: stmt.var.clone(),
            init,
            cmp: cmp_op(stmt.cmp),
            bound,
            step_negative: stmt.step_negative,
            step,
            body: body?,
        })
    }

    fn type_assign(
        &mut self,
        target: &ast::AssignTarget,
        value: &ast::Expr,
        line: u32,
    ) -> Result<Stmt, SemanticError> {
        match target {
            ast::AssignTarget::Name { name, member } => {
                if self.induction.contains(name) {
                    // Reassigning the induction variable defeats the bound.
                    return Err(SemanticError::UnboundedLoop { line });
                }
                let Some(local) = self.lookup(name) else {
                    if self.analyzer.binding(name).is_some() {
                        return Err(SemanticError::DirectionViolation { name: name.clone() });
                    }
                    if self.analyzer.inline_consts.contains_key(name) {
                        return Err(SemanticError::AssignToImmutable { name: name.clone() });
                    }
                    return Err(SemanticError::UnknownIdentifier { name: name.clone() });
                };
                if !local.mutable {
                    return Err(SemanticError::AssignToImmutable { name: name.clone() });
                }
                let lane = match member {
                    None => None,
                    Some(member) => Some(self.single_lane(local.ty, member, name)?),
                };
                let expected = match lane {
                    None => local.ty,
                    Some(_) => Type::Float,
                };
                let value = self.expect_type(value, expected, &format!("assignment to `{name}`"))?;
                Ok(Stmt::AssignLocal {
                    name: name.clone(),
                    lane,
                    value,
                })
            }
            ast::AssignTarget::Index {
                name,
                index,
                member,
            } => {
                let Some(binding) = self.analyzer.binding(name) else {
                    return Err(SemanticError::UnknownIdentifier { name: name.clone() });
                };
                if binding.kind != BindingKind::ArrayBuffer {
                    return Err(SemanticError::TypeMismatch {
                        context: format!("assignment to `{name}`"),
                        expected: "an array binding".to_owned(),
                        found: "a scalar binding".to_owned(),
                    });
                }
                if !binding.direction.contains(BindingDirection::OUT) {
                    return Err(SemanticError::DirectionViolation { name: name.clone() });
                }
                let elem = Type::from_elem(binding.element_type);
                let lane = match member {
                    None => None,
                    Some(member) => Some(self.single_lane(elem, member, name)?),
                };
                let expected = match lane {
                    None => elem,
                    Some(_) => Type::Float,
                };
                let index =
                    self.expect_type(index, Type::Int, &format!("the index into `{name}`"))?;
                let value = self.expect_type(value, expected, &format!("the store into `{name}`"))?;
                Ok(Stmt::ArrayStore {
                    binding: name.clone(),
                    index,
                    lane,
                    value,
                })
            }
        }
    }

    fn single_lane(&self, base: Type, member: &str, name: &str) -> Result<u8, SemanticError> {
        let lanes = parse_swizzle(member, base).ok_or_else(|| SemanticError::TypeMismatch {
            context: format!("component access `.{member}` on `{name}`"),
            expected: format!("a component of {base}"),
            found: format!("`.{member}`"),
        })?;
        if lanes.len() != 1 {
            return Err(SemanticError::TypeMismatch {
                context: format!("component write on `{name}`"),
                expected: "a single component".to_owned(),
                found: format!("`.{member}`"),
            });
        }
        Ok(lanes[0])
    }

    fn expect_type(
        &mut self,
        expr: &ast::Expr,
        expected: Type,
        context: &str,
    ) -> Result<TypedExpr, SemanticError> {
        let typed = self.type_expr(expr)?;
        if typed.ty != expected {
            return Err(SemanticError::TypeMismatch {
                context: context.to_owned(),
                expected: expected.to_string(),
                found: typed.ty.to_string(),
            });
        }
        Ok(typed)
    }

    fn type_expr(&mut self, expr: &ast::Expr) -> Result<TypedExpr, SemanticError> {
        match expr {
            ast::Expr::IntLit(v, _) => {
                let v = i32::try_from(*v).map_err(|_| SemanticError::TypeMismatch {
                    context: "an integer literal".to_owned(),
                    expected: "a 32-bit value".to_owned(),
                    found: v.to_string(),
                })?;
                Ok(TypedExpr {
                    ty: Type::Int,
                    kind: ExprKind::IntLit(v),
                })
            }
            ast::Expr::FloatLit(v, _) => Ok(TypedExpr {
                ty: Type::Float,
                kind: ExprKind::FloatLit(*v),
            }),
            ast::Expr::BoolLit(v, _) => Ok(TypedExpr {
                ty: Type::Bool,
                kind: ExprKind::BoolLit(*v),
            }),
            ast::Expr::Ident(name, _) => self.type_ident(name),
            ast::Expr::Member { base, member, .. } => self.type_member(base, member),
            ast::Expr::Index { base, index, .. } => self.type_index(base, index),
            ast::Expr::Unary { op, expr, .. } => {
                let typed = self.type_expr(expr)?;
                match op {
                    ast::UnaryOp::Neg => {
                        if typed.ty == Type::Bool {
                            return Err(SemanticError::TypeMismatch {
                                context: "unary `-`".to_owned(),
                                expected: "a numeric operand".to_owned(),
                                found: "bool".to_owned(),
                            });
                        }
                        Ok(TypedExpr {
                            ty: typed.ty,
                            kind: ExprKind::Unary {
                                op: UnaryOp::Neg,
                                expr: Box::new(typed),
                            },
                        })
                    }
                    ast::UnaryOp::Not => {
                        if typed.ty != Type::Bool {
                            return Err(SemanticError::TypeMismatch {
                                context: "unary `!`".to_owned(),
                                expected: "bool".to_owned(),
                                found: typed.ty.to_string(),
                            });
                        }
                        Ok(TypedExpr {
                            ty: Type::Bool,
                            kind: ExprKind::Unary {
                                op: UnaryOp::Not,
                                expr: Box::new(typed),
                            },
                        })
                    }
                }
            }
            ast::Expr::Binary { op, lhs, rhs, .. } => self.type_binary(*op, lhs, rhs),
            ast::Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let cond = self.expect_type(cond, Type::Bool, "the ternary condition")?;
                let then_expr = self.type_expr(then_expr)?;
                let else_expr = self.type_expr(else_expr)?;
                if then_expr.ty != else_expr.ty {
                    return Err(SemanticError::TypeMismatch {
                        context: "the ternary branches".to_owned(),
                        expected: then_expr.ty.to_string(),
                        found: else_expr.ty.to_string(),
                    });
                }
                Ok(TypedExpr {
                    ty: then_expr.ty,
                    kind: ExprKind::Select {
                        cond: Box::new(cond),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                })
            }
            ast::Expr::Call { name, args, .. } => self.type_call(name, args),
        }
    }

    fn type_ident(&mut self, name: &str) -> Result<TypedExpr, SemanticError> {
        if let Some(local) = self.lookup(name) {
            return Ok(TypedExpr {
                ty: local.ty,
                kind: ExprKind::Local(name.to_owned()),
            });
        }
        if let Some(expr) = self.analyzer.inline_consts.get(name) {
            return Ok(expr.clone());
        }
        if let Some(ty) = self.analyzer.const_params.get(name) {
            return Ok(TypedExpr {
                ty: *ty,
                kind: ExprKind::ConstParam(name.to_owned()),
            });
        }
        if let Some(binding) = self.analyzer.binding(name) {
            return match binding.kind {
                BindingKind::Uniform => Ok(TypedExpr {
                    ty: Type::from_elem(binding.element_type),
                    kind: ExprKind::UniformRef(name.to_owned()),
                }),
                BindingKind::ArrayBuffer => Err(SemanticError::TypeMismatch {
                    context: format!("`{name}`"),
                    expected: format!("an indexed element or `len({name})`"),
                    found: "a bare array binding".to_owned(),
                }),
            };
        }
        if name == "global_id" || name == "global_extent" {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{name}`"),
                expected: "component access `.x`/`.y`/`.z`".to_owned(),
                found: "a bare reference".to_owned(),
            });
        }
        Err(SemanticError::UnknownIdentifier {
            name: name.to_owned(),
        })
    }

    fn type_member(&mut self, base: &ast::Expr, member: &str) -> Result<TypedExpr, SemanticError> {
        if let ast::Expr::Ident(name, _) = base {
            if name == "global_id" || name == "global_extent" {
                let axis = match member {
                    "x" => Axis::X,
                    "y" => Axis::Y,
                    "z" => Axis::Z,
                    _ => {
                        return Err(SemanticError::TypeMismatch {
                            context: format!("`{name}.{member}`"),
                            expected: "`.x`, `.y`, or `.z`".to_owned(),
                            found: format!("`.{member}`"),
                        })
                    }
                };
                let kind = if name == "global_id" {
                    ExprKind::GlobalId(axis)
                } else {
                    ExprKind::GlobalExtent(axis)
                };
                return Ok(TypedExpr { ty: Type::Int, kind });
            }
        }
        let base = self.type_expr(base)?;
        let lanes = parse_swizzle(member, base.ty).ok_or_else(|| SemanticError::TypeMismatch {
            context: format!("swizzle `.{member}`"),
            expected: format!("components of {}", base.ty),
            found: format!("`.{member}`"),
        })?;
        let ty = if lanes.len() == 1 {
            Type::Float
        } else {
            Type::vector(lanes.len() as u32).unwrap()
        };
        Ok(TypedExpr {
            ty,
            kind: ExprKind::Swizzle {
                base: Box::new(base),
                lanes,
            },
        })
    }

    fn type_index(&mut self, base: &ast::Expr, index: &ast::Expr) -> Result<TypedExpr, SemanticError> {
        let ast::Expr::Ident(name, _) = base else {
            return Err(SemanticError::TypeMismatch {
                context: "an index expression".to_owned(),
                expected: "an array binding name".to_owned(),
                found: "an expression".to_owned(),
            });
        };
        let Some(binding) = self.analyzer.binding(name) else {
            return Err(SemanticError::UnknownIdentifier { name: name.clone() });
        };
        if binding.kind != BindingKind::ArrayBuffer {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{name}[...]`"),
                expected: "an array binding".to_owned(),
                found: "a scalar binding".to_owned(),
            });
        }
        if !binding.direction.contains(BindingDirection::IN) {
            return Err(SemanticError::DirectionViolation { name: name.clone() });
        }
        let elem = Type::from_elem(binding.element_type);
        let index = self.expect_type(index, Type::Int, &format!("the index into `{name}`"))?;
        Ok(TypedExpr {
            ty: elem,
            kind: ExprKind::ArrayLoad {
                binding: name.clone(),
                index: Box::new(index),
            },
        })
    }

    fn type_binary(
        &mut self,
        op: ast::BinOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> Result<TypedExpr, SemanticError> {
        let lhs = self.type_expr(lhs)?;
        let rhs = self.type_expr(rhs)?;
        match op {
            ast::BinOp::And | ast::BinOp::Or => {
                if lhs.ty != Type::Bool || rhs.ty != Type::Bool {
                    return Err(SemanticError::TypeMismatch {
                        context: "a logical operator".to_owned(),
                        expected: "bool operands".to_owned(),
                        found: format!("{} and {}", lhs.ty, rhs.ty),
                    });
                }
                let op = if op == ast::BinOp::And {
                    LogicOp::And
                } else {
                    LogicOp::Or
                };
                Ok(TypedExpr {
                    ty: Type::Bool,
                    kind: ExprKind::Logic {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
            ast::BinOp::Cmp(cmp) => {
                let comparable = lhs.ty == rhs.ty
                    && (matches!(lhs.ty, Type::Int | Type::Float)
                        || (lhs.ty == Type::Bool
                            && matches!(cmp, ast::CmpOp::Eq | ast::CmpOp::Ne)));
                if !comparable {
                    return Err(SemanticError::TypeMismatch {
                        context: "a comparison".to_owned(),
                        expected: "matching scalar operands".to_owned(),
                        found: format!("{} and {}", lhs.ty, rhs.ty),
                    });
                }
                Ok(TypedExpr {
                    ty: Type::Bool,
                    kind: ExprKind::Compare {
                        op: cmp_op(cmp),
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
            ast::BinOp::Rem => {
                if lhs.ty != Type::Int || rhs.ty != Type::Int {
                    return Err(SemanticError::TypeMismatch {
                        context: "`%`".to_owned(),
                        expected: "int operands".to_owned(),
                        found: format!("{} and {}", lhs.ty, rhs.ty),
                    });
                }
                Ok(TypedExpr {
                    ty: Type::Int,
                    kind: ExprKind::Binary {
                        op: BinOp::Rem,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
            ast::BinOp::Add | ast::BinOp::Sub | ast::BinOp::Mul | ast::BinOp::Div => {
                let ty = arith_result(lhs.ty, rhs.ty).ok_or_else(|| SemanticError::TypeMismatch {
                    context: "an arithmetic operator".to_owned(),
                    expected: "matching numeric operands".to_owned(),
                    found: format!("{} and {}", lhs.ty, rhs.ty),
                })?;
                let op = match op {
                    ast::BinOp::Add => BinOp::Add,
                    ast::BinOp::Sub => BinOp::Sub,
                    ast::BinOp::Mul => BinOp::Mul,
                    _ => BinOp::Div,
                };
                Ok(TypedExpr {
                    ty,
                    kind: ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
        }
    }

    fn type_call(&mut self, name: &str, args: &[ast::Expr]) -> Result<TypedExpr, SemanticError> {
        match name {
            "vec2" | "vec3" | "vec4" => return self.type_vec_ctor(name, args),
            "float" | "int" => {
                let target = if name == "float" { Type::Float } else { Type::Int };
                if args.len() != 1 {
                    return Err(SemanticError::TypeMismatch {
                        context: format!("`{name}(...)`"),
                        expected: "one argument".to_owned(),
                        found: format!("{} arguments", args.len()),
                    });
                }
                let arg = self.type_expr(&args[0])?;
                if !matches!(arg.ty, Type::Float | Type::Int) {
                    return Err(SemanticError::TypeMismatch {
                        context: format!("`{name}(...)`"),
                        expected: "a scalar argument".to_owned(),
                        found: arg.ty.to_string(),
                    });
                }
                return Ok(TypedExpr {
                    ty: target,
                    kind: ExprKind::Cast(Box::new(arg)),
                });
            }
            "len" => {
                let [ast::Expr::Ident(binding, _)] = args else {
                    return Err(SemanticError::TypeMismatch {
                        context: "`len(...)`".to_owned(),
                        expected: "an array binding name".to_owned(),
                        found: "an expression".to_owned(),
                    });
                };
                let Some(b) = self.analyzer.binding(binding) else {
                    return Err(SemanticError::UnknownIdentifier {
                        name: binding.clone(),
                    });
                };
                if b.kind != BindingKind::ArrayBuffer {
                    return Err(SemanticError::TypeMismatch {
                        context: "`len(...)`".to_owned(),
                        expected: "an array binding".to_owned(),
                        found: "a scalar binding".to_owned(),
                    });
                }
                return Ok(TypedExpr {
                    ty: Type::Int,
                    kind: ExprKind::ArrayLen(binding.clone()),
                });
            }
            _ => {}
        }

        if let Some(func) = BuiltinFn::from_name(name) {
            return self.type_builtin(func, args);
        }

        let Some(sig) = self.analyzer.helper_decls.get(name) else {
            return Err(SemanticError::UnknownIdentifier {
                name: name.to_owned(),
            });
        };
        if sig.params.len() != args.len() {
            return Err(SemanticError::TypeMismatch {
                context: format!("call of `{name}`"),
                expected: format!("{} arguments", sig.params.len()),
                found: format!("{} arguments", args.len()),
            });
        }
        let mut typed_args = Vec::with_capacity(args.len());
        for (arg, (pname, pty)) in args.iter().zip(&sig.params) {
            typed_args.push(self.expect_type(
                arg,
                *pty,
                &format!("argument `{pname}` of `{name}`"),
            )?);
        }
        let ret = sig.ret.ok_or_else(|| SemanticError::TypeMismatch {
            context: format!("call of `{name}`"),
            expected: "a value-returning helper".to_owned(),
            found: "a helper returning nothing".to_owned(),
        });
        // A void helper call is only valid as an expression statement; the
        // grammar has no other place a void value can appear, so typing it as
        // a call with a placeholder type would mask errors. Reject instead.
        let ret = ret?;
        Ok(TypedExpr {
            ty: ret,
            kind: ExprKind::HelperCall {
                name: name.to_owned(),
                args: typed_args,
            },
        })
    }

    fn type_vec_ctor(&mut self, name: &str, args: &[ast::Expr]) -> Result<TypedExpr, SemanticError> {
        let width: u8 = match name {
            "vec2" => 2,
            "vec3" => 3,
            _ => 4,
        };
        let typed: Vec<TypedExpr> = args
            .iter()
            .map(|arg| self.type_expr(arg))
            .collect::<Result<_, _>>()?;
        for arg in &typed {
            let float_family = arg.ty == Type::Float || arg.ty.is_vector();
            if !float_family {
                return Err(SemanticError::TypeMismatch {
                    context: format!("`{name}(...)`"),
                    expected: "float components".to_owned(),
                    found: arg.ty.to_string(),
                });
            }
        }
        let total: u32 = typed.iter().map(|arg| arg.ty.lanes()).sum();
        let splat = typed.len() == 1 && typed[0].ty == Type::Float;
        if !splat && total != u32::from(width) {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{name}(...)`"),
                expected: format!("{width} components"),
                found: format!("{total} components"),
            });
        }
        Ok(TypedExpr {
            ty: Type::vector(u32::from(width)).unwrap(),
            kind: ExprKind::VecCtor { width, args: typed },
        })
    }

    fn type_builtin(
        &mut self,
        func: BuiltinFn,
        args: &[ast::Expr],
    ) -> Result<TypedExpr, SemanticError> {
        if args.len() != func.arity() {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{}(...)`", func.name()),
                expected: format!("{} arguments", func.arity()),
                found: format!("{} arguments", args.len()),
            });
        }
        let typed: Vec<TypedExpr> = args
            .iter()
            .map(|arg| self.type_expr(arg))
            .collect::<Result<_, _>>()?;
        for arg in &typed {
            let float_family = arg.ty == Type::Float || arg.ty.is_vector();
            if !float_family {
                return Err(SemanticError::TypeMismatch {
                    context: format!("`{}(...)`", func.name()),
                    expected: "float or vector operands".to_owned(),
                    found: arg.ty.to_string(),
                });
            }
        }
        if func.requires_vector() && !typed[0].ty.is_vector() {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{}(...)`", func.name()),
                expected: "vector operands".to_owned(),
                found: typed[0].ty.to_string(),
            });
        }
        let base = typed[0].ty;
        let uniform_ok = match func {
            // mix(x, y, a): `a` may be the base type or a float scalar.
            BuiltinFn::Mix => {
                typed[1].ty == base && (typed[2].ty == base || typed[2].ty == Type::Float)
            }
            _ => typed.iter().all(|arg| arg.ty == base),
        };
        if !uniform_ok {
            return Err(SemanticError::TypeMismatch {
                context: format!("`{}(...)`", func.name()),
                expected: format!("operands of {base}"),
                found: "mixed operand types".to_owned(),
            });
        }
        let ty = match func {
            BuiltinFn::Dot | BuiltinFn::Length => Type::Float,
            _ => base,
        };
        Ok(TypedExpr {
            ty,
            kind: ExprKind::Builtin { func, args: typed },
        })
    }
}

fn cmp_op(op: ast::CmpOp) -> CmpOp {
    match op {
        ast::CmpOp::Lt => CmpOp::Lt,
        ast::CmpOp::Le => CmpOp::Le,
        ast::CmpOp::Gt => CmpOp::Gt,
        ast::CmpOp::Ge => CmpOp::Ge,
        ast::CmpOp::Eq => CmpOp::Eq,
        ast::CmpOp::Ne => CmpOp::Ne,
    }
}

fn arith_result(lhs: Type, rhs: Type) -> Option<Type> {
    match (lhs, rhs) {
        (Type::Int, Type::Int) => Some(Type::Int),
        (Type::Float, Type::Float) => Some(Type::Float),
        (a, b) if a == b && a.is_vector() => Some(a),
        (v, Type::Float) if v.is_vector() => Some(v),
        (Type::Float, v) if v.is_vector() => Some(v),
        _ => None,
    }
}

fn parse_swizzle(member: &str, base: Type) -> Option<Vec<u8>> {
    if !base.is_vector() || member.is_empty() || member.len() > 4 {
        return None;
    }
    let width = base.lanes() as u8;
    let mut lanes = Vec::with_capacity(member.len());
    for c in member.chars() {
        let lane = match c {
            'x' => 0,
            'y' => 1,
            'z' => 2,
            'w' => 3,
            _ => return None,
        };
        if lane >= width {
            return None;
        }
        lanes.push(lane);
    }
    Some(lanes)
}

/// A loop bound must only reference values fixed for the duration of a
/// dispatch: literals, compile-time constants, scalar uniforms, the dispatch
/// extent, and array lengths.
fn check_dispatch_fixed(expr: &TypedExpr, line: u32) -> Result<(), SemanticError> {
    match &expr.kind {
        ExprKind::IntLit(_) | ExprKind::FloatLit(_) => Ok(()),
        ExprKind::ConstParam(_)
        | ExprKind::GlobalExtent(_)
        | ExprKind::ArrayLen(_)
        | ExprKind::UniformRef(_) => Ok(()),
        ExprKind::Unary { expr, .. } | ExprKind::Cast(expr) => check_dispatch_fixed(expr, line),
        ExprKind::Binary { lhs, rhs, .. } => {
            check_dispatch_fixed(lhs, line)?;
            check_dispatch_fixed(rhs, line)
        }
        _ => Err(SemanticError::UnboundedLoop { line }),
    }
}
