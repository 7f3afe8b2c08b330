//! WGSL compute emission.
//!
//! The params block mirrors `ParamsLayout` with explicit pad members so the
//! offsets naga computes match the host-side packer byte for byte. Every
//! declared storage binding is touched from the entry point so implicit
//! pipeline layouts always include the full slot set.

use std::fmt::Write;

use crate::context::{ConstantValues, ElemType, ParamsFieldKind, ShaderContext, SlotAccess};
use crate::ir::{ExprKind, Function, LogicOp, Stmt, Type, TypedExpr, TypedKernel, UnaryOp};

use super::{bin_str, cmp_str, const_literal, format_f32, lane_char, CodegenError};

/// Entry point name of every generated WGSL module.
pub const WGSL_ENTRY_POINT: &str = "cs_main";

pub(super) fn generate(
    context: &ShaderContext,
    kernel: &TypedKernel,
    constants: &ConstantValues,
) -> Result<String, CodegenError> {
    let mut e = Emitter {
        context,
        constants,
        out: String::new(),
        indent: 0,
    };
    e.emit_params_struct();
    e.emit_bindings();
    e.line("var<private> global_id: vec3<u32>;");
    e.line("var<private> global_extent: vec3<u32>;");
    e.line("");
    for helper in &kernel.helpers {
        e.emit_helper(helper)?;
        e.line("");
    }
    e.emit_entry(&kernel.entry)?;
    Ok(e.out)
}

fn wgsl_type(ty: Type) -> &'static str {
    match ty {
        Type::Bool => "bool",
        Type::Float => "f32",
        Type::Int => "i32",
        Type::Vec2 => "vec2<f32>",
        Type::Vec3 => "vec3<f32>",
        Type::Vec4 => "vec4<f32>",
    }
}

fn elem_wgsl_type(elem: ElemType) -> &'static str {
    wgsl_type(Type::from_elem(elem))
}

struct Emitter<'a> {
    context: &'a ShaderContext,
    constants: &'a ConstantValues,
    out: String,
    indent: usize,
}

impl Emitter<'_> {
    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    /// Physical buffer variable read for a binding; double-buffered bindings
    /// split into `_in`/`_out` views.
    fn read_name(&self, binding: &str) -> String {
        match self.context.binding(binding) {
            Some(b) if b.is_double_buffered() => format!("{binding}_in"),
            _ => binding.to_owned(),
        }
    }

    fn write_name(&self, binding: &str) -> String {
        match self.context.binding(binding) {
            Some(b) if b.is_double_buffered() => format!("{binding}_out"),
            _ => binding.to_owned(),
        }
    }

    fn slot_var_name(&self, binding: &str, access: SlotAccess) -> String {
        match access {
            SlotAccess::Read => self.read_name(binding),
            SlotAccess::Write => self.write_name(binding),
        }
    }

    fn emit_params_struct(&mut self) {
        self.line("struct Params {");
        self.indent += 1;
        let mut cursor = 0u32;
        let mut pads = 0usize;
        let fields = self.context.layout.params.fields.clone();
        for field in &fields {
            while cursor < field.offset {
                self.line(&format!("_pad{pads}: u32,"));
                pads += 1;
                cursor += 4;
            }
            match &field.kind {
                ParamsFieldKind::Extent => {
                    self.line("extent: vec3<u32>,");
                    cursor += 12;
                }
                ParamsFieldKind::ArrayLen { .. } => {
                    self.line(&format!("{}: i32,", field.name));
                    cursor += 4;
                }
                ParamsFieldKind::Uniform { element_type, .. } => {
                    self.line(&format!("{}: {},", field.name, elem_wgsl_type(*element_type)));
                    cursor += element_type.size_bytes();
                }
            }
        }
        self.indent -= 1;
        self.line("}");
        self.line("");
        self.line("@group(0) @binding(0) var<uniform> params: Params;");
    }

    fn emit_bindings(&mut self) {
        let slots = self.context.layout.slots.clone();
        for slot in &slots {
            let var = self.slot_var_name(&slot.binding, slot.access);
            let elem = self
                .context
                .binding(&slot.binding)
                .map(|b| elem_wgsl_type(b.element_type))
                .unwrap_or("f32");
            let access = match slot.access {
                SlotAccess::Read => "read",
                SlotAccess::Write => "read_write",
            };
            self.line(&format!(
                "@group(0) @binding({}) var<storage, {access}> {var}: array<{elem}>;",
                slot.slot
            ));
        }
        self.line("");
    }

    fn emit_helper(&mut self, func: &Function) -> Result<(), CodegenError> {
        let mut sig = format!("fn {}(", func.name);
        for (i, (name, ty)) in func.params.iter().enumerate() {
            if i > 0 {
                sig.push_str(", ");
            }
            let _ = write!(sig, "{name}: {}", wgsl_type(*ty));
        }
        sig.push(')');
        if let Some(ret) = func.ret {
            let _ = write!(sig, " -> {}", wgsl_type(ret));
        }
        sig.push_str(" {");
        self.line(&sig);
        self.indent += 1;
        self.emit_block(&func.body)?;
        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    fn emit_entry(&mut self, entry: &Function) -> Result<(), CodegenError> {
        let wg = self.context.workgroup_size;
        self.line(&format!(
            "@compute @workgroup_size({}, {}, {})",
            wg.x, wg.y, wg.z
        ));
        self.line(&format!(
            "fn {WGSL_ENTRY_POINT}(@builtin(global_invocation_id) gid: vec3<u32>) {{"
        ));
        self.indent += 1;
        self.line("global_id = gid;");
        self.line("global_extent = params.extent;");
        // One reference per storage binding, so unused declarations are not
        // dropped from the implicit pipeline layout.
        let slots = self.context.layout.slots.clone();
        for slot in &slots {
            let var = self.slot_var_name(&slot.binding, slot.access);
            self.line(&format!("_ = arrayLength(&{var});"));
        }
        self.line(
            "if (gid.x >= params.extent.x || gid.y >= params.extent.y || gid.z >= params.extent.z) {",
        );
        self.indent += 1;
        self.line("return;");
        self.indent -= 1;
        self.line("}");
        self.emit_block(&entry.body)?;
        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    fn emit_block(&mut self, body: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Local {
                name,
                mutable,
                value,
            } => {
                let value_src = self.expr(value)?;
                let line = if *mutable {
                    format!("var {name}: {} = {value_src};", wgsl_type(value.ty))
                } else {
                    format!("let {name} = {value_src};")
                };
                self.line(&line);
            }
            Stmt::AssignLocal { name, lane, value } => {
                let value_src = self.expr(value)?;
                let target = match lane {
                    Some(lane) => format!("{name}.{}", lane_char(*lane)),
                    None => name.clone(),
                };
                self.line(&format!("{target} = {value_src};"));
            }
            Stmt::ArrayStore {
                binding,
                index,
                lane,
                value,
            } => {
                let index_src = self.expr(index)?;
                let value_src = self.expr(value)?;
                let mut target = format!("{}[{index_src}]", self.write_name(binding));
                if let Some(lane) = lane {
                    let _ = write!(target, ".{}", lane_char(*lane));
                }
                self.line(&format!("{target} = {value_src};"));
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond_src = self.expr(cond)?;
                self.line(&format!("if ({cond_src}) {{"));
                self.indent += 1;
                self.emit_block(then_block)?;
                self.indent -= 1;
                if else_block.is_empty() {
                    self.line("}");
                } else {
                    self.line("} else {");
                    self.indent += 1;
                    self.emit_block(else_block)?;
                    self.indent -= 1;
                    self.line("}");
                }
            }
            Stmt::For {
                var,
                init,
                cmp,
                bound,
                step_negative,
                step,
                body,
            } => {
                let init_src = self.expr(init)?;
                let bound_src = self.expr(bound)?;
                let step_src = self.expr(step)?;
                let sign = if *step_negative { "-" } else { "+" };
                self.line(&format!(
                    "for (var {var}: i32 = {init_src}; {var} {} {bound_src}; {var} = {var} {sign} {step_src}) {{",
                    cmp_str(*cmp)
                ));
                self.indent += 1;
                self.emit_block(body)?;
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Return(None) => self.line("return;"),
            Stmt::Return(Some(value)) => {
                let value_src = self.expr(value)?;
                self.line(&format!("return {value_src};"));
            }
            Stmt::Eval(value) => {
                let value_src = self.expr(value)?;
                self.line(&format!("_ = {value_src};"));
            }
        }
        Ok(())
    }

    fn expr(&self, e: &TypedExpr) -> Result<String, CodegenError> {
        Ok(match &e.kind {
            ExprKind::FloatLit(v) => format_f32(*v),
            ExprKind::IntLit(v) => v.to_string(),
            ExprKind::BoolLit(v) => v.to_string(),
            ExprKind::Local(name) => name.clone(),
            ExprKind::ConstParam(name) => const_literal(self.constants, name)?,
            ExprKind::GlobalId(axis) => format!("i32(global_id.{})", axis.name()),
            ExprKind::GlobalExtent(axis) => format!("i32(global_extent.{})", axis.name()),
            ExprKind::UniformRef(name) => format!("params.{name}"),
            ExprKind::ArrayLoad { binding, index } => {
                format!("{}[{}]", self.read_name(binding), self.expr(index)?)
            }
            ExprKind::ArrayLen(binding) => format!("params.{binding}_len"),
            ExprKind::Unary { op, expr } => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                format!("({op}{})", self.expr(expr)?)
            }
            ExprKind::Binary { op, lhs, rhs } => format!(
                "({} {} {})",
                self.expr(lhs)?,
                bin_str(*op),
                self.expr(rhs)?
            ),
            ExprKind::Compare { op, lhs, rhs } => format!(
                "({} {} {})",
                self.expr(lhs)?,
                cmp_str(*op),
                self.expr(rhs)?
            ),
            ExprKind::Logic { op, lhs, rhs } => {
                let op = match op {
                    LogicOp::And => "&&",
                    LogicOp::Or => "||",
                };
                format!("({} {op} {})", self.expr(lhs)?, self.expr(rhs)?)
            }
            ExprKind::Select {
                cond,
                then_expr,
                else_expr,
            } => format!(
                "select({}, {}, {})",
                self.expr(else_expr)?,
                self.expr(then_expr)?,
                self.expr(cond)?
            ),
            ExprKind::Swizzle { base, lanes } => {
                let mut s = self.expr(base)?;
                s.push('.');
                for lane in lanes {
                    s.push(lane_char(*lane));
                }
                s
            }
            ExprKind::VecCtor { width, args } => {
                let args = self.expr_list(args)?;
                format!("vec{width}<f32>({args})")
            }
            ExprKind::Builtin { func, args } => {
                format!("{}({})", func.name(), self.expr_list(args)?)
            }
            ExprKind::HelperCall { name, args } => {
                format!("{name}({})", self.expr_list(args)?)
            }
            ExprKind::Cast(inner) => {
                let target = match e.ty {
                    Type::Int => "i32",
                    _ => "f32",
                };
                format!("{target}({})", self.expr(inner)?)
            }
        })
    }

    fn expr_list(&self, args: &[TypedExpr]) -> Result<String, CodegenError> {
        let mut s = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            s.push_str(&self.expr(arg)?);
        }
        Ok(s)
    }
}

