//! GLSL emission: 4.50 compute, and ES 1.00 fragment-shader emulation for
//! WebGL-class runtimes.
//!
//! The ES 1.00 path has no storage buffers: array inputs become sampler2D
//! lookups through injected fetch helpers, and the single written array
//! binding becomes the `gl_FragColor` of a full-extent draw. Kernels that
//! cannot be expressed that way are rejected with `DialectUnsupported`.

use std::collections::HashSet;
use std::fmt::Write;

use crate::context::{
    Binding, BindingDirection, BindingKind, ConstantValues, Dialect, ElemType, ParamsFieldKind,
    ShaderContext, SlotAccess,
};
use crate::ir::{
    Axis, BinOp, ExprKind, Function, LogicOp, Stmt, Type, TypedExpr, TypedKernel, UnaryOp,
};

use super::{bin_str, cmp_str, const_literal, fold_int, format_f32, lane_char, CodegenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslVersion {
    /// `#version 450` compute shader with std140/std430 blocks.
    Core450,
    /// GLSL ES 1.00 fragment shader.
    Es100,
}

pub(super) fn generate(
    context: &ShaderContext,
    kernel: &TypedKernel,
    constants: &ConstantValues,
    version: GlslVersion,
) -> Result<String, CodegenError> {
    if version == GlslVersion::Es100 {
        validate_es100(context, kernel, constants)?;
    }
    let mut e = Emitter {
        context,
        constants,
        version,
        out: String::new(),
        indent: 0,
    };
    match version {
        GlslVersion::Core450 => e.emit_core450_prelude(),
        GlslVersion::Es100 => e.emit_es100_prelude()?,
    }
    for helper in &kernel.helpers {
        e.line(&format!("{};", e.signature(helper)));
    }
    if !kernel.helpers.is_empty() {
        e.line("");
    }
    for helper in &kernel.helpers {
        e.emit_function(helper)?;
        e.line("");
    }
    e.emit_main(&kernel.entry)?;
    Ok(e.out)
}

fn glsl_type(ty: Type) -> &'static str {
    match ty {
        Type::Bool => "bool",
        Type::Float => "float",
        Type::Int => "int",
        Type::Vec2 => "vec2",
        Type::Vec3 => "vec3",
        Type::Vec4 => "vec4",
    }
}

fn elem_glsl_type(elem: ElemType) -> &'static str {
    glsl_type(Type::from_elem(elem))
}

struct Emitter<'a> {
    context: &'a ShaderContext,
    constants: &'a ConstantValues,
    version: GlslVersion,
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

    fn emit_core450_prelude(&mut self) {
        self.line("#version 450");
        let wg = self.context.workgroup_size;
        self.line(&format!(
            "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
            wg.x, wg.y, wg.z
        ));
        self.line("");

        self.line("layout(std140, binding = 0) uniform Params {");
        self.indent += 1;
        let mut cursor = 0u32;
        let mut pads = 0usize;
        let fields = self.context.layout.params.fields.clone();
        for field in &fields {
            while cursor < field.offset {
                self.line(&format!("uint _pad{pads};"));
                pads += 1;
                cursor += 4;
            }
            match &field.kind {
                ParamsFieldKind::Extent => {
                    self.line("uvec3 extent;");
                    cursor += 12;
                }
                ParamsFieldKind::ArrayLen { .. } => {
                    self.line(&format!("int {};", field.name));
                    cursor += 4;
                }
                ParamsFieldKind::Uniform { element_type, .. } => {
                    self.line(&format!("{} {};", elem_glsl_type(*element_type), field.name));
                    cursor += element_type.size_bytes();
                }
            }
        }
        self.indent -= 1;
        self.line("} params;");
        self.line("");

        let slots = self.context.layout.slots.clone();
        for slot in &slots {
            let (var, qualifier) = match slot.access {
                SlotAccess::Read => (self.read_name(&slot.binding), "readonly "),
                SlotAccess::Write => (self.write_name(&slot.binding), ""),
            };
            let elem = self
                .context
                .binding(&slot.binding)
                .map(|b| elem_glsl_type(b.element_type))
                .unwrap_or("float");
            self.line(&format!(
                "layout(std430, binding = {}) {qualifier}buffer {var}_ssbo {{ {elem} {var}[]; }};",
                slot.slot
            ));
        }
        self.line("");
        self.line("uvec3 global_id;");
        self.line("uvec3 global_extent;");
        self.line("");
    }

    fn emit_es100_prelude(&mut self) -> Result<(), CodegenError> {
        self.line("precision highp float;");
        self.line("precision highp int;");
        self.line("");
        self.line("uniform ivec3 extent;");
        let bindings = self.context.bindings.clone();
        for b in &bindings {
            if b.kind != BindingKind::ArrayBuffer {
                continue;
            }
            self.line(&format!("uniform int {}_len;", b.name));
            if b.direction.contains(BindingDirection::IN) {
                self.line(&format!("uniform sampler2D {}_tex;", self.read_name(&b.name)));
            }
        }
        for b in &bindings {
            if b.kind == BindingKind::Uniform && !b.is_compile_time_constant {
                self.line(&format!("uniform {} {};", elem_glsl_type(b.element_type), b.name));
            }
        }
        self.line("");
        self.line("int gid_x;");
        self.line("");
        // Fetch helpers: one texel per element, sampled at texel centers.
        for b in &bindings {
            if b.kind != BindingKind::ArrayBuffer
                || !b.direction.contains(BindingDirection::IN)
            {
                continue;
            }
            let var = self.read_name(&b.name);
            let ty = elem_glsl_type(b.element_type);
            let channels = match b.element_type.lanes() {
                1 => ".r",
                2 => ".rg",
                3 => ".rgb",
                _ => "",
            };
            self.line(&format!("{ty} read_{var}(int index) {{"));
            self.indent += 1;
            self.line(&format!(
                "float u = (float(index) + 0.5) / float({}_len);",
                b.name
            ));
            self.line(&format!(
                "return texture2D({var}_tex, vec2(u, 0.5)){channels};"
            ));
            self.indent -= 1;
            self.line("}");
            self.line("");
        }
        Ok(())
    }

    fn signature(&self, func: &Function) -> String {
        let ret = func.ret.map(glsl_type).unwrap_or("void");
        let mut sig = format!("{ret} {}(", func.name);
        for (i, (name, ty)) in func.params.iter().enumerate() {
            if i > 0 {
                sig.push_str(", ");
            }
            let _ = write!(sig, "{} {name}", glsl_type(*ty));
        }
        sig.push(')');
        sig
    }

    fn emit_function(&mut self, func: &Function) -> Result<(), CodegenError> {
        let sig = self.signature(func);
        self.line(&format!("{sig} {{"));
        self.indent += 1;
        self.emit_block(&func.body)?;
        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    fn emit_main(&mut self, entry: &Function) -> Result<(), CodegenError> {
        self.line("void main() {");
        self.indent += 1;
        match self.version {
            GlslVersion::Core450 => {
                self.line("global_id = gl_GlobalInvocationID;");
                self.line("global_extent = params.extent;");
                self.line(
                    "if (global_id.x >= params.extent.x || global_id.y >= params.extent.y || global_id.z >= params.extent.z) {",
                );
                self.indent += 1;
                self.line("return;");
                self.indent -= 1;
                self.line("}");
            }
            GlslVersion::Es100 => {
                // The draw covers exactly extent.x fragments; no guard needed.
                self.line("gid_x = int(gl_FragCoord.x);");
            }
        }
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
                mutable: _,
                value,
            } => {
                let value_src = self.expr(value)?;
                self.line(&format!("{} {name} = {value_src};", glsl_type(value.ty)));
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
            } => match self.version {
                GlslVersion::Core450 => {
                    let index_src = self.expr(index)?;
                    let value_src = self.expr(value)?;
                    let mut target = format!("{}[{index_src}]", self.write_name(binding));
                    if let Some(lane) = lane {
                        let _ = write!(target, ".{}", lane_char(*lane));
                    }
                    self.line(&format!("{target} = {value_src};"));
                }
                GlslVersion::Es100 => {
                    // The index was validated to be the fragment's own linear
                    // id, so the store is just the fragment output.
                    let value_src = self.expr(value)?;
                    let lanes = value.ty.lanes();
                    let padded = match lanes {
                        1 => format!("vec4({value_src}, 0.0, 0.0, 0.0)"),
                        2 => format!("vec4({value_src}, 0.0, 0.0)"),
                        3 => format!("vec4({value_src}, 0.0)"),
                        _ => value_src,
                    };
                    self.line(&format!("gl_FragColor = {padded};"));
                }
            },
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
                // ES 1.00 loops were validated to have foldable bounds; emit
                // the folded values so the driver sees constant expressions.
                let (init_src, bound_src, step_src) = if self.version == GlslVersion::Es100 {
                    (
                        fold_src(init, self.constants),
                        fold_src(bound, self.constants),
                        fold_src(step, self.constants),
                    )
                } else {
                    (self.expr(init)?, self.expr(bound)?, self.expr(step)?)
                };
                let sign = if *step_negative { "-" } else { "+" };
                self.line(&format!(
                    "for (int {var} = {init_src}; {var} {} {bound_src}; {var} = {var} {sign} {step_src}) {{",
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
                self.line(&format!("{value_src};"));
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
            ExprKind::GlobalId(axis) => match self.version {
                GlslVersion::Core450 => format!("int(global_id.{})", axis.name()),
                GlslVersion::Es100 => "gid_x".to_owned(),
            },
            ExprKind::GlobalExtent(axis) => match self.version {
                GlslVersion::Core450 => format!("int(global_extent.{})", axis.name()),
                GlslVersion::Es100 => format!("extent.{}", axis.name()),
            },
            ExprKind::UniformRef(name) => match self.version {
                GlslVersion::Core450 => format!("params.{name}"),
                GlslVersion::Es100 => name.clone(),
            },
            ExprKind::ArrayLoad { binding, index } => {
                let index_src = self.expr(index)?;
                let var = self.read_name(binding);
                match self.version {
                    GlslVersion::Core450 => format!("{var}[{index_src}]"),
                    GlslVersion::Es100 => format!("read_{var}({index_src})"),
                }
            }
            ExprKind::ArrayLen(binding) => match self.version {
                GlslVersion::Core450 => format!("params.{binding}_len"),
                GlslVersion::Es100 => format!("{binding}_len"),
            },
            ExprKind::Unary { op, expr } => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                format!("({op}{})", self.expr(expr)?)
            }
            ExprKind::Binary {
                op: BinOp::Rem,
                lhs,
                rhs,
            } if self.version == GlslVersion::Es100 => {
                // ES 1.00 has no integer `%`.
                format!(
                    "int(mod(float({}), float({})))",
                    self.expr(lhs)?,
                    self.expr(rhs)?
                )
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
                "({} ? {} : {})",
                self.expr(cond)?,
                self.expr(then_expr)?,
                self.expr(else_expr)?
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
                format!("vec{width}({})", self.expr_list(args)?)
            }
            ExprKind::Builtin { func, args } => {
                format!("{}({})", func.name(), self.expr_list(args)?)
            }
            ExprKind::HelperCall { name, args } => {
                format!("{name}({})", self.expr_list(args)?)
            }
            ExprKind::Cast(inner) => {
                let target = match e.ty {
                    Type::Int => "int",
                    _ => "float",
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

fn fold_src(expr: &TypedExpr, constants: &ConstantValues) -> String {
    // Validation already proved the fold succeeds.
    fold_int(expr, constants).unwrap_or(0).to_string()
}

fn unsupported(reason: impl Into<String>) -> CodegenError {
    CodegenError::DialectUnsupported {
        dialect: Dialect::Glsl100,
        reason: reason.into(),
    }
}

/// Reject kernels the fragment-emulation path cannot express.
fn validate_es100(
    context: &ShaderContext,
    kernel: &TypedKernel,
    constants: &ConstantValues,
) -> Result<(), CodegenError> {
    let arrays: Vec<&Binding> = context
        .bindings
        .iter()
        .filter(|b| b.kind == BindingKind::ArrayBuffer)
        .collect();
    if arrays.iter().any(|b| b.element_type == ElemType::Int) {
        return Err(unsupported("integer array bindings are not supported"));
    }
    let written = arrays
        .iter()
        .filter(|b| b.direction.contains(BindingDirection::OUT))
        .count();
    if written == 0 {
        return Err(unsupported("kernel writes no array binding"));
    }
    if written > 1 {
        return Err(unsupported(
            "more than one written array binding; the fragment output can carry only one",
        ));
    }

    let mut offending_axis = false;
    super::visit_kernel_exprs(kernel, &mut |expr| {
        if matches!(
            expr.kind,
            ExprKind::GlobalId(Axis::Y | Axis::Z) | ExprKind::GlobalExtent(Axis::Y | Axis::Z)
        ) {
            offending_axis = true;
        }
    });
    if offending_axis {
        return Err(unsupported(
            "only one-dimensional dispatch extents are supported",
        ));
    }

    let mut functions: Vec<&Function> = vec![&kernel.entry];
    functions.extend(kernel.helpers.iter());
    for func in functions {
        validate_es100_body(&func.body, constants)?;
    }
    Ok(())
}

fn validate_es100_body(
    body: &[Stmt],
    constants: &ConstantValues,
) -> Result<(), CodegenError> {
    // Immutable locals bound to the fragment's own linear id; stores may
    // index through them.
    let mut aliases: HashSet<&str> = HashSet::new();
    let mut result = Ok(());
    visit(body, &mut aliases, &mut result, constants);
    return result;

    fn check_index(index: &TypedExpr, aliases: &HashSet<&str>) -> bool {
        match &index.kind {
            ExprKind::GlobalId(Axis::X) => true,
            ExprKind::Local(name) => aliases.contains(name.as_str()),
            _ => false,
        }
    }

    fn visit<'a>(
        body: &'a [Stmt],
        aliases: &mut HashSet<&'a str>,
        result: &mut Result<(), CodegenError>,
        constants: &ConstantValues,
    ) {
        for stmt in body {
            if result.is_err() {
                return;
            }
            match stmt {
                Stmt::Local {
                    name,
                    mutable: false,
                    value,
                } => {
                    let is_alias = match &value.kind {
                        ExprKind::GlobalId(Axis::X) => true,
                        ExprKind::Local(src) => aliases.contains(src.as_str()),
                        _ => false,
                    };
                    if is_alias {
                        aliases.insert(name.as_str());
                    }
                }
                Stmt::ArrayStore { index, lane, .. } => {
                    if lane.is_some() {
                        *result = Err(unsupported(
                            "component writes to the output are not supported",
                        ));
                    } else if !check_index(index, aliases) {
                        *result = Err(unsupported(
                            "scatter writes are not supported; the written index must be the invocation's own id",
                        ));
                    }
                }
                Stmt::For {
                    init, bound, step, body, ..
                } => {
                    if fold_int(init, constants).is_none()
                        || fold_int(bound, constants).is_none()
                        || fold_int(step, constants).is_none()
                    {
                        *result = Err(unsupported(
                            "loop bounds must be compile-time constants",
                        ));
                    } else {
                        visit(body, aliases, result, constants);
                    }
                }
                Stmt::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    visit(then_block, aliases, result, constants);
                    visit(else_block, aliases, result, constants);
                }
                _ => {}
            }
        }
    }
}
