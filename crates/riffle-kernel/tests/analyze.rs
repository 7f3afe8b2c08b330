use pretty_assertions::assert_eq;
use riffle_kernel::{
    analyze, parse, BindingDirection, BindingKind, Dialect, ElemType, SemanticError,
};

fn analyze_src(src: &str) -> Result<riffle_kernel::Analysis, SemanticError> {
    let ast = parse(src).unwrap();
    analyze(&ast, Dialect::Wgsl)
}

#[test]
fn builds_the_shader_context_for_a_simple_kernel() {
    let analysis = analyze_src(
        r#"
kernel scale {
    @in data: array<float>;
    @out result: array<float>;
    @in factor: float;

    @compute(64)
    fn main() {
        let i = global_id.x;
        result[i] = data[i] * factor;
    }
}
"#,
    )
    .unwrap();

    let ctx = &analysis.context;
    assert_eq!(ctx.workgroup_size.x, 64);
    assert_eq!(ctx.bindings.len(), 3);

    let data = ctx.binding("data").unwrap();
    assert_eq!(data.direction, BindingDirection::IN);
    assert_eq!(data.kind, BindingKind::ArrayBuffer);
    assert_eq!(data.element_type, ElemType::Float);
    assert!(!data.is_double_buffered());

    let factor = ctx.binding("factor").unwrap();
    assert_eq!(factor.kind, BindingKind::Uniform);
}

#[test]
fn read_write_arrays_are_double_buffered() {
    let analysis = analyze_src(
        r#"
kernel relax {
    @in @out cells: array<float>;

    @compute
    fn main() {
        let i = global_id.x;
        cells[i] = cells[i] * 0.5;
    }
}
"#,
    )
    .unwrap();
    let cells = analysis.context.binding("cells").unwrap();
    assert!(cells.is_double_buffered());

    // Distinct read and write slots after the params slot.
    let layout = &analysis.context.layout;
    let read = layout.read_slot("cells").unwrap();
    let write = layout.write_slot("cells").unwrap();
    assert_ne!(read, write);
    assert!(read >= 1 && write >= 1);
}

#[test]
fn requires_exactly_one_entry_point() {
    let err = analyze_src("kernel k { fn helper() { } }").unwrap_err();
    assert_eq!(err, SemanticError::NoEntryPoint);

    let err = analyze_src(
        "kernel k { @compute fn a() { } @compute fn b() { } }",
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::MultipleEntryPoints { .. }));
}

#[test]
fn entry_point_must_take_no_parameters() {
    let err = analyze_src(
        "kernel k { @compute fn main(i: int) { } }",
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::InvalidEntrySignature { .. }));
}

#[test]
fn properties_must_declare_a_direction() {
    let err = analyze_src(
        "kernel k { data: array<float>; @compute fn main() { } }",
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::UnannotatedBinding { .. }));
}

#[test]
fn uniforms_cannot_be_outputs() {
    let err = analyze_src(
        "kernel k { @out factor: float; @compute fn main() { } }",
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::DirectionViolation { .. }));
}

#[test]
fn writing_a_read_only_array_is_rejected() {
    let err = analyze_src(
        r#"
kernel k {
    @in data: array<float>;
    @compute fn main() {
        data[global_id.x] = 1.0;
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::DirectionViolation { .. }));
}

#[test]
fn reading_a_write_only_array_is_rejected() {
    let err = analyze_src(
        r#"
kernel k {
    @out data: array<float>;
    @compute fn main() {
        let v = data[global_id.x];
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::DirectionViolation { .. }));
}

#[test]
fn uninitialized_const_becomes_a_compile_time_constant_binding() {
    let analysis = analyze_src(
        r#"
kernel k {
    const N: int;
    @in data: array<float, N>;
    @compute fn main() {
        let i = global_id.x;
        let v = data[i % N];
    }
}
"#,
    )
    .unwrap();
    let n = analysis.context.binding("N").unwrap();
    assert!(n.is_compile_time_constant);
    // Length named by a constant parameter stays unresolved at analysis time.
    let data = analysis.context.binding("data").unwrap();
    assert_eq!(data.declared_len, None);
}

#[test]
fn literal_array_lengths_resolve_at_analysis_time() {
    let analysis = analyze_src(
        r#"
kernel k {
    @in data: array<vec2, 8>;
    @compute fn main() {
        let v = data[global_id.x];
    }
}
"#,
    )
    .unwrap();
    assert_eq!(analysis.context.binding("data").unwrap().declared_len, Some(8));
}

#[test]
fn loops_need_a_dispatch_fixed_bound() {
    // Bounds derived from uniforms, lengths, and constants are fine.
    analyze_src(
        r#"
kernel k {
    @in data: array<float>;
    @in cutoff: int;
    @compute fn main() {
        var acc = 0.0;
        for (var i = 0; i < len(data) - cutoff; i = i + 1) {
            acc = acc + data[i];
        }
    }
}
"#,
    )
    .unwrap();

    // A bound that changes inside the loop is not.
    let err = analyze_src(
        r#"
kernel k {
    @compute fn main() {
        var limit = 10;
        for (var i = 0; i < limit; i = i + 1) {
            limit = limit + 1;
        }
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::UnboundedLoop { .. }));
}

#[test]
fn induction_variable_cannot_be_reassigned_in_the_body() {
    let err = analyze_src(
        r#"
kernel k {
    @compute fn main() {
        for (var i = 0; i < 10; i = i + 1) {
            i = 0;
        }
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::UnboundedLoop { .. }));
}

#[test]
fn assigning_to_a_let_binding_is_rejected() {
    let err = analyze_src(
        r#"
kernel k {
    @compute fn main() {
        let v = 1.0;
        v = 2.0;
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::AssignToImmutable { .. }));
}

#[test]
fn shadowing_and_reserved_names_are_rejected() {
    let err = analyze_src(
        r#"
kernel k {
    @compute fn main() {
        let v = 1.0;
        let v = 2.0;
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::DuplicateName { .. }));

    let err = analyze_src(
        "kernel k { @compute fn main() { let len = 1; } }",
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::DuplicateName { .. }));
}

#[test]
fn type_errors_name_the_context() {
    let err = analyze_src(
        r#"
kernel k {
    @compute fn main() {
        let v = 1.0 + 1;
    }
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SemanticError::TypeMismatch { .. }));
}

#[test]
fn helpers_may_be_declared_after_their_callers() {
    let analysis = analyze_src(
        r#"
kernel k {
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = double(1.5);
    }

    fn double(x: float) -> float {
        return x * 2.0;
    }
}
"#,
    )
    .unwrap();
    assert_eq!(analysis.context.helpers.len(), 1);
    assert_eq!(analysis.context.helpers[0].name, "double");
}

#[test]
fn unreachable_helpers_are_dropped_from_the_context() {
    let analysis = analyze_src(
        r#"
kernel k {
    @out result: array<float>;

    fn unused(x: float) -> float { return x; }

    @compute
    fn main() {
        result[global_id.x] = 1.0;
    }
}
"#,
    )
    .unwrap();
    assert!(analysis.context.helpers.is_empty());
}

#[test]
fn params_layout_places_extent_first_and_lens_behind_it() {
    let analysis = analyze_src(
        r#"
kernel k {
    @in data: array<float>;
    @in factor: float;
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = data[global_id.x] * factor;
    }
}
"#,
    )
    .unwrap();
    let params = &analysis.context.layout.params;
    assert_eq!(params.fields[0].offset, 0);
    assert!(params.size_bytes % 16 == 0);
    // Array lengths start after the extent vector.
    assert!(params.fields[1].offset >= 16);
}
