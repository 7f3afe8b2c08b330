use pretty_assertions::assert_eq;
use riffle_kernel::parse;

const SAXPY: &str = r#"
kernel saxpy {
    @in x: array<float>;
    @in y: array<float>;
    @out out: array<float>;
    @in a: float;

    @compute(64)
    fn main() {
        let i = global_id.x;
        out[i] = a * x[i] + y[i];
    }
}
"#;

#[test]
fn parses_a_full_kernel() {
    let ast = parse(SAXPY).unwrap();
    assert_eq!(ast.kernel_name, "saxpy");
    assert_eq!(ast.properties.len(), 4);
    assert_eq!(ast.functions.len(), 1);
    assert_eq!(ast.functions[0].compute, Some((64, 1, 1)));
}

#[test]
fn compute_directive_defaults_omitted_axes_to_one() {
    let ast = parse(
        "kernel k { @compute fn main() { } }",
    )
    .unwrap();
    assert_eq!(ast.functions[0].compute, Some((1, 1, 1)));

    let ast = parse(
        "kernel k { @compute(8, 4) fn main() { } }",
    )
    .unwrap();
    assert_eq!(ast.functions[0].compute, Some((8, 4, 1)));
}

#[test]
fn const_without_initializer_is_a_constant_parameter() {
    let ast = parse(
        "kernel k { const N: int; const SCALE: float = 0.5; @compute fn main() { } }",
    )
    .unwrap();
    assert_eq!(ast.constants.len(), 2);
    assert!(ast.constants[0].value.is_none());
    assert!(ast.constants[1].value.is_some());
}

#[test]
fn sized_array_types_accept_literal_and_named_lengths() {
    let src = r#"
kernel k {
    const N: int;
    @in a: array<vec2, 16>;
    @in b: array<float, N>;
    @compute fn main() { }
}
"#;
    let ast = parse(src).unwrap();
    assert_eq!(ast.properties.len(), 2);
}

#[test]
fn for_loop_requires_the_canonical_shape() {
    let ok = r#"
kernel k {
    @compute fn main() {
        var acc = 0.0;
        for (var i = 0; i < 10; i = i + 1) {
            acc = acc + 1.0;
        }
    }
}
"#;
    parse(ok).unwrap();

    // Step must restate the induction variable.
    let bad = r#"
kernel k {
    @compute fn main() {
        for (var i = 0; i < 10; i = 2 * i) { }
    }
}
"#;
    let err = parse(bad).unwrap_err();
    assert!(err.expected.contains("induction variable"), "{err}");
}

#[test]
fn truncated_loop_header_points_at_end_of_input() {
    // Source ends right where the comparator should be; the error must name
    // the end of input, not the token before it.
    let err = parse("kernel k {\n    @compute fn main() {\n        for (var i = 0; i").unwrap_err();
    assert!(err.expected.contains("`<`"), "{err}");
    assert_eq!(err.found, "end of input");

    let err =
        parse("kernel k {\n    @compute fn main() {\n        for (var i = 0; i < 4; i = i").unwrap_err();
    assert!(err.expected.contains("`+` or `-`"), "{err}");
    assert_eq!(err.found, "end of input");
}

#[test]
fn reports_position_of_the_offending_token() {
    let err = parse("kernel k {\n    @in x array<float>;\n}").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.expected.contains("`:`"), "{err}");
}

#[test]
fn rejects_unknown_annotations() {
    let err = parse("kernel k { @uniform x: float; }").unwrap_err();
    assert!(err.found.contains("@uniform"), "{err}");
}

#[test]
fn rejects_direction_annotations_on_functions() {
    let err = parse("kernel k { @in fn main() { } }").unwrap_err();
    assert!(err.expected.contains("property"), "{err}");
}

#[test]
fn rejects_trailing_garbage_after_the_kernel_block() {
    let err = parse("kernel k { @compute fn main() { } } extra").unwrap_err();
    assert!(err.expected.contains("end of input"), "{err}");
}

#[test]
fn rejects_deeply_nested_expressions() {
    let deep = format!(
        "kernel k {{ @compute fn main() {{ let v = {}1.0{}; }} }}",
        "(".repeat(200),
        ")".repeat(200)
    );
    parse(&deep).unwrap_err();
}

#[test]
fn ternary_and_precedence_round_trip_through_the_ast() {
    let src = r#"
kernel k {
    @compute fn main() {
        let v = 1.0 + 2.0 * 3.0;
        let w = v > 2.0 ? v : 0.0;
    }
}
"#;
    let ast = parse(src).unwrap();
    assert_eq!(ast.functions[0].body.stmts.len(), 2);
}
