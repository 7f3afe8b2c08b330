use riffle_kernel::{compile, CodegenError, CompileError, Dialect};

fn validate_glsl450(source: &str) {
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(
            &naga::front::glsl::Options::from(naga::ShaderStage::Compute),
            source,
        )
        .unwrap_or_else(|err| panic!("invalid GLSL: {err:?}\n---\n{source}"));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|err| panic!("GLSL failed validation: {err:?}\n---\n{source}"));
}

fn unsupported_reason(err: CompileError) -> String {
    match err {
        CompileError::Codegen(CodegenError::DialectUnsupported { reason, .. }) => reason,
        other => panic!("expected a dialect error, got {other}"),
    }
}

const SAXPY: &str = r#"
kernel saxpy {
    @in x: array<float>;
    @in y: array<float>;
    @out result: array<float>;
    @in a: float;

    @compute(64)
    fn main() {
        let i = global_id.x;
        result[i] = a * x[i] + y[i];
    }
}
"#;

#[test]
fn saxpy_emits_valid_glsl450() {
    let kernel = compile(SAXPY, Dialect::Glsl450).unwrap();
    validate_glsl450(&kernel.shader_source);
    let src = &kernel.shader_source;
    assert!(src.starts_with("#version 450"));
    assert!(src.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"));
    assert!(src.contains("layout(std140, binding = 0) uniform Params {"));
    assert!(src.contains("} params;"));
    assert!(src.contains("layout(std430, binding = 1) readonly buffer x_ssbo { float x[]; };"));
    assert!(src.contains("layout(std430, binding = 3) buffer result_ssbo { float result[]; };"));
}

#[test]
fn glsl450_double_buffering_splits_bindings() {
    let src = r#"
kernel relax {
    @in @out cells: array<float>;

    @compute
    fn main() {
        let i = global_id.x;
        cells[i] = cells[i] * 0.5;
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl450).unwrap();
    validate_glsl450(&kernel.shader_source);
    let src = &kernel.shader_source;
    assert!(src.contains("readonly buffer cells_in_ssbo { float cells_in[]; };"));
    assert!(src.contains("buffer cells_out_ssbo { float cells_out[]; };"));
}

#[test]
fn glsl450_declares_helper_prototypes_before_definitions() {
    let src = r#"
kernel chained {
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = first(1.0);
    }

    fn first(x: float) -> float {
        return second(x) + 1.0;
    }

    fn second(x: float) -> float {
        return x * 2.0;
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl450).unwrap();
    validate_glsl450(&kernel.shader_source);
    let text = &kernel.shader_source;
    let proto = text.find("float second(float x);").expect("prototype");
    let def = text.find("float second(float x) {").expect("definition");
    assert!(proto < def);
}

#[test]
fn es100_emulation_samples_inputs_through_textures() {
    let src = r#"
kernel scale {
    @in data: array<float>;
    @out result: array<float>;
    @in factor: float;

    @compute
    fn main() {
        let i = global_id.x;
        result[i] = read(i) * factor;
    }

    fn read(i: int) -> float {
        return data[i];
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl100).unwrap();
    let text = &kernel.shader_source;
    // No #version directive; WebGL1 defaults to ES 1.00.
    assert!(!text.contains("#version"));
    assert!(text.contains("precision highp float;"));
    assert!(text.contains("uniform sampler2D data_tex;"));
    assert!(text.contains("uniform int data_len;"));
    assert!(text.contains("float read_data(int index) {"));
    assert!(text.contains("texture2D(data_tex, vec2(u, 0.5)).r;"));
    assert!(text.contains("gid_x = int(gl_FragCoord.x);"));
    assert!(text.contains("gl_FragColor = vec4("));
}

#[test]
fn es100_pads_vector_outputs_to_four_channels() {
    let src = r#"
kernel wave {
    @in field: array<vec2>;
    @out next: array<vec2>;

    @compute
    fn main() {
        let i = global_id.x;
        next[i] = field[i] * 0.9;
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl100).unwrap();
    let text = &kernel.shader_source;
    assert!(text.contains(".rg;"), "{text}");
    assert!(text.contains("gl_FragColor = vec4((read_field(i) * 0.9), 0.0, 0.0);"));
}

#[test]
fn es100_rejects_integer_arrays() {
    let src = r#"
kernel k {
    @in data: array<int>;
    @out result: array<float>;
    @compute fn main() {
        result[global_id.x] = float(data[global_id.x]);
    }
}
"#;
    let reason = unsupported_reason(compile(src, Dialect::Glsl100).unwrap_err());
    assert!(reason.contains("integer array"), "{reason}");
}

#[test]
fn es100_rejects_multiple_written_arrays() {
    let src = r#"
kernel k {
    @out a: array<float>;
    @out b: array<float>;
    @compute fn main() {
        a[global_id.x] = 1.0;
        b[global_id.x] = 2.0;
    }
}
"#;
    let reason = unsupported_reason(compile(src, Dialect::Glsl100).unwrap_err());
    assert!(reason.contains("more than one written"), "{reason}");
}

#[test]
fn es100_rejects_higher_dimensions() {
    let src = r#"
kernel k {
    @out result: array<float>;
    @compute fn main() {
        result[global_id.x] = float(global_id.y);
    }
}
"#;
    let reason = unsupported_reason(compile(src, Dialect::Glsl100).unwrap_err());
    assert!(reason.contains("one-dimensional"), "{reason}");
}

#[test]
fn es100_rejects_scatter_writes_but_allows_id_aliases() {
    // Writing through an immutable alias of the invocation id is fine.
    let ok = r#"
kernel k {
    @out result: array<float>;
    @compute fn main() {
        let i = global_id.x;
        let j = i;
        result[j] = 1.0;
    }
}
"#;
    compile(ok, Dialect::Glsl100).unwrap();

    let bad = r#"
kernel k {
    @out result: array<float>;
    @compute fn main() {
        result[global_id.x + 1] = 1.0;
    }
}
"#;
    let reason = unsupported_reason(compile(bad, Dialect::Glsl100).unwrap_err());
    assert!(reason.contains("scatter"), "{reason}");
}

#[test]
fn es100_requires_constant_loop_bounds() {
    let src = r#"
kernel k {
    @in data: array<float>;
    @out result: array<float>;
    @compute fn main() {
        var acc = 0.0;
        for (var i = 0; i < len(data); i = i + 1) {
            acc = acc + read_at(i);
        }
        result[global_id.x] = acc;
    }

    fn read_at(i: int) -> float {
        return data[i];
    }
}
"#;
    let reason = unsupported_reason(compile(src, Dialect::Glsl100).unwrap_err());
    assert!(reason.contains("compile-time"), "{reason}");
}

#[test]
fn es100_folds_constant_loop_bounds() {
    let src = r#"
kernel k {
    @in data: array<float>;
    @out result: array<float>;
    const TAPS: int = 4;

    @compute
    fn main() {
        var acc = 0.0;
        for (var i = 0; i < TAPS; i = i + 1) {
            acc = acc + data[i];
        }
        result[global_id.x] = acc;
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl100).unwrap();
    assert!(kernel.shader_source.contains("for (int i = 0; i < 4; i = i + 1)"));
}

#[test]
fn es100_lowers_integer_remainder_through_mod() {
    let src = r#"
kernel k {
    @in data: array<float>;
    @out result: array<float>;

    @compute
    fn main() {
        let i = global_id.x;
        let wrapped = i % 8;
        result[i] = data[wrapped];
    }
}
"#;
    let kernel = compile(src, Dialect::Glsl100).unwrap();
    assert!(kernel.shader_source.contains("int(mod(float(i), float(8)))"));
}
