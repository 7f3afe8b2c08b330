use pretty_assertions::assert_eq;
use riffle_kernel::{compile, compile_with_constants, ConstValue, ConstantValues, Dialect};

fn validate_wgsl(source: &str) {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|err| panic!("invalid WGSL: {err}\n---\n{source}"));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|err| panic!("WGSL failed validation: {err:?}\n---\n{source}"));
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
fn saxpy_emits_valid_wgsl() {
    let kernel = compile(SAXPY, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    assert!(kernel.shader_source.contains("@compute @workgroup_size(64, 1, 1)"));
    assert!(kernel.shader_source.contains("fn cs_main("));
}

#[test]
fn output_is_deterministic() {
    let a = compile(SAXPY, Dialect::Wgsl).unwrap();
    let b = compile(SAXPY, Dialect::Wgsl).unwrap();
    assert_eq!(a.shader_source, b.shader_source);
}

#[test]
fn bindings_are_numbered_in_declaration_order() {
    let kernel = compile(SAXPY, Dialect::Wgsl).unwrap();
    let src = &kernel.shader_source;
    let slot = |needle: &str| src.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
    assert!(src.contains("@group(0) @binding(1) var<storage, read> x: array<f32>;"));
    assert!(src.contains("@group(0) @binding(2) var<storage, read> y: array<f32>;"));
    assert!(src.contains("@group(0) @binding(3) var<storage, read_write> result: array<f32>;"));
    assert!(slot("binding(1)") < slot("binding(2)"));
}

#[test]
fn every_storage_binding_is_referenced_so_the_implicit_layout_keeps_it() {
    // A kernel that never indexes one of its arrays would otherwise lose the
    // binding from the pipeline's implicit layout.
    let src = r#"
kernel passthrough {
    @in unused: array<float>;
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = 1.0;
    }
}
"#;
    let kernel = compile(src, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    assert!(kernel.shader_source.contains("arrayLength(&unused)"));
    assert!(kernel.shader_source.contains("arrayLength(&result)"));
}

#[test]
fn double_buffered_arrays_split_into_in_and_out_bindings() {
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
    let kernel = compile(src, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    let src = &kernel.shader_source;
    assert!(src.contains("var<storage, read> cells_in: array<f32>;"));
    assert!(src.contains("var<storage, read_write> cells_out: array<f32>;"));
    assert!(src.contains("cells_out[i] = (cells_in[i] * 0.5);"));
}

#[test]
fn entry_guards_against_out_of_extent_invocations() {
    let kernel = compile(SAXPY, Dialect::Wgsl).unwrap();
    assert!(kernel
        .shader_source
        .contains("if (gid.x >= params.extent.x || gid.y >= params.extent.y || gid.z >= params.extent.z)"));
}

#[test]
fn compile_time_constants_are_inlined_as_literals() {
    let src = r#"
kernel windowed {
    @in data: array<float>;
    @out result: array<float>;
    const RADIUS: int;

    @compute
    fn main() {
        var acc = 0.0;
        for (var i = 0 - RADIUS; i <= RADIUS; i = i + 1) {
            acc = acc + data[global_id.x + i];
        }
        result[global_id.x] = acc;
    }
}
"#;
    let mut constants = ConstantValues::new();
    constants.set("RADIUS", ConstValue::Int(2));
    let kernel = compile_with_constants(src, Dialect::Wgsl, &constants).unwrap();
    validate_wgsl(&kernel.shader_source);
    assert!(!kernel.shader_source.contains("RADIUS"));
    assert!(kernel.shader_source.contains('2'));
}

#[test]
fn missing_constant_values_fail_compilation() {
    let src = r#"
kernel k {
    const N: int;
    @out result: array<float>;
    @compute fn main() {
        result[global_id.x] = float(N);
    }
}
"#;
    compile(src, Dialect::Wgsl).unwrap_err();
}

#[test]
fn helpers_and_control_flow_emit_valid_wgsl() {
    let src = r#"
kernel smooth {
    @in @out field: array<vec2>;
    @in blend: float;

    fn damp(v: vec2, k: float) -> vec2 {
        return v * (1.0 - k);
    }

    @compute(32)
    fn main() {
        let i = global_id.x;
        var v = field[i];
        if (length(v) > 1.0) {
            v = normalize(v);
        } else {
            v = damp(v, blend);
        }
        field[i] = v;
    }
}
"#;
    let kernel = compile(src, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    assert!(kernel.shader_source.contains("fn damp(v: vec2<f32>, k: f32) -> vec2<f32>"));
}

#[test]
fn ternaries_lower_to_select() {
    let src = r#"
kernel clip {
    @in data: array<float>;
    @out result: array<float>;

    @compute
    fn main() {
        let v = data[global_id.x];
        result[global_id.x] = v > 0.0 ? v : 0.0;
    }
}
"#;
    let kernel = compile(src, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    assert!(kernel.shader_source.contains("select(0.0, v, (v > 0.0))"));
}

#[test]
fn params_block_matches_the_layout_offsets() {
    let src = r#"
kernel mixed {
    @in data: array<float>;
    @in scale: float;
    @in offset: vec2;
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = data[global_id.x] * scale + offset.x;
    }
}
"#;
    let kernel = compile(src, Dialect::Wgsl).unwrap();
    validate_wgsl(&kernel.shader_source);
    let params = &kernel.context.layout.params;
    // Offsets: extent at 0, the two array lens at 16 and 20, then the
    // uniforms at their natural alignments.
    assert_eq!(params.fields[0].offset, 0);
    assert_eq!(params.fields[1].offset, 16);
    assert_eq!(params.fields[2].offset, 20);
    assert!(kernel.shader_source.contains("struct Params"));
}

#[test]
fn recursion_is_rejected() {
    let src = r#"
kernel k {
    @out result: array<float>;

    fn spin(x: float) -> float {
        return spin(x) + 1.0;
    }

    @compute
    fn main() {
        result[global_id.x] = spin(1.0);
    }
}
"#;
    compile(src, Dialect::Wgsl).unwrap_err();
}
