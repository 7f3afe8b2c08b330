use pretty_assertions::assert_eq;
use riffle_compute::{extract_constants, resolve, BindingTable, HostValue};
use riffle_kernel::{compile, BindingError, ConstValue, Dialect, ElemType, ShaderContext};

fn context(src: &str) -> ShaderContext {
    compile(src, Dialect::Wgsl).unwrap().context
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

fn saxpy_table() -> BindingTable {
    let mut table = BindingTable::new();
    table.insert("x".into(), HostValue::FloatArray(vec![1.0, 2.0, 3.0]));
    table.insert("y".into(), HostValue::FloatArray(vec![4.0, 5.0, 6.0]));
    table.insert("a".into(), HostValue::Float(2.0));
    table
}

#[test]
fn resolves_a_complete_table() {
    let ctx = context(SAXPY);
    let resolved = resolve(&ctx, &saxpy_table(), [3, 1, 1]).unwrap();

    assert_eq!(resolved.extent, [3, 1, 1]);
    assert_eq!(resolved.arrays.len(), 3);

    let x = &resolved.arrays[0];
    assert_eq!(x.name, "x");
    assert_eq!(x.len, 3);
    assert_eq!(x.read_slot, Some(1));
    assert_eq!(x.write_slot, None);
    assert!(!x.is_output);
    assert_eq!(
        x.initial.as_deref(),
        Some(bytemuck::cast_slice([1.0f32, 2.0, 3.0].as_slice()))
    );

    let result = &resolved.arrays[2];
    assert_eq!(result.write_slot, Some(3));
    assert_eq!(result.read_slot, None);
    assert!(result.initial.is_none());
    assert!(result.is_output);
    // Write-only with no declared length: sized by the linear extent.
    assert_eq!(result.len, 3);
}

#[test]
fn params_bytes_carry_extent_lens_and_uniforms() {
    let ctx = context(SAXPY);
    let resolved = resolve(&ctx, &saxpy_table(), [3, 1, 1]).unwrap();
    let bytes = &resolved.params_bytes;

    assert_eq!(bytes.len() as u32, ctx.layout.params.size_bytes);
    // extent.x at offset 0.
    assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 3);
    // Array lens in declaration order, starting at 16.
    assert_eq!(i32::from_le_bytes(bytes[16..20].try_into().unwrap()), 3);
    assert_eq!(i32::from_le_bytes(bytes[20..24].try_into().unwrap()), 3);
    assert_eq!(i32::from_le_bytes(bytes[24..28].try_into().unwrap()), 3);
    // The uniform follows the lens.
    assert_eq!(f32::from_le_bytes(bytes[28..32].try_into().unwrap()), 2.0);
}

#[test]
fn missing_inputs_are_reported_by_name() {
    let ctx = context(SAXPY);
    let mut table = saxpy_table();
    table.remove("y");
    let err = resolve(&ctx, &table, [3, 1, 1]).unwrap_err();
    assert_eq!(err, BindingError::MissingBinding { name: "y".into() });
}

#[test]
fn unknown_names_are_rejected_before_shape_checks() {
    let ctx = context(SAXPY);
    let mut table = saxpy_table();
    table.insert("mystery".into(), HostValue::Float(1.0));
    let err = resolve(&ctx, &table, [3, 1, 1]).unwrap_err();
    assert_eq!(err, BindingError::UnknownBinding { name: "mystery".into() });
}

#[test]
fn element_type_mismatches_are_shape_errors() {
    let ctx = context(SAXPY);
    let mut table = saxpy_table();
    table.insert("x".into(), HostValue::IntArray(vec![1, 2, 3]));
    let err = resolve(&ctx, &table, [3, 1, 1]).unwrap_err();
    assert!(matches!(err, BindingError::ShapeMismatch { ref name, .. } if name == "x"));

    let mut table = saxpy_table();
    table.insert("a".into(), HostValue::Vec2([1.0, 2.0]));
    let err = resolve(&ctx, &table, [3, 1, 1]).unwrap_err();
    assert!(matches!(err, BindingError::ShapeMismatch { ref name, .. } if name == "a"));
}

#[test]
fn write_only_arrays_must_not_be_supplied() {
    let ctx = context(SAXPY);
    let mut table = saxpy_table();
    table.insert("result".into(), HostValue::FloatArray(vec![0.0; 3]));
    let err = resolve(&ctx, &table, [3, 1, 1]).unwrap_err();
    assert_eq!(err, BindingError::DirectionMismatch { name: "result".into() });
}

#[test]
fn declared_lengths_are_enforced_and_size_outputs() {
    let ctx = context(
        r#"
kernel histogram {
    @in samples: array<float>;
    @out bins: array<float, 16>;

    @compute
    fn main() {
        bins[global_id.x] = samples[global_id.x];
    }
}
"#,
    );
    let mut table = BindingTable::new();
    table.insert("samples".into(), HostValue::FloatArray(vec![0.0; 64]));
    let resolved = resolve(&ctx, &table, [64, 1, 1]).unwrap();
    let bins = resolved.arrays.iter().find(|p| p.name == "bins").unwrap();
    // Write-only with a declared length: sized by the declaration, not the
    // extent.
    assert_eq!(bins.len, 16);
}

#[test]
fn declared_input_lengths_must_match_the_supplied_array() {
    let ctx = context(
        r#"
kernel fixed {
    @in taps: array<float, 4>;
    @out result: array<float>;

    @compute
    fn main() {
        result[global_id.x] = taps[0];
    }
}
"#,
    );
    let mut table = BindingTable::new();
    table.insert("taps".into(), HostValue::FloatArray(vec![0.0; 3]));
    let err = resolve(&ctx, &table, [8, 1, 1]).unwrap_err();
    assert!(matches!(err, BindingError::ShapeMismatch { ref name, .. } if name == "taps"));
}

#[test]
fn vec3_arrays_resolve_at_a_16_byte_stride() {
    let ctx = context(
        r#"
kernel lift {
    @in points: array<vec3>;
    @out lifted: array<vec3>;

    @compute
    fn main() {
        let i = global_id.x;
        lifted[i] = points[i] + vec3(0.0, 1.0, 0.0);
    }
}
"#,
    );
    let mut table = BindingTable::new();
    table.insert(
        "points".into(),
        HostValue::Vec3Array(vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]),
    );
    let resolved = resolve(&ctx, &table, [2, 1, 1]).unwrap();
    let points = &resolved.arrays[0];
    assert_eq!(points.elem, ElemType::Vec3);
    assert_eq!(points.size_bytes(), 32);
    assert_eq!(points.initial.as_ref().unwrap().len(), 32);
}

#[test]
fn double_buffered_arrays_plan_both_slots() {
    let ctx = context(
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
    );
    let mut table = BindingTable::new();
    table.insert("cells".into(), HostValue::FloatArray(vec![1.0; 8]));
    let resolved = resolve(&ctx, &table, [8, 1, 1]).unwrap();
    let cells = &resolved.arrays[0];
    assert!(cells.double_buffered);
    assert!(cells.is_output);
    assert_eq!(cells.read_slot, Some(1));
    assert_eq!(cells.write_slot, Some(2));
    assert!(cells.initial.is_some());
}

#[test]
fn constants_are_extracted_by_type_and_skipped_by_resolve() {
    let src = r#"
kernel decay {
    @in @out field: array<float>;
    const RATE: float;
    const STEPS: int;

    @compute
    fn main() {
        let i = global_id.x;
        var v = field[i];
        for (var s = 0; s < STEPS; s = s + 1) {
            v = v * RATE;
        }
        field[i] = v;
    }
}
"#;
    // Compile needs the constants; analyze alone provides the context.
    let ast = riffle_kernel::parse(src).unwrap();
    let analysis = riffle_kernel::analyze(&ast, Dialect::Wgsl).unwrap();
    let ctx = analysis.context;

    let mut table = BindingTable::new();
    table.insert("field".into(), HostValue::FloatArray(vec![1.0; 4]));
    let err = extract_constants(&ctx, &table).unwrap_err();
    assert!(matches!(err, BindingError::UnresolvedConstant { .. }));

    table.insert("RATE".into(), HostValue::Float(0.5));
    table.insert("STEPS".into(), HostValue::Int(3));
    let constants = extract_constants(&ctx, &table).unwrap();
    assert_eq!(constants.get("RATE"), Some(ConstValue::Float(0.5)));
    assert_eq!(constants.get("STEPS"), Some(ConstValue::Int(3)));

    // The resolver treats constants as compile-time only; they produce no
    // buffers or params fields.
    let resolved = resolve(&ctx, &table, [4, 1, 1]).unwrap();
    assert_eq!(resolved.arrays.len(), 1);

    let mistyped = {
        let mut t = table.clone();
        t.insert("STEPS".into(), HostValue::Float(3.0));
        extract_constants(&ctx, &t).unwrap_err()
    };
    assert!(matches!(mistyped, BindingError::ShapeMismatch { ref name, .. } if name == "STEPS"));
}
