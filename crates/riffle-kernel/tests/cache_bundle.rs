use pretty_assertions::assert_eq;
use riffle_kernel::{
    compile, kernel_key, CacheLookupSource, ConstValue, ConstantValues, Dialect, KernelBundle,
    KernelCache, BUNDLE_FORMAT_VERSION,
};

const KERNEL: &str = r#"
kernel decay {
    @in @out field: array<float>;
    const RATE: float;

    @compute(64)
    fn main() {
        let i = global_id.x;
        field[i] = field[i] * RATE;
    }
}
"#;

fn rate(v: f32) -> ConstantValues {
    let mut constants = ConstantValues::new();
    constants.set("RATE", ConstValue::Float(v));
    constants
}

#[test]
fn cache_compiles_once_per_key() {
    let mut cache = KernelCache::new();
    let constants = rate(0.5);

    let first = cache
        .get_or_compile(KERNEL, Dialect::Wgsl, &constants)
        .unwrap();
    assert_eq!(first.source, CacheLookupSource::Compiled);
    let shader = first.kernel.shader_source.clone();

    let second = cache
        .get_or_compile(KERNEL, Dialect::Wgsl, &constants)
        .unwrap();
    assert_eq!(second.source, CacheLookupSource::Memory);
    assert_eq!(second.kernel.shader_source, shader);
    assert_eq!(cache.len(), 1);
}

#[test]
fn distinct_constants_get_distinct_cache_entries() {
    let mut cache = KernelCache::new();
    cache.get_or_compile(KERNEL, Dialect::Wgsl, &rate(0.5)).unwrap();
    cache.get_or_compile(KERNEL, Dialect::Wgsl, &rate(0.9)).unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn cache_keys_cover_source_dialect_and_constants() {
    let constants = rate(0.5);
    let base = kernel_key(KERNEL, Dialect::Wgsl, &constants);
    assert_ne!(base, kernel_key(KERNEL, Dialect::Glsl450, &constants));
    assert_ne!(base, kernel_key(KERNEL, Dialect::Wgsl, &rate(0.9)));

    let mut renamed = ConstantValues::new();
    renamed.set("RATF", ConstValue::Float(0.5));
    assert_ne!(base, kernel_key(KERNEL, Dialect::Wgsl, &renamed));

    assert_eq!(base, kernel_key(KERNEL, Dialect::Wgsl, &rate(0.5)));
}

#[test]
fn compile_failures_are_not_cached() {
    let mut cache = KernelCache::new();
    // RATE left unbound.
    cache
        .get_or_compile(KERNEL, Dialect::Wgsl, &ConstantValues::new())
        .unwrap_err();
    assert!(cache.is_empty());
}

#[test]
fn bundles_round_trip_through_json() {
    let kernel = compile(
        r#"
kernel copy {
    @in src: array<float>;
    @out dst: array<float>;
    @compute fn main() {
        dst[global_id.x] = src[global_id.x];
    }
}
"#,
        Dialect::Wgsl,
    )
    .unwrap();

    let bundle = KernelBundle::new(&kernel).unwrap();
    assert_eq!(bundle.format_version, BUNDLE_FORMAT_VERSION);

    let json = bundle.to_json().unwrap();
    let restored = KernelBundle::from_json(&json).unwrap().into_kernel();
    assert_eq!(restored, kernel);
}

#[test]
fn tampered_bundles_fail_digest_verification() {
    let kernel = compile(
        "kernel k { @out o: array<float>; @compute fn main() { o[global_id.x] = 1.0; } }",
        Dialect::Wgsl,
    )
    .unwrap();
    let bundle = KernelBundle::new(&kernel).unwrap();
    let json = bundle
        .to_json()
        .unwrap()
        .replace("= 1.0;", "= 2.0;");
    KernelBundle::from_json(&json).unwrap_err();
}

#[test]
fn unknown_format_versions_are_rejected() {
    let kernel = compile(
        "kernel k { @out o: array<float>; @compute fn main() { o[global_id.x] = 1.0; } }",
        Dialect::Wgsl,
    )
    .unwrap();
    let bundle = KernelBundle::new(&kernel).unwrap();
    let json = bundle
        .to_json()
        .unwrap()
        .replace(
            &format!("\"format_version\": {BUNDLE_FORMAT_VERSION}"),
            &format!("\"format_version\": {}", BUNDLE_FORMAT_VERSION + 1),
        );
    KernelBundle::from_json(&json).unwrap_err();
}
