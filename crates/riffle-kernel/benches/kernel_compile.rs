#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
#[cfg(not(target_arch = "wasm32"))]
use riffle_kernel::{
    analyze, compile, kernel_key, parse, ConstantValues, Dialect, KernelCache,
};

#[cfg(not(target_arch = "wasm32"))]
const BLUR: &str = r#"
kernel blur {
    @in input: array<float>;
    @out output: array<float>;
    @in strength: float;
    const TAPS: int = 5;

    fn weight(i: int) -> float {
        let centered = float(i) - float(TAPS) / 2.0;
        return exp(0.0 - centered * centered);
    }

    @compute(64)
    fn main() {
        let i = global_id.x;
        var acc = 0.0;
        var total = 0.0;
        for (var t = 0; t < TAPS; t = t + 1) {
            var j = i + t - TAPS / 2;
            if (j < 0) {
                j = 0;
            }
            if (j > len(input) - 1) {
                j = len(input) - 1;
            }
            let w = weight(t);
            acc = acc + input[j] * w;
            total = total + w;
        }
        output[i] = acc / total * strength;
    }
}
"#;

#[cfg(not(target_arch = "wasm32"))]
fn bench_compile_stages(c: &mut Criterion) {
    let ast = parse(BLUR).unwrap();
    let constants = ConstantValues::new();

    let mut group = c.benchmark_group("kernel_compile");

    group.bench_function("parse", |b| {
        b.iter(|| {
            let ast = parse(black_box(BLUR)).unwrap();
            black_box(ast.functions.len());
        })
    });

    group.bench_function("analyze", |b| {
        b.iter(|| {
            let analysis = analyze(black_box(&ast), Dialect::Wgsl).unwrap();
            black_box(analysis.context.bindings.len());
        })
    });

    for dialect in [Dialect::Wgsl, Dialect::Glsl450] {
        group.bench_with_input(
            BenchmarkId::new("compile", dialect),
            &dialect,
            |b, &dialect| {
                b.iter(|| {
                    let kernel = compile(black_box(BLUR), dialect).unwrap();
                    black_box(kernel.shader_source.len());
                })
            },
        );
    }

    group.bench_function("cache_key", |b| {
        b.iter(|| black_box(kernel_key(black_box(BLUR), Dialect::Wgsl, &constants)))
    });

    group.bench_function("cache_hit", |b| {
        let mut cache = KernelCache::new();
        cache
            .get_or_compile(BLUR, Dialect::Wgsl, &constants)
            .unwrap();
        b.iter(|| {
            let lookup = cache
                .get_or_compile(black_box(BLUR), Dialect::Wgsl, &constants)
                .unwrap();
            black_box(lookup.kernel.shader_source.len());
        })
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group!(benches, bench_compile_stages);
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
