//! Umbrella crate: compile annotated compute kernels to WGSL/GLSL and run
//! them iteratively on a GPU backend.
//!
//! See [`kernel`] for the compiler front end (parse, analyze, codegen,
//! caching, bundles) and [`compute`] for binding resolution and the
//! execution scheduler.

pub use riffle_compute as compute;
pub use riffle_kernel as kernel;
