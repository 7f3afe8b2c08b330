//! Compiler for the riffle compute-kernel dialect.
//!
//! A kernel is a single annotated source block: `@in`/`@out` properties,
//! compile-time constants, helper functions, and one `@compute` entry point.
//! Compilation parses and type-checks the block, assigns bind slots and a
//! params-block layout shared by every target, and emits shader source for
//! one of three dialects: WGSL compute, GLSL 4.50 compute, or GLSL ES 1.00
//! fragment emulation.
//!
//! The compiled [`ShaderContext`] is the contract with the execution side
//! (`riffle-compute`): it fully determines how buffers bind, how uniforms
//! pack, and which bindings double-buffer across iterations.

pub mod analyze;
pub mod ast;
pub mod bundle;
pub mod codegen;
pub mod compile;
pub mod context;
pub mod ir;
mod lex;
mod limits;
pub mod parse;

pub use analyze::{analyze, Analysis, SemanticError};
pub use bundle::{BundleError, KernelBundle, BUNDLE_FORMAT_VERSION};
pub use codegen::{CodegenError, GlslVersion, WGSL_ENTRY_POINT};
pub use compile::{
    compile, compile_with_constants, kernel_key, CacheLookup, CacheLookupSource, CachedKernel,
    CompileError, CompiledKernel, KernelCache,
};
pub use context::{
    Binding, BindingDirection, BindingError, BindingKind, ConstValue, ConstantValues, Dialect,
    ElemType, HelperSig, ParamsField, ParamsFieldKind, ParamsLayout, PipelineLayout,
    ShaderContext, SlotAccess, SlotDesc, WorkgroupSize,
};
pub use parse::{parse, ParseError};
