//! Centralized limits for kernel source parsing and analysis.
//!
//! Kernel source text is host-author-provided but still bounded: these caps keep pathological
//! inputs from blowing up lexer allocations, analyzer recursion, or generated shader size.

/// Maximum accepted kernel source length in bytes.
///
/// Real kernels are a few hundred lines at most; generated shader text grows roughly linearly
/// with source size, so this also bounds emitted program size.
pub(crate) const MAX_SOURCE_BYTES: usize = 64 * 1024; // 64 KiB

/// Maximum number of tokens the lexer will produce for one kernel.
pub(crate) const MAX_TOKENS: usize = 64 * 1024;

/// Maximum number of declared properties and constants per kernel.
///
/// Backends bind each array property to its own slot (two for read-write arrays); WebGPU's
/// baseline guarantees only a small number of storage buffers per stage, so there is no point
/// accepting kernels that could never bind.
pub(crate) const MAX_BINDINGS: usize = 16;

/// Maximum number of function declarations per kernel (entry point included).
pub(crate) const MAX_FUNCTIONS: usize = 32;

/// Maximum statement/expression nesting depth accepted by the parser.
///
/// The parser and the code generators both recurse over the tree; this cap keeps stack usage
/// bounded without a spill-to-heap scheme.
pub(crate) const MAX_NESTING_DEPTH: usize = 32;
