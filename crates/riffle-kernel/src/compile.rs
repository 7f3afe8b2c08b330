//! Kernel compilation: parse, analyze, resolve compile-time constants, and
//! generate shader source, plus an in-memory cache keyed by
//! (source, dialect, constants).

use std::collections::HashMap;

use blake3::Hash;
use thiserror::Error;
use tracing::debug;

use crate::analyze::{analyze, SemanticError};
use crate::codegen::{self, CodegenError};
use crate::context::{
    BindingError, ConstValue, ConstantValues, Dialect, ShaderContext,
};
use crate::parse::{parse, ParseError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Constants(#[from] BindingError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Successful compilation result: the generated shader plus the context the
/// scheduler needs to bind and dispatch it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledKernel {
    /// Kernel name from the source `kernel` block.
    pub name: String,
    pub shader_source: String,
    pub context: ShaderContext,
}

/// Compile a kernel with no compile-time constants bound.
pub fn compile(source: &str, dialect: Dialect) -> Result<CompiledKernel, CompileError> {
    compile_with_constants(source, dialect, &ConstantValues::new())
}

pub fn compile_with_constants(
    source: &str,
    dialect: Dialect,
    constants: &ConstantValues,
) -> Result<CompiledKernel, CompileError> {
    let ast = parse(source)?;
    let analysis = analyze(&ast, dialect)?;
    check_constants(&analysis.context, constants)?;
    let shader_source = codegen::generate(&analysis.context, &analysis.kernel, constants)?;
    debug!(
        kernel = %ast.kernel_name,
        %dialect,
        shader_bytes = shader_source.len(),
        "compiled kernel"
    );
    Ok(CompiledKernel {
        name: ast.kernel_name,
        shader_source,
        context: analysis.context,
    })
}

/// Every declared compile-time constant must have a value of the right type,
/// and no extra values may be supplied.
fn check_constants(
    context: &ShaderContext,
    constants: &ConstantValues,
) -> Result<(), BindingError> {
    for binding in context.bindings.iter().filter(|b| b.is_compile_time_constant) {
        match constants.get(&binding.name) {
            None => {
                return Err(BindingError::UnresolvedConstant {
                    name: binding.name.clone(),
                })
            }
            Some(value) => {
                let matches = matches!(
                    (binding.element_type, value),
                    (crate::context::ElemType::Int, ConstValue::Int(_))
                        | (crate::context::ElemType::Float, ConstValue::Float(_))
                );
                if !matches {
                    return Err(BindingError::ShapeMismatch {
                        name: binding.name.clone(),
                        expected: binding.element_type.dsl_name().to_owned(),
                        found: match value {
                            ConstValue::Int(_) => "int".to_owned(),
                            ConstValue::Float(_) => "float".to_owned(),
                        },
                    });
                }
            }
        }
    }
    for (name, _) in constants.iter() {
        let declared = context
            .bindings
            .iter()
            .any(|b| b.is_compile_time_constant && b.name == name);
        if !declared {
            return Err(BindingError::UnknownBinding {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

/// Content hash identifying one compiled variant. Two compilations share an
/// entry only when source, dialect, and every constant value agree.
pub fn kernel_key(source: &str, dialect: Dialect, constants: &ConstantValues) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.update(&[dialect.tag()]);
    for (name, value) in constants.iter() {
        hasher.update(&(name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        match value {
            ConstValue::Int(v) => {
                hasher.update(&[0]);
                hasher.update(&v.to_le_bytes());
            }
            ConstValue::Float(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_le_bytes());
            }
        }
    }
    hasher.finalize()
}

#[derive(Debug, Clone)]
pub struct CachedKernel {
    pub key: Hash,
    pub kernel: CompiledKernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookupSource {
    /// The variant was already present in the in-memory cache.
    Memory,
    /// The compiler ran and the output was inserted into the cache.
    Compiled,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheLookup<'a> {
    pub source: CacheLookupSource,
    kernel: &'a CachedKernel,
}

impl std::ops::Deref for CacheLookup<'_> {
    type Target = CachedKernel;

    fn deref(&self) -> &Self::Target {
        self.kernel
    }
}

/// In-memory cache of compiled kernel variants.
#[derive(Debug, Default)]
pub struct KernelCache {
    map: HashMap<Hash, CachedKernel>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get_or_compile(
        &mut self,
        source: &str,
        dialect: Dialect,
        constants: &ConstantValues,
    ) -> Result<CacheLookup<'_>, CompileError> {
        use std::collections::hash_map::Entry;

        let key = kernel_key(source, dialect, constants);
        match self.map.entry(key) {
            Entry::Occupied(e) => Ok(CacheLookup {
                source: CacheLookupSource::Memory,
                kernel: e.into_mut(),
            }),
            Entry::Vacant(e) => {
                let kernel = compile_with_constants(source, dialect, constants)?;
                let key = *e.key();
                Ok(CacheLookup {
                    source: CacheLookupSource::Compiled,
                    kernel: e.insert(CachedKernel { key, kernel }),
                })
            }
        }
    }
}
