//! Binding resolution: check host-supplied values against the compiled
//! kernel's bindings and produce the buffer plan for one run.

use std::collections::BTreeMap;

use riffle_kernel::{
    BindingDirection, BindingError, BindingKind, ConstValue, ConstantValues, ElemType,
    ShaderContext,
};

use crate::value::{pack_params, HostValue};

/// Host-supplied values keyed by binding name. Ordered so runs resolve
/// deterministically.
pub type BindingTable = BTreeMap<String, HostValue>;

/// Buffer plan for one array binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayPlan {
    pub name: String,
    pub elem: ElemType,
    /// Resolved element count.
    pub len: u32,
    pub double_buffered: bool,
    /// Seed bytes at device stride; `None` for write-only outputs.
    pub initial: Option<Vec<u8>>,
    pub read_slot: Option<u32>,
    pub write_slot: Option<u32>,
    /// Read back after the run completes.
    pub is_output: bool,
}

impl ArrayPlan {
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.len) * u64::from(self.elem.device_stride())
    }
}

/// Everything a run needs that depends on the binding table and extent.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBindings {
    pub extent: [u32; 3],
    pub arrays: Vec<ArrayPlan>,
    pub params_bytes: Vec<u8>,
}

/// Pull compile-time constant values out of a binding table.
///
/// Constants travel in the same table as runtime bindings; the compiler needs
/// them separated out before code generation.
pub fn extract_constants(
    context: &ShaderContext,
    table: &BindingTable,
) -> Result<ConstantValues, BindingError> {
    let mut constants = ConstantValues::new();
    for binding in context.bindings.iter().filter(|b| b.is_compile_time_constant) {
        match table.get(&binding.name) {
            Some(HostValue::Int(v)) if binding.element_type == ElemType::Int => {
                constants.set(binding.name.clone(), ConstValue::Int(*v));
            }
            Some(HostValue::Float(v)) if binding.element_type == ElemType::Float => {
                constants.set(binding.name.clone(), ConstValue::Float(*v));
            }
            Some(other) => {
                return Err(BindingError::ShapeMismatch {
                    name: binding.name.clone(),
                    expected: binding.element_type.dsl_name().to_owned(),
                    found: other.shape(),
                })
            }
            None => {
                return Err(BindingError::UnresolvedConstant {
                    name: binding.name.clone(),
                })
            }
        }
    }
    Ok(constants)
}

/// Resolve a binding table against a compiled kernel for one dispatch extent.
///
/// Write-only arrays must not be supplied; their length comes from the
/// declared `array<T, N>` size when present, otherwise the linear extent.
pub fn resolve(
    context: &ShaderContext,
    table: &BindingTable,
    extent: [u32; 3],
) -> Result<ResolvedBindings, BindingError> {
    for name in table.keys() {
        if context.binding(name).is_none() {
            return Err(BindingError::UnknownBinding { name: name.clone() });
        }
    }

    let mut arrays = Vec::new();
    let mut array_lens = BTreeMap::new();
    let mut uniforms = BTreeMap::new();
    for binding in &context.bindings {
        if binding.is_compile_time_constant {
            // Already folded into the generated shader.
            continue;
        }
        match binding.kind {
            BindingKind::Uniform => {
                let value = table.get(&binding.name).ok_or_else(|| {
                    BindingError::MissingBinding {
                        name: binding.name.clone(),
                    }
                })?;
                if value.is_array() || value.elem_type() != binding.element_type {
                    return Err(BindingError::ShapeMismatch {
                        name: binding.name.clone(),
                        expected: binding.element_type.dsl_name().to_owned(),
                        found: value.shape(),
                    });
                }
                uniforms.insert(binding.name.clone(), value.clone());
            }
            BindingKind::ArrayBuffer => {
                let readable = binding.direction.contains(BindingDirection::IN);
                let writable = binding.direction.contains(BindingDirection::OUT);
                let (len, initial) = if readable {
                    let value = table.get(&binding.name).ok_or_else(|| {
                        BindingError::MissingBinding {
                            name: binding.name.clone(),
                        }
                    })?;
                    let len = match value.len() {
                        Some(len) if value.elem_type() == binding.element_type => len as u32,
                        _ => {
                            return Err(BindingError::ShapeMismatch {
                                name: binding.name.clone(),
                                expected: format!("array<{}>", binding.element_type.dsl_name()),
                                found: value.shape(),
                            })
                        }
                    };
                    if let Some(declared) = binding.declared_len {
                        if len != declared {
                            return Err(BindingError::ShapeMismatch {
                                name: binding.name.clone(),
                                expected: format!(
                                    "array<{}, {declared}>",
                                    binding.element_type.dsl_name()
                                ),
                                found: value.shape(),
                            });
                        }
                    }
                    (len, value.array_bytes())
                } else {
                    if table.contains_key(&binding.name) {
                        return Err(BindingError::DirectionMismatch {
                            name: binding.name.clone(),
                        });
                    }
                    let len = binding
                        .declared_len
                        .unwrap_or_else(|| extent[0] * extent[1] * extent[2]);
                    (len, None)
                };
                array_lens.insert(binding.name.clone(), len);
                arrays.push(ArrayPlan {
                    name: binding.name.clone(),
                    elem: binding.element_type,
                    len,
                    double_buffered: binding.is_double_buffered(),
                    initial,
                    read_slot: context.layout.read_slot(&binding.name),
                    write_slot: context.layout.write_slot(&binding.name),
                    is_output: writable,
                });
            }
        }
    }

    let params_bytes = pack_params(&context.layout.params, extent, &array_lens, &uniforms);
    Ok(ResolvedBindings {
        extent,
        arrays,
        params_bytes,
    })
}
