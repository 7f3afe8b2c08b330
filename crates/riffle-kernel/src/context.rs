//! Shared vocabulary for compiled kernels: bindings, dialects, and the
//! deterministic slot/params layout consumed by both the code generators and
//! the compute-side resolver.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    /// Direction annotations attached to a kernel property.
    ///
    /// `IN | OUT` is the read-write direction; a read-write array binding is
    /// double-buffered at execution time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindingDirection: u8 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
    }
}

impl Serialize for BindingDirection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for BindingDirection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        BindingDirection::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid direction bits {bits:#x}")))
    }
}

impl fmt::Display for BindingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::IN), self.contains(Self::OUT)) {
            (true, true) => write!(f, "in+out"),
            (true, false) => write!(f, "in"),
            (false, true) => write!(f, "out"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Element type of a binding: a scalar or a float vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl ElemType {
    /// Number of scalar lanes.
    pub fn lanes(self) -> u32 {
        match self {
            ElemType::Float | ElemType::Int => 1,
            ElemType::Vec2 => 2,
            ElemType::Vec3 => 3,
            ElemType::Vec4 => 4,
        }
    }

    /// Natural (tightly packed) size in bytes.
    pub fn size_bytes(self) -> u32 {
        self.lanes() * 4
    }

    /// std140/std430/WGSL alignment of the type.
    pub fn align(self) -> u32 {
        match self {
            ElemType::Float | ElemType::Int => 4,
            ElemType::Vec2 => 8,
            // vec3 aligns and strides like vec4 in every target layout.
            ElemType::Vec3 | ElemType::Vec4 => 16,
        }
    }

    /// Array element stride in bytes on the device (vec3 pads to 16).
    pub fn device_stride(self) -> u32 {
        match self {
            ElemType::Float | ElemType::Int => 4,
            ElemType::Vec2 => 8,
            ElemType::Vec3 | ElemType::Vec4 => 16,
        }
    }

    pub fn is_vector(self) -> bool {
        self.lanes() > 1
    }

    /// Source-dialect spelling of the type.
    pub fn dsl_name(self) -> &'static str {
        match self {
            ElemType::Float => "float",
            ElemType::Int => "int",
            ElemType::Vec2 => "vec2",
            ElemType::Vec3 => "vec3",
            ElemType::Vec4 => "vec4",
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dsl_name())
    }
}

/// How a binding is exposed to the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    /// A scalar/vector value in the injected params block (or a plain uniform
    /// on GLSL100).
    Uniform,
    /// A runtime-sized buffer of elements.
    ArrayBuffer,
}

/// Output shading language targeted by code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// GLSL ES 1.00 fragment-shader emulation (WebGL-style backends).
    Glsl100,
    /// GLSL 4.50 compute.
    Glsl450,
    /// WGSL compute.
    Wgsl,
}

impl Dialect {
    /// Stable tag byte used in cache keys and bundle digests.
    pub(crate) fn tag(self) -> u8 {
        match self {
            Dialect::Glsl100 => 0,
            Dialect::Glsl450 => 1,
            Dialect::Wgsl => 2,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Glsl100 => "glsl100",
            Dialect::Glsl450 => "glsl450",
            Dialect::Wgsl => "wgsl",
        })
    }
}

/// Workgroup size from the `@compute(x, y, z)` directive; omitted axes are 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

/// A named kernel parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub direction: BindingDirection,
    pub element_type: ElemType,
    pub kind: BindingKind,
    /// Resolved to a literal before code generation; never a runtime symbol.
    pub is_compile_time_constant: bool,
    /// Declared element count for `array<T, N>` properties, when `N` resolved
    /// to a concrete value at analysis time.
    pub declared_len: Option<u32>,
}

impl Binding {
    /// True when execution must ping-pong two physical buffers for this
    /// binding (read-write arrays only; uniforms are never double-buffered).
    pub fn is_double_buffered(&self) -> bool {
        self.kind == BindingKind::ArrayBuffer
            && self.direction == (BindingDirection::IN | BindingDirection::OUT)
    }
}

/// Signature of a helper function reachable from the entry point, recorded in
/// emission order. Types use their source-dialect spelling; this is schema
/// documentation for precompiled bundles, not a typed IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperSig {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub ret: Option<String>,
}

/// Access mode of one bind slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotAccess {
    Read,
    Write,
}

/// One array-buffer bind slot. Slot 0 is always the params block and is not
/// listed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDesc {
    pub slot: u32,
    pub binding: String,
    pub access: SlotAccess,
}

/// What one field of the params block carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamsFieldKind {
    /// Injected dispatch extent (uvec3 + explicit pad).
    Extent,
    /// Injected `i32` element count of an array binding.
    ArrayLen { binding: String },
    /// A scalar/vector uniform binding value.
    Uniform {
        binding: String,
        element_type: ElemType,
    },
}

/// One field of the packed params block. `name` is the generated struct member
/// name; `offset` is the byte offset shared by the host-side packer and every
/// generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsField {
    pub name: String,
    pub offset: u32,
    pub kind: ParamsFieldKind,
}

/// std140-compatible layout of the injected params block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsLayout {
    pub fields: Vec<ParamsField>,
    /// Total size, rounded up to 16 bytes.
    pub size_bytes: u32,
}

/// Deterministic slot assignment shared by the generators and the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLayout {
    pub slots: Vec<SlotDesc>,
    pub params: ParamsLayout,
}

impl PipelineLayout {
    /// Assign slots and pack the params block for a binding list.
    ///
    /// Slot 0 is the params block. Array bindings take slots in declaration
    /// order: a read slot when readable, then a write slot when writable.
    /// Params fields: extent, one length per array binding, then uniform
    /// values, all in declaration order at their std140 alignments.
    pub fn for_bindings(bindings: &[Binding]) -> Self {
        let mut slots = Vec::new();
        let mut next_slot = 1u32;
        for b in bindings {
            if b.kind != BindingKind::ArrayBuffer {
                continue;
            }
            if b.direction.contains(BindingDirection::IN) {
                slots.push(SlotDesc {
                    slot: next_slot,
                    binding: b.name.clone(),
                    access: SlotAccess::Read,
                });
                next_slot += 1;
            }
            if b.direction.contains(BindingDirection::OUT) {
                slots.push(SlotDesc {
                    slot: next_slot,
                    binding: b.name.clone(),
                    access: SlotAccess::Write,
                });
                next_slot += 1;
            }
        }

        let mut fields = Vec::new();
        fields.push(ParamsField {
            name: "extent".to_owned(),
            offset: 0,
            kind: ParamsFieldKind::Extent,
        });
        // vec3 extent occupies 12 bytes; the explicit pad keeps the length
        // fields starting at 16 in every dialect.
        let mut cursor = 16u32;
        for b in bindings {
            if b.kind != BindingKind::ArrayBuffer {
                continue;
            }
            fields.push(ParamsField {
                name: format!("{}_len", b.name),
                offset: cursor,
                kind: ParamsFieldKind::ArrayLen {
                    binding: b.name.clone(),
                },
            });
            cursor += 4;
        }
        for b in bindings {
            if b.kind != BindingKind::Uniform || b.is_compile_time_constant {
                continue;
            }
            let align = b.element_type.align();
            cursor = cursor.next_multiple_of(align);
            fields.push(ParamsField {
                name: b.name.clone(),
                offset: cursor,
                kind: ParamsFieldKind::Uniform {
                    binding: b.name.clone(),
                    element_type: b.element_type,
                },
            });
            cursor += b.element_type.size_bytes();
        }

        PipelineLayout {
            slots,
            params: ParamsLayout {
                fields,
                size_bytes: cursor.next_multiple_of(16),
            },
        }
    }

    pub fn read_slot(&self, binding: &str) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.binding == binding && s.access == SlotAccess::Read)
            .map(|s| s.slot)
    }

    pub fn write_slot(&self, binding: &str) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.binding == binding && s.access == SlotAccess::Write)
            .map(|s| s.slot)
    }
}

/// The compiled unit: everything a backend and scheduler need to bind and
/// dispatch a kernel. Created once per (source, dialect) pair by the compile
/// step and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderContext {
    pub entry_point: String,
    pub workgroup_size: WorkgroupSize,
    pub bindings: Vec<Binding>,
    pub helpers: Vec<HelperSig>,
    pub dialect: Dialect,
    pub layout: PipelineLayout,
}

impl ShaderContext {
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

/// Concrete value for one compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Float(f32),
    Int(i32),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Float(v) => write!(f, "{v}"),
            ConstValue::Int(v) => write!(f, "{v}"),
        }
    }
}

/// Values for the compile-time constants of one kernel, keyed by name.
///
/// Ordered so that cache keys and bundle digests are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantValues(BTreeMap<String, ConstValue>);

impl ConstantValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: ConstValue) -> &mut Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<ConstValue> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ConstValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Host-supplied values do not match the compiled kernel's expectations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    #[error("missing required binding `{name}`")]
    MissingBinding { name: String },
    #[error("binding `{name}` shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    #[error("binding `{name}` is write-only; it must not be supplied a value")]
    DirectionMismatch { name: String },
    #[error("compile-time constant `{name}` has no bound value")]
    UnresolvedConstant { name: String },
    #[error("`{name}` is not a binding of this kernel")]
    UnknownBinding { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(name: &str, direction: BindingDirection, ty: ElemType) -> Binding {
        Binding {
            name: name.to_owned(),
            direction,
            element_type: ty,
            kind: BindingKind::ArrayBuffer,
            is_compile_time_constant: false,
            declared_len: None,
        }
    }

    fn uniform(name: &str, ty: ElemType) -> Binding {
        Binding {
            name: name.to_owned(),
            direction: BindingDirection::IN,
            element_type: ty,
            kind: BindingKind::Uniform,
            is_compile_time_constant: false,
            declared_len: None,
        }
    }

    #[test]
    fn slots_follow_declaration_order_with_inout_split() {
        let layout = PipelineLayout::for_bindings(&[
            array("a", BindingDirection::IN | BindingDirection::OUT, ElemType::Vec4),
            array("b", BindingDirection::IN, ElemType::Float),
            array("c", BindingDirection::OUT, ElemType::Float),
        ]);
        assert_eq!(layout.read_slot("a"), Some(1));
        assert_eq!(layout.write_slot("a"), Some(2));
        assert_eq!(layout.read_slot("b"), Some(3));
        assert_eq!(layout.write_slot("b"), None);
        assert_eq!(layout.write_slot("c"), Some(4));
    }

    #[test]
    fn params_fields_pack_at_std140_offsets() {
        let layout = PipelineLayout::for_bindings(&[
            array("data", BindingDirection::IN | BindingDirection::OUT, ElemType::Vec4),
            uniform("rate", ElemType::Float),
            uniform("dir", ElemType::Vec3),
        ]);
        let offsets: Vec<(String, u32)> = layout
            .params
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("extent".to_owned(), 0),
                ("data_len".to_owned(), 16),
                ("rate".to_owned(), 20),
                ("dir".to_owned(), 32),
            ]
        );
        assert_eq!(layout.params.size_bytes, 48);
    }

    #[test]
    fn compile_time_constants_never_enter_the_params_block() {
        let mut n = uniform("N", ElemType::Int);
        n.is_compile_time_constant = true;
        let layout = PipelineLayout::for_bindings(&[n]);
        assert_eq!(layout.params.fields.len(), 1);
        assert_eq!(layout.params.size_bytes, 16);
    }
}
