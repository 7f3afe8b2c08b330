//! Host-side values for kernel bindings, and their device byte layouts.
//!
//! Arrays of `vec3` use a 16-byte device stride (std430 / WGSL array stride);
//! everything else packs tightly. The params block is packed against the
//! `ParamsLayout` the compiler produced, so offsets never diverge between
//! host and shader.

use std::collections::BTreeMap;

use riffle_kernel::{ElemType, ParamsFieldKind, ParamsLayout};

/// A value supplied for (or read back from) one kernel binding.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
    Vec2Array(Vec<[f32; 2]>),
    Vec3Array(Vec<[f32; 3]>),
    Vec4Array(Vec<[f32; 4]>),
}

impl HostValue {
    pub fn is_array(&self) -> bool {
        self.len().is_some()
    }

    /// Element count for array values.
    pub fn len(&self) -> Option<usize> {
        match self {
            HostValue::FloatArray(v) => Some(v.len()),
            HostValue::IntArray(v) => Some(v.len()),
            HostValue::Vec2Array(v) => Some(v.len()),
            HostValue::Vec3Array(v) => Some(v.len()),
            HostValue::Vec4Array(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn elem_type(&self) -> ElemType {
        match self {
            HostValue::Float(_) | HostValue::FloatArray(_) => ElemType::Float,
            HostValue::Int(_) | HostValue::IntArray(_) => ElemType::Int,
            HostValue::Vec2(_) | HostValue::Vec2Array(_) => ElemType::Vec2,
            HostValue::Vec3(_) | HostValue::Vec3Array(_) => ElemType::Vec3,
            HostValue::Vec4(_) | HostValue::Vec4Array(_) => ElemType::Vec4,
        }
    }

    /// Human-readable shape for mismatch errors, e.g. `array<vec3> (len 4)`.
    pub fn shape(&self) -> String {
        match self.len() {
            Some(len) => format!("array<{}> (len {len})", self.elem_type().dsl_name()),
            None => self.elem_type().dsl_name().to_owned(),
        }
    }

    /// Device bytes of a scalar/vector value (tight, no padding).
    pub fn scalar_bytes(&self) -> Option<Vec<u8>> {
        match self {
            HostValue::Float(v) => Some(v.to_le_bytes().to_vec()),
            HostValue::Int(v) => Some(v.to_le_bytes().to_vec()),
            HostValue::Vec2(v) => Some(bytemuck::bytes_of(v).to_vec()),
            HostValue::Vec3(v) => Some(bytemuck::bytes_of(v).to_vec()),
            HostValue::Vec4(v) => Some(bytemuck::bytes_of(v).to_vec()),
            _ => None,
        }
    }

    /// Device bytes of an array value at the device stride of its element.
    pub fn array_bytes(&self) -> Option<Vec<u8>> {
        match self {
            HostValue::FloatArray(v) => Some(bytemuck::cast_slice(v).to_vec()),
            HostValue::IntArray(v) => Some(bytemuck::cast_slice(v).to_vec()),
            HostValue::Vec2Array(v) => {
                Some(v.iter().flat_map(bytemuck::bytes_of).copied().collect())
            }
            HostValue::Vec3Array(v) => {
                // Stride 16: three lanes plus one pad word per element.
                let mut out = Vec::with_capacity(v.len() * 16);
                for e in v {
                    out.extend_from_slice(bytemuck::bytes_of(e));
                    out.extend_from_slice(&[0u8; 4]);
                }
                Some(out)
            }
            HostValue::Vec4Array(v) => {
                Some(v.iter().flat_map(bytemuck::bytes_of).copied().collect())
            }
            _ => None,
        }
    }

    /// Rebuild an array value from device bytes, taking `len` elements at the
    /// element's device stride.
    pub fn array_from_device_bytes(elem: ElemType, bytes: &[u8], len: usize) -> HostValue {
        let stride = elem.device_stride() as usize;
        let elems = bytes.chunks_exact(stride).take(len);
        match elem {
            ElemType::Float => HostValue::FloatArray(
                elems.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            ),
            ElemType::Int => HostValue::IntArray(
                elems.map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            ),
            ElemType::Vec2 => HostValue::Vec2Array(elems.map(|c| read_lanes::<2>(c)).collect()),
            ElemType::Vec3 => HostValue::Vec3Array(elems.map(|c| read_lanes::<3>(c)).collect()),
            ElemType::Vec4 => HostValue::Vec4Array(elems.map(|c| read_lanes::<4>(c)).collect()),
        }
    }
}

fn read_lanes<const N: usize>(chunk: &[u8]) -> [f32; N] {
    let mut out = [0f32; N];
    for (i, lane) in out.iter_mut().enumerate() {
        let b = &chunk[i * 4..i * 4 + 4];
        *lane = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }
    out
}

/// Pack the params block for one dispatch.
///
/// `array_lens` carries the resolved element count of every array binding and
/// `uniforms` the value of every non-constant uniform binding; both are keyed
/// by binding name. The resolver guarantees completeness before this runs.
pub fn pack_params(
    layout: &ParamsLayout,
    extent: [u32; 3],
    array_lens: &BTreeMap<String, u32>,
    uniforms: &BTreeMap<String, HostValue>,
) -> Vec<u8> {
    let mut bytes = vec![0u8; layout.size_bytes as usize];
    let mut write = |offset: u32, data: &[u8]| {
        let offset = offset as usize;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    };
    for field in &layout.fields {
        match &field.kind {
            ParamsFieldKind::Extent => {
                write(field.offset, bytemuck::bytes_of(&extent));
            }
            ParamsFieldKind::ArrayLen { binding } => {
                let len = array_lens.get(binding).copied().unwrap_or(0) as i32;
                write(field.offset, &len.to_le_bytes());
            }
            ParamsFieldKind::Uniform { binding, .. } => {
                if let Some(data) = uniforms.get(binding).and_then(HostValue::scalar_bytes) {
                    write(field.offset, &data);
                }
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_arrays_use_stride_16() {
        let v = HostValue::Vec3Array(vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let bytes = v.array_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        let back = HostValue::array_from_device_bytes(ElemType::Vec3, &bytes, 2);
        assert_eq!(back, v);
    }

    #[test]
    fn float_arrays_pack_tightly() {
        let v = HostValue::FloatArray(vec![1.0, 2.0, 3.0]);
        assert_eq!(v.array_bytes().unwrap().len(), 12);
    }

    #[test]
    fn readback_truncates_to_len() {
        let bytes = [0u8; 32];
        let back = HostValue::array_from_device_bytes(ElemType::Float, &bytes, 5);
        assert_eq!(back, HostValue::FloatArray(vec![0.0; 5]));
    }
}
