//! Precompiled kernel bundles: a JSON envelope carrying generated shader
//! source plus its `ShaderContext`, so a runtime can dispatch without the
//! compiler front end. A content digest catches edited or truncated bundles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compile::CompiledKernel;
use crate::context::ShaderContext;

pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed bundle: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported bundle format version {found} (expected {BUNDLE_FORMAT_VERSION})")]
    FormatVersion { found: u32 },
    #[error("bundle digest mismatch; the bundle was edited or corrupted")]
    DigestMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelBundle {
    pub format_version: u32,
    /// Hex blake3 of the name, shader source, and context.
    pub digest: String,
    pub name: String,
    pub shader_source: String,
    pub context: ShaderContext,
}

impl KernelBundle {
    pub fn new(kernel: &CompiledKernel) -> Result<Self, BundleError> {
        let digest = compute_digest(&kernel.name, &kernel.shader_source, &kernel.context)?;
        Ok(KernelBundle {
            format_version: BUNDLE_FORMAT_VERSION,
            digest,
            name: kernel.name.clone(),
            shader_source: kernel.shader_source.clone(),
            context: kernel.context.clone(),
        })
    }

    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and verify a bundle. Version and digest failures are reported
    /// before any field is trusted.
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        let bundle: KernelBundle = serde_json::from_str(json)?;
        bundle.verify()?;
        Ok(bundle)
    }

    pub fn verify(&self) -> Result<(), BundleError> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(BundleError::FormatVersion {
                found: self.format_version,
            });
        }
        let expected = compute_digest(&self.name, &self.shader_source, &self.context)?;
        if self.digest != expected {
            return Err(BundleError::DigestMismatch);
        }
        Ok(())
    }

    pub fn into_kernel(self) -> CompiledKernel {
        CompiledKernel {
            name: self.name,
            shader_source: self.shader_source,
            context: self.context,
        }
    }
}

fn compute_digest(
    name: &str,
    shader_source: &str,
    context: &ShaderContext,
) -> Result<String, BundleError> {
    let context_json = serde_json::to_vec(context)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(shader_source.as_bytes());
    hasher.update(&[0]);
    hasher.update(&context_json);
    Ok(hasher.finalize().to_hex().to_string())
}
