//! Backend abstraction the scheduler drives.
//!
//! A backend owns device objects behind opaque `u64` handles so the scheduler
//! stays free of GPU types and tests can substitute a recording backend.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUse {
    /// Params block; written by the host, read by shaders.
    Uniform,
    /// Array binding storage; dispatch reads/writes, host seeds and reads
    /// back.
    Storage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferSpec {
    pub label: String,
    pub usage: BufferUse,
    pub size_bytes: u64,
}

/// One bound buffer of a dispatch. Slot numbers come from the kernel's
/// `PipelineLayout`; slot 0 is always the params block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    pub slot: u32,
    pub buffer: BufferHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCall {
    pub program: ProgramHandle,
    pub bindings: Vec<SlotBinding>,
    pub workgroups: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("device request failed: {0}")]
    Device(String),
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("unknown {what} handle {id}")]
    UnknownHandle { what: &'static str, id: u64 },
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    #[error("buffer readback failed: {0}")]
    Readback(String),
}

/// Device operations the scheduler needs. Program compilation and dispatch
/// are async because real devices report validation errors and completion
/// asynchronously.
#[async_trait]
pub trait ComputeBackend: Send {
    async fn compile_program(
        &mut self,
        label: &str,
        shader_source: &str,
        entry_point: &str,
    ) -> Result<ProgramHandle, BackendError>;

    fn create_buffer(&mut self, spec: &BufferSpec) -> Result<BufferHandle, BackendError>;

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    async fn dispatch(&mut self, call: &DispatchCall) -> Result<(), BackendError>;

    async fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_program(&mut self, program: ProgramHandle);
}
