//! Execution layer for riffle kernels.
//!
//! Takes a compiled kernel plus host-side binding values, resolves them
//! against the kernel's pipeline layout, and drives an iterative dispatch
//! loop (with ping-pong double buffering and cancellation) over a
//! [`ComputeBackend`]. A headless wgpu backend is provided; tests use the
//! recording backend behind the `test-utils` feature.

pub mod backend;
pub mod resolve;
pub mod schedule;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod value;
pub mod wgpu_backend;

pub use backend::{
    BackendError, BufferHandle, BufferSpec, BufferUse, ComputeBackend, DispatchCall, ProgramHandle,
    SlotBinding,
};
pub use resolve::{extract_constants, resolve, ArrayPlan, BindingTable, ResolvedBindings};
pub use schedule::{
    CancelToken, ComputePipeline, DispatchDescriptor, PipelineError, PipelineState, RunOutcome,
    RunOutput, SchedulerError,
};
pub use value::{pack_params, HostValue};
pub use wgpu_backend::WgpuBackend;
