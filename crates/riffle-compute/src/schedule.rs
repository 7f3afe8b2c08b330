//! Iterative execution scheduler.
//!
//! A `ComputePipeline` owns a backend, compiles (or adopts) one kernel, and
//! runs it for a number of iterations over a dispatch extent. Read-write
//! array bindings ping-pong between two physical buffers: each iteration
//! reads the active buffer and writes the other, then the roles swap.
//! The stop predicate is observed at iteration boundaries, so outputs are
//! always a consistent snapshot. Cancellation is also observed at iteration
//! boundaries but discards the run: no outputs are read back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use riffle_kernel::{
    BindingError, CompileError, CompiledKernel, Dialect, KernelCache, WGSL_ENTRY_POINT,
};

use crate::backend::{
    BackendError, BufferHandle, BufferSpec, BufferUse, ComputeBackend, DispatchCall,
    ProgramHandle, SlotBinding,
};
use crate::resolve::{extract_constants, resolve, ArrayPlan, BindingTable, ResolvedBindings};
use crate::value::HostValue;

/// What one run should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchDescriptor {
    /// Number of kernel invocations per axis.
    pub extent: [u32; 3],
    /// Iteration count. `run` requires it to be positive; `run_until` treats
    /// zero as unbounded and relies on the predicate.
    pub iterations: u32,
}

impl DispatchDescriptor {
    pub fn linear(extent: u32, iterations: u32) -> Self {
        Self {
            extent: [extent, 1, 1],
            iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Compiling,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

/// Run configuration rejected before any device work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("run has no termination condition: zero iterations and no predicate")]
    NoTerminationCondition,
    #[error("dispatch extent {extent:?} contains a zero axis")]
    EmptyDispatch { extent: [u32; 3] },
    #[error("dispatch extent {extent:?} is not supported: {reason}")]
    UnsupportedExtent { extent: [u32; 3], reason: String },
    #[error("pipeline is not configurable in state {state:?}")]
    NotConfigurable { state: PipelineState },
    #[error("pipeline already finished in state {state:?}; create a new pipeline to run again")]
    AlreadyFinished { state: PipelineState },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("dispatch {iteration} failed: {source}")]
    DispatchFailed {
        iteration: u32,
        source: BackendError,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All requested iterations ran.
    Completed,
    /// The predicate ended the run early.
    Stopped,
    /// The cancel token ended the run at an iteration boundary.
    Cancelled,
}

/// Result of a finished run. Outputs are a consistent snapshot taken at the
/// final iteration boundary; cancelled runs carry no outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub outcome: RunOutcome,
    /// Iterations that actually dispatched.
    pub iterations: u32,
    /// Final contents of every writable array binding, keyed by name.
    pub outputs: BTreeMap<String, HostValue>,
}

/// Cooperative cancellation flag, observed between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

enum KernelSource {
    Dsl(String),
    Precompiled(CompiledKernel),
}

/// One kernel, one backend, one run.
pub struct ComputePipeline<B: ComputeBackend> {
    backend: B,
    source: KernelSource,
    dialect: Dialect,
    bindings: BindingTable,
    cache: KernelCache,
    state: PipelineState,
    cancel: CancelToken,
}

// No `B: Debug` bound: backends with opaque internals (recording fakes with
// closures) still format.
impl<B: ComputeBackend> fmt::Debug for ComputePipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("dialect", &self.dialect)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<B: ComputeBackend> ComputePipeline<B> {
    pub fn new(backend: B, source: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            backend,
            source: KernelSource::Dsl(source.into()),
            dialect,
            bindings: BindingTable::new(),
            cache: KernelCache::new(),
            state: PipelineState::Idle,
            cancel: CancelToken::default(),
        }
    }

    /// Adopt an already-compiled kernel (e.g. from a verified bundle),
    /// skipping the compiler front end.
    pub fn with_precompiled(backend: B, kernel: CompiledKernel) -> Self {
        let dialect = kernel.context.dialect;
        Self {
            backend,
            source: KernelSource::Precompiled(kernel),
            dialect,
            bindings: BindingTable::new(),
            cache: KernelCache::new(),
            state: PipelineState::Idle,
            cancel: CancelToken::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Supply a value for one binding. Only valid before the run starts.
    pub fn set_binding(
        &mut self,
        name: impl Into<String>,
        value: HostValue,
    ) -> Result<&mut Self, SchedulerError> {
        if self.state != PipelineState::Idle {
            return Err(SchedulerError::NotConfigurable { state: self.state });
        }
        self.bindings.insert(name.into(), value);
        Ok(self)
    }

    /// Run for the descriptor's full iteration count. The returned future
    /// resolves when the final outputs have been read back; awaiting it is
    /// the completion handoff.
    pub async fn run(&mut self, descriptor: &DispatchDescriptor) -> Result<RunOutput, PipelineError> {
        if descriptor.iterations == 0 {
            return Err(SchedulerError::NoTerminationCondition.into());
        }
        self.run_inner(descriptor, None).await
    }

    /// Run until `predicate` returns true, the iteration cap is reached, or
    /// the run is cancelled. The predicate receives the zero-based index of
    /// the iteration that just finished.
    pub async fn run_until(
        &mut self,
        descriptor: &DispatchDescriptor,
        mut predicate: impl FnMut(u32) -> bool,
    ) -> Result<RunOutput, PipelineError> {
        self.run_inner(descriptor, Some(&mut predicate)).await
    }

    async fn run_inner(
        &mut self,
        descriptor: &DispatchDescriptor,
        predicate: Option<&mut dyn FnMut(u32) -> bool>,
    ) -> Result<RunOutput, PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(SchedulerError::AlreadyFinished { state: self.state }.into());
        }
        let extent = descriptor.extent;
        if extent.contains(&0) {
            return Err(SchedulerError::EmptyDispatch { extent }.into());
        }
        if self.dialect == Dialect::Glsl100 && (extent[1] > 1 || extent[2] > 1) {
            return Err(SchedulerError::UnsupportedExtent {
                extent,
                reason: "the glsl100 target executes one-dimensional extents only".to_owned(),
            }
            .into());
        }

        let result = self.run_phases(descriptor, predicate).await;
        match &result {
            Ok(output) => {
                self.state = match output.outcome {
                    RunOutcome::Cancelled => PipelineState::Cancelled,
                    RunOutcome::Completed | RunOutcome::Stopped => PipelineState::Completed,
                };
            }
            Err(_) => self.state = PipelineState::Failed,
        }
        result
    }

    async fn run_phases(
        &mut self,
        descriptor: &DispatchDescriptor,
        predicate: Option<&mut dyn FnMut(u32) -> bool>,
    ) -> Result<RunOutput, PipelineError> {
        self.state = PipelineState::Compiling;
        let kernel = self.compiled_kernel()?;
        let resolved = resolve(&kernel.context, &self.bindings, descriptor.extent)?;
        self.state = PipelineState::Ready;
        debug!(
            kernel = %kernel.name,
            dialect = %kernel.context.dialect,
            extent = ?descriptor.extent,
            iterations = descriptor.iterations,
            arrays = resolved.arrays.len(),
            "starting run"
        );

        let mut resources = RunResources::default();
        let result = self
            .drive(&kernel, &resolved, descriptor, predicate, &mut resources)
            .await;
        resources.release(&mut self.backend);
        result
    }

    fn compiled_kernel(&mut self) -> Result<CompiledKernel, PipelineError> {
        match &self.source {
            KernelSource::Precompiled(kernel) => Ok(kernel.clone()),
            KernelSource::Dsl(text) => {
                let ast = riffle_kernel::parse(text).map_err(CompileError::from)?;
                let analysis =
                    riffle_kernel::analyze(&ast, self.dialect).map_err(CompileError::from)?;
                let constants = extract_constants(&analysis.context, &self.bindings)?;
                let lookup = self.cache.get_or_compile(text, self.dialect, &constants)?;
                Ok(lookup.kernel.clone())
            }
        }
    }

    async fn drive(
        &mut self,
        kernel: &CompiledKernel,
        resolved: &ResolvedBindings,
        descriptor: &DispatchDescriptor,
        mut predicate: Option<&mut dyn FnMut(u32) -> bool>,
        resources: &mut RunResources,
    ) -> Result<RunOutput, PipelineError> {
        let entry_point = match kernel.context.dialect {
            Dialect::Wgsl => WGSL_ENTRY_POINT,
            Dialect::Glsl450 | Dialect::Glsl100 => "main",
        };
        let program = self
            .backend
            .compile_program(&kernel.name, &kernel.shader_source, entry_point)
            .await?;
        resources.program = Some(program);

        let params = self.backend.create_buffer(&BufferSpec {
            label: format!("{}:params", kernel.name),
            usage: BufferUse::Uniform,
            size_bytes: resolved.params_bytes.len() as u64,
        })?;
        resources.buffers.push(params);
        self.backend.write_buffer(params, 0, &resolved.params_bytes)?;

        let mut arrays = Vec::with_capacity(resolved.arrays.len());
        for plan in &resolved.arrays {
            arrays.push(self.create_array_buffers(kernel, plan, resources)?);
        }

        self.state = PipelineState::Running;
        let wg = kernel.context.workgroup_size;
        let workgroups = [
            descriptor.extent[0].div_ceil(wg.x),
            descriptor.extent[1].div_ceil(wg.y),
            descriptor.extent[2].div_ceil(wg.z),
        ];

        let mut iterations = 0u32;
        let outcome = loop {
            if descriptor.iterations > 0 && iterations == descriptor.iterations {
                break RunOutcome::Completed;
            }
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }

            let call = build_call(program, params, resolved, &arrays, workgroups);
            trace!(iteration = iterations, "dispatch");
            self.backend
                .dispatch(&call)
                .await
                .map_err(|source| PipelineError::DispatchFailed {
                    iteration: iterations,
                    source,
                })?;
            for (plan, bufs) in resolved.arrays.iter().zip(arrays.iter_mut()) {
                if plan.double_buffered {
                    bufs.active ^= 1;
                }
            }
            iterations += 1;

            if let Some(p) = predicate.as_deref_mut() {
                if p(iterations - 1) {
                    break RunOutcome::Stopped;
                }
            }
        };

        let mut outputs = BTreeMap::new();
        if outcome == RunOutcome::Cancelled {
            // A cancelled run never performs the completion handoff; the
            // partial state is discarded with the buffers.
            debug!(iterations, "run cancelled");
            return Ok(RunOutput {
                outcome,
                iterations,
                outputs,
            });
        }
        for (plan, bufs) in resolved.arrays.iter().zip(arrays.iter()) {
            if !plan.is_output {
                continue;
            }
            // For double-buffered bindings the active buffer holds the most
            // recently written generation; single write buffers are index 0.
            let buffer = if plan.double_buffered {
                bufs.handles[bufs.active]
            } else {
                bufs.handles[bufs.handles.len() - 1]
            };
            let bytes = self.backend.read_buffer(buffer, plan.size_bytes()).await?;
            outputs.insert(
                plan.name.clone(),
                HostValue::array_from_device_bytes(plan.elem, &bytes, plan.len as usize),
            );
        }
        debug!(?outcome, iterations, outputs = outputs.len(), "run finished");

        Ok(RunOutput {
            outcome,
            iterations,
            outputs,
        })
    }

    fn create_array_buffers(
        &mut self,
        kernel: &CompiledKernel,
        plan: &ArrayPlan,
        resources: &mut RunResources,
    ) -> Result<ArrayBuffers, PipelineError> {
        let count = if plan.double_buffered { 2 } else { 1 };
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let buffer = self.backend.create_buffer(&BufferSpec {
                label: format!("{}:{}:{i}", kernel.name, plan.name),
                usage: BufferUse::Storage,
                size_bytes: plan.size_bytes(),
            })?;
            resources.buffers.push(buffer);
            if let Some(initial) = &plan.initial {
                // Both generations start from the seed so the first iteration
                // reads well-defined data no matter which buffer it lands on.
                self.backend.write_buffer(buffer, 0, initial)?;
            }
            handles.push(buffer);
        }
        Ok(ArrayBuffers { handles, active: 0 })
    }
}

/// Physical buffers of one array binding during a run.
struct ArrayBuffers {
    handles: Vec<BufferHandle>,
    /// Index of the buffer holding the current readable generation.
    active: usize,
}

fn build_call(
    program: ProgramHandle,
    params: BufferHandle,
    resolved: &ResolvedBindings,
    arrays: &[ArrayBuffers],
    workgroups: [u32; 3],
) -> DispatchCall {
    let mut bindings = vec![SlotBinding {
        slot: 0,
        buffer: params,
    }];
    for (plan, bufs) in resolved.arrays.iter().zip(arrays.iter()) {
        if let Some(slot) = plan.read_slot {
            bindings.push(SlotBinding {
                slot,
                buffer: bufs.handles[bufs.active],
            });
        }
        if let Some(slot) = plan.write_slot {
            let buffer = if plan.double_buffered {
                bufs.handles[bufs.active ^ 1]
            } else {
                bufs.handles[bufs.handles.len() - 1]
            };
            bindings.push(SlotBinding { slot, buffer });
        }
    }
    bindings.sort_by_key(|b| b.slot);
    DispatchCall {
        program,
        bindings,
        workgroups,
    }
}

/// Device handles created for one run; released on every exit path.
#[derive(Default)]
struct RunResources {
    program: Option<ProgramHandle>,
    buffers: Vec<BufferHandle>,
}

impl RunResources {
    fn release<B: ComputeBackend>(&mut self, backend: &mut B) {
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        if let Some(program) = self.program.take() {
            backend.destroy_program(program);
        }
    }
}
