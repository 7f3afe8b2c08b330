//! Recording backend for scheduler tests.
//!
//! `TraceBackend` keeps byte-accurate buffer contents in host memory and logs
//! every call, so tests can assert on dispatch ordering, slot wiring and
//! cleanup without a GPU. A dispatch simulator hook lets tests emulate what a
//! kernel would write.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::backend::{
    BackendError, BufferHandle, BufferSpec, BufferUse, ComputeBackend, DispatchCall, ProgramHandle,
    SlotBinding,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TraceCall {
    CompileProgram {
        label: String,
        entry_point: String,
    },
    CreateBuffer {
        label: String,
        usage: BufferUse,
        size_bytes: u64,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    Dispatch {
        program: ProgramHandle,
        bindings: Vec<SlotBinding>,
        workgroups: [u32; 3],
    },
    ReadBuffer {
        buffer: BufferHandle,
        size_bytes: u64,
    },
    DestroyBuffer(BufferHandle),
    DestroyProgram(ProgramHandle),
}

type DispatchSim = Box<dyn FnMut(&DispatchCall, &mut HashMap<u64, Vec<u8>>) + Send>;

#[derive(Default)]
pub struct TraceBackend {
    pub calls: Vec<TraceCall>,
    buffers: HashMap<u64, Vec<u8>>,
    programs: HashMap<u64, String>,
    next_id: u64,
    dispatch_sim: Option<DispatchSim>,
    fail_next_compile: Option<String>,
    fail_dispatch_at: Option<u32>,
    dispatches_seen: u32,
}

impl TraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `sim` after logging each dispatch, with mutable access to the
    /// raw buffer contents keyed by handle id.
    pub fn set_dispatch_sim(
        &mut self,
        sim: impl FnMut(&DispatchCall, &mut HashMap<u64, Vec<u8>>) + Send + 'static,
    ) {
        self.dispatch_sim = Some(Box::new(sim));
    }

    pub fn fail_next_compile(&mut self, message: &str) {
        self.fail_next_compile = Some(message.to_owned());
    }

    /// Fails the `n`-th dispatch (zero-based).
    pub fn fail_dispatch_at(&mut self, n: u32) {
        self.fail_dispatch_at = Some(n);
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    pub fn dispatches(&self) -> impl Iterator<Item = &TraceCall> {
        self.calls
            .iter()
            .filter(|c| matches!(c, TraceCall::Dispatch { .. }))
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[async_trait]
impl ComputeBackend for TraceBackend {
    async fn compile_program(
        &mut self,
        label: &str,
        shader_source: &str,
        entry_point: &str,
    ) -> Result<ProgramHandle, BackendError> {
        self.calls.push(TraceCall::CompileProgram {
            label: label.to_owned(),
            entry_point: entry_point.to_owned(),
        });
        if let Some(message) = self.fail_next_compile.take() {
            return Err(BackendError::Compile(message));
        }
        let id = self.alloc_id();
        self.programs.insert(id, shader_source.to_owned());
        Ok(ProgramHandle(id))
    }

    fn create_buffer(&mut self, spec: &BufferSpec) -> Result<BufferHandle, BackendError> {
        self.calls.push(TraceCall::CreateBuffer {
            label: spec.label.clone(),
            usage: spec.usage,
            size_bytes: spec.size_bytes,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, vec![0; spec.size_bytes as usize]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.calls.push(TraceCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle {
                what: "buffer",
                id: buffer.0,
            })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > target.len() {
            return Err(BackendError::Dispatch(format!(
                "write of {}..{} past end of {}-byte buffer",
                start,
                end,
                target.len()
            )));
        }
        target[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn dispatch(&mut self, call: &DispatchCall) -> Result<(), BackendError> {
        self.calls.push(TraceCall::Dispatch {
            program: call.program,
            bindings: call.bindings.clone(),
            workgroups: call.workgroups,
        });
        let index = self.dispatches_seen;
        self.dispatches_seen += 1;
        if self.fail_dispatch_at == Some(index) {
            return Err(BackendError::Dispatch(format!(
                "simulated failure at dispatch {index}"
            )));
        }
        if !self.programs.contains_key(&call.program.0) {
            return Err(BackendError::UnknownHandle {
                what: "program",
                id: call.program.0,
            });
        }
        for binding in &call.bindings {
            if !self.buffers.contains_key(&binding.buffer.0) {
                return Err(BackendError::UnknownHandle {
                    what: "buffer",
                    id: binding.buffer.0,
                });
            }
        }
        if let Some(sim) = self.dispatch_sim.as_mut() {
            sim(call, &mut self.buffers);
        }
        Ok(())
    }

    async fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BackendError> {
        self.calls.push(TraceCall::ReadBuffer { buffer, size_bytes });
        let source = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownHandle {
                what: "buffer",
                id: buffer.0,
            })?;
        let len = (size_bytes as usize).min(source.len());
        Ok(source[..len].to_vec())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.calls.push(TraceCall::DestroyBuffer(buffer));
        self.buffers.remove(&buffer.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.calls.push(TraceCall::DestroyProgram(program));
        self.programs.remove(&program.0);
    }
}
