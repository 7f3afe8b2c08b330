//! `ComputeBackend` implementation over a headless wgpu device.
//!
//! Only the WGSL dialect is executable here; GLSL output is intended for
//! external GL runtimes and is validated at the scheduler layer instead.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_intrusive::channel::shared::oneshot_channel;
use tracing::debug;

use crate::backend::{
    BackendError, BufferHandle, BufferSpec, BufferUse, ComputeBackend, DispatchCall, ProgramHandle,
};

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: HashMap<u64, wgpu::ComputePipeline>,
    buffers: HashMap<u64, wgpu::Buffer>,
    next_id: u64,
}

impl WgpuBackend {
    /// Negotiates an adapter and device without a surface.
    ///
    /// On Linux the GL backend is tried first to avoid crashes seen with some
    /// Vulkan software adapters (lavapipe/llvmpipe); if no GL adapter is
    /// available we fall back to the native backends.
    pub async fn new_headless() -> Result<Self, BackendError> {
        let adapter = if cfg!(target_os = "linux") {
            let gl_instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::GL,
                ..Default::default()
            });
            let adapter = gl_instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await;
            if adapter.is_some() {
                adapter
            } else {
                let primary_instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::PRIMARY,
                    ..Default::default()
                });
                primary_instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::HighPerformance,
                        compatible_surface: None,
                        force_fallback_adapter: false,
                    })
                    .await
            }
        } else {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
        }
        .ok_or(BackendError::NoAdapter)?;

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(BackendError::NoAdapter);
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("riffle wgpu backend"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|err| BackendError::Device(err.to_string()))?;

        debug!(adapter = %adapter.get_info().name, "wgpu backend ready");

        Ok(Self {
            device,
            queue,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&wgpu::Buffer, BackendError> {
        self.buffers.get(&handle.0).ok_or(BackendError::UnknownHandle {
            what: "buffer",
            id: handle.0,
        })
    }
}

#[async_trait]
impl ComputeBackend for WgpuBackend {
    async fn compile_program(
        &mut self,
        label: &str,
        shader_source: &str,
        entry_point: &str,
    ) -> Result<ProgramHandle, BackendError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(shader_source.into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });
        if let Some(err) = self.device.pop_error_scope().await {
            return Err(BackendError::Compile(err.to_string()));
        }
        let id = self.alloc_id();
        self.programs.insert(id, pipeline);
        Ok(ProgramHandle(id))
    }

    fn create_buffer(&mut self, spec: &BufferSpec) -> Result<BufferHandle, BackendError> {
        let usage = match spec.usage {
            BufferUse::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUse::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&spec.label),
            size: spec.size_bytes,
            usage,
            mapped_at_creation: false,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let target = self.buffer(buffer)?;
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    async fn dispatch(&mut self, call: &DispatchCall) -> Result<(), BackendError> {
        let pipeline =
            self.programs
                .get(&call.program.0)
                .ok_or(BackendError::UnknownHandle {
                    what: "program",
                    id: call.program.0,
                })?;
        let mut entries = Vec::with_capacity(call.bindings.len());
        for binding in &call.bindings {
            let buffer = self.buffer(binding.buffer)?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: buffer.as_entire_binding(),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("riffle dispatch"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("riffle dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("riffle dispatch"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                call.workgroups[0],
                call.workgroups[1],
                call.workgroups[2],
            );
        }
        self.queue.submit([encoder.finish()]);
        if let Some(err) = self.device.pop_error_scope().await {
            return Err(BackendError::Dispatch(err.to_string()));
        }
        Ok(())
    }

    async fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BackendError> {
        let source = self.buffer(buffer)?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("riffle readback"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("riffle readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size_bytes);
        self.queue.submit([encoder.finish()]);

        let slice = staging.slice(..size_bytes);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            sender.send(res).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .receive()
            .await
            .ok_or_else(|| BackendError::Readback("map_async sender dropped".into()))?
            .map_err(|err| BackendError::Readback(format!("map_async failed: {err:?}")))?;

        let mapped = slice.get_mapped_range();
        let out = mapped.to_vec();
        drop(mapped);
        staging.unmap();
        Ok(out)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(removed) = self.buffers.remove(&buffer.0) {
            removed.destroy();
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }
}
