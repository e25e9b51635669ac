use std::collections::HashMap;
use std::sync::Mutex;

use metal::{MTLResourceOptions, MTLSize};

use crate::backend::{BackendKind, BufferId, DeviceCaps, DeviceContext, KernelArg, KernelId};
use crate::emitter::KernelDialect;
use crate::emitter::MetalDialect;
use crate::error::{Result, TessellaError};

/// Metal device context: runtime MSL compilation into compute pipelines and
/// threadgroup dispatch.
pub struct MetalContext {
    device: metal::Device,
    queue: metal::CommandQueue,
    dialect: MetalDialect,
    caps: DeviceCaps,
    pipelines: Mutex<HashMap<KernelId, metal::ComputePipelineState>>,
    buffers: Mutex<HashMap<BufferId, metal::Buffer>>,
    next_kernel_id: Mutex<u64>,
    next_buffer_id: Mutex<u64>,
}

unsafe impl Send for MetalContext {}
unsafe impl Sync for MetalContext {}

impl MetalContext {
    pub fn new() -> Result<Self> {
        let device = metal::Device::system_default()
            .ok_or_else(|| TessellaError::Device("no Metal device available".to_string()))?;
        let queue = device.new_command_queue();

        let tg = device.max_threads_per_threadgroup();
        let caps = DeviceCaps {
            backend: BackendKind::Metal,
            max_workgroup_size: [tg.width as usize, tg.height as usize, tg.depth as usize],
            max_local_mem: device.max_threadgroup_memory_length() as usize,
            requires_vector_unroll: false,
        };

        log::info!("[Metal] device {} registered", device.name());

        Ok(Self {
            device,
            queue,
            dialect: MetalDialect::new(),
            caps,
            pipelines: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            next_kernel_id: Mutex::new(0),
            next_buffer_id: Mutex::new(0),
        })
    }

    pub fn synchronize(&self) {
        let cb = self.queue.new_command_buffer();
        cb.commit();
        cb.wait_until_completed();
    }

    fn next_kernel_id(&self) -> Result<KernelId> {
        let mut id = self.next_kernel_id.lock().map_err(|_| TessellaError::Poisoned)?;
        *id += 1;
        Ok(KernelId(*id))
    }

    fn next_buffer_id(&self) -> Result<BufferId> {
        let mut id = self.next_buffer_id.lock().map_err(|_| TessellaError::Poisoned)?;
        *id += 1;
        Ok(BufferId(*id))
    }
}

impl DeviceContext for MetalContext {
    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn capabilities(&self) -> DeviceCaps {
        self.caps.clone()
    }

    fn dialect(&self) -> &dyn KernelDialect {
        &self.dialect
    }

    fn alloc(&self, len: usize) -> Result<BufferId> {
        let buffer = self
            .device
            .new_buffer(len as u64, MTLResourceOptions::StorageModeShared);
        let id = self.next_buffer_id()?;
        self.buffers
            .lock()
            .map_err(|_| TessellaError::Poisoned)?
            .insert(id, buffer);
        Ok(id)
    }

    fn compile(&self, name: &str, source: &str) -> Result<KernelId> {
        let options = metal::CompileOptions::new();
        let library = self
            .device
            .new_library_with_source(source, &options)
            .map_err(|e| TessellaError::Compile {
                kernel: name.to_string(),
                log: e.to_string(),
            })?;
        let func = library
            .get_function(name, None)
            .map_err(|e| TessellaError::Compile {
                kernel: name.to_string(),
                log: format!("function not found: {e}"),
            })?;
        let pipeline = self
            .device
            .new_compute_pipeline_state_with_function(&func)
            .map_err(|e| TessellaError::Compile {
                kernel: name.to_string(),
                log: format!("pipeline creation failed: {e}"),
            })?;
        log::info!("[Metal] JIT compilation successful for {name}");

        let id = self.next_kernel_id()?;
        self.pipelines
            .lock()
            .map_err(|_| TessellaError::Poisoned)?
            .insert(id, pipeline);
        Ok(id)
    }

    fn launch(
        &self,
        kernel: KernelId,
        grid: (u32, u32, u32),
        local: (u32, u32, u32),
        args: &[KernelArg],
    ) -> Result<()> {
        let pipelines = self.pipelines.lock().map_err(|_| TessellaError::Poisoned)?;
        let pipeline = pipelines.get(&kernel).ok_or_else(|| TessellaError::Launch {
            kernel: format!("{kernel:?}"),
            reason: "unknown kernel id".to_string(),
        })?;

        let buffers = self.buffers.lock().map_err(|_| TessellaError::Poisoned)?;
        let cb = self.queue.new_command_buffer();
        let encoder = cb.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline);

        for (i, arg) in args.iter().enumerate() {
            match arg {
                KernelArg::Buffer(id) => {
                    let buffer = buffers.get(id).ok_or_else(|| TessellaError::Launch {
                        kernel: format!("{kernel:?}"),
                        reason: format!("unknown buffer {id:?}"),
                    })?;
                    encoder.set_buffer(i as u64, Some(buffer), 0);
                }
                KernelArg::Bytes(bytes) => {
                    encoder.set_bytes(i as u64, bytes.len() as u64, bytes.as_ptr() as *const _);
                }
            }
        }

        let group_count = MTLSize {
            width: grid.0 as u64,
            height: grid.1 as u64,
            depth: grid.2 as u64,
        };
        let group_size = MTLSize {
            width: local.0 as u64,
            height: local.1 as u64,
            depth: local.2 as u64,
        };
        encoder.dispatch_thread_groups(group_count, group_size);
        encoder.end_encoding();
        cb.commit();
        Ok(())
    }
}
