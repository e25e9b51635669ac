use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::io::Write;
use std::sync::{Arc, Mutex};

use cudarc::driver::sys::CUdevice_attribute::*;
use cudarc::driver::sys::{CUdeviceptr, CUfunction, CUmodule, CUresult};
use cudarc::driver::CudaDevice;

use crate::backend::{BackendKind, BufferId, DeviceCaps, DeviceContext, KernelArg, KernelId};
use crate::emitter::CudaDialect;
use crate::emitter::KernelDialect;
use crate::error::{Result, TessellaError};

const MAX_KERNEL_ARGS: usize = 16;

#[derive(Debug)]
pub struct CudaModule(pub CUmodule);

impl Drop for CudaModule {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe {
                let res = cudarc::driver::sys::lib().cuModuleUnload(self.0);
                if res != CUresult::CUDA_SUCCESS {
                    log::warn!("[Cuda] failed to unload module: {res:?}");
                }
            }
        }
    }
}

unsafe impl Send for CudaModule {}
unsafe impl Sync for CudaModule {}

#[derive(Debug, Clone, Copy)]
pub struct CudaFunction(pub CUfunction);

unsafe impl Send for CudaFunction {}
unsafe impl Sync for CudaFunction {}

#[derive(Debug)]
struct LoadedKernel {
    name: String,
    func: CudaFunction,
    _module: Arc<CudaModule>,
}

/// CUDA device context: NVRTC source compilation plus driver-API module
/// loading and kernel launches.
pub struct CudaContext {
    device: Arc<CudaDevice>,
    dialect: CudaDialect,
    arch: &'static str,
    caps: DeviceCaps,
    kernels: Mutex<HashMap<KernelId, LoadedKernel>>,
    buffers: Mutex<HashMap<BufferId, CUdeviceptr>>,
    next_kernel_id: Mutex<u64>,
    next_buffer_id: Mutex<u64>,
}

impl CudaContext {
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)
            .map_err(|e| TessellaError::Device(format!("CUDA init failed: {e}")))?;

        let attr = |attribute, fallback| device.attribute(attribute).unwrap_or(fallback) as usize;
        let major = attr(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR, 8);
        let minor = attr(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR, 0);
        // NVRTC wants a 'static arch string; leaked once per context.
        let arch: &'static str = Box::leak(format!("sm_{major}{minor}").into_boxed_str());

        let caps = DeviceCaps {
            backend: BackendKind::Cuda,
            max_workgroup_size: [
                attr(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X, 1024),
                attr(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y, 1024),
                attr(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z, 64),
            ],
            max_local_mem: attr(CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK, 49152),
            requires_vector_unroll: true,
        };

        log::info!(
            "[Cuda] device {} registered ({arch})",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        Ok(Self {
            device,
            dialect: CudaDialect::new(),
            arch,
            caps,
            kernels: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            next_kernel_id: Mutex::new(0),
            next_buffer_id: Mutex::new(0),
        })
    }

    pub fn synchronize(&self) -> Result<()> {
        self.device
            .synchronize()
            .map_err(|e| TessellaError::Device(format!("synchronize failed: {e}")))
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

impl DeviceContext for CudaContext {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn capabilities(&self) -> DeviceCaps {
        self.caps.clone()
    }

    fn dialect(&self) -> &dyn KernelDialect {
        &self.dialect
    }

    fn alloc(&self, len: usize) -> Result<BufferId> {
        let mut dptr: CUdeviceptr = 0;
        unsafe {
            let res = cudarc::driver::sys::lib().cuMemAlloc_v2(&mut dptr, len);
            if res != CUresult::CUDA_SUCCESS {
                return Err(TessellaError::Device(format!(
                    "cuMemAlloc of {len} bytes failed: {res:?}"
                )));
            }
        }
        let id = self.next_buffer_id()?;
        self.buffers
            .lock()
            .map_err(|_| TessellaError::Poisoned)?
            .insert(id, dptr);
        Ok(id)
    }

    fn compile(&self, name: &str, source: &str) -> Result<KernelId> {
        let opts = cudarc::nvrtc::CompileOptions {
            arch: Some(self.arch),
            ..Default::default()
        };

        let ptx = match cudarc::nvrtc::compile_ptx_with_opts(source, opts) {
            Ok(ptx) => ptx,
            Err(e) => {
                // Best-effort dump so a broken configuration can be inspected.
                let dump = std::env::temp_dir().join("tessella_failed.cu");
                if let Ok(mut f) = std::fs::File::create(&dump) {
                    let _ = f.write_all(source.as_bytes());
                }
                return Err(TessellaError::Compile {
                    kernel: name.to_string(),
                    log: format!("{e:?}"),
                });
            }
        };
        log::info!("[Cuda] JIT compilation successful for {name}");

        unsafe {
            let lib = cudarc::driver::sys::lib();
            let mut module: CUmodule = std::ptr::null_mut();
            let ptx_c = CString::new(ptx.to_src()).map_err(|e| TessellaError::Compile {
                kernel: name.to_string(),
                log: format!("PTX contained NUL: {e}"),
            })?;
            let res = lib.cuModuleLoadData(&mut module, ptx_c.as_ptr() as *const _);
            if res != CUresult::CUDA_SUCCESS {
                return Err(TessellaError::Compile {
                    kernel: name.to_string(),
                    log: format!("driver JIT failed: {res:?}"),
                });
            }

            let mut func: CUfunction = std::ptr::null_mut();
            let name_c = CString::new(name).map_err(|e| TessellaError::Compile {
                kernel: name.to_string(),
                log: format!("bad kernel name: {e}"),
            })?;
            let res = lib.cuModuleGetFunction(&mut func, module, name_c.as_ptr());
            if res != CUresult::CUDA_SUCCESS {
                return Err(TessellaError::Compile {
                    kernel: name.to_string(),
                    log: format!("function not found: {res:?}"),
                });
            }

            let id = self.next_kernel_id()?;
            self.kernels
                .lock()
                .map_err(|_| TessellaError::Poisoned)?
                .insert(
                    id,
                    LoadedKernel {
                        name: name.to_string(),
                        func: CudaFunction(func),
                        _module: Arc::new(CudaModule(module)),
                    },
                );
            Ok(id)
        }
    }

    fn launch(
        &self,
        kernel: KernelId,
        grid: (u32, u32, u32),
        local: (u32, u32, u32),
        args: &[KernelArg],
    ) -> Result<()> {
        let kernels = self.kernels.lock().map_err(|_| TessellaError::Poisoned)?;
        let loaded = kernels.get(&kernel).ok_or_else(|| TessellaError::Launch {
            kernel: format!("{kernel:?}"),
            reason: "unknown kernel id".to_string(),
        })?;

        if args.len() > MAX_KERNEL_ARGS {
            return Err(TessellaError::Launch {
                kernel: loaded.name.clone(),
                reason: format!("too many kernel arguments ({})", args.len()),
            });
        }

        let buffers = self.buffers.lock().map_err(|_| TessellaError::Poisoned)?;
        let mut arg_store = [0u64; MAX_KERNEL_ARGS];
        let mut params = [std::ptr::null_mut::<c_void>(); MAX_KERNEL_ARGS];
        for (i, arg) in args.iter().enumerate() {
            match arg {
                KernelArg::Buffer(id) => {
                    let dptr = buffers.get(id).ok_or_else(|| TessellaError::Launch {
                        kernel: loaded.name.clone(),
                        reason: format!("unknown buffer {id:?}"),
                    })?;
                    arg_store[i] = *dptr;
                    params[i] = &mut arg_store[i] as *mut u64 as *mut c_void;
                }
                KernelArg::Bytes(bytes) => {
                    params[i] = bytes.as_ptr() as *mut c_void;
                }
            }
        }

        unsafe {
            let res = cudarc::driver::sys::lib().cuLaunchKernel(
                loaded.func.0,
                grid.0,
                grid.1,
                grid.2,
                local.0,
                local.1,
                local.2,
                0,
                std::ptr::null_mut(),
                params.as_ptr() as *mut *mut c_void,
                std::ptr::null_mut(),
            );
            if res != CUresult::CUDA_SUCCESS {
                return Err(TessellaError::Launch {
                    kernel: loaded.name.clone(),
                    reason: format!("{res:?}"),
                });
            }
        }
        Ok(())
    }
}
