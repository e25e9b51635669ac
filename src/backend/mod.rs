use serde::{Deserialize, Serialize};

use crate::emitter::KernelDialect;
use crate::error::Result;

pub mod cuda;
#[cfg(target_os = "macos")]
pub mod metal;

/// Compute backend family a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Cuda,
    Metal,
}

/// Device limits consumed by the parameter space and the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub backend: BackendKind,
    /// Per-dimension work-group extent limits.
    pub max_workgroup_size: [usize; 3],
    /// Local (shared/threadgroup) memory per work-group, in bytes.
    pub max_local_mem: usize,
    /// Whether the dialect's vector types lack native arithmetic, forcing
    /// the generator to write out every lane of a vector update.
    pub requires_vector_unroll: bool,
}

impl DeviceCaps {
    pub fn workgroup_size(&self, dim: usize) -> usize {
        self.max_workgroup_size.get(dim).copied().unwrap_or(1)
    }
}

/// Handle to one compiled kernel inside a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelId(pub u64);

/// Handle to one device-resident buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

/// Argument bound at launch time, in kernel-signature order.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    Buffer(BufferId),
    /// Scalar payload passed by value.
    Bytes(Vec<u8>),
}

impl KernelArg {
    pub fn scalar<T: bytemuck::Pod>(value: &T) -> Self {
        KernelArg::Bytes(bytemuck::bytes_of(value).to_vec())
    }
}

/// One accelerator as this engine sees it: a source dialect, capability
/// limits, a compiler, and a launcher. Implementations own whatever driver
/// state they need; all methods take `&self` and must be callable from
/// multiple threads.
pub trait DeviceContext: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> DeviceCaps;

    fn dialect(&self) -> &dyn KernelDialect;

    /// Allocate `len` bytes of device memory.
    fn alloc(&self, len: usize) -> Result<BufferId>;

    /// Compile `source` and register the kernel named `name`.
    fn compile(&self, name: &str, source: &str) -> Result<KernelId>;

    /// Enqueue one execution. `grid` counts work-groups per dimension,
    /// `local` the threads per work-group.
    fn launch(
        &self,
        kernel: KernelId,
        grid: (u32, u32, u32),
        local: (u32, u32, u32),
        args: &[KernelArg],
    ) -> Result<()>;
}
