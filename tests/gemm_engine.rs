use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessella::backend::{
    BackendKind, BufferId, DeviceCaps, DeviceContext, KernelArg, KernelId,
};
use tessella::core::elem::AccumulatePrecision;
use tessella::core::quantizer::PassthroughQuantizer;
use tessella::emitter::{CudaDialect, KernelDialect};
use tessella::error::{Result, TessellaError};
use tessella::runtime::GemmEngine;

#[derive(Debug, Clone, PartialEq)]
enum BoundArg {
    Buffer(BufferId),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct LaunchRecord {
    kernel: KernelId,
    grid: (u32, u32, u32),
    local: (u32, u32, u32),
    args: Vec<BoundArg>,
}

/// Records every compile and launch instead of talking to a driver.
struct MockContext {
    dialect: CudaDialect,
    caps: DeviceCaps,
    compile_attempts: AtomicUsize,
    compiled_sources: Mutex<Vec<String>>,
    launches: Mutex<Vec<LaunchRecord>>,
    fail_next_compile: AtomicBool,
    next_kernel: AtomicU64,
    next_buffer: AtomicU64,
}

impl MockContext {
    fn new() -> Self {
        Self {
            dialect: CudaDialect,
            caps: DeviceCaps {
                backend: BackendKind::Cuda,
                max_workgroup_size: [1024, 1024, 64],
                max_local_mem: 49152,
                requires_vector_unroll: true,
            },
            compile_attempts: AtomicUsize::new(0),
            compiled_sources: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            fail_next_compile: AtomicBool::new(false),
            next_kernel: AtomicU64::new(0),
            next_buffer: AtomicU64::new(0),
        }
    }

    fn compiles(&self) -> usize {
        self.compiled_sources.lock().unwrap().len()
    }

    fn attempts(&self) -> usize {
        self.compile_attempts.load(Ordering::SeqCst)
    }

    fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }
}

impl DeviceContext for MockContext {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn capabilities(&self) -> DeviceCaps {
        self.caps.clone()
    }

    fn dialect(&self) -> &dyn KernelDialect {
        &self.dialect
    }

    fn alloc(&self, _len: usize) -> Result<BufferId> {
        Ok(BufferId(self.next_buffer.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn compile(&self, name: &str, source: &str) -> Result<KernelId> {
        self.compile_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_compile.swap(false, Ordering::SeqCst) {
            return Err(TessellaError::Compile {
                kernel: name.to_string(),
                log: "synthetic failure".to_string(),
            });
        }
        self.compiled_sources.lock().unwrap().push(source.to_string());
        Ok(KernelId(self.next_kernel.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn launch(
        &self,
        kernel: KernelId,
        grid: (u32, u32, u32),
        local: (u32, u32, u32),
        args: &[KernelArg],
    ) -> Result<()> {
        let args = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Buffer(id) => BoundArg::Buffer(*id),
                KernelArg::Bytes(bytes) => BoundArg::Bytes(bytes.clone()),
            })
            .collect();
        self.launches.lock().unwrap().push(LaunchRecord {
            kernel,
            grid,
            local,
            args,
        });
        Ok(())
    }
}

fn engine_with_mock() -> (Arc<MockContext>, GemmEngine<f32, f32>) {
    let ctx = Arc::new(MockContext::new());
    let engine = GemmEngine::new(ctx.clone() as Arc<dyn DeviceContext>);
    (ctx, engine)
}

fn buffers(ctx: &MockContext) -> (BufferId, BufferId, BufferId) {
    (
        ctx.alloc(0).unwrap(),
        ctx.alloc(0).unwrap(),
        ctx.alloc(0).unwrap(),
    )
}

const Q: PassthroughQuantizer = PassthroughQuantizer;

#[test]
fn same_signature_compiles_once() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    for _ in 0..3 {
        engine
            .gemm(
                false, false, 256, 256, 256, 1.0, a, b, 0.0, c,
                AccumulatePrecision::Native, &Q, &Q,
            )
            .unwrap();
    }
    assert_eq!(ctx.compiles(), 1);
    assert_eq!(ctx.launches().len(), 3);
    let kernels: Vec<KernelId> = ctx.launches().iter().map(|l| l.kernel).collect();
    assert!(kernels.iter().all(|k| *k == kernels[0]));
}

#[test]
fn different_shapes_are_different_kernels() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    engine
        .gemm(
            false, false, 256, 256, 256, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    engine
        .gemm(
            false, false, 256, 256, 512, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    assert_eq!(ctx.compiles(), 2);
}

#[test]
fn launch_geometry_rounds_up() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    // Defaults: WPTN = WPTM = 4, work-group 16x16, so each work-group covers
    // a 64x64 block of C.
    engine
        .gemm(
            false, false, 60, 100, 32, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    let launch = &ctx.launches()[0];
    assert_eq!(launch.grid, (2, 1, 1));
    assert_eq!(launch.local, (16, 16, 1));
}

#[test]
fn trivial_coefficients_bind_only_buffers() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    engine
        .gemm(
            false, false, 64, 64, 64, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    let launch = &ctx.launches()[0];
    assert_eq!(
        launch.args,
        vec![
            BoundArg::Buffer(a),
            BoundArg::Buffer(b),
            BoundArg::Buffer(c)
        ]
    );
}

#[test]
fn alpha_binds_first_and_beta_after_b() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);

    engine
        .gemm(
            false, false, 64, 64, 64, 2.5, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    let launch = &ctx.launches()[0];
    assert_eq!(
        launch.args,
        vec![
            BoundArg::Bytes(2.5f32.to_ne_bytes().to_vec()),
            BoundArg::Buffer(a),
            BoundArg::Buffer(b),
            BoundArg::Buffer(c)
        ]
    );

    engine
        .gemm(
            false, false, 64, 64, 64, 2.5, a, b, 0.5, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    let launch = &ctx.launches()[1];
    assert_eq!(
        launch.args,
        vec![
            BoundArg::Bytes(2.5f32.to_ne_bytes().to_vec()),
            BoundArg::Buffer(a),
            BoundArg::Buffer(b),
            BoundArg::Bytes(0.5f32.to_ne_bytes().to_vec()),
            BoundArg::Buffer(c)
        ]
    );
}

#[test]
fn failed_compile_leaves_the_entry_retryable() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    ctx.fail_next_compile.store(true, Ordering::SeqCst);

    let err = engine
        .gemm(
            false, false, 64, 64, 64, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap_err();
    assert!(matches!(err, TessellaError::Compile { .. }));
    assert_eq!(ctx.launches().len(), 0);

    // The entry stayed unready; the next call compiles again and succeeds.
    engine
        .gemm(
            false, false, 64, 64, 64, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    assert_eq!(ctx.attempts(), 2);
    assert_eq!(ctx.compiles(), 1);
    assert_eq!(ctx.launches().len(), 1);
}

#[test]
fn concurrent_first_use_compiles_exactly_once() {
    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            engine.gemm(
                false, false, 512, 512, 512, 1.0, a, b, 0.0, c,
                AccumulatePrecision::Native, &Q, &Q,
            )
        }));
    }
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(ctx.attempts(), 1);
    assert_eq!(ctx.compiles(), 1);
    assert_eq!(ctx.launches().len(), 2);
}

#[test]
fn stored_tuning_shapes_the_next_launch() {
    let dir = std::env::temp_dir().join("tessella_engine_tuning_test");
    let path = dir.join("tuning.json");
    let _ = std::fs::remove_dir_all(&dir);

    {
        let (ctx, engine) = engine_with_mock();
        let (a, b, c) = buffers(&ctx);
        engine
            .gemm(
                false, false, 256, 256, 256, 1.0, a, b, 0.0, c,
                AccumulatePrecision::Native, &Q, &Q,
            )
            .unwrap();
        engine.save_tuning_configs(&path).unwrap();
    }

    // Rewrite the stored assignment to a wider per-thread tile and check a
    // fresh engine honors it: WPTN = 8 doubles the columns per work-group.
    let store = tessella::core::cache::TuningStore::load(&path);
    let (key, mut assignment) = store
        .entries()
        .next()
        .map(|(k, v)| (k.clone(), v.clone()))
        .unwrap();
    assignment.insert("WPTN".to_string(), 8);
    let mut store = tessella::core::cache::TuningStore::default();
    store.set(key, assignment);
    store.save(&path).unwrap();

    let (ctx, engine) = engine_with_mock();
    let (a, b, c) = buffers(&ctx);
    assert_eq!(engine.load_tuning_configs(&path).unwrap(), 1);
    engine
        .gemm(
            false, false, 256, 256, 256, 1.0, a, b, 0.0, c,
            AccumulatePrecision::Native, &Q, &Q,
        )
        .unwrap();
    // 256 columns / (8 * 16) per group.
    assert_eq!(ctx.launches()[0].grid.0, 2);

    let _ = std::fs::remove_dir_all(&dir);
}
