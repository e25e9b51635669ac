use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::backend::{BufferId, DeviceContext, KernelArg, KernelId};
use crate::core::cache::TuningStore;
use crate::core::elem::{AccumulatePrecision, KernelElement};
use crate::core::problem::GemmProblem;
use crate::core::quantizer::Quantizer;
use crate::core::tuning::TuningSpace;
use crate::emitter::gemm::{init_gemm_space, GemmSourceGenerator, GEMM_KERNEL_NAME};
use crate::error::{Result, TessellaError};

/// One signature's state: its tuning space and, once compilation has
/// succeeded, the kernel handle. A `None` kernel means unready; a failed
/// compile leaves it `None` so the next call tries again.
struct CacheEntry {
    space: TuningSpace,
    kernel: Option<KernelId>,
}

#[derive(Default)]
struct ProgramCache {
    entries: HashMap<String, CacheEntry>,
    /// Assignments loaded from a tuning store, applied when the matching
    /// signature is first populated.
    presets: HashMap<String, BTreeMap<String, i64>>,
}

/// JIT GEMM dispatcher for one device, generic over the input (`MI`) and
/// output (`MO`) element types.
///
/// The first request for a signature populates a tuning space, generates
/// source, and compiles it; every later request reuses the compiled kernel.
/// Entries are never evicted. The entire compile-or-fetch-then-launch path is
/// serialized by one mutex, so at most one thread compiles at a time and
/// argument binding never interleaves with another dispatch.
pub struct GemmEngine<MI: KernelElement, MO: KernelElement> {
    ctx: Arc<dyn DeviceContext>,
    programs: Mutex<ProgramCache>,
    _elem: PhantomData<fn() -> (MI, MO)>,
}

impl<MI: KernelElement, MO: KernelElement> GemmEngine<MI, MO> {
    pub fn new(ctx: Arc<dyn DeviceContext>) -> Self {
        Self {
            ctx,
            programs: Mutex::new(ProgramCache::default()),
            _elem: PhantomData,
        }
    }

    /// `C = alpha * op(A) * op(B) + beta * C`.
    ///
    /// `a`, `b` and `c` must reference device buffers sized consistently with
    /// (`m`, `n`, `k`) and the transpose flags; the generated kernel guards
    /// tile edges, not caller-supplied buffer sizes. May compile on first use
    /// of a signature and always enqueues exactly one execution.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: MI,
        a: BufferId,
        b: BufferId,
        beta: MI,
        c: BufferId,
        precision: AccumulatePrecision,
        in_quantizer: &dyn Quantizer,
        out_quantizer: &dyn Quantizer,
    ) -> Result<()> {
        let alpha_term = alpha != MI::ONE;
        let beta_term = beta != MI::ZERO;
        let problem = GemmProblem {
            trans_a,
            trans_b,
            m,
            n,
            k,
            alpha_term,
            beta_term,
            precision,
            in_mode: in_quantizer.mode_string().to_string(),
            out_mode: out_quantizer.mode_string().to_string(),
        };
        let signature = problem.signature();

        let mut cache = self.programs.lock().map_err(|_| TessellaError::Poisoned)?;
        let caps = self.ctx.capabilities();

        let ProgramCache { entries, presets } = &mut *cache;
        let entry = entries.entry(signature.clone()).or_insert_with(|| CacheEntry {
            space: TuningSpace::new(),
            kernel: None,
        });

        if entry.space.is_empty() {
            init_gemm_space(&mut entry.space, &caps)?;
            if let Some(assignment) = presets.get(&signature) {
                let applied =
                    entry.space.apply_assignment(assignment).is_ok() && entry.space.validate();
                if applied {
                    log::info!("[Engine] applied stored tuning for {signature}");
                } else {
                    log::warn!("[Engine] stored tuning for {signature} is invalid, using defaults");
                    entry.space = TuningSpace::new();
                    init_gemm_space(&mut entry.space, &caps)?;
                }
            }
        }

        let kernel = match entry.kernel {
            Some(id) => {
                log::debug!("[Engine] cache hit for {signature}");
                id
            }
            None => {
                let generator = GemmSourceGenerator::new(
                    self.ctx.dialect(),
                    &problem,
                    &entry.space,
                    MI::ELEM,
                    MO::ELEM,
                )?;
                let source = generator.generate();
                log::info!("[Engine] compiling {signature}");
                let id = self.ctx.compile(GEMM_KERNEL_NAME, &source)?;
                entry.kernel = Some(id);
                id
            }
        };

        let (grid, local) = Self::launch_geometry(&entry.space, m, n)?;

        // Binding order mirrors the generated kernel signature: alpha and
        // beta only exist when their terms are non-trivial.
        let mut args: Vec<KernelArg> = Vec::with_capacity(5);
        if alpha_term {
            args.push(KernelArg::scalar(&alpha));
        }
        args.push(KernelArg::Buffer(a));
        args.push(KernelArg::Buffer(b));
        if beta_term {
            args.push(KernelArg::scalar(&beta));
        }
        args.push(KernelArg::Buffer(c));

        // Still holding the cache lock; submission is part of the serialized
        // section.
        self.ctx.launch(kernel, grid, local, &args)
    }

    /// Work-groups per dimension and threads per work-group for a problem:
    /// each work-group covers `WPTN * workgroup_size_0` columns and
    /// `WPTM * workgroup_size_1` rows of C, rounded up.
    fn launch_geometry(
        space: &TuningSpace,
        m: usize,
        n: usize,
    ) -> Result<((u32, u32, u32), (u32, u32, u32))> {
        let wptn = space.get_param("WPTN")?;
        let wptm = space.get_param("WPTM")?;
        let wgs0 = space.get_param("workgroup_size_0")?;
        let wgs1 = space.get_param("workgroup_size_1")?;
        let div_n = wptn * wgs0;
        let div_m = wptm * wgs1;
        let grid = (
            ((n as i64 - 1) / div_n + 1) as u32,
            ((m as i64 - 1) / div_m + 1) as u32,
            1,
        );
        let local = (wgs0 as u32, wgs1 as u32, 1);
        Ok((grid, local))
    }

    /// Stage assignments from a tuning store. Each applies when its signature
    /// is first populated; already-populated entries are left untouched.
    /// Returns how many assignments were staged.
    pub fn load_tuning_configs(&self, path: &Path) -> Result<usize> {
        let store = TuningStore::load(path);
        let mut cache = self.programs.lock().map_err(|_| TessellaError::Poisoned)?;
        let mut count = 0;
        for (signature, assignment) in store.entries() {
            cache
                .presets
                .insert(signature.clone(), assignment.clone());
            count += 1;
        }
        Ok(count)
    }

    /// Persist the resolved assignment of every populated entry.
    pub fn save_tuning_configs(&self, path: &Path) -> Result<()> {
        let cache = self.programs.lock().map_err(|_| TessellaError::Poisoned)?;
        let mut store = TuningStore::default();
        for (signature, entry) in &cache.entries {
            if !entry.space.is_empty() {
                store.set(signature.clone(), entry.space.assignment());
            }
        }
        store
            .save(path)
            .map_err(|e| TessellaError::Device(format!("failed to save tuning store: {e}")))
    }
}
