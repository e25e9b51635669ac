#![allow(unsafe_op_in_unsafe_fn)]

//! # Tessella: JIT autotuned GEMM kernels
//!
//! Tessella generates blocked matrix-multiply kernels at runtime, compiles
//! them through the active device backend, and caches the compiled kernel
//! per problem signature. The kernel is a template: its tiling, vectorization
//! and unrolling parameters live in a constrained tuning space and are baked
//! into the generated source on first use.
//!
//! ## Core Modules
//!
//! - **[`core`]**: problem descriptors, signatures, and the tunable-parameter
//!   space with its cross-parameter constraints.
//! - **[`emitter`]**: backend dialects (CUDA, Metal) and the tiled-GEMM
//!   source generator.
//! - **[`backend`]**: the device contexts that compile and launch kernels.
//! - **[`runtime`]**: the [`GemmEngine`] dispatcher tying it all together.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessella::backend::cuda::CudaContext;
//! use tessella::backend::DeviceContext;
//! use tessella::core::{AccumulatePrecision, PassthroughQuantizer};
//! use tessella::runtime::GemmEngine;
//!
//! # fn main() -> Result<(), tessella::TessellaError> {
//! let ctx = Arc::new(CudaContext::new(0)?);
//! let engine: GemmEngine<f32, f32> = GemmEngine::new(ctx.clone());
//!
//! let (m, n, k) = (1024, 1024, 1024);
//! let a = ctx.alloc(m * k * 4)?;
//! let b = ctx.alloc(k * n * 4)?;
//! let c = ctx.alloc(m * n * 4)?;
//!
//! let q = PassthroughQuantizer;
//! engine.gemm(
//!     false, false, m, n, k,
//!     1.0, a, b, 0.0, c,
//!     AccumulatePrecision::Native, &q, &q,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod core;
pub mod emitter;
pub mod error;
pub mod runtime;

pub use crate::backend::{BackendKind, BufferId, DeviceCaps, DeviceContext, KernelArg, KernelId};
pub use crate::core::{
    AccumulatePrecision, Elem, GemmProblem, KernelElement, PassthroughQuantizer, Quantizer,
    TuningSpace, TuningStore,
};
pub use crate::emitter::{GemmSourceGenerator, KernelDialect, TileDims};
pub use crate::error::TessellaError;
pub use crate::runtime::GemmEngine;
