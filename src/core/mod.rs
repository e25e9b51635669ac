//! Problem descriptors, tunable-parameter spaces, and element typing.
//!
//! - [`problem`]: the GEMM descriptor and its canonical signature.
//! - [`tuning`]: tunable-parameter declarations and cross-parameter
//!   constraints, independent of any search strategy.
//! - [`elem`]: source-level element tokens and the supported host types.
//! - [`cache`]: opt-in persistence for resolved assignments.

pub mod cache;
pub mod elem;
pub mod problem;
pub mod quantizer;
pub mod tuning;

pub use cache::TuningStore;
pub use elem::{AccumulatePrecision, Elem, KernelElement};
pub use problem::GemmProblem;
pub use quantizer::{PassthroughQuantizer, Quantizer};
pub use tuning::{Constraint, ParamKind, TunableParam, TuningSpace};
