use serde::{Deserialize, Serialize};

/// Source-level element token. Each backend dialect maps a token to its own
/// type spelling (`Float32` is `float` everywhere, `Int64` is `long long` in
/// CUDA but `long` in MSL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Elem {
    Half,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
}

/// Internal accumulation width, decoupled from the input/output element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccumulatePrecision {
    /// Accumulate in the native input element type.
    Native,
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

impl AccumulatePrecision {
    /// Element the accumulator registers are declared with.
    pub fn accumulator_elem(self, native: Elem) -> Elem {
        match self {
            AccumulatePrecision::Native => native,
            AccumulatePrecision::Bits8 => Elem::Int8,
            AccumulatePrecision::Bits16 => Elem::Int16,
            AccumulatePrecision::Bits32 => Elem::Int32,
            AccumulatePrecision::Bits64 => Elem::Int64,
        }
    }

    /// Token contributed to the kernel signature; `Native` contributes none.
    pub fn signature_token(self) -> Option<&'static str> {
        match self {
            AccumulatePrecision::Native => None,
            AccumulatePrecision::Bits8 => Some("prec_8_"),
            AccumulatePrecision::Bits16 => Some("prec_16_"),
            AccumulatePrecision::Bits32 => Some("prec_32_"),
            AccumulatePrecision::Bits64 => Some("prec_64_"),
        }
    }
}

/// Host-side element types the engine can be instantiated over.
///
/// The engine is generic over an input and an output element; this trait ties
/// each supported Rust type to its source-level token and provides the
/// identity/zero scalars used to detect trivial alpha/beta terms.
pub trait KernelElement: bytemuck::Pod + PartialEq + Send + Sync + 'static {
    const ELEM: Elem;
    const ZERO: Self;
    const ONE: Self;
}

impl KernelElement for half::f16 {
    const ELEM: Elem = Elem::Half;
    const ZERO: Self = half::f16::ZERO;
    const ONE: Self = half::f16::ONE;
}

impl KernelElement for f32 {
    const ELEM: Elem = Elem::Float32;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
}

impl KernelElement for f64 {
    const ELEM: Elem = Elem::Float64;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
}

impl KernelElement for i8 {
    const ELEM: Elem = Elem::Int8;
    const ZERO: Self = 0;
    const ONE: Self = 1;
}

impl KernelElement for i32 {
    const ELEM: Elem = Elem::Int32;
    const ZERO: Self = 0;
    const ONE: Self = 1;
}
