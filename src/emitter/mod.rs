//! Source-text emission: the backend dialects and the GEMM generator.
//!
//! Dialects are pure text mappers; nothing here talks to a driver. The
//! generator walks the tiled-GEMM structure once and asks the active dialect
//! for every backend-specific spelling (ids, barriers, memory spaces, type
//! names), so the same generation path serves every backend.

pub mod cuda;
pub mod gemm;
pub mod metal;

pub use cuda::CudaDialect;
pub use gemm::{init_gemm_space, GemmSourceGenerator, TileDims, GEMM_KERNEL_NAME};
pub use metal::MetalDialect;

use crate::backend::BackendKind;
use crate::core::elem::Elem;

/// Where a kernel argument lives and how it may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMemory {
    /// By-value scalar.
    ScalarConst,
    /// Read-only global pointer, restrict-qualified.
    GlobalConst,
    /// Read-write global pointer, restrict-qualified.
    GlobalMut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArgDecl {
    pub name: String,
    pub elem: Elem,
    pub memory: ArgMemory,
}

impl KernelArgDecl {
    pub fn scalar(name: &str, elem: Elem) -> Self {
        Self {
            name: name.to_string(),
            elem,
            memory: ArgMemory::ScalarConst,
        }
    }

    pub fn global_const(name: &str, elem: Elem) -> Self {
        Self {
            name: name.to_string(),
            elem,
            memory: ArgMemory::GlobalConst,
        }
    }

    pub fn global_mut(name: &str, elem: Elem) -> Self {
        Self {
            name: name.to_string(),
            elem,
            memory: ArgMemory::GlobalMut,
        }
    }
}

/// Backend-specific spellings of the neutral source fragments the generator
/// needs. Implementations are stateless unit structs.
pub trait KernelDialect: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Preamble: includes and the `int_tp` index typedefs.
    fn setup(&self) -> String;

    /// Scalar type spelling.
    fn type_name(&self, elem: Elem) -> &'static str;

    /// Base name vector spellings are built from (`longlong4`, not
    /// `long long4`).
    fn vector_base_name(&self, elem: Elem) -> &'static str;

    fn vector_type_name(&self, elem: Elem, width: usize) -> String {
        if width <= 1 {
            self.type_name(elem).to_string()
        } else {
            format!("{}{}", self.vector_base_name(elem), width)
        }
    }

    /// Typedefs for the vector widths the dialect has no native type for.
    fn vector_type_defs(&self, elem: Elem) -> String;

    /// Lane accessor on a vector variable of the given width.
    fn vector_lane(&self, var: &str, width: usize, lane: usize) -> String {
        match width {
            0 | 1 => var.to_string(),
            2..=4 => format!("{}.{}", var, ["x", "y", "z", "w"][lane]),
            _ => format!("{}.s{}", var, lane),
        }
    }

    /// Cast prefix for reinterpreting a register block through an element
    /// pointer (address-space qualified where the dialect needs it).
    fn pointer_cast(&self, ty: &str) -> String;

    fn local_id(&self, dim: usize) -> String;

    fn group_id(&self, dim: usize) -> String;

    /// Local (shared/threadgroup) memory declaration, without trailing `;`.
    fn local_mem_decl(&self, ty: &str, decl: &str) -> String;

    /// Work-group-wide memory barrier statement, without trailing `;`.
    fn local_barrier(&self) -> String;

    /// Kernel signature up to (excluding) the opening brace.
    fn kernel_signature(&self, name: &str, args: &[KernelArgDecl]) -> String;
}

/// Line-oriented accumulator for generated source. Tracks brace depth so
/// emitted kernels stay readable when dumped for debugging.
#[derive(Debug, Default)]
pub struct SourceBuilder {
    out: String,
    indent: usize,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append preformatted text verbatim.
    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn line(&mut self, line: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(line);
        self.out.push('\n');
    }

    /// `head {` and one level deeper.
    pub fn open(&mut self, head: &str) {
        if head.is_empty() {
            self.line("{");
        } else {
            self.line(&format!("{head} {{"));
        }
        self.indent += 1;
    }

    pub fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }

    pub fn close_note(&mut self, note: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("}} // {note}"));
    }

    pub fn finish(self) -> String {
        self.out
    }
}
