use crate::backend::BackendKind;
use crate::core::elem::Elem;
use crate::emitter::{ArgMemory, KernelArgDecl, KernelDialect};

/// CUDA C++ spellings. Vector structs carry no operator arithmetic, so every
/// vector update in generated code must be written lane by lane.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaDialect;

impl CudaDialect {
    pub fn new() -> Self {
        Self
    }

    /// Widths with a builtin CUDA vector type.
    fn native_widths(elem: Elem) -> &'static [usize] {
        match elem {
            Elem::Half => &[2],
            _ => &[2, 3, 4],
        }
    }
}

impl KernelDialect for CudaDialect {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn setup(&self) -> String {
        concat!(
            "#include <cuda_fp16.h>\n",
            "\n",
            "typedef int int_tp;\n",
            "typedef unsigned int uint_tp;\n",
        )
        .to_string()
    }

    fn type_name(&self, elem: Elem) -> &'static str {
        match elem {
            Elem::Half => "half",
            Elem::Float32 => "float",
            Elem::Float64 => "double",
            Elem::Int8 => "char",
            Elem::Int16 => "short",
            Elem::Int32 => "int",
            Elem::Int64 => "long long",
        }
    }

    fn vector_base_name(&self, elem: Elem) -> &'static str {
        match elem {
            Elem::Half => "half",
            Elem::Float32 => "float",
            Elem::Float64 => "double",
            Elem::Int8 => "char",
            Elem::Int16 => "short",
            Elem::Int32 => "int",
            Elem::Int64 => "longlong",
        }
    }

    fn vector_type_defs(&self, elem: Elem) -> String {
        let scalar = self.type_name(elem);
        let native = Self::native_widths(elem);
        let mut out = String::new();
        for width in [2usize, 4, 8, 16] {
            if native.contains(&width) {
                continue;
            }
            let name = self.vector_type_name(elem, width);
            let fields: Vec<String> = (0..width)
                .map(|lane| {
                    let var = self.vector_lane("", width, lane);
                    format!("{scalar} {};", var.trim_start_matches('.'))
                })
                .collect();
            out.push_str(&format!("typedef struct {{ {} }} {};\n", fields.join(" "), name));
        }
        out
    }

    fn pointer_cast(&self, ty: &str) -> String {
        format!("({ty}*)")
    }

    fn local_id(&self, dim: usize) -> String {
        ["threadIdx.x", "threadIdx.y", "threadIdx.z"][dim].to_string()
    }

    fn group_id(&self, dim: usize) -> String {
        ["blockIdx.x", "blockIdx.y", "blockIdx.z"][dim].to_string()
    }

    fn local_mem_decl(&self, ty: &str, decl: &str) -> String {
        format!("__shared__ {ty} {decl}")
    }

    fn local_barrier(&self) -> String {
        "__syncthreads()".to_string()
    }

    fn kernel_signature(&self, name: &str, args: &[KernelArgDecl]) -> String {
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| {
                let ty = self.type_name(arg.elem);
                match arg.memory {
                    ArgMemory::ScalarConst => format!("const {ty} {}", arg.name),
                    ArgMemory::GlobalConst => {
                        format!("const {ty}* __restrict__ {}", arg.name)
                    }
                    ArgMemory::GlobalMut => format!("{ty}* __restrict__ {}", arg.name),
                }
            })
            .collect();
        format!(
            "extern \"C\" __global__ void {}({})",
            name,
            rendered.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_needs_a_four_wide_struct() {
        let defs = CudaDialect.vector_type_defs(Elem::Half);
        assert!(defs.contains("typedef struct { half x; half y; half z; half w; } half4;"));
        assert!(defs.contains("half8"));
    }

    #[test]
    fn float_only_defines_wide_structs() {
        let defs = CudaDialect.vector_type_defs(Elem::Float32);
        assert!(!defs.contains("float4;"));
        assert!(defs.contains("float s0;"));
        assert!(defs.contains("float16;"));
    }

    #[test]
    fn signature_qualifies_pointers() {
        let args = [
            KernelArgDecl::scalar("alpha", Elem::Float32),
            KernelArgDecl::global_const("A", Elem::Float32),
            KernelArgDecl::global_mut("C", Elem::Float32),
        ];
        assert_eq!(
            CudaDialect.kernel_signature("gemm", &args),
            "extern \"C\" __global__ void gemm(const float alpha, \
             const float* __restrict__ A, float* __restrict__ C)"
        );
    }
}
