use crate::backend::BackendKind;
use crate::core::elem::Elem;
use crate::emitter::{ArgMemory, KernelArgDecl, KernelDialect};

/// Metal Shading Language spellings. MSL vectors up to width 4 carry native
/// arithmetic, so generated code may keep whole-vector updates. MSL has no
/// 64-bit float; the Float64 token degrades to `float`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetalDialect;

/// Names of the id parameters appended to every kernel signature.
const LOCAL_ID_VAR: &str = "tpitg";
const GROUP_ID_VAR: &str = "tgpig";

impl MetalDialect {
    pub fn new() -> Self {
        Self
    }
}

impl KernelDialect for MetalDialect {
    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn setup(&self) -> String {
        concat!(
            "#include <metal_stdlib>\n",
            "\n",
            "using namespace metal;\n",
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
            Elem::Float64 => "float",
            Elem::Int8 => "char",
            Elem::Int16 => "short",
            Elem::Int32 => "int",
            Elem::Int64 => "long",
        }
    }

    fn vector_base_name(&self, elem: Elem) -> &'static str {
        self.type_name(elem)
    }

    fn vector_type_defs(&self, elem: Elem) -> String {
        let scalar = self.type_name(elem);
        let mut out = String::new();
        for width in [8usize, 16] {
            let name = self.vector_type_name(elem, width);
            let fields: Vec<String> = (0..width).map(|lane| format!("{scalar} s{lane};")).collect();
            out.push_str(&format!("typedef struct {{ {} }} {};\n", fields.join(" "), name));
        }
        out
    }

    fn pointer_cast(&self, ty: &str) -> String {
        format!("(thread {ty}*)")
    }

    fn local_id(&self, dim: usize) -> String {
        format!("{}.{}", LOCAL_ID_VAR, ["x", "y", "z"][dim])
    }

    fn group_id(&self, dim: usize) -> String {
        format!("{}.{}", GROUP_ID_VAR, ["x", "y", "z"][dim])
    }

    fn local_mem_decl(&self, ty: &str, decl: &str) -> String {
        format!("threadgroup {ty} {decl}")
    }

    fn local_barrier(&self) -> String {
        "threadgroup_barrier(mem_flags::mem_threadgroup)".to_string()
    }

    fn kernel_signature(&self, name: &str, args: &[KernelArgDecl]) -> String {
        let mut rendered: Vec<String> = args
            .iter()
            .enumerate()
            .map(|(slot, arg)| {
                let ty = self.type_name(arg.elem);
                match arg.memory {
                    ArgMemory::ScalarConst => {
                        format!("constant {ty}& {} [[buffer({slot})]]", arg.name)
                    }
                    ArgMemory::GlobalConst => {
                        format!("const device {ty}* {} [[buffer({slot})]]", arg.name)
                    }
                    ArgMemory::GlobalMut => {
                        format!("device {ty}* {} [[buffer({slot})]]", arg.name)
                    }
                }
            })
            .collect();
        rendered.push(format!(
            "uint3 {LOCAL_ID_VAR} [[thread_position_in_threadgroup]]"
        ));
        rendered.push(format!(
            "uint3 {GROUP_ID_VAR} [[threadgroup_position_in_grid]]"
        ));
        format!("kernel void {}({})", name, rendered.join(", "))
    }
}
