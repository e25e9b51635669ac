use crate::backend::DeviceCaps;
use crate::core::elem::{AccumulatePrecision, Elem};
use crate::core::problem::GemmProblem;
use crate::core::tuning::TuningSpace;
use crate::emitter::{KernelArgDecl, KernelDialect, SourceBuilder};
use crate::error::Result;

pub const GEMM_KERNEL_NAME: &str = "tessella_gemm";

/// Declare the blocked-GEMM tunables and their constraints for one device.
///
/// Work-group extents are set-valued over every multiple of 4 below the
/// device limit for that dimension. The divisibility constraints keep the
/// cooperative tile loads exact: each thread stages a whole number of
/// elements per outer step.
pub fn init_gemm_space(space: &mut TuningSpace, caps: &DeviceCaps) -> Result<()> {
    for dim in 0..2 {
        let limit = caps.workgroup_size(dim) as i64;
        let candidates: Vec<i64> = (0..limit).step_by(4).collect();
        space.add_set_param(&format!("workgroup_size_{dim}"), 16, candidates)?;
    }

    space.add_range_param("TSK", 8, 1, 32, 1)?;
    space.add_range_param("TSK_UNROLL", 1, 1, 16, 1)?;
    space.add_range_param("WPTM", 4, 4, 16, 4)?;
    space.add_set_param("VWM", 4, vec![1, 2, 4, 8, 16])?;
    space.add_range_param("WPTN", 4, 4, 16, 4)?;
    space.add_set_param("VWN", 4, vec![1, 2, 4, 8, 16])?;

    space.add_constraint(
        &["TSK", "WPTM", "workgroup_size_1"],
        &["TSK"],
        |v| v[2] != 0 && (v[0] * v[1]) % v[2] == 0,
    )?;
    space.add_constraint(
        &["TSK", "WPTN", "workgroup_size_0"],
        &["TSK"],
        |v| v[2] != 0 && (v[0] * v[1]) % v[2] == 0,
    )?;
    space.add_constraint(&["TSK", "TSK_UNROLL"], &["TSK_UNROLL"], |v| {
        v[0] % v[1] == 0
    })?;
    space.add_constraint(&["WPTM", "VWM"], &["WPTM"], |v| v[0] % v[1] == 0)?;
    space.add_constraint(&["WPTN", "VWN"], &["WPTN"], |v| v[0] % v[1] == 0)?;

    space.add_range_param("lmem_pad_A", 0, 0, 8, 1)?;
    space.add_range_param("lmem_pad_B", 0, 0, 8, 1)?;

    // Dialects without native vector arithmetic must write every lane out;
    // the rest may search over skipping the unroll to save registers.
    space.add_boolean_param("vector_unroll", true, caps.requires_vector_unroll)?;

    Ok(())
}

/// Tile geometry derived from a resolved assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDims {
    pub wptm: i64,
    pub wptn: i64,
    pub tsk: i64,
    pub tsk_unroll: i64,
    pub vwm: i64,
    pub vwn: i64,
    /// Threads per work-group, row dimension (`workgroup_size_1`).
    pub rtsm: i64,
    /// Threads per work-group, column dimension (`workgroup_size_0`).
    pub rtsn: i64,
    pub tsm: i64,
    pub tsn: i64,
    /// Elements of A each thread stages per outer step.
    pub lpta: i64,
    /// Elements of B each thread stages per outer step.
    pub lptb: i64,
    pub pad_a: i64,
    pub pad_b: i64,
    pub vector_unroll: bool,
}

impl TileDims {
    pub fn from_space(space: &TuningSpace) -> Result<Self> {
        let wptn = space.get_param("WPTN")?;
        let wptm = space.get_param("WPTM")?;
        let tsk = space.get_param("TSK")?;
        let tsk_unroll = space.get_param("TSK_UNROLL")?;
        let rtsn = space.get_param("workgroup_size_0")?;
        let rtsm = space.get_param("workgroup_size_1")?;
        let vwm = space.get_param("VWM")?;
        let vwn = space.get_param("VWN")?;
        let tsm = wptm * rtsm;
        let tsn = wptn * rtsn;
        Ok(TileDims {
            wptm,
            wptn,
            tsk,
            tsk_unroll,
            vwm,
            vwn,
            rtsm,
            rtsn,
            tsm,
            tsn,
            lpta: (tsm * tsk) / (rtsm * rtsn),
            lptb: (tsn * tsk) / (rtsm * rtsn),
            pad_a: space.get_param("lmem_pad_A")?,
            pad_b: space.get_param("lmem_pad_B")?,
            vector_unroll: space.get_bool("vector_unroll")?,
        })
    }
}

/// Renders the complete blocked-GEMM kernel for one problem and one resolved
/// configuration: `C = alpha * op(A) * op(B) + beta * C`.
///
/// Every global load and store is guarded; out-of-range loads read as zero so
/// partial edge tiles accumulate correctly.
pub struct GemmSourceGenerator<'a> {
    dialect: &'a dyn KernelDialect,
    problem: &'a GemmProblem,
    dims: TileDims,
    in_elem: Elem,
    out_elem: Elem,
    acc_elem: Elem,
}

impl<'a> GemmSourceGenerator<'a> {
    pub fn new(
        dialect: &'a dyn KernelDialect,
        problem: &'a GemmProblem,
        space: &TuningSpace,
        in_elem: Elem,
        out_elem: Elem,
    ) -> Result<Self> {
        Ok(Self {
            dialect,
            problem,
            dims: TileDims::from_space(space)?,
            in_elem,
            out_elem,
            acc_elem: problem.precision.accumulator_elem(in_elem),
        })
    }

    pub fn dims(&self) -> TileDims {
        self.dims
    }

    /// Kernel arguments in binding order. `alpha` and `beta` only exist when
    /// the corresponding term is non-trivial; launch-time binding must follow
    /// the same order.
    pub fn kernel_args(&self) -> Vec<KernelArgDecl> {
        let mut args = Vec::new();
        if self.problem.alpha_term {
            args.push(KernelArgDecl::scalar("alpha", self.in_elem));
        }
        args.push(KernelArgDecl::global_const("A", self.in_elem));
        args.push(KernelArgDecl::global_const("B", self.in_elem));
        if self.problem.beta_term {
            args.push(KernelArgDecl::scalar("beta", self.in_elem));
        }
        args.push(KernelArgDecl::global_mut("C", self.out_elem));
        args
    }

    pub fn generate(&self) -> String {
        let d = self.dialect;
        let mut b = SourceBuilder::new();

        b.raw(&d.setup());
        b.blank();
        b.raw(&d.vector_type_defs(self.in_elem));
        if self.acc_elem != self.in_elem {
            b.raw(&d.vector_type_defs(self.acc_elem));
        }
        b.blank();
        self.emit_defines(&mut b);
        b.blank();

        b.open(&d.kernel_signature(GEMM_KERNEL_NAME, &self.kernel_args()));

        b.line(&format!("const int_tp tidn = {};", d.local_id(0)));
        b.line(&format!("const int_tp tidm = {};", d.local_id(1)));
        b.line(&format!("const int_tp offN = TSN * {};", d.group_id(0)));
        b.line(&format!("const int_tp offM = TSM * {};", d.group_id(1)));

        let ity = d.type_name(self.in_elem);
        b.line(&format!(
            "volatile {};",
            d.local_mem_decl(ity, "Asub[TSM][TSK + v_pad_A]")
        ));
        b.line(&format!(
            "volatile {};",
            d.local_mem_decl(ity, "Bsub[TSK][TSN + v_pad_B]")
        ));

        b.open("");
        self.emit_accreg_init(&mut b);
        b.blank();
        b.line("int_tp numTiles = ((K - 1) / TSK) + 1;");
        b.open("for (int_tp t = 0; t < numTiles; ++t)");
        self.emit_tile_load_a(&mut b);
        self.emit_tile_load_b(&mut b);
        b.line(&format!("{};", d.local_barrier()));
        self.emit_core(&mut b);
        b.line(&format!("{};", d.local_barrier()));
        b.close_note("reduction over K tiles");
        b.blank();
        self.emit_store(&mut b);
        b.close_note("C register scope");

        b.close_note("kernel");
        b.finish()
    }

    fn emit_defines(&self, b: &mut SourceBuilder) {
        let dims = &self.dims;
        let defines: [(&str, i64); 17] = [
            ("M", self.problem.m as i64),
            ("N", self.problem.n as i64),
            ("K", self.problem.k as i64),
            ("TSK", dims.tsk),
            ("TSK_UNROLL", dims.tsk_unroll),
            ("WPTM", dims.wptm),
            ("WPTN", dims.wptn),
            ("VWM", dims.vwm),
            ("VWN", dims.vwn),
            ("RTSM", dims.rtsm),
            ("RTSN", dims.rtsn),
            ("TSM", dims.tsm),
            ("TSN", dims.tsn),
            ("LPTA", dims.lpta),
            ("LPTB", dims.lptb),
            ("v_pad_A", dims.pad_a),
            ("v_pad_B", dims.pad_b),
        ];
        for (name, value) in defines {
            b.line(&format!("#define {name} {value}"));
        }
    }

    /// Lane `wn % VWN` of the accumulator vector for (`wm`, `wn`), through an
    /// element pointer so the same expression works for any vector width.
    fn creg_lane(&self) -> String {
        let acc = self.dialect.type_name(self.acc_elem);
        format!(
            "(({}(&(Creg[wm][wn / VWN])))[wn % VWN])",
            self.dialect.pointer_cast(acc)
        )
    }

    fn emit_accreg_init(&self, b: &mut SourceBuilder) {
        let d = self.dialect;
        let acc_vec = d.vector_type_name(self.acc_elem, self.dims.vwn as usize);
        let acc = d.type_name(self.acc_elem);
        let lane = self.creg_lane();

        b.line(&format!("{acc_vec} Creg[WPTM][WPTN / VWN];"));
        b.line("#pragma unroll");
        b.open("for (int_tp wm = 0; wm < WPTM; ++wm)");
        b.line("#pragma unroll");
        b.open("for (int_tp wn = 0; wn < WPTN; ++wn)");
        if self.problem.beta_term {
            // Seed with the scaled previous output so the reduction only has
            // to add alpha * A * B on top.
            b.line("int_tp globalRow = offM + tidm + wm * RTSM;");
            b.line("int_tp globalCol = offN + tidn + wn * RTSN;");
            b.open("if (globalRow < M && globalCol < N)");
            b.line(&format!(
                "{lane} = ({acc})(beta * C[globalRow * N + globalCol]);"
            ));
            b.close();
            b.open("else");
            b.line(&format!("{lane} = ({acc})0;"));
            b.close_note("M-N guard");
        } else {
            b.line(&format!("{lane} = ({acc})0;"));
        }
        b.close();
        b.close();
    }

    fn emit_tile_load_a(&self, b: &mut SourceBuilder) {
        let ity = self.dialect.type_name(self.in_elem);
        b.open("");
        b.line("#pragma unroll 4");
        b.open("for (int_tp la = 0; la < LPTA; ++la)");
        b.line("int_tp tid = tidm * RTSN + tidn;");
        b.line("int_tp id = la * RTSN * RTSM + tid;");
        b.line("int_tp row = id / TSK;");
        b.line("int_tp col = id % TSK;");
        b.line("int_tp tiledIndex = TSK * t + col;");
        b.open("if ((offM + row) < M && tiledIndex < K)");
        if self.problem.trans_a {
            b.line("Asub[row][col] = A[(offM + row) + tiledIndex * M];");
        } else {
            b.line("Asub[row][col] = A[(offM + row) * K + tiledIndex];");
        }
        b.close();
        b.open("else");
        b.line(&format!("Asub[row][col] = ({ity})0.0;"));
        b.close_note("M-K guard");
        b.close();
        b.close_note("loading A");
    }

    fn emit_tile_load_b(&self, b: &mut SourceBuilder) {
        let ity = self.dialect.type_name(self.in_elem);
        b.open("");
        b.line("#pragma unroll 4");
        b.open("for (int_tp lb = 0; lb < LPTB; ++lb)");
        b.line("int_tp tid = tidm * RTSN + tidn;");
        b.line("int_tp id = lb * RTSN * RTSM + tid;");
        b.line("int_tp row = id / TSN;");
        b.line("int_tp col = id % TSN;");
        b.line("int_tp tiledIndex = TSK * t + row;");
        b.open("if ((offN + col) < N && tiledIndex < K)");
        if self.problem.trans_b {
            b.line("Bsub[row][col] = B[(offN + col) * K + tiledIndex];");
        } else {
            b.line("Bsub[row][col] = B[(offN + col) + tiledIndex * N];");
        }
        b.close();
        b.open("else");
        b.line(&format!("Bsub[row][col] = ({ity})0;"));
        b.close_note("N-K guard");
        b.close();
        b.close_note("loading B");
    }

    /// Rank-TSK update of the accumulator block from the staged tiles.
    fn emit_core(&self, b: &mut SourceBuilder) {
        let d = self.dialect;
        let vwm = self.dims.vwm as usize;
        let vwn = self.dims.vwn as usize;
        let native_acc = self.problem.precision == AccumulatePrecision::Native;
        // Non-native accumulation needs a per-lane cast, so whole-vector
        // arithmetic is off the table even where the dialect supports it.
        let unroll_lanes = self.dims.vector_unroll || !native_acc;
        let acc = d.type_name(self.acc_elem);

        b.open("");
        b.line(&format!("{} Areg;", d.vector_type_name(self.in_elem, vwm)));
        b.line(&format!(
            "{} Breg[WPTN / VWN];",
            d.vector_type_name(self.in_elem, vwn)
        ));
        b.line("#pragma unroll 1");
        b.open("for (int_tp kt = 0; kt < TSK; kt += TSK_UNROLL)");
        b.line("#pragma unroll");
        b.open("for (int_tp ku = 0; ku < TSK_UNROLL; ++ku)");
        b.line("int_tp k = kt + ku;");

        b.line("#pragma unroll");
        b.open("for (int_tp wn = 0; wn < WPTN / VWN; ++wn)");
        b.line("int_tp col = tidn + wn * VWN * RTSN;");
        for lane in 0..vwn {
            b.line(&format!(
                "{} = Bsub[k][col + {lane} * RTSN];",
                d.vector_lane("Breg[wn]", vwn, lane)
            ));
        }
        b.close_note("cache Bsub");

        b.line("#pragma unroll");
        b.open("for (int_tp wm = 0; wm < WPTM / VWM; ++wm)");
        b.line("int_tp row = tidm + wm * VWM * RTSM;");
        for lane in 0..vwm {
            b.line(&format!(
                "{} = Asub[row + {lane} * RTSM][k];",
                d.vector_lane("Areg", vwm, lane)
            ));
        }
        b.line("#pragma unroll");
        b.open("for (int_tp wn = 0; wn < WPTN / VWN; ++wn)");
        for m_lane in 0..vwm {
            let a = d.vector_lane("Areg", vwm, m_lane);
            let creg = format!("Creg[wm * VWM + {m_lane}][wn]");
            if unroll_lanes {
                for n_lane in 0..vwn {
                    let b_lane = d.vector_lane("Breg[wn]", vwn, n_lane);
                    let c_lane = d.vector_lane(&creg, vwn, n_lane);
                    let product = if self.problem.alpha_term {
                        format!("alpha * {a} * {b_lane}")
                    } else {
                        format!("{a} * {b_lane}")
                    };
                    if native_acc {
                        b.line(&format!("{c_lane} += {product};"));
                    } else {
                        b.line(&format!("{c_lane} += ({acc})({product});"));
                    }
                }
            } else {
                let product = if self.problem.alpha_term {
                    format!("alpha * {a} * Breg[wn]")
                } else {
                    format!("{a} * Breg[wn]")
                };
                b.line(&format!("{creg} += {product};"));
            }
        }
        b.close();
        b.close();
        b.close();
        b.close();
        b.close_note("compute scope");
    }

    fn emit_store(&self, b: &mut SourceBuilder) {
        let lane = self.creg_lane();
        let ity = self.dialect.type_name(self.in_elem);
        b.line("#pragma unroll");
        b.open("for (int_tp wm = 0; wm < WPTM; ++wm)");
        b.line("int_tp globalRow = offM + tidm + wm * RTSM;");
        b.line("#pragma unroll");
        b.open("for (int_tp wn = 0; wn < WPTN; ++wn)");
        b.line("int_tp globalCol = offN + tidn + wn * RTSN;");
        b.open("if (globalRow < M && globalCol < N)");
        if self.problem.precision == AccumulatePrecision::Native {
            b.line(&format!("C[globalRow * N + globalCol] = {lane};"));
        } else {
            b.line(&format!("C[globalRow * N + globalCol] = ({ity}){lane};"));
        }
        b.close_note("M-N guard");
        b.close();
        b.close();
    }
}
