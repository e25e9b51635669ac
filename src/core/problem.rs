use serde::{Deserialize, Serialize};

use crate::core::elem::AccumulatePrecision;

/// Everything that identifies one compiled GEMM kernel.
///
/// `alpha_term` / `beta_term` record whether the scalar coefficients are
/// non-trivial (`alpha != 1`, `beta != 0`); the trivial cases drop the
/// corresponding kernel argument entirely. The problem extents (M, N, K) are
/// baked into the generated source as compile-time constants, so they are
/// part of the identity: two requests that differ only in shape compile two
/// kernels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmProblem {
    pub trans_a: bool,
    pub trans_b: bool,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha_term: bool,
    pub beta_term: bool,
    pub precision: AccumulatePrecision,
    /// Input quantizer mode token.
    pub in_mode: String,
    /// Output quantizer mode token.
    pub out_mode: String,
}

impl GemmProblem {
    /// Canonical cache key. Two problems share a compiled kernel iff their
    /// signatures are byte-equal.
    pub fn signature(&self) -> String {
        let mut sig = String::from("gemm_");
        sig.push_str(if self.trans_a { "TA_" } else { "NTA_" });
        sig.push_str(if self.trans_b { "TB_" } else { "NTB_" });
        sig.push_str(&format!("M{}_N{}_K{}_", self.m, self.n, self.k));
        if self.alpha_term {
            sig.push_str("alpha_");
        }
        if self.beta_term {
            sig.push_str("beta_");
        }
        if let Some(token) = self.precision.signature_token() {
            sig.push_str(token);
        }
        sig.push_str(&format!("iq_{}_oq_{}", self.in_mode, self.out_mode));
        sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GemmProblem {
        GemmProblem {
            trans_a: false,
            trans_b: false,
            m: 64,
            n: 32,
            k: 16,
            alpha_term: false,
            beta_term: false,
            precision: AccumulatePrecision::Native,
            in_mode: "passive".into(),
            out_mode: "passive".into(),
        }
    }

    #[test]
    fn signature_is_deterministic() {
        assert_eq!(base().signature(), base().signature());
        assert_eq!(
            base().signature(),
            "gemm_NTA_NTB_M64_N32_K16_iq_passive_oq_passive"
        );
    }

    #[test]
    fn every_field_changes_the_signature() {
        let reference = base().signature();
        let variants = [
            GemmProblem { trans_a: true, ..base() },
            GemmProblem { trans_b: true, ..base() },
            GemmProblem { m: 65, ..base() },
            GemmProblem { n: 33, ..base() },
            GemmProblem { k: 17, ..base() },
            GemmProblem { alpha_term: true, ..base() },
            GemmProblem { beta_term: true, ..base() },
            GemmProblem { precision: AccumulatePrecision::Bits32, ..base() },
            GemmProblem { in_mode: "affine".into(), ..base() },
            GemmProblem { out_mode: "affine".into(), ..base() },
        ];
        for variant in variants {
            assert_ne!(variant.signature(), reference, "{variant:?}");
        }
    }
}
