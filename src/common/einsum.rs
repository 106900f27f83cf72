// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Contractions of the relative attention, delegated to the `tch` einsum implementation.

use crate::common::error::XLNetError;
use tch::Tensor;

/// Contracts two tensors following an einsum `equation` (e.g. `"mbnd,mlb->lbnd"`). Malformed
/// equations and shape mismatches are reported as `TchError`.
pub fn contract(equation: &str, x: &Tensor, y: &Tensor) -> Result<Tensor, XLNetError> {
    Ok(Tensor::f_einsum(equation, &[x, y], None::<i64>)?)
}

/// Contraction restricted to two 4-dimensional operands, the shape of every score and
/// aggregation step of the relative attention.
pub fn einsum4x4(equation: &str, x: &Tensor, y: &Tensor) -> Result<Tensor, XLNetError> {
    if x.dim() != 4 || y.dim() != 4 {
        return Err(XLNetError::ValueError(format!(
            "einsum4x4 expects two 4-dimensional operands, got ranks {} and {}",
            x.dim(),
            y.dim()
        )));
    }
    contract(equation, x, y)
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn attention_scores_contraction() -> anyhow::Result<()> {
        // one query, two keys, single batch element and head
        let q_head = Tensor::from_slice(&[1f64, 2.]).view([1, 1, 1, 2]);
        let k_head = Tensor::from_slice(&[3f64, 4., -1., 0.5]).view([2, 1, 1, 2]);

        let scores = einsum4x4("ibnd,jbnd->bnij", &q_head, &k_head)?;

        assert_eq!(scores.size(), vec![1, 1, 1, 2]);
        assert_eq!(scores.double_value(&[0, 0, 0, 0]), 11.0);
        assert_eq!(scores.double_value(&[0, 0, 0, 1]), 0.0);
        Ok(())
    }

    #[test]
    fn einsum4x4_rejects_lower_rank_operands() {
        let x = Tensor::randn([3, 2, 8], (Kind::Double, Device::Cpu));
        let y = Tensor::randn([8, 4, 6, 1], (Kind::Double, Device::Cpu));
        assert!(matches!(
            einsum4x4("ibh,hnda->ibnda", &x, &y),
            Err(XLNetError::ValueError(_))
        ));
    }

    #[test]
    fn mismatched_contraction_is_an_error() {
        let x = Tensor::randn([2, 3], (Kind::Double, Device::Cpu));
        let y = Tensor::randn([4, 2], (Kind::Double, Device::Cpu));
        assert!(matches!(
            contract("ij,jk->ik", &x, &y),
            Err(XLNetError::TchError(_))
        ));
    }
}
