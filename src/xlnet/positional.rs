// Copyright 2018 Google AI and Google Brain team.
// Copyright 2018 Carnegie Mellon University Authors.
// Copyright 2020-present, the HuggingFace Inc. team.
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

use crate::xlnet::config::{AttentionType, XLNetConfig};
use tch::{Device, Kind, Tensor};

/// # Sinusoidal relative position embeddings
/// Positions run from `k_len` down to `-q_len + 1` for bidirectional attention and down to `1`
/// for unidirectional attention. Embeddings are computed in double precision and converted to the
/// requested kind. They never require gradients.
#[derive(Debug, Clone, Copy)]
pub struct RelativePositionalEncoding {
    d_model: i64,
    attention_type: AttentionType,
    bi_data: bool,
    clamp_len: Option<i64>,
}

impl RelativePositionalEncoding {
    pub fn new(config: &XLNetConfig) -> RelativePositionalEncoding {
        RelativePositionalEncoding {
            d_model: config.d_model,
            attention_type: config.attn_type,
            bi_data: config.bi_data,
            clamp_len: config.clamp_len,
        }
    }

    /// `1 / 10000^(2i / d_model)` for `i` in `0..d_model / 2`
    pub fn inverse_frequency(&self, device: Device) -> Tensor {
        let frequency_sequence =
            Tensor::arange_start_step(0, self.d_model, 2, (Kind::Double, device));
        1f64 / Tensor::pow_scalar(10000f64, &(frequency_sequence / self.d_model as f64))
    }

    /// Positions covered by the encoding, as `[begin, end)` with a step of -1
    pub fn position_range(&self, q_len: i64, k_len: i64) -> (i64, i64) {
        match self.attention_type {
            AttentionType::bi => (k_len, -q_len),
            AttentionType::uni => (k_len, -1),
        }
    }

    fn clamp(&self, mut position_sequence: Tensor) -> Tensor {
        if let Some(clamp_value) = self.clamp_len {
            if clamp_value > 0 {
                let _ = position_sequence.clamp_(-clamp_value, clamp_value);
            }
        }
        position_sequence
    }

    /// Sine and cosine embeddings of `position_sequence`, shape (*positions*, 1 or *batch size*, *d_model*)
    pub fn positional_embedding(
        position_sequence: &Tensor,
        inverse_frequency: &Tensor,
        batch_size: Option<i64>,
    ) -> Tensor {
        let sinusoid = position_sequence.outer(inverse_frequency);
        let positional_embeddings =
            Tensor::cat(&[sinusoid.sin(), sinusoid.cos()], -1).unsqueeze(1);

        match batch_size {
            Some(bsz) => positional_embeddings.expand([-1, bsz, -1], true),
            None => positional_embeddings,
        }
    }

    /// Builds the relative position embedding for a query of length `q_len` attending to `k_len`
    /// keys (memory included).
    ///
    /// With `bi_data`, forward and backward position sequences each cover half of the batch.
    pub fn forward(
        &self,
        q_len: i64,
        k_len: i64,
        batch_size: Option<i64>,
        kind: Kind,
        device: Device,
    ) -> Tensor {
        let inverse_frequency = self.inverse_frequency(device);
        let (begin, end) = self.position_range(q_len, k_len);

        let forward_positions_sequence =
            self.clamp(Tensor::arange_start_step(begin, end, -1, (Kind::Double, device)));
        let position_embeddings = if self.bi_data {
            let backward_positions_sequence =
                self.clamp(Tensor::arange_start(-begin, -end, (Kind::Double, device)));
            let bsz = batch_size.map(|value| value / 2);

            let forward_positions_embeddings =
                Self::positional_embedding(&forward_positions_sequence, &inverse_frequency, bsz);
            let backward_positions_embeddings =
                Self::positional_embedding(&backward_positions_sequence, &inverse_frequency, bsz);
            Tensor::cat(
                &[forward_positions_embeddings, backward_positions_embeddings],
                1,
            )
        } else {
            Self::positional_embedding(&forward_positions_sequence, &inverse_frequency, batch_size)
        };
        position_embeddings.to_kind(kind).detach()
    }
}
