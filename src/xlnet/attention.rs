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

use crate::common::dropout::Dropout;
use crate::common::einsum::{contract, einsum4x4};
use crate::common::init::{ParameterVisitor, VisitParameters};
use crate::xlnet::memory::LayerState;
use crate::xlnet::XLNetConfig;
use crate::XLNetError;
use std::borrow::Borrow;
use tch::nn::Init;
use tch::{nn, Kind, Tensor};

/// Realigns position-indexed scores to key-indexed scores.
///
/// `x` has shape (*batch*, *n_head*, *q_len*, *pos_len*) where the last axis indexes relative
/// positions running from the furthest key down. Swapping the last two axes, dropping the first
/// row and reshaping back shifts row `i` by `q_len - i` positions. The first `klen` columns then hold
/// the scores of the keys in absolute order: the output has shape (*batch*, *n_head*, *q_len*, *klen*).
pub fn rel_shift_bnij(x: &Tensor, klen: i64) -> Tensor {
    let shape = x.size();
    x.reshape([shape[0], shape[1], shape[3], shape[2]])
        .narrow(2, 1, shape[3] - 1)
        .reshape([shape[0], shape[1], shape[2], shape[3] - 1])
        .index_select(3, &Tensor::arange(klen, (Kind::Int64, x.device())))
}

/// Output of a two-stream relative attention block
pub struct RelativeAttentionOutput {
    /// Content stream output, shape (*q_len*, *batch size*, *d_model*)
    pub output_h: Tensor,
    /// Query stream output, present when a query stream was given
    pub output_g: Option<Tensor>,
    /// Content stream attention probabilities (*batch size*, *n_head*, *q_len*, *k_len*)
    pub attention_probas_h: Option<Tensor>,
    /// Query stream attention probabilities (*batch size*, *n_head*, *q_len*, *k_len*)
    pub attention_probas_g: Option<Tensor>,
}

#[derive(Debug)]
/// # Relative multi-head attention
/// Content, position and segment based scores are combined before the softmax. Projections
/// `q`, `k`, `v`, `o` and `r` have shape (*d_model*, *n_head* x *d_head*), the content (`r_w_bias`),
/// position (`r_r_bias`) and segment (`r_s_bias`) biases (*n_head*, *d_head*) and the segment
/// embeddings (2, *n_head*, *d_head*).
pub struct XLNetRelativeAttention {
    n_head: i64,
    d_head: i64,
    dropout: Dropout,
    query: Tensor,
    key: Tensor,
    value: Tensor,
    output: Tensor,
    pos: Tensor,
    r_r_bias: Tensor,
    r_s_bias: Tensor,
    r_w_bias: Tensor,
    seg_embed: Tensor,
    layer_norm: nn::LayerNorm,
    scale: f64,
}

impl XLNetRelativeAttention {
    pub fn new<'p, P>(p: P, config: &XLNetConfig) -> XLNetRelativeAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let init = Init::Randn {
            mean: 0.,
            stdev: config.initializer_range,
        };
        let projection_shape = [config.d_model, config.n_head * config.d_head];
        let bias_shape = [config.n_head, config.d_head];

        let query = p.var("q", &projection_shape, init);
        let key = p.var("k", &projection_shape, init);
        let value = p.var("v", &projection_shape, init);
        let output = p.var("o", &projection_shape, init);
        let pos = p.var("r", &projection_shape, init);

        let r_r_bias = p.var("r_r_bias", &bias_shape, init);
        let r_s_bias = p.var("r_s_bias", &bias_shape, init);
        let r_w_bias = p.var("r_w_bias", &bias_shape, init);
        let seg_embed = p.var("seg_embed", &[2, config.n_head, config.d_head], init);

        let dropout = Dropout::new(config.dropout);
        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps.unwrap_or(1e-12),
            ..Default::default()
        };
        let layer_norm = nn::layer_norm(p / "layer_norm", vec![config.d_model], layer_norm_config);

        let scale = 1f64 / ((config.d_head as f64).powf(0.5f64));

        XLNetRelativeAttention {
            n_head: config.n_head,
            d_head: config.d_head,
            dropout,
            query,
            key,
            value,
            output,
            pos,
            r_r_bias,
            r_s_bias,
            r_w_bias,
            seg_embed,
            layer_norm,
            scale,
        }
    }

    /// Head pruning is not available for relative attention.
    pub fn prune_heads(&mut self, heads: &[i64]) -> Result<(), XLNetError> {
        Err(XLNetError::UnsupportedOperation(format!(
            "Pruning heads {:?} is not supported by XLNet relative attention",
            heads
        )))
    }

    /// (*len*, *batch*, *d_model*) x (*d_model*, *n_head* x *d_head*) -> (*len*, *batch*, *n_head*, *d_head*)
    fn project_heads(&self, input: &Tensor, weight: &Tensor) -> Tensor {
        let shape = input.size();
        input
            .matmul(weight)
            .reshape([shape[0], shape[1], self.n_head, self.d_head])
    }

    /// Scaled scores before masking, (*batch size*, *n_head*, *q_len*, *k_len*)
    fn attention_score(
        &self,
        q_head: &Tensor,
        k_head_h: &Tensor,
        k_head_r: &Tensor,
        seg_mat: Option<&Tensor>,
    ) -> Result<Tensor, XLNetError> {
        let ac = einsum4x4("ibnd,jbnd->bnij", &(q_head + &self.r_w_bias), k_head_h)?;
        let bd = rel_shift_bnij(
            &einsum4x4("ibnd,jbnd->bnij", &(q_head + &self.r_r_bias), k_head_r)?,
            ac.size()[3],
        );

        let mut attention_score = ac + bd;
        if let Some(seg_mat) = seg_mat {
            let seg_embed = self
                .seg_embed
                .unsqueeze(0)
                .expand([q_head.size()[0], -1, -1, -1], true);
            let ef = einsum4x4("ibnd,isnd->ibns", &(q_head + &self.r_s_bias), &seg_embed)?;
            attention_score = attention_score + einsum4x4("ijbs,ibns->bnij", seg_mat, &ef)?;
        }
        Ok(attention_score * self.scale)
    }

    #[allow(clippy::too_many_arguments)]
    fn rel_attention_core(
        &self,
        q_head: &Tensor,
        k_head_h: &Tensor,
        v_head_h: &Tensor,
        k_head_r: &Tensor,
        seg_mat: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        head_mask: Option<&Tensor>,
        output_attentions: bool,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>), XLNetError> {
        let mut attention_score = self.attention_score(q_head, k_head_h, k_head_r, seg_mat)?;

        if let Some(mask) = attention_mask {
            let target_kind = attention_score.kind();
            attention_score = (attention_score
                - mask.permute([2, 3, 0, 1]).to_kind(target_kind) * 1e30)
                .to_kind(target_kind);
        };

        let mut attention_probas = attention_score
            .softmax(3, attention_score.kind())
            .apply_t(&self.dropout, train);
        if let Some(head_mask) = head_mask {
            attention_probas = attention_probas * head_mask;
        }

        let attention_vector = einsum4x4("bnij,jbnd->ibnd", &attention_probas, v_head_h)?;

        Ok(if output_attentions {
            (attention_vector, Some(attention_probas))
        } else {
            (attention_vector, None)
        })
    }

    fn post_attention(&self, h: &Tensor, attention_vector: &Tensor, train: bool) -> Tensor {
        let shape = attention_vector.size();
        let attention_out = attention_vector
            .reshape([shape[0] * shape[1], -1])
            .matmul(&self.output.transpose(0, 1))
            .reshape([shape[0], shape[1], -1])
            .apply_t(&self.dropout, train);
        (attention_out + h).apply(&self.layer_norm)
    }

    /// Forward pass through the relative attention block.
    ///
    /// The content stream `h` attends to the memory and itself. When a query stream `g` is given,
    /// it attends to the same keys and values with its own mask. A `target_mapping` of shape
    /// (*num_predict*, *q_len*, *batch size*) maps the `num_predict` query positions onto the
    /// sequence before attention and back afterwards.
    ///
    /// # Arguments
    ///
    /// * `h` - Content stream (*q_len*, *batch size*, *d_model*)
    /// * `g` - Optional query stream (*num_predict*, *batch size*, *d_model*)
    /// * `attn_mask_h` - Optional content stream mask (*q_len*, *k_len*, *batch size* or 1, 1)
    /// * `attn_mask_g` - Optional query stream mask (*q_len*, *k_len*, *batch size* or 1, 1)
    /// * `r` - Relative position embeddings (*pos_len*, *batch size*, *d_model*)
    /// * `seg_mat` - Optional one-hot segment matrix (*q_len*, *k_len*, *batch size*, 2)
    /// * `layer_state` - Optional memory of the layer (*m_len*, *batch size*, *d_model*)
    /// * `target_mapping` - Optional target mapping (*num_predict*, *q_len*, *batch size*)
    /// * `head_mask` - Optional head mask (1, *n_head*, 1, 1)
    /// * `output_attentions` - Return the attention probabilities
    /// * `train` - Enables dropout
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        h: &Tensor,
        g: Option<&Tensor>,
        attn_mask_h: Option<&Tensor>,
        attn_mask_g: Option<&Tensor>,
        r: &Tensor,
        seg_mat: Option<&Tensor>,
        layer_state: Option<&LayerState>,
        target_mapping: Option<&Tensor>,
        head_mask: Option<&Tensor>,
        output_attentions: bool,
        train: bool,
    ) -> Result<RelativeAttentionOutput, XLNetError> {
        let cat_value = layer_state.map(|mems| Tensor::cat(&[&mems.prev_content, h], 0));
        let cat = cat_value.as_ref().unwrap_or(h);

        let k_head_h = self.project_heads(cat, &self.key);
        let v_head_h = self.project_heads(cat, &self.value);
        let k_head_r = self.project_heads(r, &self.pos);

        let q_head_h = self.project_heads(h, &self.query);
        let (attention_vec_h, attention_probas_h) = self.rel_attention_core(
            &q_head_h,
            &k_head_h,
            &v_head_h,
            &k_head_r,
            seg_mat,
            attn_mask_h,
            head_mask,
            output_attentions,
            train,
        )?;
        let output_h = self.post_attention(h, &attention_vec_h, train);

        let (output_g, attention_probas_g) = match g {
            Some(g) => {
                let q_head_g = self.project_heads(g, &self.query);
                let (attention_vec_g, attention_probas_g) = match target_mapping {
                    Some(target_mapping) => {
                        let q_head_g = contract("mbnd,mlb->lbnd", &q_head_g, target_mapping)?;
                        let (attention_vec_g, attention_probas_g) = self.rel_attention_core(
                            &q_head_g,
                            &k_head_h,
                            &v_head_h,
                            &k_head_r,
                            seg_mat,
                            attn_mask_g,
                            head_mask,
                            output_attentions,
                            train,
                        )?;
                        (
                            contract("lbnd,mlb->mbnd", &attention_vec_g, target_mapping)?,
                            attention_probas_g,
                        )
                    }
                    None => self.rel_attention_core(
                        &q_head_g,
                        &k_head_h,
                        &v_head_h,
                        &k_head_r,
                        seg_mat,
                        attn_mask_g,
                        head_mask,
                        output_attentions,
                        train,
                    )?,
                };
                (
                    Some(self.post_attention(g, &attention_vec_g, train)),
                    attention_probas_g,
                )
            }
            None => (None, None),
        };

        Ok(RelativeAttentionOutput {
            output_h,
            output_g,
            attention_probas_h,
            attention_probas_g,
        })
    }
}

impl VisitParameters for XLNetRelativeAttention {
    fn visit_parameters(&mut self, visitor: &mut dyn ParameterVisitor) {
        for (name, parameter) in vec![
            ("q", &mut self.query),
            ("k", &mut self.key),
            ("v", &mut self.value),
            ("o", &mut self.output),
            ("r", &mut self.pos),
            ("r_r_bias", &mut self.r_r_bias),
            ("r_s_bias", &mut self.r_s_bias),
            ("r_w_bias", &mut self.r_w_bias),
            ("seg_embed", &mut self.seg_embed),
        ] {
            visitor.visit_parameter(name, parameter);
        }
        visitor.visit_layer_norm(&mut self.layer_norm);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::xlnet::masks::{attention_masks, segment_matrix};
    use crate::xlnet::AttentionType;
    use tch::{nn, no_grad, Device};

    fn test_config() -> XLNetConfig {
        XLNetConfig {
            vocab_size: 50,
            d_model: 16,
            n_layer: 1,
            n_head: 2,
            d_head: 8,
            d_inner: 32,
            ..Default::default()
        }
    }

    #[test]
    fn rel_shift_aligns_relative_positions() {
        let scores = Tensor::arange(8, (Kind::Float, Device::Cpu)).view([1, 1, 2, 4]);

        let shifted = rel_shift_bnij(&scores, 2);

        assert_eq!(shifted.size(), vec![1, 1, 2, 2]);
        // positions run (2, 1, 0, -1): query 0 reads distances (0, -1), query 1 (1, 0)
        let expected = Tensor::from_slice(&[2f32, 3., 5., 6.]).view([1, 1, 2, 2]);
        assert!(shifted.equal(&expected));
    }

    #[test]
    fn rel_shift_output_shape() {
        let scores = Tensor::rand([2, 3, 4, 9], (Kind::Float, Device::Cpu));

        assert_eq!(rel_shift_bnij(&scores, 5).size(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn attention_probabilities_sum_to_one() -> anyhow::Result<()> {
        let config = test_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let attention = XLNetRelativeAttention::new(vs.root() / "rel_attn", &config);

        let (q_len, m_len, batch_size) = (4, 2, 2);
        let k_len = q_len + m_len;
        let q_head = Tensor::randn([q_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let k_head = Tensor::randn([k_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let v_head = Tensor::randn([k_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let r_head = Tensor::randn([k_len + q_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let token_type_ids =
            Tensor::from_slice(&[0i64, 0, 0, 1, 1, 1, 1, 1]).view([q_len, batch_size]);
        let seg_mat = segment_matrix(&token_type_ids, m_len, Kind::Float);
        let masks = attention_masks(
            AttentionType::uni,
            false,
            q_len,
            m_len,
            batch_size,
            None,
            None,
            Kind::Float,
            Device::Cpu,
        );
        let mask = masks.query_mask.unwrap();

        let (attention_vector, attention_probas) = no_grad(|| {
            attention.rel_attention_core(
                &q_head,
                &k_head,
                &v_head,
                &r_head,
                Some(&seg_mat),
                Some(&mask),
                None,
                true,
                false,
            )
        })?;
        let attention_probas = attention_probas.unwrap();

        assert_eq!(attention_vector.size(), vec![q_len, batch_size, 2, 8]);
        assert_eq!(attention_probas.size(), vec![batch_size, 2, q_len, k_len]);
        let row_sums = attention_probas.sum_dim_intlist([3i64].as_slice(), false, Kind::Float);
        assert!(row_sums.allclose(&row_sums.ones_like(), 1e-5, 1e-5, false));
        // causal mask: the first query cannot see the following positions
        let future = attention_probas.narrow(2, 0, 1).narrow(3, m_len + 1, q_len - 1);
        assert!(future.abs().max().double_value(&[]) < 1e-6);
        Ok(())
    }

    #[test]
    fn segment_score_depends_on_segment_difference() -> anyhow::Result<()> {
        let config = test_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let attention = XLNetRelativeAttention::new(vs.root() / "rel_attn", &config);

        let (q_len, k_len, batch_size) = (3, 4, 2);
        let q_head = Tensor::randn([q_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let k_head = Tensor::randn([k_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let r_head = Tensor::randn([k_len + q_len, batch_size, 2, 8], (Kind::Float, Device::Cpu));
        let seg_shape = [q_len, k_len, batch_size, 2];
        let same_segment = Tensor::zeros(seg_shape, (Kind::Float, Device::Cpu));
        let _ = same_segment.narrow(3, 0, 1).fill_(1.0);
        let other_segment = Tensor::zeros(seg_shape, (Kind::Float, Device::Cpu));
        let _ = other_segment.narrow(3, 1, 1).fill_(1.0);

        let (score_same, score_other, expected) = no_grad(|| -> anyhow::Result<_> {
            let score_same =
                attention.attention_score(&q_head, &k_head, &r_head, Some(&same_segment))?;
            let score_other =
                attention.attention_score(&q_head, &k_head, &r_head, Some(&other_segment))?;
            let seg_difference = attention.seg_embed.get(0) - attention.seg_embed.get(1);
            let expected = contract(
                "ibnd,nd->bni",
                &(&q_head + &attention.r_s_bias),
                &seg_difference,
            )?
            .unsqueeze(-1)
                * attention.scale;
            Ok((score_same, score_other, expected))
        })?;

        let difference = score_same - score_other;
        assert_eq!(difference.size(), vec![batch_size, 2, q_len, k_len]);
        assert!(difference.allclose(&expected.expand_as(&difference), 1e-4, 1e-5, false));
        Ok(())
    }

    #[test]
    fn head_mask_silences_heads() -> anyhow::Result<()> {
        let config = test_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let attention = XLNetRelativeAttention::new(vs.root() / "rel_attn", &config);

        let q_head = Tensor::randn([3, 1, 2, 8], (Kind::Float, Device::Cpu));
        let k_head = Tensor::randn([3, 1, 2, 8], (Kind::Float, Device::Cpu));
        let r_head = Tensor::randn([6, 1, 2, 8], (Kind::Float, Device::Cpu));
        let head_mask = Tensor::from_slice(&[1f32, 0.]).view([1, 2, 1, 1]);

        let (attention_vector, _) = no_grad(|| {
            attention.rel_attention_core(
                &q_head,
                &k_head,
                &k_head,
                &r_head,
                None,
                None,
                Some(&head_mask),
                false,
                false,
            )
        })?;

        assert!(attention_vector.select(2, 1).abs().max().double_value(&[]) < 1e-12);
        assert!(attention_vector.select(2, 0).abs().max().double_value(&[]) > 0.0);
        Ok(())
    }

    #[test]
    fn content_only_and_two_stream_outputs() -> anyhow::Result<()> {
        let config = test_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let attention = XLNetRelativeAttention::new(vs.root() / "rel_attn", &config);

        let (q_len, batch_size) = (5, 2);
        let h = Tensor::randn([q_len, batch_size, 16], (Kind::Float, Device::Cpu));
        let g = Tensor::randn([1, batch_size, 16], (Kind::Float, Device::Cpu));
        let r = Tensor::randn([2 * q_len, batch_size, 16], (Kind::Float, Device::Cpu));
        let target_mapping = Tensor::zeros([1, q_len, batch_size], (Kind::Float, Device::Cpu));
        let _ = target_mapping.narrow(1, q_len - 1, 1).fill_(1.0);

        let content_only = no_grad(|| {
            attention.forward_t(&h, None, None, None, &r, None, None, None, None, false, false)
        })?;
        assert_eq!(content_only.output_h.size(), vec![q_len, batch_size, 16]);
        assert!(content_only.output_g.is_none());
        assert!(content_only.attention_probas_h.is_none());

        let two_stream = no_grad(|| {
            attention.forward_t(
                &h,
                Some(&g),
                None,
                None,
                &r,
                None,
                None,
                Some(&target_mapping),
                None,
                true,
                false,
            )
        })?;
        assert_eq!(two_stream.output_g.unwrap().size(), vec![1, batch_size, 16]);
        assert_eq!(
            two_stream.attention_probas_g.unwrap().size(),
            vec![batch_size, 2, q_len, q_len]
        );
        assert!(two_stream.output_h.allclose(&content_only.output_h, 1e-6, 1e-6, false));
        Ok(())
    }

    #[test]
    fn pruning_is_unsupported() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut attention = XLNetRelativeAttention::new(vs.root(), &test_config());

        assert!(matches!(
            attention.prune_heads(&[0]),
            Err(XLNetError::UnsupportedOperation(_))
        ));
    }
}
