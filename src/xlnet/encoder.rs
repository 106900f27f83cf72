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

use crate::common::activations::TensorFunction;
use crate::common::dropout::Dropout;
use crate::common::init::{ParameterVisitor, VisitParameters};
use crate::xlnet::attention::{RelativeAttentionOutput, XLNetRelativeAttention};
use crate::xlnet::memory::LayerState;
use crate::xlnet::XLNetConfig;
use crate::XLNetError;
use std::borrow::Borrow;
use tch::{nn, Tensor};

/// # Position-wise feed-forward block
/// `layer_norm(input + dropout(layer_2(dropout(activation(layer_1(input))))))`
pub struct XLNetFeedForward {
    layer_1: nn::Linear,
    layer_2: nn::Linear,
    layer_norm: nn::LayerNorm,
    dropout: Dropout,
    activation: TensorFunction,
}

impl XLNetFeedForward {
    pub fn new<'p, P>(p: P, config: &XLNetConfig) -> XLNetFeedForward
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let layer_1 = nn::linear(
            p / "layer_1",
            config.d_model,
            config.d_inner,
            Default::default(),
        );
        let layer_2 = nn::linear(
            p / "layer_2",
            config.d_inner,
            config.d_model,
            Default::default(),
        );

        let dropout = Dropout::new(config.dropout);
        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps.unwrap_or(1e-12),
            ..Default::default()
        };
        let layer_norm = nn::layer_norm(p / "layer_norm", vec![config.d_model], layer_norm_config);
        let activation = config.ff_activation.get_function();

        XLNetFeedForward {
            layer_1,
            layer_2,
            layer_norm,
            dropout,
            activation,
        }
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let output = input.apply(&self.layer_1);
        let output = self.activation.get_fn()(&output)
            .apply_t(&self.dropout, train)
            .apply(&self.layer_2)
            .apply_t(&self.dropout, train);
        (output + input).apply(&self.layer_norm)
    }
}

impl VisitParameters for XLNetFeedForward {
    fn visit_parameters(&mut self, visitor: &mut dyn ParameterVisitor) {
        visitor.visit_linear(&mut self.layer_1);
        visitor.visit_linear(&mut self.layer_2);
        visitor.visit_layer_norm(&mut self.layer_norm);
    }
}

/// # XLNet layer
/// Two-stream relative attention followed by the feed-forward block. The same feed-forward
/// parameters are applied to the content stream and, when present, the query stream.
pub struct XLNetLayer {
    rel_attn: XLNetRelativeAttention,
    ff: XLNetFeedForward,
}

impl XLNetLayer {
    pub fn new<'p, P>(p: P, config: &XLNetConfig) -> XLNetLayer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let rel_attn = XLNetRelativeAttention::new(p / "rel_attn", config);
        let ff = XLNetFeedForward::new(p / "ff", config);
        XLNetLayer { rel_attn, ff }
    }

    pub fn prune_heads(&mut self, heads: &[i64]) -> Result<(), XLNetError> {
        self.rel_attn.prune_heads(heads)
    }

    /// Forward pass through the layer. Arguments are forwarded to `XLNetRelativeAttention::forward_t`.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        output_h: &Tensor,
        output_g: Option<&Tensor>,
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
        let attention_output = self.rel_attn.forward_t(
            output_h,
            output_g,
            attn_mask_h,
            attn_mask_g,
            r,
            seg_mat,
            layer_state,
            target_mapping,
            head_mask,
            output_attentions,
            train,
        )?;

        Ok(RelativeAttentionOutput {
            output_h: self.ff.forward_t(&attention_output.output_h, train),
            output_g: attention_output
                .output_g
                .map(|output_g| self.ff.forward_t(&output_g, train)),
            ..attention_output
        })
    }
}

impl VisitParameters for XLNetLayer {
    fn visit_parameters(&mut self, visitor: &mut dyn ParameterVisitor) {
        self.rel_attn.visit_parameters(visitor);
        self.ff.visit_parameters(visitor);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::activations::Activation;
    use tch::{no_grad, Device, Kind};

    #[test]
    fn feed_forward_preserves_shape_and_normalizes() {
        let config = XLNetConfig {
            d_model: 16,
            d_inner: 24,
            ff_activation: Activation::relu,
            ..Default::default()
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let ff = XLNetFeedForward::new(vs.root() / "ff", &config);
        let input = Tensor::randn([3, 2, 16], (Kind::Float, Device::Cpu));

        let output = no_grad(|| ff.forward_t(&input, false));

        assert_eq!(output.size(), vec![3, 2, 16]);
        let mean = output.mean_dim([-1i64].as_slice(), false, Kind::Float);
        assert!(mean.abs().max().double_value(&[]) < 1e-4);
    }
}
