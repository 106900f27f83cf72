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
use crate::common::init::{NormalInitializer, ParameterVisitor, VisitParameters};
use crate::xlnet::config::{AttentionType, XLNetConfig};
use crate::xlnet::encoder::XLNetLayer;
use crate::xlnet::masks::{attention_masks, expand_head_mask, segment_matrix};
use crate::xlnet::memory::{LayerState, MemoryCache};
use crate::xlnet::positional::RelativePositionalEncoding;
use crate::XLNetError;
use std::borrow::Borrow;
use std::collections::HashMap;
use tch::nn::Init;
use tch::{nn, Kind, Tensor};
use tracing::debug;

/// # Output flags of a forward pass
/// Defaults are read from the `use_mems_train`, `use_mems_eval`, `output_attentions` and
/// `output_hidden_states` fields of the configuration (all `false` when unset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLNetForwardOptions {
    /// Return updated memories when running in training mode
    pub use_mems_train: bool,
    /// Return updated memories when running in inference mode
    pub use_mems_eval: bool,
    /// Return the attention probabilities of every layer
    pub output_attentions: bool,
    /// Return the hidden states entering every layer and the output of the last layer
    pub output_hidden_states: bool,
}

impl From<&XLNetConfig> for XLNetForwardOptions {
    fn from(config: &XLNetConfig) -> Self {
        XLNetForwardOptions {
            use_mems_train: config.use_mems_train.unwrap_or(false),
            use_mems_eval: config.use_mems_eval.unwrap_or(false),
            output_attentions: config.output_attentions.unwrap_or(false),
            output_hidden_states: config.output_hidden_states.unwrap_or(false),
        }
    }
}

impl XLNetForwardOptions {
    fn use_mems(&self, train: bool) -> bool {
        if train {
            self.use_mems_train
        } else {
            self.use_mems_eval
        }
    }
}

/// # XLNet Base model
/// Base architecture for XLNet models. Task-specific models consume its final hidden state.
/// It is made of the following blocks:
/// - `word_embeddings`: Word embeddings
/// - `mask_emb`: Embedding used as the initial query stream of the positions to predict
/// - `layers`: vector of `XLNetLayer` (two-stream relative attention followed by a feed-forward block)
/// - `positional_encoding`: sinusoidal relative position embeddings
/// - `memory_cache`: rolling memory window of the layers
///
/// Parameters are only read by the forward pass. Memories are passed in and returned explicitly:
/// each independent decoding stream keeps its own `Vec<LayerState>`.
pub struct XLNetModel {
    memory_cache: MemoryCache,
    positional_encoding: RelativePositionalEncoding,
    same_length: bool,
    attention_type: AttentionType,
    n_layer: i64,
    word_embeddings: nn::Embedding,
    mask_emb: Tensor,
    layers: Vec<XLNetLayer>,
    dropout: Dropout,
    initializer_range: f64,
    kind: Kind,
    options: XLNetForwardOptions,
}

impl XLNetModel {
    /// Build a new `XLNetModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the XLNet model
    /// * `config` - `XLNetConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_xlnet::xlnet::{XLNetConfig, XLNetModel};
    /// use rust_xlnet::Config;
    /// use std::path::Path;
    /// use tch::{nn, Device};
    ///
    /// # fn main() -> Result<(), rust_xlnet::XLNetError> {
    /// let config_path = Path::new("path/to/config.json");
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = XLNetConfig::from_file(config_path)?;
    /// let xlnet_model = XLNetModel::new(p.root(), &config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(p: P, config: &XLNetConfig) -> Result<XLNetModel, XLNetError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        config.validate()?;
        let p = p.borrow();

        let word_embeddings: nn::Embedding = nn::embedding(
            p / "word_embedding",
            config.vocab_size,
            config.d_model,
            Default::default(),
        );

        let mask_emb = p.var(
            "mask_emb",
            &[1, 1, config.d_model],
            Init::Randn {
                mean: 0.,
                stdev: config.initializer_range,
            },
        );
        let p_layers = p / "layer";
        let layers: Vec<XLNetLayer> = (0..config.n_layer)
            .map(|layer_index| XLNetLayer::new(&p_layers / layer_index, config))
            .collect();

        debug!(
            n_layer = config.n_layer,
            d_model = config.d_model,
            n_head = config.n_head,
            d_head = config.d_head,
            attn_type = ?config.attn_type,
            mem_len = config.mem_len,
            "Created XLNet model"
        );

        Ok(XLNetModel {
            memory_cache: MemoryCache::from_config(config),
            positional_encoding: RelativePositionalEncoding::new(config),
            same_length: config.same_length,
            attention_type: config.attn_type,
            n_layer: config.n_layer,
            word_embeddings,
            mask_emb,
            layers,
            dropout: Dropout::new(config.dropout),
            initializer_range: config.initializer_range,
            kind: config.kind(),
            options: XLNetForwardOptions::from(config),
        })
    }

    /// Default output flags, as read from the configuration
    pub fn default_options(&self) -> XLNetForwardOptions {
        self.options
    }

    pub fn get_input_embeddings(&self) -> &nn::Embedding {
        &self.word_embeddings
    }

    pub fn set_input_embeddings(&mut self, new_embeddings: nn::Embedding) {
        self.word_embeddings = new_embeddings;
    }

    /// Re-draws every parameter of the model with a `NormalInitializer` of standard deviation
    /// `initializer_range`.
    pub fn init_weights(&mut self) {
        let mut initializer = NormalInitializer::new(self.initializer_range);
        self.visit_parameters(&mut initializer);
    }

    /// Head pruning is not supported: returns an `UnsupportedOperation` error for any request
    /// targeting an existing layer.
    pub fn prune_heads(
        &mut self,
        heads_to_prune: &HashMap<usize, Vec<i64>>,
    ) -> Result<(), XLNetError> {
        for (layer_index, heads) in heads_to_prune {
            let n_layer = self.layers.len();
            self.layers
                .get_mut(*layer_index)
                .ok_or_else(|| {
                    XLNetError::ValueError(format!(
                        "Layer {} does not exist, the model has {} layers",
                        layer_index, n_layer
                    ))
                })?
                .prune_heads(heads)?;
        }
        Ok(())
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Optional input tensor of shape (*batch size*, *sequence_length*). This or `input_embeds` must be provided.
    /// * `attention_mask` - Optional attention mask of shape (*batch size*, *sequence_length*). Positions with a mask with value 0 will be masked. Exclusive with `input_mask`.
    /// * `input_mask` - Optional padding mask of shape (*batch size*, *sequence_length*). Positions with a mask with value 1 will be masked. Exclusive with `attention_mask`.
    /// * `old_layer_states` - Optional slice of length `n_layer` containing the memory of every layer, shape (*memory length*, *batch size*, *d_model*)
    /// * `perm_mask` - Optional tensor of shape (*batch size*, *sequence_length*, *sequence_length*). Value 1 at `[b, i, j]` prevents position `i` from attending to position `j`.
    /// * `target_mapping` - Optional tensor of shape (*batch size*, *num_predict*, *sequence_length*) indicating the positions to predict. Enables the query stream.
    /// * `token_type_ids` - Optional tensor (*batch size*, *sequence_length*) indicating the segment of each token
    /// * `input_embeds` - Optional input tensor of shape (*batch size*, *sequence_length*, *d_model*). This or `input_ids` must be provided.
    /// * `head_mask` - Optional head mask of shape (*n_head*) or (*n_layer*, *n_head*). Value 0 silences a head.
    /// * `options` - Optional output flags overriding the configuration defaults
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `XLNetModelOutput` containing:
    ///   - `hidden_state` - `Tensor` of shape (*batch size*, *sequence_length* or *num_predict*, *d_model*)
    ///   - `next_cache` - `Option<Vec<LayerState>>` of length *n_layer* with the updated memories
    ///   - `all_hidden_states` - `Option<Vec<(Tensor, Option<Tensor>)>>` of length *n_layer* + 1 with shape (*batch size*, *sequence_length*, *d_model*) (with optional query stream states)
    ///   - `all_attentions` - `Option<Vec<(Tensor, Option<Tensor>)>>` of length *n_layer* with shape (*batch size*, *n_head*, *sequence_length*, *k_len*) (with optional query stream probabilities)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tch::{nn, Device, Tensor, no_grad, Kind};
    /// # use rust_xlnet::xlnet::{XLNetConfig, XLNetModel};
    /// # fn main() -> Result<(), rust_xlnet::XLNetError> {
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = XLNetConfig::default();
    /// # let xlnet_model = XLNetModel::new(vs.root(), &config)?;
    /// let (batch_size, sequence_length) = (8, 16);
    /// let input_tensor =
    ///     Tensor::randint(32000, [batch_size, sequence_length], (Kind::Int64, device));
    /// let attention_mask = Tensor::ones([batch_size, sequence_length], (Kind::Int64, device));
    /// let target_mapping = Tensor::zeros([batch_size, 1, sequence_length], (Kind::Float, device));
    /// let _ = target_mapping.narrow(2, sequence_length - 1, 1).fill_(1.0);
    ///
    /// let model_output = no_grad(|| {
    ///     xlnet_model.forward_t(
    ///         Some(&input_tensor),
    ///         Some(&attention_mask),
    ///         None,
    ///         None,
    ///         None,
    ///         Some(&target_mapping),
    ///         None,
    ///         None,
    ///         None,
    ///         None,
    ///         false,
    ///     )
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        input_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        input_mask: Option<&Tensor>,
        old_layer_states: Option<&[LayerState]>,
        perm_mask: Option<&Tensor>,
        target_mapping: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
        input_embeds: Option<&Tensor>,
        head_mask: Option<&Tensor>,
        options: Option<XLNetForwardOptions>,
        train: bool,
    ) -> Result<XLNetModelOutput, XLNetError> {
        let options = options.unwrap_or(self.options);

        let word_emb_k = match (input_ids, input_embeds) {
            (Some(_), Some(_)) => {
                return Err(XLNetError::ValueError(
                    "Only one of input ids or input embeddings may be set".into(),
                ));
            }
            (Some(input_value), None) => input_value
                .transpose(0, 1)
                .contiguous()
                .apply(&self.word_embeddings),
            (None, Some(embeds)) => embeds.transpose(0, 1).contiguous(),
            (None, None) => {
                return Err(XLNetError::ValueError(
                    "At least one of input ids or input embeddings must be set".into(),
                ));
            }
        }
        .to_kind(self.kind);
        let (q_len, batch_size) = (word_emb_k.size()[0], word_emb_k.size()[1]);
        let device = word_emb_k.device();

        let input_mask = match (input_mask, attention_mask) {
            (Some(_), Some(_)) => {
                return Err(XLNetError::ValueError(
                    "Only one of input mask or attention mask may be set".into(),
                ));
            }
            (Some(input_mask), None) => Some(input_mask.transpose(0, 1).to_kind(self.kind)),
            (None, Some(attention_mask)) => {
                Some(1.0 - attention_mask.transpose(0, 1).to_kind(self.kind))
            }
            (None, None) => None,
        };

        if let Some(mems) = old_layer_states {
            if mems.len() as i64 != self.n_layer {
                return Err(XLNetError::ValueError(format!(
                    "Expected a memory for each of the {} layers, got {}",
                    self.n_layer,
                    mems.len()
                )));
            }
            let mut memory_length = None;
            for (layer_idx, mem) in mems.iter().enumerate() {
                let shape = mem.prev_content.size();
                let valid = shape.len() == 3
                    && shape[1] == batch_size
                    && *memory_length.get_or_insert(shape[0]) == shape[0];
                if !valid {
                    return Err(XLNetError::ValueError(format!(
                        "Memory of layer {} must have shape (m_len, {}, d_model) with the same \
                         m_len for every layer, got {:?}",
                        layer_idx, batch_size, shape
                    )));
                }
            }
        }
        let m_len = old_layer_states
            .and_then(|mems| mems.first())
            .map_or(0, LayerState::memory_length);
        let k_len = q_len + m_len;

        let perm_mask =
            perm_mask.map(|perm_mask| perm_mask.to_kind(self.kind).permute([1, 2, 0]).contiguous());
        let target_mapping = target_mapping.map(|target_mapping| {
            target_mapping
                .to_kind(self.kind)
                .permute([1, 2, 0])
                .contiguous()
        });
        let token_type_ids =
            token_type_ids.map(|token_type_ids| token_type_ids.transpose(0, 1).contiguous());
        let use_mems = options.use_mems(train);

        debug!(
            q_len,
            m_len,
            k_len,
            batch_size,
            two_stream = target_mapping.is_some(),
            use_mems,
            "XLNet forward pass"
        );

        let masks = attention_masks(
            self.attention_type,
            self.same_length,
            q_len,
            m_len,
            batch_size,
            input_mask.as_ref(),
            perm_mask.as_ref(),
            self.kind,
            device,
        );

        let mut output_h = word_emb_k.apply_t(&self.dropout, train);
        let mut output_g = target_mapping.as_ref().map(|target_mapping| {
            self.mask_emb
                .to_kind(self.kind)
                .expand([target_mapping.size()[0], batch_size, -1], true)
                .apply_t(&self.dropout, train)
        });

        let seg_mat = token_type_ids
            .as_ref()
            .map(|token_type_ids| segment_matrix(token_type_ids, m_len, self.kind));

        let pos_emb = self
            .positional_encoding
            .forward(q_len, k_len, Some(batch_size), self.kind, device)
            .apply_t(&self.dropout, train);

        let head_masks = expand_head_mask(head_mask, self.n_layer, self.kind)?;

        let mut next_cache: Option<Vec<LayerState>> = if use_mems {
            Some(Vec::with_capacity(self.layers.len()))
        } else {
            None
        };
        let mut all_hidden_states: Option<Vec<(Tensor, Option<Tensor>)>> =
            if options.output_hidden_states {
                Some(Vec::with_capacity(self.layers.len() + 1))
            } else {
                None
            };
        let mut all_attentions: Option<Vec<(Tensor, Option<Tensor>)>> =
            if options.output_attentions {
                Some(Vec::with_capacity(self.layers.len()))
            } else {
                None
            };

        for (layer_idx, (layer, layer_head_mask)) in
            self.layers.iter().zip(head_masks.iter()).enumerate()
        {
            let layer_state = old_layer_states.map(|mems| &mems[layer_idx]);
            if let Some(next_cache) = next_cache.as_mut() {
                next_cache.push(self.memory_cache.cache_mem(&output_h, layer_state));
            }
            if let Some(hidden_states) = all_hidden_states.as_mut() {
                hidden_states.push((output_h.copy(), output_g.as_ref().map(Tensor::copy)));
            }

            let layer_output = layer.forward_t(
                &output_h,
                output_g.as_ref(),
                masks.content_mask.as_ref(),
                masks.query_mask.as_ref(),
                &pos_emb,
                seg_mat.as_ref(),
                layer_state,
                target_mapping.as_ref(),
                layer_head_mask.as_ref(),
                options.output_attentions,
                train,
            )?;
            output_h = layer_output.output_h;
            output_g = layer_output.output_g;

            if let (Some(attentions), Some(attention_probas_h)) =
                (all_attentions.as_mut(), layer_output.attention_probas_h)
            {
                attentions.push((attention_probas_h, layer_output.attention_probas_g));
            }
        }
        if let Some(hidden_states) = all_hidden_states.as_mut() {
            hidden_states.push((output_h.copy(), output_g.as_ref().map(Tensor::copy)));
        }

        let hidden_state = output_g
            .unwrap_or(output_h)
            .apply_t(&self.dropout, train)
            .permute([1, 0, 2])
            .contiguous();

        let all_hidden_states = all_hidden_states.map(|hidden_states| {
            hidden_states
                .into_iter()
                .map(|(h, g)| {
                    (
                        h.permute([1, 0, 2]).contiguous(),
                        g.map(|g| g.permute([1, 0, 2]).contiguous()),
                    )
                })
                .collect()
        });

        Ok(XLNetModelOutput {
            hidden_state,
            next_cache,
            all_hidden_states,
            all_attentions,
        })
    }
}

impl VisitParameters for XLNetModel {
    fn visit_parameters(&mut self, visitor: &mut dyn ParameterVisitor) {
        visitor.visit_embedding(&mut self.word_embeddings);
        visitor.visit_parameter("mask_emb", &mut self.mask_emb);
        for layer in self.layers.iter_mut() {
            layer.visit_parameters(visitor);
        }
    }
}

/// Container for the XLNet model output.
pub struct XLNetModelOutput {
    /// Last hidden states of the query stream when a target mapping was given, of the content
    /// stream otherwise
    pub hidden_state: Tensor,
    /// Updated memories, one per layer
    pub next_cache: Option<Vec<LayerState>>,
    /// Hidden states entering each layer and output of the last layer (content stream, query stream)
    pub all_hidden_states: Option<Vec<(Tensor, Option<Tensor>)>>,
    /// Attention probabilities of each layer (content stream, query stream)
    pub all_attentions: Option<Vec<(Tensor, Option<Tensor>)>>,
}

impl XLNetModelOutput {
    /// Flattens the output into labeled tensors, in order: `last_hidden_state`, `mems.{i}`,
    /// `hidden_states.{i}.h`, `hidden_states.{i}.g`, `attentions.{i}.h`, `attentions.{i}.g`.
    /// Absent outputs are skipped.
    pub fn into_named_tensors(self) -> Vec<(String, Tensor)> {
        let mut named_tensors = vec![("last_hidden_state".to_string(), self.hidden_state)];
        if let Some(mems) = self.next_cache {
            named_tensors.extend(
                mems.into_iter()
                    .enumerate()
                    .map(|(i, mem)| (format!("mems.{}", i), mem.prev_content)),
            );
        }
        for (prefix, values) in [
            ("hidden_states", self.all_hidden_states),
            ("attentions", self.all_attentions),
        ] {
            for (i, (h, g)) in values.into_iter().flatten().enumerate() {
                named_tensors.push((format!("{}.{}.h", prefix, i), h));
                if let Some(g) = g {
                    named_tensors.push((format!("{}.{}.g", prefix, i), g));
                }
            }
        }
        named_tensors
    }
}
