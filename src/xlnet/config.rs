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

use crate::common::activations::Activation;
use crate::common::kind::Precision;
use crate::{Config, XLNetError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tch::Kind;

#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq)]
/// # Attention type for the model (bidirectional or unidirectional)
pub enum AttentionType {
    /// Bidirectional (XLNet)
    bi,
    /// Unidirectional (Transformer-XL)
    uni,
}

impl FromStr for AttentionType {
    type Err = XLNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bi" => Ok(AttentionType::bi),
            "uni" => Ok(AttentionType::uni),
            _ => Err(XLNetError::InvalidConfigurationError(format!(
                "Unknown attention type {}, expected bi or uni",
                s
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # XLNet model configuration
/// Defines the XLNet model architecture (e.g. number of layers, hidden layer size, memory length...)
/// and the default output flags of the forward pass.
pub struct XLNetConfig {
    pub vocab_size: i64,
    pub d_model: i64,
    pub n_layer: i64,
    pub d_head: i64,
    pub n_head: i64,
    pub d_inner: i64,
    pub ff_activation: Activation,
    pub attn_type: AttentionType,
    pub initializer_range: f64,
    pub layer_norm_eps: Option<f64>,
    pub dropout: f64,
    pub mem_len: Option<i64>,
    pub reuse_len: Option<i64>,
    pub clamp_len: Option<i64>,
    #[serde(default)]
    pub bi_data: bool,
    #[serde(default)]
    pub same_length: bool,
    pub precision: Option<Precision>,
    pub use_mems_train: Option<bool>,
    pub use_mems_eval: Option<bool>,
    pub output_attentions: Option<bool>,
    pub output_hidden_states: Option<bool>,
}

impl Config for XLNetConfig {}

impl Default for XLNetConfig {
    fn default() -> Self {
        XLNetPreset::XLNetBaseCased.config()
    }
}

impl XLNetConfig {
    /// Tensor kind used for the masks and positional encodings built by the model
    pub fn kind(&self) -> Kind {
        self.precision.unwrap_or_default().kind()
    }

    /// Checks the consistency of the architecture parameters.
    pub fn validate(&self) -> Result<(), XLNetError> {
        let positive = [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("n_layer", self.n_layer),
            ("n_head", self.n_head),
            ("d_head", self.d_head),
            ("d_inner", self.d_inner),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, value)| *value <= 0) {
            return Err(XLNetError::InvalidConfigurationError(format!(
                "{} must be strictly positive, got {}",
                name, value
            )));
        }
        if self.d_model % 2 != 0 {
            return Err(XLNetError::InvalidConfigurationError(format!(
                "d_model must be even for sinusoidal position embeddings, got {}",
                self.d_model
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(XLNetError::InvalidConfigurationError(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        for (name, value) in [("mem_len", self.mem_len), ("reuse_len", self.reuse_len)].iter() {
            if let Some(value) = value {
                if *value < 0 {
                    return Err(XLNetError::InvalidConfigurationError(format!(
                        "{} must not be negative, got {}",
                        name, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// # Named XLNet configurations
/// Hyper-parameters of the published XLNet checkpoints. Weights are not provided by this crate and
/// need to be loaded in the variable store separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XLNetPreset {
    XLNetBaseCased,
    XLNetLargeCased,
    ChineseXLNetBase,
    ChineseXLNetMid,
    ChineseXLNetLarge,
}

impl XLNetPreset {
    pub fn name(&self) -> &'static str {
        match self {
            XLNetPreset::XLNetBaseCased => "xlnet-base-cased",
            XLNetPreset::XLNetLargeCased => "xlnet-large-cased",
            XLNetPreset::ChineseXLNetBase => "chinese-xlnet-base",
            XLNetPreset::ChineseXLNetMid => "chinese-xlnet-mid",
            XLNetPreset::ChineseXLNetLarge => "chinese-xlnet-large",
        }
    }

    pub fn config(&self) -> XLNetConfig {
        let (d_model, n_layer, n_head, d_inner, ff_activation) = match self {
            XLNetPreset::XLNetBaseCased => (768, 12, 12, 3072, Activation::gelu),
            XLNetPreset::XLNetLargeCased => (1024, 24, 16, 4096, Activation::gelu),
            XLNetPreset::ChineseXLNetBase => (768, 12, 12, 3072, Activation::relu),
            XLNetPreset::ChineseXLNetMid => (768, 24, 12, 3072, Activation::relu),
            XLNetPreset::ChineseXLNetLarge => (1024, 24, 16, 4096, Activation::relu),
        };
        XLNetConfig {
            vocab_size: 32000,
            d_model,
            n_layer,
            d_head: 64,
            n_head,
            d_inner,
            ff_activation,
            attn_type: AttentionType::bi,
            initializer_range: 0.02,
            layer_norm_eps: Some(1e-12),
            dropout: 0.1,
            mem_len: None,
            reuse_len: None,
            clamp_len: Some(-1),
            bi_data: false,
            same_length: false,
            precision: None,
            use_mems_train: None,
            use_mems_eval: None,
            output_attentions: None,
            output_hidden_states: None,
        }
    }
}

impl FromStr for XLNetPreset {
    type Err = XLNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            XLNetPreset::XLNetBaseCased,
            XLNetPreset::XLNetLargeCased,
            XLNetPreset::ChineseXLNetBase,
            XLNetPreset::ChineseXLNetMid,
            XLNetPreset::ChineseXLNetLarge,
        ]
        .iter()
        .find(|preset| preset.name() == s)
        .copied()
        .ok_or_else(|| {
            XLNetError::InvalidConfigurationError(format!("Unknown XLNet configuration {}", s))
        })
    }
}
