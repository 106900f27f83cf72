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

use tch::{nn, no_grad, Tensor};

/// # Visitor over the parameters of a model
/// Each kind of component hands its parameters to the matching method. Implementations decide how
/// to (re-)initialize or inspect them.
pub trait ParameterVisitor {
    fn visit_linear(&mut self, linear: &mut nn::Linear);

    fn visit_embedding(&mut self, embedding: &mut nn::Embedding);

    fn visit_layer_norm(&mut self, layer_norm: &mut nn::LayerNorm);

    /// Free-standing parameter (projection matrices, attention biases, segment and mask embeddings)
    fn visit_parameter(&mut self, name: &str, parameter: &mut Tensor);
}

/// Components exposing their parameters to a `ParameterVisitor`, children first.
pub trait VisitParameters {
    fn visit_parameters(&mut self, visitor: &mut dyn ParameterVisitor);
}

/// # Normal initialization
/// Weights and free-standing parameters are drawn from N(`mean`, `std`), linear biases are set to zero
/// and layer normalizations to the identity (weight 1, bias 0). Drawing uses the global `tch`
/// generator: seed it with `tch::manual_seed` for reproducible parameters.
#[derive(Debug, Clone, Copy)]
pub struct NormalInitializer {
    pub mean: f64,
    pub std: f64,
}

impl NormalInitializer {
    pub fn new(std: f64) -> NormalInitializer {
        NormalInitializer { mean: 0.0, std }
    }

    fn normal(&self, tensor: &mut Tensor) {
        let values = Tensor::randn(tensor.size(), (tensor.kind(), tensor.device())) * self.std
            + self.mean;
        no_grad(|| tensor.copy_(&values));
    }
}

impl ParameterVisitor for NormalInitializer {
    fn visit_linear(&mut self, linear: &mut nn::Linear) {
        self.normal(&mut linear.ws);
        if let Some(bs) = linear.bs.as_mut() {
            no_grad(|| {
                let _ = bs.zero_();
            });
        }
    }

    fn visit_embedding(&mut self, embedding: &mut nn::Embedding) {
        self.normal(&mut embedding.ws);
    }

    fn visit_layer_norm(&mut self, layer_norm: &mut nn::LayerNorm) {
        no_grad(|| {
            if let Some(ws) = layer_norm.ws.as_mut() {
                let _ = ws.fill_(1.0);
            }
            if let Some(bs) = layer_norm.bs.as_mut() {
                let _ = bs.zero_();
            }
        });
    }

    fn visit_parameter(&mut self, _name: &str, parameter: &mut Tensor) {
        self.normal(parameter);
    }
}
