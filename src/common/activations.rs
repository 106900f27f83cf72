// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::error::XLNetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tch::Tensor;

pub fn _gelu(x: &Tensor) -> Tensor {
    x * 0.5 * (1.0 + (x / ((2.0_f64).sqrt())).erf())
}

pub fn _relu(x: &Tensor) -> Tensor {
    x.relu()
}

pub fn _swish(x: &Tensor) -> Tensor {
    x * x.sigmoid()
}

pub fn _mish(x: &Tensor) -> Tensor {
    x * (x.softplus().tanh())
}

pub fn _tanh(x: &Tensor) -> Tensor {
    x.tanh()
}

pub fn _sigmoid(x: &Tensor) -> Tensor {
    x.sigmoid()
}

pub fn _linear(x: &Tensor) -> Tensor {
    x.shallow_clone()
}

pub struct TensorFunction(fn(&Tensor) -> Tensor);

impl TensorFunction {
    pub fn new(fun: fn(&Tensor) -> Tensor) -> Self {
        Self(fun)
    }

    pub fn get_fn(&self) -> &fn(&Tensor) -> Tensor {
        &self.0
    }
}

impl fmt::Debug for TensorFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TensorFunction")
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq)]
/// # Activation function used in the feed-forward blocks
pub enum Activation {
    /// Rectified Linear Unit
    relu,
    /// Gaussian Error Linear Unit ([Hendrycks et al., 2016,](https://arxiv.org/abs/1606.08415))
    gelu,
    /// Tanh
    tanh,
    /// Sigmoid
    sigmoid,
    /// Mish ([Misra, 2019](https://arxiv.org/abs/1908.08681))
    mish,
    /// Identity
    linear,
    /// Swish ([Ramachandran, 2017](https://arxiv.org/abs/1710.05941))
    swish,
}

impl Activation {
    pub fn get_function(&self) -> TensorFunction {
        TensorFunction::new(match self {
            Activation::relu => _relu,
            Activation::gelu => _gelu,
            Activation::tanh => _tanh,
            Activation::sigmoid => _sigmoid,
            Activation::mish => _mish,
            Activation::linear => _linear,
            Activation::swish => _swish,
        })
    }
}

impl FromStr for Activation {
    type Err = XLNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Activation::relu),
            "gelu" => Ok(Activation::gelu),
            "tanh" => Ok(Activation::tanh),
            "sigmoid" => Ok(Activation::sigmoid),
            "mish" => Ok(Activation::mish),
            "linear" => Ok(Activation::linear),
            "swish" => Ok(Activation::swish),
            _ => Err(XLNetError::InvalidConfigurationError(format!(
                "Activation function {} not found, expected one of relu, gelu, tanh, sigmoid, mish, linear, swish",
                s
            ))),
        }
    }
}
