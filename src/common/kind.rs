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

use crate::common::error::XLNetError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tch::Kind;

#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq)]
/// # Floating point precision of the tensors created by the model
/// Masks, segment matrices and positional encodings are built with this precision. The variable
/// store holding the model weights should be converted to the same kind (`VarStore::set_kind`).
pub enum Precision {
    float16,
    bfloat16,
    float32,
    float64,
}

impl Default for Precision {
    fn default() -> Self {
        Precision::float32
    }
}

impl Precision {
    pub fn kind(&self) -> Kind {
        match self {
            Precision::float16 => Kind::Half,
            Precision::bfloat16 => Kind::BFloat16,
            Precision::float32 => Kind::Float,
            Precision::float64 => Kind::Double,
        }
    }
}

impl FromStr for Precision {
    type Err = XLNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float16" => Ok(Precision::float16),
            "bfloat16" => Ok(Precision::bfloat16),
            "float32" => Ok(Precision::float32),
            "float64" => Ok(Precision::float64),
            _ => Err(XLNetError::InvalidConfigurationError(format!(
                "Unsupported precision {}, expected one of float16, bfloat16, float32, float64",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precision_to_kind() {
        assert_eq!(Precision::default().kind(), Kind::Float);
        assert_eq!("float64".parse::<Precision>().unwrap().kind(), Kind::Double);
        assert!("int8".parse::<Precision>().is_err());
    }
}
