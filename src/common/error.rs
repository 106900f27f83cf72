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

use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XLNetError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl From<std::io::Error> for XLNetError {
    fn from(error: std::io::Error) -> Self {
        XLNetError::IOError(error.to_string())
    }
}

impl From<TchError> for XLNetError {
    fn from(error: TchError) -> Self {
        XLNetError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for XLNetError {
    fn from(error: serde_json::Error) -> Self {
        XLNetError::InvalidConfigurationError(error.to_string())
    }
}
