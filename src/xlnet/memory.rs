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

use crate::xlnet::config::XLNetConfig;
use tch::Tensor;
use tracing::trace;

#[derive(Debug)]
/// # Memory of an XLNet layer
/// Stores the hidden states that entered the layer during previous forward passes, shape
/// (*memory length*, *batch size*, *d_model*). The content is detached from the autograd graph.
///
/// Memories are owned by the caller and returned as new values by every forward pass: concurrent
/// decoding streams must each keep their own vector of `LayerState`.
pub struct LayerState {
    /// Cached content
    pub prev_content: Tensor,
}

impl Clone for LayerState {
    fn clone(&self) -> Self {
        LayerState {
            prev_content: self.prev_content.copy(),
        }
    }
}

impl LayerState {
    pub fn new(prev_content: Tensor) -> LayerState {
        LayerState {
            prev_content: prev_content.detach(),
        }
    }

    /// Number of cached positions
    pub fn memory_length(&self) -> i64 {
        self.prev_content.size()[0]
    }
}

/// # Rolling memory window
/// Only the first `reuse_len` positions of a layer input are cached when set, and the memory
/// keeps the trailing `mem_len` positions. Without `mem_len` (or with 0) the full history is kept.
#[derive(Debug, Clone, Copy)]
pub struct MemoryCache {
    mem_len: Option<i64>,
    reuse_len: Option<i64>,
}

impl MemoryCache {
    pub fn new(mem_len: Option<i64>, reuse_len: Option<i64>) -> MemoryCache {
        MemoryCache { mem_len, reuse_len }
    }

    pub fn from_config(config: &XLNetConfig) -> MemoryCache {
        MemoryCache::new(config.mem_len, config.reuse_len)
    }

    /// Appends the cacheable part of `current_output` (shape (*sequence length*, *batch size*, *d_model*))
    /// to the previous memory of the layer and truncates the result to the memory window.
    pub fn cache_mem(
        &self,
        current_output: &Tensor,
        previous_cached_state: Option<&LayerState>,
    ) -> LayerState {
        let current_output = match self.reuse_len {
            Some(value) if value > 0 => {
                current_output.narrow(0, 0, value.min(current_output.size()[0]))
            }
            _ => current_output.shallow_clone(),
        };
        let new_memory = match previous_cached_state {
            Some(previous_past) => Tensor::cat(&[&previous_past.prev_content, &current_output], 0),
            None => current_output,
        };
        let length = new_memory.size()[0];
        let new_memory = match self.mem_len {
            Some(value) if value > 0 && value < length => {
                new_memory.narrow(0, length - value, value)
            }
            _ => new_memory,
        };
        trace!(
            memory_length = new_memory.size()[0],
            mem_len = self.mem_len,
            "Updated layer memory"
        );
        LayerState::new(new_memory)
    }
}
