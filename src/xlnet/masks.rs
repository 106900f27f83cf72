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

//! Masks follow the float convention of the relative attention: 1.0 marks a key that may not be
//! attended to, 0.0 a visible key. Attention masks have shape (*q_len*, *k_len*, *batch size* or 1, 1).

use crate::xlnet::config::AttentionType;
use crate::XLNetError;
use tch::{Device, Kind, Tensor};

/// Causal mask of shape (*q_len*, *m_len* + *q_len*). Memory positions are always visible.
///
/// ```text
///       same_length=false:      same_length=true:
///       <m_len> < q_len >       <m_len> < q_len >
///    ^ [0 0 0 0 0 1 1 1 1]     [0 0 0 0 0 1 1 1 1]
///      [0 0 0 0 0 0 1 1 1]     [1 0 0 0 0 0 1 1 1]
/// q_len[0 0 0 0 0 0 0 1 1]     [1 1 0 0 0 0 0 1 1]
///      [0 0 0 0 0 0 0 0 1]     [1 1 1 0 0 0 0 0 1]
///    v [0 0 0 0 0 0 0 0 0]     [1 1 1 1 0 0 0 0 0]
/// ```
pub fn causal_mask(
    q_len: i64,
    m_len: i64,
    same_length: bool,
    kind: Kind,
    device: Device,
) -> Tensor {
    let attention_mask = Tensor::ones([q_len, q_len], (kind, device));
    let attention_mask_pad = Tensor::zeros([q_len, m_len], (kind, device));
    let mask_up = attention_mask.triu(1);
    let output = Tensor::cat(&[&attention_mask_pad, &mask_up], 1);
    if same_length {
        let mask_low = attention_mask.tril(-1);
        Tensor::cat(
            &[
                output.slice(1, 0, q_len, 1) + mask_low,
                output.slice(1, q_len, q_len + m_len, 1),
            ],
            1,
        )
    } else {
        output
    }
}

/// Masks of the two attention streams
pub struct AttentionMasks {
    /// Content stream mask: a position may always attend to itself
    pub content_mask: Option<Tensor>,
    /// Query stream mask: causal and data masks only
    pub query_mask: Option<Tensor>,
}

/// Combines the causal mask (unidirectional attention only), the padding mask and the permutation
/// mask.
///
/// The masks are summed and every positive entry is masked: a key excluded by any of the
/// masks stays excluded.
///
/// # Arguments
///
/// * `input_mask` - Optional padding mask of shape (*q_len*, *batch size*), 1.0 for padding
/// * `perm_mask` - Optional permutation mask of shape (*q_len*, *q_len*, *batch size*)
#[allow(clippy::too_many_arguments)]
pub fn attention_masks(
    attention_type: AttentionType,
    same_length: bool,
    q_len: i64,
    m_len: i64,
    batch_size: i64,
    input_mask: Option<&Tensor>,
    perm_mask: Option<&Tensor>,
    kind: Kind,
    device: Device,
) -> AttentionMasks {
    let causal = match attention_type {
        AttentionType::uni => Some(
            causal_mask(q_len, m_len, same_length, kind, device)
                .unsqueeze(-1)
                .unsqueeze(-1),
        ),
        AttentionType::bi => None,
    };

    let data_mask = match (input_mask, perm_mask) {
        (Some(input_mask), Some(perm_mask)) => Some(input_mask.unsqueeze(0) + perm_mask),
        (Some(input_mask), None) => Some(input_mask.unsqueeze(0)),
        (None, Some(perm_mask)) => Some(perm_mask.shallow_clone()),
        (None, None) => None,
    };

    let attention_mask = match data_mask {
        Some(data_mask) => {
            let data_mask = data_mask.to_kind(kind);
            let data_mask = if m_len > 0 {
                let mems_mask =
                    Tensor::zeros([data_mask.size()[0], m_len, batch_size], (kind, device));
                Tensor::cat(&[&mems_mask, &data_mask], 1)
            } else {
                data_mask
            }
            .unsqueeze(-1);
            Some(match causal {
                Some(causal) => causal + data_mask,
                None => data_mask,
            })
        }
        None => causal,
    }
    .map(|mask| mask.gt(0).to_kind(kind));

    let content_mask = attention_mask.as_ref().map(|mask| {
        let mut non_target_mask = -Tensor::eye(q_len, (kind, device));
        if m_len > 0 {
            non_target_mask = Tensor::cat(
                &[Tensor::zeros([q_len, m_len], (kind, device)), non_target_mask],
                -1,
            );
        }
        (mask + non_target_mask.unsqueeze(-1).unsqueeze(-1))
            .gt(0)
            .to_kind(kind)
    });

    AttentionMasks {
        content_mask,
        query_mask: attention_mask,
    }
}

/// One-hot segment matrix of shape (*q_len*, *k_len*, *batch size*, 2): index 1 is set when the
/// query and key belong to different segments. Memory positions are assigned to segment 0.
///
/// # Arguments
///
/// * `token_type_ids` - segment ids of shape (*q_len*, *batch size*)
pub fn segment_matrix(token_type_ids: &Tensor, m_len: i64, kind: Kind) -> Tensor {
    let token_type_ids = token_type_ids.to_kind(Kind::Int64);
    let cat_ids = if m_len > 0 {
        let mem_pad = Tensor::zeros(
            [m_len, token_type_ids.size()[1]],
            (Kind::Int64, token_type_ids.device()),
        );
        Tensor::cat(&[&mem_pad, &token_type_ids], 0)
    } else {
        token_type_ids.shallow_clone()
    };
    token_type_ids
        .unsqueeze(1)
        .ne_tensor(&cat_ids.unsqueeze(0))
        .to_kind(Kind::Int64)
        .one_hot(2)
        .to_kind(kind)
}

/// Expands a head mask of shape (*n_head*) or (*n_layer*, *n_head*) to one mask per layer, each of
/// shape (1, *n_head*, 1, 1) to broadcast over attention probabilities (*batch*, *n_head*, *q_len*, *k_len*).
/// 1.0 keeps a head, 0.0 silences it.
pub fn expand_head_mask(
    head_mask: Option<&Tensor>,
    n_layer: i64,
    kind: Kind,
) -> Result<Vec<Option<Tensor>>, XLNetError> {
    let head_mask = match head_mask {
        Some(head_mask) => head_mask,
        None => return Ok((0..n_layer).map(|_| None).collect()),
    };
    let per_layer = match head_mask.dim() {
        1 => head_mask.unsqueeze(0).expand([n_layer, -1], false),
        2 if head_mask.size()[0] == n_layer => head_mask.shallow_clone(),
        2 => {
            return Err(XLNetError::ValueError(format!(
                "Head mask defines {} layers, the model has {}",
                head_mask.size()[0],
                n_layer
            )));
        }
        dim => {
            return Err(XLNetError::ValueError(format!(
                "Head mask must have shape (n_head) or (n_layer, n_head), got {} dimensions",
                dim
            )));
        }
    };
    Ok((0..n_layer)
        .map(|layer| Some(per_layer.get(layer).to_kind(kind).reshape([1, -1, 1, 1])))
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    fn values(tensor: &Tensor) -> Vec<Vec<f64>> {
        let size = tensor.size();
        (0..size[0])
            .map(|i| (0..size[1]).map(|j| tensor.double_value(&[i, j])).collect())
            .collect()
    }

    #[test]
    fn causal_mask_with_memory() {
        let mask = causal_mask(3, 2, false, Kind::Float, Device::Cpu);

        assert_eq!(
            values(&mask),
            vec![
                vec![0.0, 0.0, 0.0, 1.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 0.0],
            ]
        );
    }

    #[test]
    fn causal_mask_same_length() {
        let mask = causal_mask(3, 2, true, Kind::Float, Device::Cpu);

        assert_eq!(
            values(&mask),
            vec![
                vec![0.0, 0.0, 0.0, 1.0, 1.0],
                vec![1.0, 0.0, 0.0, 0.0, 1.0],
                vec![1.0, 1.0, 0.0, 0.0, 0.0],
            ]
        );
    }

    #[test]
    fn bidirectional_without_data_mask_is_unmasked() {
        let masks = attention_masks(
            AttentionType::bi,
            false,
            4,
            0,
            2,
            None,
            None,
            Kind::Float,
            Device::Cpu,
        );
        assert!(masks.content_mask.is_none());
        assert!(masks.query_mask.is_none());
    }

    #[test]
    fn content_stream_may_attend_to_itself() {
        // no position may see the last token
        let perm_mask = Tensor::zeros([3, 3, 1], (Kind::Float, Device::Cpu));
        let _ = perm_mask.narrow(1, 2, 1).fill_(1.0);

        let masks = attention_masks(
            AttentionType::bi,
            false,
            3,
            2,
            1,
            None,
            Some(&perm_mask),
            Kind::Float,
            Device::Cpu,
        );
        let query_mask = masks.query_mask.unwrap();
        let content_mask = masks.content_mask.unwrap();

        assert_eq!(query_mask.size(), vec![3, 5, 1, 1]);
        assert_eq!(
            values(&query_mask.squeeze_dim(-1).squeeze_dim(-1)),
            vec![
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
            ]
        );
        assert_eq!(
            values(&content_mask.squeeze_dim(-1).squeeze_dim(-1)),
            vec![
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0, 0.0, 0.0],
            ]
        );
    }

    #[test]
    fn padding_and_causal_masks_are_combined() {
        // second batch element has one padding position at the end
        let input_mask = Tensor::from_slice(&[0f32, 0., 0., 0., 0., 1.]).view([3, 2]);

        let masks = attention_masks(
            AttentionType::uni,
            false,
            3,
            0,
            2,
            Some(&input_mask),
            None,
            Kind::Float,
            Device::Cpu,
        );
        let query_mask = masks.query_mask.unwrap();

        assert_eq!(query_mask.size(), vec![3, 3, 2, 1]);
        // first query: future keys masked by the causal mask, padding key masked once
        assert_eq!(query_mask.double_value(&[0, 2, 1, 0]), 1.0);
        assert_eq!(query_mask.double_value(&[2, 2, 0, 0]), 0.0);
        assert_eq!(query_mask.double_value(&[2, 2, 1, 0]), 1.0);
        assert_eq!(query_mask.double_value(&[2, 1, 1, 0]), 0.0);
        // the content stream still lets the padding position see itself
        assert_eq!(masks.content_mask.unwrap().double_value(&[2, 2, 1, 0]), 0.0);
    }

    #[test]
    fn segment_matrix_with_memory() {
        let token_type_ids = Tensor::from_slice(&[0i64, 1]).view([2, 1]);
        let seg_mat = segment_matrix(&token_type_ids, 1, Kind::Float);

        assert_eq!(seg_mat.size(), vec![2, 3, 1, 2]);
        // query 1 (segment 1) against memory (segment 0) differs, against itself matches
        assert_eq!(seg_mat.double_value(&[1, 0, 0, 1]), 1.0);
        assert_eq!(seg_mat.double_value(&[1, 2, 0, 0]), 1.0);
        assert_eq!(seg_mat.double_value(&[0, 0, 0, 0]), 1.0);
    }

    #[test]
    fn head_mask_expansion() {
        let head_mask = Tensor::from_slice(&[1f32, 0., 1.]);
        let per_layer = expand_head_mask(Some(&head_mask), 2, Kind::Float).unwrap();

        assert_eq!(per_layer.len(), 2);
        let layer_mask = per_layer[1].as_ref().unwrap();
        assert_eq!(layer_mask.size(), vec![1, 3, 1, 1]);
        assert_eq!(layer_mask.double_value(&[0, 1, 0, 0]), 0.0);

        let head_mask = Tensor::ones([2, 3], (Kind::Float, Device::Cpu));
        assert_eq!(
            expand_head_mask(Some(&head_mask), 2, Kind::Float)
                .unwrap()
                .len(),
            2
        );
        assert!(expand_head_mask(Some(&head_mask), 4, Kind::Float).is_err());
        let head_mask = Tensor::ones([2, 3, 1], (Kind::Float, Device::Cpu));
        assert!(expand_head_mask(Some(&head_mask), 2, Kind::Float).is_err());
        assert!(expand_head_mask(None, 3, Kind::Float)
            .unwrap()
            .iter()
            .all(Option::is_none));
    }
}
