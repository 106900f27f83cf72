//! # rust-xlnet
//!
//! Forward computation of the XLNet transformer on the `tch` (libtorch) tensor engine: relative
//! multi-head attention with content, position and segment scores, two-stream (content and query)
//! attention for permutation language modelling and a rolling memory for segment recurrence.
//!
//! ```no_run
//! use rust_xlnet::xlnet::{XLNetConfig, XLNetModel};
//! use tch::{nn, no_grad, Device, Kind, Tensor};
//!
//! # fn main() -> Result<(), rust_xlnet::XLNetError> {
//! let vs = nn::VarStore::new(Device::Cpu);
//! let config = XLNetConfig::default();
//! let model = XLNetModel::new(vs.root(), &config)?;
//!
//! let input_ids = Tensor::randint(config.vocab_size, [1, 12], (Kind::Int64, Device::Cpu));
//! let output = no_grad(|| {
//!     model.forward_t(
//!         Some(&input_ids),
//!         None,
//!         None,
//!         None,
//!         None,
//!         None,
//!         None,
//!         None,
//!         None,
//!         None,
//!         false,
//!     )
//! })?;
//! assert_eq!(output.hidden_state.size(), vec![1, 12, config.d_model]);
//! # Ok(())
//! # }
//! ```
//!
//! Weights are not bundled: load them into the `VarStore` (`vs.load`) or draw them with
//! `XLNetModel::init_weights`.

pub mod common;
pub mod xlnet;

pub use common::{Config, XLNetError};
