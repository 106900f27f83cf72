pub mod activations;
pub mod config;
pub(crate) mod dropout;
pub mod einsum;
pub mod error;
pub mod init;
pub mod kind;

pub use activations::Activation;
pub use config::Config;
pub use einsum::{contract, einsum4x4};
pub use error::XLNetError;
pub use init::{NormalInitializer, ParameterVisitor, VisitParameters};
pub use kind::Precision;
