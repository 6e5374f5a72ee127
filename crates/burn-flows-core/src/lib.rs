//! Core Building Blocks for Normalizing Flows
//!
//! This crate provides the pieces coupling layers are made of. The invertible
//! transforms themselves live in `burn-flows`.
//!
//! # Modules
//!
//! ## Masking
//!
//! - [`mask`] - Checkerboard and channel partition masks
//!
//! ## Networks
//!
//! - [`gated`] - Gated residual networks (convolutional and fully-connected)
//! - [`partial_conv`] - Partial convolution for masked inputs
//! - [`activation`] - Concatenated ELU and softplus
//! - [`layernorm`] - Layer normalization (flat and across channels)
//!
//! ## Numerics
//!
//! - [`numerics`] - Standard normal density, batch reductions, finite checks
//!
//! # Example
//!
//! ```ignore
//! use burn_flows_core::gated::GatedConvNetConfig;
//! use burn_flows_core::mask::checkerboard_mask;
//!
//! let mask = checkerboard_mask::<B>(28, 28, false, &device);
//! let net = GatedConvNetConfig::new(2).with_hidden(32).init::<B>(&device);
//!
//! // Freshly initialized networks output zeros
//! let out = net.forward(x);
//! ```

pub mod activation;
pub mod gated;
pub mod layernorm;
pub mod mask;
pub mod numerics;
pub mod partial_conv;

pub use gated::{GatedConvNet, GatedConvNetConfig, GatedLinearNet, GatedLinearNetConfig};
pub use mask::{MaskKind, channel_mask, checkerboard_mask, invert_mask};
