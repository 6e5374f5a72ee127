//! burn-flows: Normalizing-Flow Image Models in Pure Rust
//!
//! Exact-likelihood generative models for small images, built from
//! invertible layers on the Burn deep learning framework.
//!
//! # Architecture
//!
//! ```text
//! pixels -> dequantization -> coupling layers (+ squeeze / split) -> latent ~ N(0, 1)
//! ```
//!
//! Every layer implements [`FlowTransform`]: a forward pass that also returns
//! the log-determinant of its Jacobian, and an exact inverse. Stacking them in
//! an [`ImageFlow`] gives `log p(x)` by the change-of-variables formula and
//! new images by inverting prior samples.
//!
//! # Recipes
//!
//! - `simple`: uniform dequantization + 8 checkerboard couplings
//! - `vardeq`: variational dequantization + 8 checkerboard couplings
//! - `deep`: variational dequantization + 15 checkerboard couplings
//! - `linear`: variational dequantization + 8 fully-connected couplings
//! - `partial_conv`: variational dequantization + 8 partial-conv couplings
//! - `multiscale`: variational dequantization, squeeze and split stages
//!
//! # Backend Selection
//!
//! Choose a backend via feature flags:
//! - `ndarray`: CPU backend (default, no GPU required)
//! - `wgpu`: WebGPU backend (cross-platform GPU)
//!
//! # Example
//!
//! ```ignore
//! use burn_flows::{FlowConfig, FlowRecipe, create_flow};
//! use burn_flows::backends::{DefaultBackend, default_device};
//!
//! let device = default_device();
//! let config = FlowConfig::new(28, 1, FlowRecipe::Multiscale);
//! let (flow, factor) = create_flow::<DefaultBackend>(&config, &device)?;
//!
//! let bpd = flow.mean_bpd(images)?;
//! let samples = flow.sample(factor.apply([16, 1, 28, 28]), None, &device)?;
//! ```

pub mod backends;
pub mod config;
pub mod coupling;
pub mod dequantization;
pub mod error;
pub mod image_flow;
pub mod multiscale;
pub mod recipes;
pub mod serialize;
pub mod transform;

pub use config::{FlowConfig, FlowRecipe, SampleShapeFactor};
pub use coupling::{CouplingLayer, CouplingNet};
pub use dequantization::{Dequantization, VariationalDequantization};
pub use error::{FlowError, FlowResult};
pub use image_flow::ImageFlow;
pub use multiscale::{SplitFlow, SqueezeFlow};
pub use recipes::create_flow;
pub use transform::{Direction, FlowLayer, FlowOutput, FlowTransform};
