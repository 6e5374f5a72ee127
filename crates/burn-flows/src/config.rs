//! Flow configuration
//!
//! [`FlowConfig`] is what a caller hands to [`create_flow`](crate::create_flow).
//! It is plain data and (de)serializes with serde, so it can live in a JSON file:
//!
//! ```json
//! { "size": 28, "channels": 1, "model": "multiscale", "squeeze_twice": false }
//! ```
//!
//! Missing fields take their defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Named flow architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowRecipe {
    /// Uniform dequantization + 8 checkerboard couplings
    #[default]
    #[serde(rename = "simple")]
    Simple,
    /// Variational dequantization + 8 checkerboard couplings
    #[serde(rename = "vardeq")]
    VarDeq,
    /// Variational dequantization + 15 checkerboard couplings
    #[serde(rename = "deep", alias = "long")]
    Deep,
    /// Variational dequantization + 8 couplings with fully-connected networks
    #[serde(rename = "linear")]
    Linear,
    /// Variational dequantization + 8 couplings with partial convolutions
    #[serde(rename = "partial_conv", alias = "partial-conv")]
    PartialConv,
    /// Variational dequantization + squeeze/split multi-scale architecture
    #[serde(rename = "multiscale")]
    Multiscale,
}

impl FlowRecipe {
    /// All recipes, in documentation order
    pub const ALL: [FlowRecipe; 6] = [
        FlowRecipe::Simple,
        FlowRecipe::VarDeq,
        FlowRecipe::Deep,
        FlowRecipe::Linear,
        FlowRecipe::PartialConv,
        FlowRecipe::Multiscale,
    ];

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            FlowRecipe::Simple => "simple",
            FlowRecipe::VarDeq => "vardeq",
            FlowRecipe::Deep => "deep",
            FlowRecipe::Linear => "linear",
            FlowRecipe::PartialConv => "partial_conv",
            FlowRecipe::Multiscale => "multiscale",
        }
    }
}

impl fmt::Display for FlowRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlowRecipe {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(FlowRecipe::Simple),
            "vardeq" => Ok(FlowRecipe::VarDeq),
            "deep" | "long" => Ok(FlowRecipe::Deep),
            "linear" => Ok(FlowRecipe::Linear),
            "partial_conv" | "partial-conv" => Ok(FlowRecipe::PartialConv),
            "multiscale" => Ok(FlowRecipe::Multiscale),
            other => Err(FlowError::UnknownModel(other.to_string())),
        }
    }
}

/// Flow construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Height and width of the (square) images
    pub size: usize,
    /// Image channels
    pub channels: usize,
    /// Architecture to build
    pub model: FlowRecipe,
    /// Multiscale only: squeeze a second time instead of staying at half
    /// resolution. Defaults to `size >= 20`.
    pub squeeze_twice: Option<bool>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            size: 28,
            channels: 1,
            model: FlowRecipe::Simple,
            squeeze_twice: None,
        }
    }
}

impl FlowConfig {
    pub fn new(size: usize, channels: usize, model: FlowRecipe) -> Self {
        Self {
            size,
            channels,
            model,
            squeeze_twice: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_model(mut self, model: FlowRecipe) -> Self {
        self.model = model;
        self
    }

    pub fn with_squeeze_twice(mut self, squeeze_twice: bool) -> Self {
        self.squeeze_twice = Some(squeeze_twice);
        self
    }

    /// Per-sample image shape `[channels, size, size]`
    pub fn image_shape(&self) -> [usize; 3] {
        [self.channels, self.size, self.size]
    }

    /// Whether the multiscale recipe squeezes twice
    pub fn resolved_squeeze_twice(&self) -> bool {
        self.squeeze_twice.unwrap_or(self.size >= 20)
    }

    /// Rejects configurations no recipe can be built from
    pub fn validate(&self) -> FlowResult<()> {
        if self.size == 0 || self.channels == 0 {
            return Err(FlowError::InvalidConfig(format!(
                "size and channels must be positive, got size={} channels={}",
                self.size, self.channels
            )));
        }
        if self.model == FlowRecipe::Multiscale && self.size % 4 != 0 {
            return Err(FlowError::InvalidConfig(format!(
                "multiscale needs a size divisible by 4, got {}",
                self.size
            )));
        }
        Ok(())
    }
}

/// Scale from the image shape `[batch, c, h, w]` to the latent sampling shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleShapeFactor(pub [f64; 4]);

impl SampleShapeFactor {
    /// Factor of flows that keep the image shape
    pub const IDENTITY: SampleShapeFactor = SampleShapeFactor([1.0; 4]);

    /// Latent shape for a batch of images with the given shape
    pub fn apply(&self, shape: [usize; 4]) -> [usize; 4] {
        let mut out = [0; 4];
        for (o, (dim, factor)) in out.iter_mut().zip(shape.iter().zip(self.0)) {
            *o = (*dim as f64 * factor).round() as usize;
        }
        out
    }
}

impl fmt::Display for SampleShapeFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [b, c, h, w] = self.0;
        write!(f, "[{b}, {c}, {h}, {w}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_names_round_trip() {
        for recipe in FlowRecipe::ALL {
            assert_eq!(recipe.name().parse::<FlowRecipe>().unwrap(), recipe);
        }
        assert_eq!("long".parse::<FlowRecipe>().unwrap(), FlowRecipe::Deep);
        assert_eq!(
            "partial-conv".parse::<FlowRecipe>().unwrap(),
            FlowRecipe::PartialConv
        );
    }

    #[test]
    fn test_unknown_recipe() {
        let err = "glow".parse::<FlowRecipe>().unwrap_err();
        assert!(matches!(err, FlowError::UnknownModel(name) if name == "glow"));
    }

    #[test]
    fn test_config_from_json() {
        let config: FlowConfig =
            serde_json::from_str(r#"{ "size": 32, "model": "long", "squeeze_twice": false }"#)
                .unwrap();

        assert_eq!(config.size, 32);
        assert_eq!(config.channels, 1);
        assert_eq!(config.model, FlowRecipe::Deep);
        assert!(!config.resolved_squeeze_twice());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"deep\""));
    }

    #[test]
    fn test_unknown_recipe_in_json_fails() {
        let result = serde_json::from_str::<FlowConfig>(r#"{ "model": "glow" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(FlowConfig::default().validate().is_ok());
        assert!(FlowConfig::default().with_size(0).validate().is_err());
        assert!(FlowConfig::default().with_channels(0).validate().is_err());

        let multiscale = FlowConfig::new(30, 1, FlowRecipe::Multiscale);
        assert!(matches!(
            multiscale.validate(),
            Err(FlowError::InvalidConfig(_))
        ));
        assert!(multiscale.with_size(28).validate().is_ok());
    }

    #[test]
    fn test_squeeze_twice_default() {
        assert!(FlowConfig::default().with_size(28).resolved_squeeze_twice());
        assert!(!FlowConfig::default().with_size(16).resolved_squeeze_twice());
        assert!(
            !FlowConfig::default()
                .with_squeeze_twice(false)
                .resolved_squeeze_twice()
        );
    }

    #[test]
    fn test_sample_shape_factor_apply() {
        let factor = SampleShapeFactor([1.0, 8.0, 0.25, 0.25]);
        assert_eq!(factor.apply([16, 1, 28, 28]), [16, 8, 7, 7]);
        assert_eq!(SampleShapeFactor::IDENTITY.apply([2, 3, 8, 8]), [2, 3, 8, 8]);
        assert_eq!(factor.to_string(), "[1, 8, 0.25, 0.25]");
    }
}
